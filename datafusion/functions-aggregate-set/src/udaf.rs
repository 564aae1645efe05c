// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! [`AggregateUDFImpl`] of `set_agg`, `set_union` and
//! `$internal$count_distinct`
//!
//! | function                   | argument  | return     | state     |
//! |----------------------------|-----------|------------|-----------|
//! | `set_agg`                  | `T`       | `List<T>`  | `List<T>` |
//! | `set_union`                | `List<T>` | `List<T>`  | `List<T>` |
//! | `$internal$count_distinct` | `T`       | `Int64`    | `List<T>` |
//!
//! Every aggregation mode hands the raw argument to the accumulator, so the
//! element type `T` always comes from it: the argument itself, or its list
//! item for `set_union`.

use std::any::Any;
use std::fmt::{self, Debug};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, FieldRef};
use datafusion_common::{internal_err, plan_err, Result, ScalarValue};
use datafusion_expr::function::{AccumulatorArgs, StateFieldsArgs};
use datafusion_expr::utils::format_state_name;
use datafusion_expr::{Accumulator, AggregateUDF, AggregateUDFImpl, Signature, Volatility};
use datafusion_expr_common::groups_accumulator::GroupsAccumulator;

use crate::accumulator::SingleGroupAccumulator;
use crate::comparison::CustomComparisonRegistry;
use crate::dispatch::{create_set_aggregate, SetAggregateArgs};
use crate::groups::{SetAggregate, SetAggregateKind};
use crate::options::SetAggregateOptions;

/// Creates the [`AggregateUDF`] of `set_agg` with the default options
pub fn set_agg_udaf() -> Arc<AggregateUDF> {
    Arc::new(AggregateUDF::from(SetAggregateUdaf::new(SetAggregateKind::SetAgg)))
}

/// Creates the [`AggregateUDF`] of `set_union` with the default options
pub fn set_union_udaf() -> Arc<AggregateUDF> {
    Arc::new(AggregateUDF::from(SetAggregateUdaf::new(SetAggregateKind::SetUnion)))
}

/// Creates the [`AggregateUDF`] of `$internal$count_distinct` with the
/// default options
pub fn count_distinct_udaf() -> Arc<AggregateUDF> {
    Arc::new(AggregateUDF::from(SetAggregateUdaf::new(
        SetAggregateKind::CountDistinct,
    )))
}

/// One member of the set aggregate family
pub struct SetAggregateUdaf {
    name: String,
    kind: SetAggregateKind,
    signature: Signature,
    convert_to_state: bool,
    comparisons: Arc<CustomComparisonRegistry>,
}

impl Debug for SetAggregateUdaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetAggregateUdaf")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("convert_to_state", &self.convert_to_state)
            .field("accumulator", &"<FUNC>")
            .finish()
    }
}

impl PartialEq for SetAggregateUdaf {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.kind == other.kind
            && self.signature == other.signature
            && self.convert_to_state == other.convert_to_state
            && Arc::ptr_eq(&self.comparisons, &other.comparisons)
    }
}

impl Eq for SetAggregateUdaf {}

impl Hash for SetAggregateUdaf {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.kind.hash(state);
        self.convert_to_state.hash(state);
    }
}

impl SetAggregateUdaf {
    pub fn new(kind: SetAggregateKind) -> Self {
        Self::with_options(kind, &SetAggregateOptions::default())
    }

    /// The function for `kind`, named `{prefix}{name}` and configured by
    /// `options`
    pub fn with_options(kind: SetAggregateKind, options: &SetAggregateOptions) -> Self {
        Self {
            name: format!("{}{}", options.prefix, kind.name()),
            kind,
            signature: Signature::any(1, Volatility::Immutable),
            convert_to_state: options.enable_convert_to_state,
            comparisons: Arc::clone(&options.custom_comparisons),
        }
    }

    pub fn kind(&self) -> SetAggregateKind {
        self.kind
    }

    fn single_argument<'a, T>(&self, args: &'a [T]) -> Result<&'a T> {
        match args {
            [arg] => Ok(arg),
            _ => plan_err!(
                "{} expects exactly one argument, got {}",
                self.name,
                args.len()
            ),
        }
    }

    /// The element field bound to `T` for the argument `arg`
    fn element_field(&self, arg: &FieldRef) -> Result<FieldRef> {
        if !self.kind.has_list_input() {
            return Ok(Arc::clone(arg));
        }
        match arg.data_type() {
            DataType::List(item) => Ok(Arc::clone(item)),
            other => plan_err!("{} expects an array argument, got {other}", self.name),
        }
    }

    /// `List<T>` for the argument `arg`
    fn list_of_elements(&self, arg: &FieldRef) -> Result<DataType> {
        let element = self.element_field(arg)?;
        Ok(DataType::List(Arc::new(list_item(&element))))
    }

    /// Creates the accumulator for the raw argument `arg`.
    ///
    /// An element tagged with an extension type that has a custom comparison
    /// is accumulated with it.
    pub fn set_aggregate(&self, arg: &FieldRef) -> Result<Box<dyn SetAggregate>> {
        let element = self.element_field(arg)?;
        let args = SetAggregateArgs::new(self.kind, element.data_type())
            .with_comparison(self.comparisons.for_field(&element))
            .with_metadata(element.metadata().clone())
            .with_convert_to_state(self.convert_to_state);
        create_set_aggregate(&args)
    }

    fn argument_field(&self, acc_args: &AccumulatorArgs) -> Result<FieldRef> {
        match acc_args.exprs {
            [expr] => expr.return_field(acc_args.schema),
            exprs => internal_err!(
                "{} expects a single argument, got {}",
                self.name,
                exprs.len()
            ),
        }
    }
}

/// The list item field for elements described by `element`, keeping the
/// extension type metadata. Dictionary elements are accumulated, and so
/// emitted, as their values.
fn list_item(element: &Field) -> Field {
    let data_type = match element.data_type() {
        DataType::Dictionary(_, value_type) => value_type.as_ref(),
        data_type => data_type,
    };
    Field::new_list_field(data_type.clone(), true).with_metadata(element.metadata().clone())
}

impl AggregateUDFImpl for SetAggregateUdaf {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn return_type(&self, arg_types: &[DataType]) -> Result<DataType> {
        let arg = Arc::new(Field::new(
            "arg",
            self.single_argument(arg_types)?.clone(),
            true,
        ));
        match self.kind {
            SetAggregateKind::CountDistinct => Ok(DataType::Int64),
            SetAggregateKind::SetAgg | SetAggregateKind::SetUnion => {
                self.list_of_elements(&arg)
            }
        }
    }

    fn return_field(&self, arg_fields: &[FieldRef]) -> Result<FieldRef> {
        let arg = self.single_argument(arg_fields)?;
        let data_type = match self.kind {
            SetAggregateKind::CountDistinct => {
                self.element_field(arg)?;
                DataType::Int64
            }
            SetAggregateKind::SetAgg | SetAggregateKind::SetUnion => {
                self.list_of_elements(arg)?
            }
        };
        Ok(Arc::new(Field::new(self.name(), data_type, self.is_nullable())))
    }

    /// Only `set_agg` returns null, for a group without non-null values
    fn is_nullable(&self) -> bool {
        matches!(self.kind, SetAggregateKind::SetAgg)
    }

    fn state_fields(&self, args: StateFieldsArgs) -> Result<Vec<FieldRef>> {
        let arg = self.single_argument(args.input_fields)?;
        Ok(vec![Arc::new(Field::new(
            format_state_name(args.name, "set"),
            self.list_of_elements(arg)?,
            true,
        ))])
    }

    fn accumulator(&self, acc_args: AccumulatorArgs) -> Result<Box<dyn Accumulator>> {
        let arg = self.argument_field(&acc_args)?;
        Ok(Box::new(SingleGroupAccumulator::try_new(
            self.set_aggregate(&arg)?,
        )?))
    }

    fn groups_accumulator_supported(&self, _args: AccumulatorArgs) -> bool {
        true
    }

    fn create_groups_accumulator(
        &self,
        args: AccumulatorArgs,
    ) -> Result<Box<dyn GroupsAccumulator>> {
        let arg = self.argument_field(&args)?;
        Ok(self.set_aggregate(&arg)?.into_groups_accumulator())
    }

    fn default_value(&self, data_type: &DataType) -> Result<ScalarValue> {
        match self.kind {
            SetAggregateKind::CountDistinct => Ok(ScalarValue::Int64(Some(0))),
            _ => ScalarValue::try_from(data_type),
        }
    }
}
