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

//! Binds a set aggregate to the physical representation of its value type.
//!
//! The representation is resolved once, when the accumulator is created:
//! [`PhysicalKind::of`] names it and [`factory_for`] returns the constructor
//! monomorphized for it. Nothing is dispatched per row.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::datatypes::{
    DataType, Decimal128Type, Float32Type, Float64Type, Int16Type, Int32Type,
    Int64Type, Int8Type, TimestampNanosecondType,
};
use datafusion_common::{internal_err, Result};
use log::debug;

use crate::comparison::{CustomComparator, CustomComparison, DefaultComparator};
use crate::groups::{SetAggregate, SetAggregateKind, SetGroupsAccumulator};
use crate::physical::{
    BooleanValues, BytesValues, BytesViewValues, ComplexValues, PhysicalKind,
    PhysicalType, PrimitiveValues, UnknownValues,
};

/// Everything needed to create a set aggregate
#[derive(Debug, Clone)]
pub struct SetAggregateArgs<'a> {
    pub kind: SetAggregateKind,
    /// Type of the accumulated values (the list element type for
    /// `set_union` and for intermediate input)
    pub data_type: &'a DataType,
    /// Equality of a custom type, replacing the one of its physical type
    pub comparison: Option<Arc<dyn CustomComparison>>,
    /// Metadata of the element field of list outputs, e.g. the extension type
    pub metadata: HashMap<String, String>,
    /// Whether `set_union` advertises direct conversion of input to state
    pub convert_to_state: bool,
}

impl<'a> SetAggregateArgs<'a> {
    pub fn new(kind: SetAggregateKind, data_type: &'a DataType) -> Self {
        Self {
            kind,
            data_type,
            comparison: None,
            metadata: HashMap::new(),
            convert_to_state: true,
        }
    }

    pub fn with_comparison(mut self, comparison: Option<Arc<dyn CustomComparison>>) -> Self {
        self.comparison = comparison;
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_convert_to_state(mut self, convert_to_state: bool) -> Self {
        self.convert_to_state = convert_to_state;
        self
    }
}

/// Constructor of a set aggregate for one [`PhysicalKind`]
pub type SetAggregateFactory = fn(&SetAggregateArgs<'_>) -> Result<Box<dyn SetAggregate>>;

/// Creates the set aggregate described by `args`.
///
/// Dictionary types are accumulated as their value type. A custom comparison
/// can only be bound to a scalar type.
pub fn create_set_aggregate(args: &SetAggregateArgs<'_>) -> Result<Box<dyn SetAggregate>> {
    let data_type = match args.data_type {
        DataType::Dictionary(_, value_type) => value_type.as_ref(),
        data_type => data_type,
    };
    let physical_kind = PhysicalKind::of(data_type)?;

    if let Some(comparison) = &args.comparison {
        if !physical_kind.is_scalar() {
            return internal_err!(
                "Custom comparison {} is not supported for non-scalar type {data_type}",
                comparison.name()
            );
        }
        debug!(
            "Creating {} over {data_type} ({physical_kind}) with custom comparison {}",
            args.kind,
            comparison.name()
        );
    } else {
        debug!("Creating {} over {data_type} ({physical_kind})", args.kind);
    }

    let args = SetAggregateArgs {
        data_type,
        ..args.clone()
    };
    factory_for(physical_kind)(&args)
}

/// The constructor instantiated for `kind`
pub fn factory_for(kind: PhysicalKind) -> SetAggregateFactory {
    match kind {
        PhysicalKind::Boolean => create::<BooleanValues>,
        PhysicalKind::Int8 => create::<PrimitiveValues<Int8Type>>,
        PhysicalKind::Int16 => create::<PrimitiveValues<Int16Type>>,
        PhysicalKind::Int32 => create::<PrimitiveValues<Int32Type>>,
        PhysicalKind::Int64 => create::<PrimitiveValues<Int64Type>>,
        PhysicalKind::Int128 => create_long_decimal,
        PhysicalKind::Float32 => create::<PrimitiveValues<Float32Type>>,
        PhysicalKind::Float64 => create::<PrimitiveValues<Float64Type>>,
        PhysicalKind::Timestamp => create::<PrimitiveValues<TimestampNanosecondType>>,
        PhysicalKind::Bytes => create_bytes,
        PhysicalKind::Complex => create::<ComplexValues>,
        PhysicalKind::Unknown => create::<UnknownValues>,
    }
}

fn create<P: PhysicalType>(args: &SetAggregateArgs<'_>) -> Result<Box<dyn SetAggregate>> {
    let physical = P::try_new(args.data_type)?;
    let aggregate: Box<dyn SetAggregate> = match &args.comparison {
        Some(comparison) => Box::new(
            SetGroupsAccumulator::new(
                args.kind,
                physical,
                CustomComparator::new(Arc::clone(comparison)),
            )
            .with_item_metadata(args.metadata.clone())
            .with_convert_to_state(args.convert_to_state),
        ),
        None => Box::new(
            SetGroupsAccumulator::new(args.kind, physical, DefaultComparator::default())
                .with_item_metadata(args.metadata.clone())
                .with_convert_to_state(args.convert_to_state),
        ),
    };
    Ok(aggregate)
}

/// 128-bit integers only back long decimals
fn create_long_decimal(args: &SetAggregateArgs<'_>) -> Result<Box<dyn SetAggregate>> {
    match args.data_type {
        DataType::Decimal128(_, _) => create::<PrimitiveValues<Decimal128Type>>(args),
        other => internal_err!("Non-decimal use of HUGEINT is not supported: {other}"),
    }
}

fn create_bytes(args: &SetAggregateArgs<'_>) -> Result<Box<dyn SetAggregate>> {
    match args.data_type {
        DataType::LargeUtf8 | DataType::LargeBinary => create::<BytesValues<i64>>(args),
        DataType::Utf8View | DataType::BinaryView => create::<BytesViewValues>(args),
        _ => create::<BytesValues<i32>>(args),
    }
}
