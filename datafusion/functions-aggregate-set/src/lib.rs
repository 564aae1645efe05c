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

//! Duplicate eliminating set aggregates for [DataFusion].
//!
//! This crate provides three aggregates that collect the distinct values of
//! each group:
//!
//! * `set_agg(T) -> array(T)`: the distinct non-null values, or null if the
//!   group saw none
//! * `set_union(array(T)) -> array(T)`: the distinct non-null elements of all
//!   arrays, never null
//! * `$internal$count_distinct(T) -> bigint`: the number of distinct non-null
//!   values, used by the planner to check distinct cardinalities
//!
//! All three are [`GroupsAccumulator`]s whose intermediate state is
//! `array(T)`, so partial results of any of them can be merged in a later
//! stage. `set_union` can also turn its input directly into state, see
//! [`convert`].
//!
//! # Using the aggregates
//!
//! Register the functions with a [`FunctionRegistry`], such as a
//! `SessionContext`, using [`register_all`]:
//!
//! ```
//! # use datafusion_common::Result;
//! # use datafusion_expr::registry::{FunctionRegistry, MemoryFunctionRegistry};
//! # use datafusion_functions_aggregate_set::register_all;
//! # fn main() -> Result<()> {
//! let mut registry = MemoryFunctionRegistry::new();
//! register_all(&mut registry)?;
//!
//! let set_agg = registry.udaf("set_agg")?;
//! assert_eq!(set_agg.name(), "set_agg");
//! # Ok(())
//! # }
//! ```
//!
//! [DataFusion]: https://crates.io/crates/datafusion
//! [`GroupsAccumulator`]: datafusion_expr_common::groups_accumulator::GroupsAccumulator
//! [`FunctionRegistry`]: datafusion_execution::FunctionRegistry

#![doc(
    html_logo_url = "https://raw.githubusercontent.com/apache/datafusion/19fe44cf2f30cbdd63d4a4f52c74055163c6cc38/docs/logos/standalone_logo/logo_original.svg",
    html_favicon_url = "https://raw.githubusercontent.com/apache/datafusion/19fe44cf2f30cbdd63d4a4f52c74055163c6cc38/docs/logos/standalone_logo/logo_original.svg"
)]
#![cfg_attr(docsrs, feature(doc_cfg))]
// Make sure fast / cheap clones on Arc are explicit:
// https://github.com/apache/datafusion/issues/11143
#![deny(clippy::clone_on_ref_ptr)]
// https://github.com/apache/datafusion/issues/18503
#![deny(clippy::needless_pass_by_value)]
#![cfg_attr(test, allow(clippy::needless_pass_by_value))]

pub mod accumulator;
pub mod comparison;
pub mod convert;
pub mod dispatch;
pub mod groups;
pub mod options;
pub mod physical;
pub mod set_accumulator;
pub mod udaf;

use std::sync::Arc;

use datafusion_common::{plan_err, Result};
use datafusion_execution::FunctionRegistry;
use datafusion_expr::AggregateUDF;
use log::debug;

pub use comparison::{
    CustomComparison, CustomComparisonRegistry, TimestampWithTimeZoneComparison,
};
pub use dispatch::{create_set_aggregate, SetAggregateArgs};
pub use groups::{SetAggregate, SetAggregateKind};
pub use options::SetAggregateOptions;
pub use udaf::{count_distinct_udaf, set_agg_udaf, set_union_udaf, SetAggregateUdaf};

fn set_aggregate_udaf(
    kind: SetAggregateKind,
    options: &SetAggregateOptions,
) -> Arc<AggregateUDF> {
    Arc::new(AggregateUDF::from(SetAggregateUdaf::with_options(kind, options)))
}

/// Returns the user facing set aggregates
pub fn all_default_set_aggregates(options: &SetAggregateOptions) -> Vec<Arc<AggregateUDF>> {
    vec![
        set_aggregate_udaf(SetAggregateKind::SetAgg, options),
        set_aggregate_udaf(SetAggregateKind::SetUnion, options),
    ]
}

/// Returns the set aggregates only the planner invokes
pub fn all_internal_set_aggregates(options: &SetAggregateOptions) -> Vec<Arc<AggregateUDF>> {
    vec![set_aggregate_udaf(SetAggregateKind::CountDistinct, options)]
}

fn register(
    registry: &mut dyn FunctionRegistry,
    udaf: Arc<AggregateUDF>,
    overwrite: bool,
) -> Result<()> {
    if !overwrite && registry.udaf(udaf.name()).is_ok() {
        return plan_err!("Aggregate function {} is already registered", udaf.name());
    }
    if let Some(existing_udaf) = registry.register_udaf(udaf)? {
        debug!("Overwrite existing UDAF: {}", existing_udaf.name());
    }
    Ok(())
}

/// Registers `set_agg`: `T -> array(T)`
pub fn register_set_agg(
    registry: &mut dyn FunctionRegistry,
    options: &SetAggregateOptions,
) -> Result<()> {
    register(
        registry,
        set_aggregate_udaf(SetAggregateKind::SetAgg, options),
        options.overwrite,
    )
}

/// Registers `set_union`: `array(T) -> array(T)`
pub fn register_set_union(
    registry: &mut dyn FunctionRegistry,
    options: &SetAggregateOptions,
) -> Result<()> {
    register(
        registry,
        set_aggregate_udaf(SetAggregateKind::SetUnion, options),
        options.overwrite,
    )
}

/// Registers `$internal$count_distinct`: `T -> bigint`
pub fn register_count_distinct(
    registry: &mut dyn FunctionRegistry,
    options: &SetAggregateOptions,
) -> Result<()> {
    register(
        registry,
        set_aggregate_udaf(SetAggregateKind::CountDistinct, options),
        options.overwrite,
    )
}

/// Registers all set aggregates with a [`FunctionRegistry`] using the
/// default options
pub fn register_all(registry: &mut dyn FunctionRegistry) -> Result<()> {
    register_all_with_options(registry, &SetAggregateOptions::default())
}

/// Registers the set aggregates selected by `options`
pub fn register_all_with_options(
    registry: &mut dyn FunctionRegistry,
    options: &SetAggregateOptions,
) -> Result<()> {
    let mut functions = all_default_set_aggregates(options);
    if options.include_internal_functions {
        functions.extend(all_internal_set_aggregates(options));
    }

    functions
        .into_iter()
        .try_for_each(|udaf| register(registry, udaf, options.overwrite))
}
