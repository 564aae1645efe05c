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

//! [`SetGroupsAccumulator`]: the `GroupsAccumulator` shared by `set_agg`,
//! `set_union` and the internal count distinct.
//!
//! Every group holds a null flag and a [`SetAccumulator`]. The three
//! aggregates differ only in how raw input clears the flag and in what they
//! emit:
//!
//! | aggregate                  | raw input | final output                  | state     |
//! |----------------------------|-----------|-------------------------------|-----------|
//! | `set_agg`                  | `T`       | `List<T>`, may be null        | `List<T>` |
//! | `set_union`                | `List<T>` | `List<T>`, never null         | `List<T>` |
//! | `$internal$count_distinct` | `T`       | `Int64`, never null           | `List<T>` |

use std::collections::HashMap;
use std::fmt::{self, Debug, Display};
use std::mem::size_of;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, Int64Array, ListArray};
use arrow::buffer::{BooleanBuffer, NullBuffer, OffsetBuffer};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, FieldRef};
use datafusion_common::{internal_err, not_impl_err, Result};
use datafusion_expr_common::groups_accumulator::{EmitTo, GroupsAccumulator};

use crate::comparison::ElementComparator;
use crate::convert::set_union_to_state;
use crate::physical::{PhysicalKind, PhysicalType, ValueReader, ValueStore};
use crate::set_accumulator::SetAccumulator;

/// The members of the set aggregate family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetAggregateKind {
    SetAgg,
    SetUnion,
    CountDistinct,
}

impl SetAggregateKind {
    /// Name the function is registered under (before any prefix)
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetAgg => "set_agg",
            Self::SetUnion => "set_union",
            Self::CountDistinct => "$internal$count_distinct",
        }
    }

    /// True when the raw input is a list per row rather than a scalar
    pub fn has_list_input(&self) -> bool {
        matches!(self, Self::SetUnion)
    }
}

impl Display for SetAggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A set aggregate bound to one physical representation.
///
/// Extends [`GroupsAccumulator`] with accumulation into a single group (every
/// row of the batch goes to group 0) and some introspection.
pub trait SetAggregate: GroupsAccumulator + Debug + Sync {
    fn kind(&self) -> SetAggregateKind;

    fn physical_kind(&self) -> PhysicalKind;

    /// Element type of the accumulated values
    fn value_type(&self) -> &DataType;

    fn uses_custom_comparison(&self) -> bool;

    /// Number of groups currently held
    fn num_groups(&self) -> usize;

    /// Accumulates every selected raw input row into group 0
    fn update_single_group(
        &mut self,
        values: &[ArrayRef],
        opt_filter: Option<&BooleanArray>,
    ) -> Result<()>;

    /// Merges every selected intermediate row into group 0
    fn merge_single_group(
        &mut self,
        values: &[ArrayRef],
        opt_filter: Option<&BooleanArray>,
    ) -> Result<()>;

    fn into_groups_accumulator(self: Box<Self>) -> Box<dyn GroupsAccumulator>;
}

/// Where the rows of a batch are accumulated
#[derive(Debug, Clone, Copy)]
enum GroupTarget<'a> {
    /// Every row goes to group 0
    Single,
    /// Row `i` goes to group `group_indices[i]`
    PerRow(&'a [usize]),
}

impl GroupTarget<'_> {
    /// Group indices and filter must cover every row of the batch
    fn check_rows(
        &self,
        num_rows: usize,
        opt_filter: Option<&BooleanArray>,
    ) -> Result<()> {
        if let Self::PerRow(group_indices) = self {
            if group_indices.len() != num_rows {
                return internal_err!(
                    "{} group indices for a batch of {num_rows} rows",
                    group_indices.len()
                );
            }
        }
        match opt_filter {
            Some(filter) if filter.len() != num_rows => internal_err!(
                "Filter of {} rows applied to {num_rows} rows",
                filter.len()
            ),
            _ => Ok(()),
        }
    }

    fn group(&self, row: usize) -> usize {
        match self {
            Self::Single => 0,
            Self::PerRow(group_indices) => group_indices[row],
        }
    }
}

/// A row takes part in aggregation only when the filter is absent or is
/// `true` (not null) for it
fn is_selected(opt_filter: Option<&BooleanArray>, row: usize) -> bool {
    opt_filter.map_or(true, |filter| filter.is_valid(row) && filter.value(row))
}

fn single_argument(values: &[ArrayRef], kind: SetAggregateKind) -> Result<&ArrayRef> {
    match values {
        [value] => Ok(value),
        _ => internal_err!("{kind} expects a single argument, got {}", values.len()),
    }
}

#[derive(Debug)]
struct GroupState<S: ValueStore> {
    /// Set until the group sees a non-null value (or, for `set_union`, any row)
    is_null: bool,
    set: SetAccumulator<S>,
}

impl<S: ValueStore> Default for GroupState<S> {
    fn default() -> Self {
        Self {
            is_null: true,
            set: SetAccumulator::default(),
        }
    }
}

/// Groups accumulator of the set aggregate family, see the module docs.
///
/// `P` is the physical representation of the values and `C` the equality
/// strategy; both are fixed when the accumulator is created.
pub struct SetGroupsAccumulator<P: PhysicalType, C: ElementComparator> {
    kind: SetAggregateKind,
    physical: P,
    comparator: C,
    groups: Vec<GroupState<P::Store>>,
    /// Item field of the emitted lists
    item_field: FieldRef,
    /// Whether `set_union` advertises [`GroupsAccumulator::convert_to_state`]
    convert_to_state: bool,
}

impl<P: PhysicalType, C: ElementComparator> Debug for SetGroupsAccumulator<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetGroupsAccumulator")
            .field("kind", &self.kind)
            .field("physical", &self.physical.kind())
            .field("data_type", self.physical.data_type())
            .field("comparator", &self.comparator)
            .field("groups", &self.groups.len())
            .finish()
    }
}

impl<P: PhysicalType, C: ElementComparator> SetGroupsAccumulator<P, C> {
    pub fn new(kind: SetAggregateKind, physical: P, comparator: C) -> Self {
        let item_field = Arc::new(Field::new_list_field(physical.data_type().clone(), true));
        Self {
            kind,
            physical,
            comparator,
            groups: vec![],
            item_field,
            convert_to_state: true,
        }
    }

    /// Attaches `metadata` (such as an extension type name) to the item
    /// field of the emitted lists
    pub fn with_item_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.item_field = Arc::new(self.item_field.as_ref().clone().with_metadata(metadata));
        self
    }

    /// Enables or disables direct conversion of `set_union` input to state
    pub fn with_convert_to_state(mut self, enabled: bool) -> Self {
        self.convert_to_state = enabled;
        self
    }

    /// Creates state for the groups seen for the first time
    fn initialize_new_groups(&mut self, total_num_groups: usize) {
        if total_num_groups > self.groups.len() {
            self.groups.resize_with(total_num_groups, GroupState::default);
        }
    }

    /// Dictionary encoded input is accumulated as its values
    fn unpack(&self, values: &ArrayRef) -> Result<ArrayRef> {
        match values.data_type() {
            DataType::Dictionary(_, _) => Ok(cast(values, self.physical.data_type())?),
            _ => Ok(Arc::clone(values)),
        }
    }

    /// Scalar raw input: a non-null value clears the group's null flag and is
    /// inserted, a null value leaves the group untouched.
    fn add_raw_values(
        &mut self,
        values: &ArrayRef,
        target: GroupTarget<'_>,
        opt_filter: Option<&BooleanArray>,
    ) -> Result<()> {
        target.check_rows(values.len(), opt_filter)?;
        let values = self.unpack(values)?;
        let reader = self.physical.reader(&values)?;
        for row in 0..values.len() {
            if !is_selected(opt_filter, row) || !reader.is_valid(row) {
                continue;
            }
            let group = &mut self.groups[target.group(row)];
            group.is_null = false;
            group.set.insert(&reader, row, &self.comparator);
        }
        Ok(())
    }

    /// List input: raw `set_union` rows and the intermediate state of every
    /// aggregate of the family.
    ///
    /// A non-null list clears the group's null flag and its non-null
    /// elements are inserted. With `clear_null_for_all_inputs` every selected
    /// row clears the flag, null lists included.
    fn add_arrays(
        &mut self,
        values: &ArrayRef,
        target: GroupTarget<'_>,
        opt_filter: Option<&BooleanArray>,
        clear_null_for_all_inputs: bool,
    ) -> Result<()> {
        let Some(lists) = values.as_list_opt::<i32>() else {
            return internal_err!(
                "{} expects List<{}> arrays, got {}",
                self.kind,
                self.physical.data_type(),
                values.data_type()
            );
        };
        target.check_rows(lists.len(), opt_filter)?;
        let elements = self.unpack(lists.values())?;
        let reader = self.physical.reader(&elements)?;
        let offsets = lists.value_offsets();

        for row in 0..lists.len() {
            if !is_selected(opt_filter, row) {
                continue;
            }
            let group = &mut self.groups[target.group(row)];
            if clear_null_for_all_inputs {
                group.is_null = false;
            }
            if lists.is_null(row) {
                continue;
            }
            group.is_null = false;
            for index in offsets[row] as usize..offsets[row + 1] as usize {
                if reader.is_valid(index) {
                    group.set.insert(&reader, index, &self.comparator);
                }
            }
        }
        Ok(())
    }

    fn update(
        &mut self,
        values: &[ArrayRef],
        target: GroupTarget<'_>,
        opt_filter: Option<&BooleanArray>,
    ) -> Result<()> {
        let values = single_argument(values, self.kind)?;
        if self.kind.has_list_input() {
            self.add_arrays(values, target, opt_filter, true)
        } else {
            self.add_raw_values(values, target, opt_filter)
        }
    }

    fn merge(
        &mut self,
        values: &[ArrayRef],
        target: GroupTarget<'_>,
        opt_filter: Option<&BooleanArray>,
    ) -> Result<()> {
        let values = single_argument(values, self.kind)?;
        self.add_arrays(values, target, opt_filter, false)
    }

    /// One list per group. Groups still flagged null are null rows when
    /// `null_for_null_groups` is set and empty lists otherwise.
    fn build_lists(
        &self,
        groups: &[GroupState<P::Store>],
        null_for_null_groups: bool,
    ) -> Result<ArrayRef> {
        let values = self
            .physical
            .build(groups.iter().map(|group| group.set.values()))?;
        let offsets =
            OffsetBuffer::<i32>::from_lengths(groups.iter().map(|group| group.set.len()));
        let nulls = null_for_null_groups
            .then(|| {
                NullBuffer::new(BooleanBuffer::collect_bool(groups.len(), |index| {
                    !groups[index].is_null
                }))
            })
            .filter(|nulls| nulls.null_count() > 0);
        Ok(Arc::new(ListArray::try_new(
            Arc::clone(&self.item_field),
            offsets,
            values,
            nulls,
        )?))
    }
}

impl<P: PhysicalType, C: ElementComparator> GroupsAccumulator
    for SetGroupsAccumulator<P, C>
{
    fn update_batch(
        &mut self,
        values: &[ArrayRef],
        group_indices: &[usize],
        opt_filter: Option<&BooleanArray>,
        total_num_groups: usize,
    ) -> Result<()> {
        self.initialize_new_groups(total_num_groups);
        self.update(values, GroupTarget::PerRow(group_indices), opt_filter)
    }

    fn evaluate(&mut self, emit_to: EmitTo) -> Result<ArrayRef> {
        let groups = emit_to.take_needed(&mut self.groups);
        match self.kind {
            SetAggregateKind::SetAgg => self.build_lists(&groups, true),
            SetAggregateKind::SetUnion => self.build_lists(&groups, false),
            SetAggregateKind::CountDistinct => Ok(Arc::new(Int64Array::from_iter_values(
                groups.iter().map(|group| group.set.len() as i64),
            ))),
        }
    }

    fn state(&mut self, emit_to: EmitTo) -> Result<Vec<ArrayRef>> {
        let groups = emit_to.take_needed(&mut self.groups);
        let null_for_null_groups = self.kind != SetAggregateKind::SetUnion;
        Ok(vec![self.build_lists(&groups, null_for_null_groups)?])
    }

    fn merge_batch(
        &mut self,
        values: &[ArrayRef],
        group_indices: &[usize],
        opt_filter: Option<&BooleanArray>,
        total_num_groups: usize,
    ) -> Result<()> {
        self.initialize_new_groups(total_num_groups);
        self.merge(values, GroupTarget::PerRow(group_indices), opt_filter)
    }

    fn convert_to_state(
        &self,
        values: &[ArrayRef],
        opt_filter: Option<&BooleanArray>,
    ) -> Result<Vec<ArrayRef>> {
        if self.kind != SetAggregateKind::SetUnion {
            return not_impl_err!(
                "{} does not convert input batches to state",
                self.kind
            );
        }
        let values = single_argument(values, self.kind)?;
        Ok(vec![set_union_to_state(values, opt_filter)?])
    }

    fn supports_convert_to_state(&self) -> bool {
        self.kind == SetAggregateKind::SetUnion && self.convert_to_state
    }

    fn size(&self) -> usize {
        self.groups.capacity() * size_of::<GroupState<P::Store>>()
            + self.groups.iter().map(|group| group.set.size()).sum::<usize>()
    }
}

impl<P: PhysicalType, C: ElementComparator> SetAggregate for SetGroupsAccumulator<P, C> {
    fn kind(&self) -> SetAggregateKind {
        self.kind
    }

    fn physical_kind(&self) -> PhysicalKind {
        self.physical.kind()
    }

    fn value_type(&self) -> &DataType {
        self.physical.data_type()
    }

    fn uses_custom_comparison(&self) -> bool {
        self.comparator.is_custom()
    }

    fn num_groups(&self) -> usize {
        self.groups.len()
    }

    fn update_single_group(
        &mut self,
        values: &[ArrayRef],
        opt_filter: Option<&BooleanArray>,
    ) -> Result<()> {
        self.initialize_new_groups(1);
        self.update(values, GroupTarget::Single, opt_filter)
    }

    fn merge_single_group(
        &mut self,
        values: &[ArrayRef],
        opt_filter: Option<&BooleanArray>,
    ) -> Result<()> {
        self.initialize_new_groups(1);
        self.merge(values, GroupTarget::Single, opt_filter)
    }

    fn into_groups_accumulator(self: Box<Self>) -> Box<dyn GroupsAccumulator> {
        self
    }
}
