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

//! Direct conversion of `set_union` input into its intermediate state.
//!
//! The raw input of `set_union` already has the shape of its state (one list
//! per row), so [`GroupsAccumulator::convert_to_state`] avoids building any
//! accumulator:
//!
//! ```text
//!  input                  null rows rewritten       unselected rows masked
//! ┌────────┐              ┌────────┐                ┌────────┐
//! │ [1, 2] │              │ [1, 2] │                │ [1, 2] │
//! │  NULL  │  ─────────▶  │   []   │  ──────────▶   │  NULL  │ filter: false
//! │  [3]   │              │  [3]   │                │  [3]   │
//! └────────┘              └────────┘                └────────┘
//! ```
//!
//! * No nulls and no filter: the input `ArrayRef` itself is returned
//! * Nulls: `set_union(NULL)` is the empty set, so null rows become empty lists
//! * Filter: rows that did not pass are null in a view that shares the
//!   offsets and values of the (rewritten) input
//!
//! [`GroupsAccumulator::convert_to_state`]: datafusion_expr_common::groups_accumulator::GroupsAccumulator::convert_to_state

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, ListArray, UInt64Array};
use arrow::buffer::{BooleanBuffer, NullBuffer, OffsetBuffer};
use arrow::compute::take;
use arrow::datatypes::DataType;
use datafusion_common::{internal_err, Result};
use log::trace;

/// Converts a batch of `set_union` input lists into `set_union` state.
///
/// The output shares the buffers of `values`; holding the returned array keeps
/// them alive.
pub fn set_union_to_state(
    values: &ArrayRef,
    opt_filter: Option<&BooleanArray>,
) -> Result<ArrayRef> {
    let Some(lists) = values.as_list_opt::<i32>() else {
        return internal_err!(
            "set_union state conversion expects a List input, got {}",
            values.data_type()
        );
    };

    let state: ArrayRef = if lists.null_count() > 0 {
        Arc::new(replace_nulls_with_empty(lists)?)
    } else {
        Arc::clone(values)
    };

    match opt_filter {
        Some(filter) if !is_all_selected(filter) => {
            trace!(
                "set_union state conversion masking {} unselected rows",
                filter.len() - filter.true_count()
            );
            Ok(Arc::new(mask_unselected(state.as_list::<i32>(), filter)?))
        }
        _ => Ok(state),
    }
}

fn is_all_selected(filter: &BooleanArray) -> bool {
    filter.true_count() == filter.len()
}

fn list_field(lists: &ListArray) -> Result<&Arc<arrow::datatypes::Field>> {
    match lists.data_type() {
        DataType::List(field) => Ok(field),
        other => internal_err!("Expected a List array, got {other}"),
    }
}

/// Returns `lists` with every null row replaced by a non-null empty list
pub fn replace_nulls_with_empty(lists: &ListArray) -> Result<ListArray> {
    let field = Arc::clone(list_field(lists)?);
    let offsets = lists.value_offsets();
    let span = |row: usize| (offsets[row] as usize)..(offsets[row + 1] as usize);

    // null rows usually span no values, then dropping the null buffer is enough
    let null_rows_empty =
        (0..lists.len()).all(|row| lists.is_valid(row) || span(row).is_empty());
    if null_rows_empty {
        trace!("set_union state conversion reusing offsets of {} rows", lists.len());
        return Ok(ListArray::try_new(
            field,
            lists.offsets().clone(),
            Arc::clone(lists.values()),
            None,
        )?);
    }

    trace!("set_union state conversion copying {} rows", lists.len());
    let lengths = (0..lists.len()).map(|row| {
        if lists.is_valid(row) {
            span(row).len()
        } else {
            0
        }
    });
    let offsets = OffsetBuffer::<i32>::from_lengths(lengths);
    let indices = UInt64Array::from_iter_values(
        (0..lists.len())
            .filter(|row| lists.is_valid(*row))
            .flat_map(|row| span(row).map(|index| index as u64)),
    );
    let values = take(lists.values().as_ref(), &indices, None)?;
    Ok(ListArray::try_new(field, offsets, values, None)?)
}

/// Returns a view of `lists` where every row not selected by `filter` is null.
///
/// Offsets and values are shared with `lists`, only the null buffer is new.
pub fn mask_unselected(lists: &ListArray, filter: &BooleanArray) -> Result<ListArray> {
    if filter.len() != lists.len() {
        return internal_err!(
            "Filter of {} rows applied to {} rows",
            filter.len(),
            lists.len()
        );
    }
    let selected = NullBuffer::new(BooleanBuffer::collect_bool(filter.len(), |row| {
        filter.is_valid(row) && filter.value(row)
    }));
    let nulls = NullBuffer::union(lists.nulls(), Some(&selected));
    Ok(ListArray::try_new(
        Arc::clone(list_field(lists)?),
        lists.offsets().clone(),
        Arc::clone(lists.values()),
        nulls,
    )?)
}
