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

//! Row-wise [`Accumulator`] over a single group of a [`SetAggregate`], used
//! for aggregations without `GROUP BY`

use std::mem::size_of_val;

use arrow::array::{new_empty_array, Array, ArrayRef, AsArray};
use arrow::datatypes::DataType;
use datafusion_common::{internal_err, Result, ScalarValue};
use datafusion_expr_common::accumulator::Accumulator;
use datafusion_expr_common::groups_accumulator::EmitTo;

use crate::groups::{SetAggregate, SetAggregateKind};

/// Accumulates every row into group 0 of the wrapped [`SetAggregate`]
#[derive(Debug)]
pub struct SingleGroupAccumulator {
    inner: Box<dyn SetAggregate>,
}

impl SingleGroupAccumulator {
    pub fn try_new(mut inner: Box<dyn SetAggregate>) -> Result<Self> {
        // the group exists before the first batch, so empty input still
        // evaluates to a row
        let empty = new_empty_array(&DataType::new_list(inner.value_type().clone(), true));
        inner.merge_single_group(&[empty], None)?;
        Ok(Self { inner })
    }

    /// The state row of the group, leaving the group in place
    fn snapshot(&mut self) -> Result<ArrayRef> {
        let state = self.inner.state(EmitTo::All)?;
        self.inner.merge_single_group(&state, None)?;
        match state.into_iter().next() {
            Some(state) if state.len() == 1 => Ok(state),
            _ => internal_err!("{} state must hold exactly one group", self.inner.kind()),
        }
    }
}

impl Accumulator for SingleGroupAccumulator {
    fn update_batch(&mut self, values: &[ArrayRef]) -> Result<()> {
        self.inner.update_single_group(values, None)
    }

    fn merge_batch(&mut self, states: &[ArrayRef]) -> Result<()> {
        self.inner.merge_single_group(states, None)
    }

    fn state(&mut self) -> Result<Vec<ScalarValue>> {
        let state = self.snapshot()?;
        Ok(vec![ScalarValue::try_from_array(&state, 0)?])
    }

    fn evaluate(&mut self) -> Result<ScalarValue> {
        let state = self.snapshot()?;
        match self.inner.kind() {
            SetAggregateKind::SetAgg | SetAggregateKind::SetUnion => {
                ScalarValue::try_from_array(&state, 0)
            }
            SetAggregateKind::CountDistinct => {
                let lists = state.as_list::<i32>();
                let count = if lists.is_null(0) {
                    0
                } else {
                    lists.value_length(0) as i64
                };
                Ok(ScalarValue::Int64(Some(count)))
            }
        }
    }

    fn size(&self) -> usize {
        size_of_val(self) + self.inner.size()
    }
}
