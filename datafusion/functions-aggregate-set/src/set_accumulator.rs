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

//! [`SetAccumulator`]: the distinct values of a single group

use std::mem::size_of;

use hashbrown::hash_table::HashTable;

use crate::comparison::{ElementComparator, ScalarRef};
use crate::physical::{ValueReader, ValueStore};

/// Deduplicating collection of non-null values.
///
/// Values live in `S` in insertion order; `table` maps a value's hash to its
/// position in `S`. Equality and hashing always go through the
/// [`ElementComparator`] passed in, which must be the same for the whole
/// lifetime of the accumulator.
#[derive(Debug)]
pub struct SetAccumulator<S: ValueStore> {
    values: S,
    /// (hash, index into `values`)
    table: HashTable<(u64, usize)>,
}

impl<S: ValueStore> Default for SetAccumulator<S> {
    fn default() -> Self {
        Self {
            values: S::default(),
            table: HashTable::new(),
        }
    }
}

impl<S: ValueStore> SetAccumulator<S> {
    /// Inserts the value at `index` of `reader`, which must be valid.
    ///
    /// Returns false if an equal value was already present.
    pub fn insert<R, C>(&mut self, reader: &R, index: usize, comparator: &C) -> bool
    where
        R: ValueReader<Store = S>,
        C: ElementComparator,
    {
        self.insert_with(reader.value(index), comparator, |values| {
            reader.append_to(index, values)
        })
    }

    /// Inserts every value of `other`, making this the union of both sets
    pub fn merge_from<C: ElementComparator>(&mut self, other: &Self, comparator: &C) {
        for index in 0..other.values.len() {
            self.insert_with(other.values.value(index), comparator, |values| {
                values.append_from(&other.values, index)
            });
        }
    }

    fn insert_with<C, F>(&mut self, value: ScalarRef<'_>, comparator: &C, append: F) -> bool
    where
        C: ElementComparator,
        F: FnOnce(&mut S),
    {
        let hash = comparator.hash(value);
        let values = &self.values;
        let existing = self.table.find(hash, |&(stored_hash, position)| {
            stored_hash == hash && comparator.equals(values.value(position), value)
        });
        if existing.is_some() {
            return false;
        }

        let position = self.values.len();
        append(&mut self.values);
        self.table
            .insert_unique(hash, (hash, position), |&(stored_hash, _)| stored_hash);
        true
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The distinct values, in insertion order
    pub fn values(&self) -> &S {
        &self.values
    }

    /// Heap bytes held by this accumulator
    pub fn size(&self) -> usize {
        self.values.size() + self.table.capacity() * size_of::<(u64, usize)>()
    }
}
