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

//! Options controlling how the set aggregates are registered

use std::sync::Arc;

use crate::comparison::CustomComparisonRegistry;

/// Options for [`register_all_with_options`](crate::register_all_with_options)
/// and [`SetAggregateUdaf::with_options`](crate::udaf::SetAggregateUdaf::with_options)
#[derive(Debug, Clone)]
pub struct SetAggregateOptions {
    /// Prepended to every function name, e.g. `presto.` gives `presto.set_agg`
    pub prefix: String,
    /// Replace functions already registered under the same name instead of
    /// failing
    pub overwrite: bool,
    /// Also register `$internal$count_distinct`
    pub include_internal_functions: bool,
    /// Let `set_union` convert input batches directly to state, which allows
    /// the partial aggregation to be skipped
    pub enable_convert_to_state: bool,
    /// Equality of extension types that replaces the one of their storage
    /// type, shared by every function registered with these options
    pub custom_comparisons: Arc<CustomComparisonRegistry>,
}

impl Default for SetAggregateOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            overwrite: true,
            include_internal_functions: true,
            enable_convert_to_state: true,
            custom_comparisons: Arc::new(CustomComparisonRegistry::with_defaults()),
        }
    }
}

impl SetAggregateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_internal_functions(mut self, include: bool) -> Self {
        self.include_internal_functions = include;
        self
    }

    pub fn with_convert_to_state(mut self, enabled: bool) -> Self {
        self.enable_convert_to_state = enabled;
        self
    }

    pub fn with_custom_comparisons(mut self, comparisons: CustomComparisonRegistry) -> Self {
        self.custom_comparisons = Arc::new(comparisons);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_builders() {
        let options = SetAggregateOptions::new();
        assert_eq!(options.prefix, "");
        assert!(options.overwrite);
        assert!(options.include_internal_functions);
        assert!(options.enable_convert_to_state);
        assert!(options
            .custom_comparisons
            .get(crate::comparison::TIMESTAMP_WITH_TIME_ZONE)
            .is_some());

        let options = options
            .with_prefix("presto.")
            .with_overwrite(false)
            .with_internal_functions(false)
            .with_convert_to_state(false)
            .with_custom_comparisons(CustomComparisonRegistry::new());
        assert_eq!(options.prefix, "presto.");
        assert!(!options.overwrite);
        assert!(!options.include_internal_functions);
        assert!(!options.enable_convert_to_state);
        assert!(options
            .custom_comparisons
            .get(crate::comparison::TIMESTAMP_WITH_TIME_ZONE)
            .is_none());
    }
}
