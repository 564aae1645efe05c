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

//! Equality and hashing strategies used by the set accumulators.
//!
//! Every value stored in a set is looked up through an [`ElementComparator`].
//! Types with built-in semantics use [`DefaultComparator`]; logical types that
//! override equality (for example `timestamp with time zone`, which compares
//! only the UTC instant of a packed value) plug a [`CustomComparison`] into a
//! [`CustomComparator`]. The comparator is chosen once, when the aggregate is
//! created, and never per row.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use ahash::RandomState;
use arrow::datatypes::Field;
use datafusion_common::{exec_err, Result};

/// Metadata key naming the Arrow extension type of a field
pub const EXTENSION_TYPE_NAME_KEY: &str = "ARROW:extension:name";

/// Borrowed view of one non-null value, tagged with its physical kind.
///
/// Complex values (lists, structs, maps) are surfaced in their
/// [row format](arrow::row) encoding, so two complex values are equal exactly
/// when their encodings are.
#[derive(Debug, Clone, Copy)]
pub enum ScalarRef<'a> {
    Unknown,
    Boolean(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Int128(i128),
    Float32(f32),
    Float64(f64),
    Timestamp(i64),
    Bytes(&'a [u8]),
    Complex(&'a [u8]),
}

impl ScalarRef<'_> {
    fn rank(&self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Boolean(_) => 1,
            Self::Int8(_) => 2,
            Self::Int16(_) => 3,
            Self::Int32(_) => 4,
            Self::Int64(_) => 5,
            Self::Int128(_) => 6,
            Self::Float32(_) => 7,
            Self::Float64(_) => 8,
            Self::Timestamp(_) => 9,
            Self::Bytes(_) => 10,
            Self::Complex(_) => 11,
        }
    }

    /// Total order used by the default comparator.
    ///
    /// All NaNs compare equal to each other and `-0.0` equals `0.0`.
    pub fn total_cmp(&self, other: &ScalarRef<'_>) -> Ordering {
        match (self, other) {
            (Self::Unknown, ScalarRef::Unknown) => Ordering::Equal,
            (Self::Boolean(l), ScalarRef::Boolean(r)) => l.cmp(r),
            (Self::Int8(l), ScalarRef::Int8(r)) => l.cmp(r),
            (Self::Int16(l), ScalarRef::Int16(r)) => l.cmp(r),
            (Self::Int32(l), ScalarRef::Int32(r)) => l.cmp(r),
            (Self::Int64(l), ScalarRef::Int64(r)) => l.cmp(r),
            (Self::Int128(l), ScalarRef::Int128(r)) => l.cmp(r),
            (Self::Float32(l), ScalarRef::Float32(r)) => {
                canonical_f32(*l).total_cmp(&canonical_f32(*r))
            }
            (Self::Float64(l), ScalarRef::Float64(r)) => {
                canonical_f64(*l).total_cmp(&canonical_f64(*r))
            }
            (Self::Timestamp(l), ScalarRef::Timestamp(r)) => l.cmp(r),
            (Self::Bytes(l), ScalarRef::Bytes(r)) => l.cmp(r),
            (Self::Complex(l), ScalarRef::Complex(r)) => l.cmp(r),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    /// Hash consistent with [`Self::total_cmp`]
    pub fn hash_with(&self, random_state: &RandomState) -> u64 {
        match *self {
            Self::Unknown => random_state.hash_one(()),
            Self::Boolean(v) => random_state.hash_one(v),
            Self::Int8(v) => random_state.hash_one(v),
            Self::Int16(v) => random_state.hash_one(v),
            Self::Int32(v) => random_state.hash_one(v),
            Self::Int64(v) | Self::Timestamp(v) => random_state.hash_one(v),
            Self::Int128(v) => random_state.hash_one(v),
            Self::Float32(v) => random_state.hash_one(canonical_f32(v).to_bits()),
            Self::Float64(v) => random_state.hash_one(canonical_f64(v).to_bits()),
            Self::Bytes(v) | Self::Complex(v) => random_state.hash_one(v),
        }
    }
}

fn canonical_f32(v: f32) -> f32 {
    if v.is_nan() {
        f32::NAN
    } else if v == 0.0 {
        0.0
    } else {
        v
    }
}

fn canonical_f64(v: f64) -> f64 {
    if v.is_nan() {
        f64::NAN
    } else if v == 0.0 {
        0.0
    } else {
        v
    }
}

/// User supplied equality, ordering and hashing for a logical type that
/// reuses a native physical layout.
pub trait CustomComparison: Debug + Send + Sync {
    /// Extension type name this comparison is registered under
    fn name(&self) -> &str;

    /// Orders two values of the type. `Ordering::Equal` means the values are
    /// duplicates of each other.
    fn compare(&self, left: ScalarRef<'_>, right: ScalarRef<'_>) -> Ordering;

    /// Hash that must agree with [`Self::compare`]
    fn hash(&self, value: ScalarRef<'_>) -> u64;
}

/// Strategy a set accumulator uses to find duplicates
pub trait ElementComparator: Debug + Send + Sync + 'static {
    fn hash(&self, value: ScalarRef<'_>) -> u64;

    fn equals(&self, left: ScalarRef<'_>, right: ScalarRef<'_>) -> bool;

    /// True when this strategy delegates to a [`CustomComparison`]
    fn is_custom(&self) -> bool {
        false
    }
}

fn fixed_random_state() -> RandomState {
    RandomState::with_seeds(0, 0, 0, 0)
}

/// Built-in equality of the physical type
#[derive(Debug, Clone)]
pub struct DefaultComparator {
    random_state: RandomState,
}

impl Default for DefaultComparator {
    fn default() -> Self {
        Self {
            random_state: fixed_random_state(),
        }
    }
}

impl ElementComparator for DefaultComparator {
    fn hash(&self, value: ScalarRef<'_>) -> u64 {
        value.hash_with(&self.random_state)
    }

    fn equals(&self, left: ScalarRef<'_>, right: ScalarRef<'_>) -> bool {
        left.total_cmp(&right) == Ordering::Equal
    }
}

/// Delegates hashing and equality to a [`CustomComparison`]
#[derive(Debug, Clone)]
pub struct CustomComparator {
    comparison: Arc<dyn CustomComparison>,
}

impl CustomComparator {
    pub fn new(comparison: Arc<dyn CustomComparison>) -> Self {
        Self { comparison }
    }

    pub fn comparison(&self) -> &Arc<dyn CustomComparison> {
        &self.comparison
    }
}

impl ElementComparator for CustomComparator {
    fn hash(&self, value: ScalarRef<'_>) -> u64 {
        self.comparison.hash(value)
    }

    fn equals(&self, left: ScalarRef<'_>, right: ScalarRef<'_>) -> bool {
        self.comparison.compare(left, right) == Ordering::Equal
    }

    fn is_custom(&self) -> bool {
        true
    }
}

/// Extension type name of [`TimestampWithTimeZoneComparison`]
pub const TIMESTAMP_WITH_TIME_ZONE: &str = "timestamp with time zone";

const MILLIS_SHIFT: i64 = 12;
const TIME_ZONE_MASK: i64 = (1 << MILLIS_SHIFT) - 1;
/// Largest UTC millisecond value a packed timestamp can hold
pub const MAX_MILLIS_UTC: i64 = (1 << (64 - MILLIS_SHIFT - 1)) - 1;
/// Smallest UTC millisecond value a packed timestamp can hold
pub const MIN_MILLIS_UTC: i64 = -(MAX_MILLIS_UTC + 1);

/// `timestamp with time zone` stored in a 64-bit integer: the upper 52 bits
/// hold milliseconds since the epoch (UTC), the lower 12 bits a time zone key.
///
/// Two values are equal when they denote the same instant, whatever their
/// time zones.
#[derive(Debug)]
pub struct TimestampWithTimeZoneComparison {
    random_state: RandomState,
}

impl Default for TimestampWithTimeZoneComparison {
    fn default() -> Self {
        Self {
            random_state: fixed_random_state(),
        }
    }
}

impl TimestampWithTimeZoneComparison {
    /// Packs `millis_utc` and `zone_key` into a single value
    pub fn pack(millis_utc: i64, zone_key: i16) -> Result<i64> {
        if !(MIN_MILLIS_UTC..=MAX_MILLIS_UTC).contains(&millis_utc) {
            return exec_err!("TimestampWithTimeZone overflow: {millis_utc} ms");
        }
        Ok((millis_utc << MILLIS_SHIFT) | (i64::from(zone_key) & TIME_ZONE_MASK))
    }

    pub fn unpack_millis_utc(packed: i64) -> i64 {
        packed >> MILLIS_SHIFT
    }

    pub fn unpack_zone_key(packed: i64) -> i16 {
        (packed & TIME_ZONE_MASK) as i16
    }

    fn millis(value: ScalarRef<'_>) -> Option<i64> {
        match value {
            ScalarRef::Int64(v) | ScalarRef::Timestamp(v) => {
                Some(Self::unpack_millis_utc(v))
            }
            _ => None,
        }
    }
}

impl CustomComparison for TimestampWithTimeZoneComparison {
    fn name(&self) -> &str {
        TIMESTAMP_WITH_TIME_ZONE
    }

    fn compare(&self, left: ScalarRef<'_>, right: ScalarRef<'_>) -> Ordering {
        match (Self::millis(left), Self::millis(right)) {
            (Some(l), Some(r)) => l.cmp(&r),
            _ => left.total_cmp(&right),
        }
    }

    fn hash(&self, value: ScalarRef<'_>) -> u64 {
        match Self::millis(value) {
            Some(millis) => self.random_state.hash_one(millis),
            None => value.hash_with(&self.random_state),
        }
    }
}

/// Custom comparisons known to the engine, keyed by extension type name
#[derive(Debug, Clone, Default)]
pub struct CustomComparisonRegistry {
    comparisons: HashMap<String, Arc<dyn CustomComparison>>,
}

impl CustomComparisonRegistry {
    /// Creates a registry without any custom comparison
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in custom comparisons
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TimestampWithTimeZoneComparison::default()));
        registry
    }

    /// Registers `comparison`, returning the one it replaced, if any
    pub fn register(
        &mut self,
        comparison: Arc<dyn CustomComparison>,
    ) -> Option<Arc<dyn CustomComparison>> {
        self.comparisons
            .insert(comparison.name().to_string(), comparison)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn CustomComparison>> {
        self.comparisons.get(name)
    }

    /// Returns the custom comparison bound to `field`'s extension type
    pub fn for_field(&self, field: &Field) -> Option<Arc<dyn CustomComparison>> {
        field
            .metadata()
            .get(EXTENSION_TYPE_NAME_KEY)
            .and_then(|name| self.comparisons.get(name))
            .map(Arc::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_comparator_nan_and_zero() {
        let comparator = DefaultComparator::default();
        let nan = ScalarRef::Float64(f64::NAN);
        let other_nan = ScalarRef::Float64(-f64::NAN);
        assert!(comparator.equals(nan, other_nan));
        assert_eq!(comparator.hash(nan), comparator.hash(other_nan));

        let zero = ScalarRef::Float32(0.0);
        let negative_zero = ScalarRef::Float32(-0.0);
        assert!(comparator.equals(zero, negative_zero));
        assert_eq!(comparator.hash(zero), comparator.hash(negative_zero));

        assert!(!comparator.equals(ScalarRef::Float64(1.0), nan));
        assert!(!comparator.is_custom());
    }

    /// Values borrowed from buffers with unrelated lifetimes
    fn compare_with_static(local: &[u8]) -> Ordering {
        let stored: ScalarRef<'static> = ScalarRef::Bytes(b"mid");
        ScalarRef::Bytes(local).total_cmp(&stored)
    }

    #[test]
    fn total_cmp_across_borrows() {
        let owned = b"mid".to_vec();
        assert_eq!(compare_with_static(&owned), Ordering::Equal);
        assert_eq!(compare_with_static(&b"aaa".to_vec()), Ordering::Less);
        assert_eq!(compare_with_static(&b"zzz".to_vec()), Ordering::Greater);

        let complex = vec![1u8, 2];
        let local = ScalarRef::Complex(&complex);
        assert_eq!(local.total_cmp(&ScalarRef::Bytes(b"x")), Ordering::Greater);
        assert_eq!(
            ScalarRef::Float64(1.0).total_cmp(&ScalarRef::Bytes(&complex)),
            Ordering::Less
        );
    }

    #[test]
    fn default_comparator_bytes() {
        let comparator = DefaultComparator::default();
        assert!(comparator.equals(ScalarRef::Bytes(b"abc"), ScalarRef::Bytes(b"abc")));
        assert!(!comparator.equals(ScalarRef::Bytes(b"abc"), ScalarRef::Bytes(b"ab")));
        // same bytes, different kinds
        assert!(!comparator.equals(ScalarRef::Bytes(b"a"), ScalarRef::Complex(b"a")));
    }

    #[test]
    fn timestamp_with_time_zone_pack() -> Result<()> {
        let packed = TimestampWithTimeZoneComparison::pack(1_000, 7)?;
        assert_eq!(TimestampWithTimeZoneComparison::unpack_millis_utc(packed), 1_000);
        assert_eq!(TimestampWithTimeZoneComparison::unpack_zone_key(packed), 7);

        let negative = TimestampWithTimeZoneComparison::pack(-5, 3)?;
        assert_eq!(TimestampWithTimeZoneComparison::unpack_millis_utc(negative), -5);
        assert_eq!(TimestampWithTimeZoneComparison::unpack_zone_key(negative), 3);

        let err = TimestampWithTimeZoneComparison::pack(MAX_MILLIS_UTC + 1, 0)
            .unwrap_err()
            .to_string();
        assert!(err.contains("TimestampWithTimeZone overflow"), "{err}");
        Ok(())
    }

    #[test]
    fn timestamp_with_time_zone_ignores_zone() -> Result<()> {
        let comparator =
            CustomComparator::new(Arc::new(TimestampWithTimeZoneComparison::default()));
        let utc = ScalarRef::Int64(TimestampWithTimeZoneComparison::pack(42, 0)?);
        let other_zone = ScalarRef::Int64(TimestampWithTimeZoneComparison::pack(42, 1825)?);
        let later = ScalarRef::Int64(TimestampWithTimeZoneComparison::pack(43, 0)?);

        assert!(comparator.equals(utc, other_zone));
        assert_eq!(comparator.hash(utc), comparator.hash(other_zone));
        assert!(!comparator.equals(utc, later));
        assert!(comparator.is_custom());

        // the default comparator sees distinct bit patterns
        assert!(!DefaultComparator::default().equals(utc, other_zone));
        Ok(())
    }

    #[test]
    fn registry_lookup_by_extension_name() {
        let registry = CustomComparisonRegistry::with_defaults();
        assert!(registry.get(TIMESTAMP_WITH_TIME_ZONE).is_some());

        let plain = Field::new("ts", arrow::datatypes::DataType::Int64, true);
        assert!(registry.for_field(&plain).is_none());

        let extension = plain.with_metadata(HashMap::from([(
            EXTENSION_TYPE_NAME_KEY.to_string(),
            TIMESTAMP_WITH_TIME_ZONE.to_string(),
        )]));
        let comparison = registry.for_field(&extension).expect("registered");
        assert_eq!(comparison.name(), TIMESTAMP_WITH_TIME_ZONE);

        assert!(CustomComparisonRegistry::new().for_field(&extension).is_none());
    }
}
