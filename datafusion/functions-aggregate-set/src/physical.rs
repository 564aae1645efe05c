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

//! Physical value representations the set aggregates are instantiated for.
//!
//! Each [`PhysicalType`] knows how to read the non-null values of an input
//! array ([`ValueReader`]), how to keep the distinct values of one group
//! ([`ValueStore`]) and how to turn the stores of many groups back into a
//! single Arrow array.
//!
//! Logical types sharing a native layout share a representation: `Date32`
//! values are read as `i32`, every `Timestamp` unit as `i64`, and so on. The
//! output array is always rebuilt with the original [`DataType`].

use std::fmt::{self, Display};
use std::marker::PhantomData;
use std::mem::size_of;
use std::sync::Arc;

use arrow::array::{
    make_array, new_null_array, Array, ArrayData, ArrayRef, AsArray, BinaryViewArray,
    BinaryViewBuilder, BooleanArray, FixedSizeListArray, LargeListArray, ListArray,
    MapArray, OffsetSizeTrait, StringViewArray, StructArray,
};
use arrow::buffer::{BooleanBuffer, Buffer, NullBuffer, OffsetBuffer, ScalarBuffer};
use arrow::datatypes::{
    ArrowNativeType, DataType, Decimal128Type, FieldRef, Float32Type, Float64Type,
    Int16Type, Int32Type, Int64Type, Int8Type, TimestampNanosecondType,
};
use arrow::row::{RowConverter, SortField};
use datafusion_common::{exec_err, internal_err, Result};

use crate::comparison::ScalarRef;

/// The closed set of physical representations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysicalKind {
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    /// 128-bit integers, only used for `Decimal128`
    Int128,
    Float32,
    Float64,
    Timestamp,
    /// Variable length strings and binaries
    Bytes,
    /// Lists, structs and maps, stored in the row format
    Complex,
    /// The `Null` type of all-null columns
    Unknown,
}

impl PhysicalKind {
    /// Resolves the representation of `data_type`.
    ///
    /// Types outside the supported set are an internal error: the planner
    /// must never bind a set aggregate to them.
    pub fn of(data_type: &DataType) -> Result<Self> {
        Ok(match data_type {
            DataType::Boolean => Self::Boolean,
            DataType::Int8 => Self::Int8,
            DataType::Int16 => Self::Int16,
            DataType::Int32 | DataType::Date32 | DataType::Time32(_) => Self::Int32,
            DataType::Int64
            | DataType::Date64
            | DataType::Time64(_)
            | DataType::Duration(_) => Self::Int64,
            DataType::Decimal128(_, _) => Self::Int128,
            DataType::Float32 => Self::Float32,
            DataType::Float64 => Self::Float64,
            DataType::Timestamp(_, _) => Self::Timestamp,
            DataType::Utf8
            | DataType::LargeUtf8
            | DataType::Utf8View
            | DataType::Binary
            | DataType::LargeBinary
            | DataType::BinaryView => Self::Bytes,
            DataType::List(_)
            | DataType::LargeList(_)
            | DataType::FixedSizeList(_, _)
            | DataType::Struct(_)
            | DataType::Map(_, _) => Self::Complex,
            DataType::Null => Self::Unknown,
            other => return internal_err!("Unexpected type {other}"),
        })
    }

    /// Scalar kinds may be bound to a custom comparison
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Self::Complex)
    }
}

impl Display for PhysicalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "BOOLEAN",
            Self::Int8 => "TINYINT",
            Self::Int16 => "SMALLINT",
            Self::Int32 => "INTEGER",
            Self::Int64 => "BIGINT",
            Self::Int128 => "HUGEINT",
            Self::Float32 => "REAL",
            Self::Float64 => "DOUBLE",
            Self::Timestamp => "TIMESTAMP",
            Self::Bytes => "VARBINARY",
            Self::Complex => "COMPLEX",
            Self::Unknown => "UNKNOWN",
        };
        write!(f, "{name}")
    }
}

/// Distinct values of one group, in insertion order
pub trait ValueStore: Default + Send + Sync + 'static {
    fn value(&self, index: usize) -> ScalarRef<'_>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends the value at `index` of `other`
    fn append_from(&mut self, other: &Self, index: usize);

    /// Heap bytes held by this store
    fn size(&self) -> usize;
}

/// Random access to the values of one input array
pub trait ValueReader {
    type Store: ValueStore;

    fn is_valid(&self, index: usize) -> bool;

    /// The value at `index`; only meaningful when `is_valid(index)`
    fn value(&self, index: usize) -> ScalarRef<'_>;

    /// Copies the value at `index` to the end of `store`
    fn append_to(&self, index: usize, store: &mut Self::Store);
}

/// A physical representation, bound to the logical [`DataType`] it serves
pub trait PhysicalType: Send + Sync + 'static {
    type Store: ValueStore;
    type Reader: ValueReader<Store = Self::Store>;

    fn try_new(data_type: &DataType) -> Result<Self>
    where
        Self: Sized;

    fn kind(&self) -> PhysicalKind;

    fn data_type(&self) -> &DataType;

    fn reader(&self, values: &ArrayRef) -> Result<Self::Reader>;

    /// Concatenates the values of `stores` into one array of [`Self::data_type`]
    fn build<'a>(
        &self,
        stores: impl IntoIterator<Item = &'a Self::Store>,
    ) -> Result<ArrayRef>;
}

fn check_kind(expected: PhysicalKind, data_type: &DataType) -> Result<()> {
    let actual = PhysicalKind::of(data_type)?;
    if actual != expected {
        return internal_err!(
            "{data_type} is stored as {actual}, not as {expected}"
        );
    }
    Ok(())
}

/// Native integer and float representations.
///
/// Implemented for the Arrow primitive type whose native type is used as the
/// storage of a [`PhysicalKind`].
pub trait NativeKind: Send + Sync + 'static {
    type Native: ArrowNativeType;
    const KIND: PhysicalKind;

    fn scalar(value: Self::Native) -> ScalarRef<'static>;
}

macro_rules! native_kind {
    ($arrow_type:ty, $native:ty, $kind:ident) => {
        impl NativeKind for $arrow_type {
            type Native = $native;
            const KIND: PhysicalKind = PhysicalKind::$kind;

            fn scalar(value: $native) -> ScalarRef<'static> {
                ScalarRef::$kind(value)
            }
        }
    };
}

native_kind!(Int8Type, i8, Int8);
native_kind!(Int16Type, i16, Int16);
native_kind!(Int32Type, i32, Int32);
native_kind!(Int64Type, i64, Int64);
native_kind!(Decimal128Type, i128, Int128);
native_kind!(Float32Type, f32, Float32);
native_kind!(Float64Type, f64, Float64);
native_kind!(TimestampNanosecondType, i64, Timestamp);

/// Fixed width values stored as `K::Native`
#[derive(Debug)]
pub struct PrimitiveValues<K: NativeKind> {
    data_type: DataType,
    _kind: PhantomData<K>,
}

pub struct PrimitiveReader<K: NativeKind> {
    values: ScalarBuffer<K::Native>,
    nulls: Option<NullBuffer>,
}

#[derive(Debug)]
pub struct PrimitiveStore<K: NativeKind> {
    values: Vec<K::Native>,
}

impl<K: NativeKind> Default for PrimitiveStore<K> {
    fn default() -> Self {
        Self { values: vec![] }
    }
}

impl<K: NativeKind> ValueStore for PrimitiveStore<K> {
    fn value(&self, index: usize) -> ScalarRef<'_> {
        K::scalar(self.values[index])
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn append_from(&mut self, other: &Self, index: usize) {
        self.values.push(other.values[index]);
    }

    fn size(&self) -> usize {
        self.values.capacity() * size_of::<K::Native>()
    }
}

impl<K: NativeKind> ValueReader for PrimitiveReader<K> {
    type Store = PrimitiveStore<K>;

    fn is_valid(&self, index: usize) -> bool {
        self.nulls.as_ref().map_or(true, |nulls| nulls.is_valid(index))
    }

    fn value(&self, index: usize) -> ScalarRef<'_> {
        K::scalar(self.values[index])
    }

    fn append_to(&self, index: usize, store: &mut Self::Store) {
        store.values.push(self.values[index]);
    }
}

impl<K: NativeKind> PhysicalType for PrimitiveValues<K> {
    type Store = PrimitiveStore<K>;
    type Reader = PrimitiveReader<K>;

    fn try_new(data_type: &DataType) -> Result<Self> {
        check_kind(K::KIND, data_type)?;
        Ok(Self {
            data_type: data_type.clone(),
            _kind: PhantomData,
        })
    }

    fn kind(&self) -> PhysicalKind {
        K::KIND
    }

    fn data_type(&self) -> &DataType {
        &self.data_type
    }

    fn reader(&self, values: &ArrayRef) -> Result<Self::Reader> {
        check_kind(K::KIND, values.data_type())?;
        let data = values.to_data();
        let Some(buffer) = data.buffers().first() else {
            return internal_err!("{} array without a value buffer", values.data_type());
        };
        Ok(PrimitiveReader {
            values: ScalarBuffer::new(buffer.clone(), data.offset(), data.len()),
            nulls: values.nulls().cloned(),
        })
    }

    fn build<'a>(
        &self,
        stores: impl IntoIterator<Item = &'a Self::Store>,
    ) -> Result<ArrayRef> {
        let values: Vec<K::Native> = stores
            .into_iter()
            .flat_map(|store| store.values.iter().copied())
            .collect();
        let data = ArrayData::builder(self.data_type.clone())
            .len(values.len())
            .add_buffer(Buffer::from_vec(values))
            .build()?;
        Ok(make_array(data))
    }
}

#[derive(Debug)]
pub struct BooleanValues {
    data_type: DataType,
}

pub struct BooleanReader {
    values: BooleanBuffer,
    nulls: Option<NullBuffer>,
}

#[derive(Debug, Default)]
pub struct BooleanStore {
    values: Vec<bool>,
}

impl ValueStore for BooleanStore {
    fn value(&self, index: usize) -> ScalarRef<'_> {
        ScalarRef::Boolean(self.values[index])
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn append_from(&mut self, other: &Self, index: usize) {
        self.values.push(other.values[index]);
    }

    fn size(&self) -> usize {
        self.values.capacity()
    }
}

impl ValueReader for BooleanReader {
    type Store = BooleanStore;

    fn is_valid(&self, index: usize) -> bool {
        self.nulls.as_ref().map_or(true, |nulls| nulls.is_valid(index))
    }

    fn value(&self, index: usize) -> ScalarRef<'_> {
        ScalarRef::Boolean(self.values.value(index))
    }

    fn append_to(&self, index: usize, store: &mut Self::Store) {
        store.values.push(self.values.value(index));
    }
}

impl PhysicalType for BooleanValues {
    type Store = BooleanStore;
    type Reader = BooleanReader;

    fn try_new(data_type: &DataType) -> Result<Self> {
        check_kind(PhysicalKind::Boolean, data_type)?;
        Ok(Self {
            data_type: data_type.clone(),
        })
    }

    fn kind(&self) -> PhysicalKind {
        PhysicalKind::Boolean
    }

    fn data_type(&self) -> &DataType {
        &self.data_type
    }

    fn reader(&self, values: &ArrayRef) -> Result<Self::Reader> {
        let Some(array) = values.as_boolean_opt() else {
            return internal_err!("Expected Boolean values, got {}", values.data_type());
        };
        Ok(BooleanReader {
            values: array.values().clone(),
            nulls: array.nulls().cloned(),
        })
    }

    fn build<'a>(
        &self,
        stores: impl IntoIterator<Item = &'a Self::Store>,
    ) -> Result<ArrayRef> {
        let values: Vec<bool> = stores
            .into_iter()
            .flat_map(|store| store.values.iter().copied())
            .collect();
        Ok(Arc::new(BooleanArray::from(values)))
    }
}

/// How the bytes of a [`ByteStore`] are surfaced to comparators
pub trait ByteEncoding: Send + Sync + 'static {
    fn scalar(bytes: &[u8]) -> ScalarRef<'_>;
}

/// Strings and binaries
#[derive(Debug)]
pub struct PlainBytes;

/// Complex values in the row format
#[derive(Debug)]
pub struct RowEncoded;

impl ByteEncoding for PlainBytes {
    fn scalar(bytes: &[u8]) -> ScalarRef<'_> {
        ScalarRef::Bytes(bytes)
    }
}

impl ByteEncoding for RowEncoded {
    fn scalar(bytes: &[u8]) -> ScalarRef<'_> {
        ScalarRef::Complex(bytes)
    }
}

/// Variable length values packed into one buffer
#[derive(Debug)]
pub struct ByteStore<E: ByteEncoding> {
    data: Vec<u8>,
    /// end offset of each value in `data`
    ends: Vec<usize>,
    _encoding: PhantomData<E>,
}

impl<E: ByteEncoding> Default for ByteStore<E> {
    fn default() -> Self {
        Self {
            data: vec![],
            ends: vec![],
            _encoding: PhantomData,
        }
    }
}

impl<E: ByteEncoding> ByteStore<E> {
    fn bytes(&self, index: usize) -> &[u8] {
        let start = if index == 0 { 0 } else { self.ends[index - 1] };
        &self.data[start..self.ends[index]]
    }

    fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        self.ends.push(self.data.len());
    }
}

impl<E: ByteEncoding> ValueStore for ByteStore<E> {
    fn value(&self, index: usize) -> ScalarRef<'_> {
        E::scalar(self.bytes(index))
    }

    fn len(&self) -> usize {
        self.ends.len()
    }

    fn append_from(&mut self, other: &Self, index: usize) {
        self.push(other.bytes(index));
    }

    fn size(&self) -> usize {
        self.data.capacity() + self.ends.capacity() * size_of::<usize>()
    }
}

/// Utf8 / Binary values with offsets of type `O`
#[derive(Debug)]
pub struct BytesValues<O: OffsetSizeTrait> {
    data_type: DataType,
    _offset: PhantomData<O>,
}

pub struct BytesReader<O: OffsetSizeTrait> {
    offsets: OffsetBuffer<O>,
    values: Buffer,
    nulls: Option<NullBuffer>,
}

impl<O: OffsetSizeTrait> BytesReader<O> {
    fn bytes(&self, index: usize) -> &[u8] {
        let start = self.offsets[index].as_usize();
        let end = self.offsets[index + 1].as_usize();
        &self.values.as_slice()[start..end]
    }
}

impl<O: OffsetSizeTrait> ValueReader for BytesReader<O> {
    type Store = ByteStore<PlainBytes>;

    fn is_valid(&self, index: usize) -> bool {
        self.nulls.as_ref().map_or(true, |nulls| nulls.is_valid(index))
    }

    fn value(&self, index: usize) -> ScalarRef<'_> {
        ScalarRef::Bytes(self.bytes(index))
    }

    fn append_to(&self, index: usize, store: &mut Self::Store) {
        store.push(self.bytes(index));
    }
}

impl<O: OffsetSizeTrait> PhysicalType for BytesValues<O> {
    type Store = ByteStore<PlainBytes>;
    type Reader = BytesReader<O>;

    fn try_new(data_type: &DataType) -> Result<Self> {
        let large = matches!(data_type, DataType::LargeUtf8 | DataType::LargeBinary);
        let view = matches!(data_type, DataType::Utf8View | DataType::BinaryView);
        if PhysicalKind::of(data_type)? != PhysicalKind::Bytes
            || view
            || large != O::IS_LARGE
        {
            return internal_err!("{data_type} cannot be read with this offset width");
        }
        Ok(Self {
            data_type: data_type.clone(),
            _offset: PhantomData,
        })
    }

    fn kind(&self) -> PhysicalKind {
        PhysicalKind::Bytes
    }

    fn data_type(&self) -> &DataType {
        &self.data_type
    }

    fn reader(&self, values: &ArrayRef) -> Result<Self::Reader> {
        let reader = match values.data_type() {
            DataType::Utf8 | DataType::LargeUtf8 => {
                values.as_string_opt::<O>().map(|array| BytesReader {
                    offsets: array.offsets().clone(),
                    values: array.values().clone(),
                    nulls: array.nulls().cloned(),
                })
            }
            DataType::Binary | DataType::LargeBinary => {
                values.as_binary_opt::<O>().map(|array| BytesReader {
                    offsets: array.offsets().clone(),
                    values: array.values().clone(),
                    nulls: array.nulls().cloned(),
                })
            }
            _ => None,
        };
        match reader {
            Some(reader) => Ok(reader),
            None => internal_err!(
                "Expected {} values, got {}",
                self.data_type,
                values.data_type()
            ),
        }
    }

    fn build<'a>(
        &self,
        stores: impl IntoIterator<Item = &'a Self::Store>,
    ) -> Result<ArrayRef> {
        let mut offsets = vec![O::usize_as(0)];
        let mut data = vec![];
        for store in stores {
            for index in 0..store.len() {
                data.extend_from_slice(store.bytes(index));
                let Some(offset) = O::from_usize(data.len()) else {
                    return exec_err!(
                        "Byte array offset overflow building {} values",
                        self.data_type
                    );
                };
                offsets.push(offset);
            }
        }
        let data = ArrayData::builder(self.data_type.clone())
            .len(offsets.len() - 1)
            .add_buffer(Buffer::from_vec(offsets))
            .add_buffer(Buffer::from_vec(data))
            .build()?;
        Ok(make_array(data))
    }
}

/// Utf8View / BinaryView values
#[derive(Debug)]
pub struct BytesViewValues {
    data_type: DataType,
}

pub enum BytesViewReader {
    Utf8(StringViewArray),
    Binary(BinaryViewArray),
}

impl BytesViewReader {
    fn bytes(&self, index: usize) -> &[u8] {
        match self {
            Self::Utf8(array) => array.value(index).as_bytes(),
            Self::Binary(array) => array.value(index),
        }
    }
}

impl ValueReader for BytesViewReader {
    type Store = ByteStore<PlainBytes>;

    fn is_valid(&self, index: usize) -> bool {
        match self {
            Self::Utf8(array) => array.is_valid(index),
            Self::Binary(array) => array.is_valid(index),
        }
    }

    fn value(&self, index: usize) -> ScalarRef<'_> {
        ScalarRef::Bytes(self.bytes(index))
    }

    fn append_to(&self, index: usize, store: &mut Self::Store) {
        store.push(self.bytes(index));
    }
}

impl PhysicalType for BytesViewValues {
    type Store = ByteStore<PlainBytes>;
    type Reader = BytesViewReader;

    fn try_new(data_type: &DataType) -> Result<Self> {
        if !matches!(data_type, DataType::Utf8View | DataType::BinaryView) {
            return internal_err!("{data_type} is not a view type");
        }
        Ok(Self {
            data_type: data_type.clone(),
        })
    }

    fn kind(&self) -> PhysicalKind {
        PhysicalKind::Bytes
    }

    fn data_type(&self) -> &DataType {
        &self.data_type
    }

    fn reader(&self, values: &ArrayRef) -> Result<Self::Reader> {
        let reader = match values.data_type() {
            DataType::Utf8View => values
                .as_string_view_opt()
                .map(|array| BytesViewReader::Utf8(array.clone())),
            DataType::BinaryView => values
                .as_binary_view_opt()
                .map(|array| BytesViewReader::Binary(array.clone())),
            _ => None,
        };
        match reader {
            Some(reader) => Ok(reader),
            None => internal_err!(
                "Expected {} values, got {}",
                self.data_type,
                values.data_type()
            ),
        }
    }

    fn build<'a>(
        &self,
        stores: impl IntoIterator<Item = &'a Self::Store>,
    ) -> Result<ArrayRef> {
        let mut builder = BinaryViewBuilder::new();
        for store in stores {
            for index in 0..store.len() {
                builder.append_value(store.bytes(index));
            }
        }
        let binary = builder.finish();
        match self.data_type {
            DataType::Utf8View => Ok(Arc::new(binary.to_string_view()?)),
            _ => Ok(Arc::new(binary)),
        }
    }
}

fn contains_map(data_type: &DataType) -> bool {
    match data_type {
        DataType::Map(_, _) => true,
        DataType::List(item)
        | DataType::LargeList(item)
        | DataType::FixedSizeList(item, _) => contains_map(item.data_type()),
        DataType::Struct(fields) => {
            fields.iter().any(|field| contains_map(field.data_type()))
        }
        _ => false,
    }
}

/// `data_type` with every map replaced by the list of its entries. The row
/// format has no map encoding.
fn row_encodable_type(data_type: &DataType) -> DataType {
    match data_type {
        DataType::Map(entries, _) => DataType::List(row_encodable_field(entries)),
        DataType::List(item) => DataType::List(row_encodable_field(item)),
        DataType::LargeList(item) => DataType::LargeList(row_encodable_field(item)),
        DataType::FixedSizeList(item, size) => {
            DataType::FixedSizeList(row_encodable_field(item), *size)
        }
        DataType::Struct(fields) => {
            DataType::Struct(fields.iter().map(row_encodable_field).collect())
        }
        other => other.clone(),
    }
}

fn row_encodable_field(field: &FieldRef) -> FieldRef {
    Arc::new(
        field
            .as_ref()
            .clone()
            .with_data_type(row_encodable_type(field.data_type())),
    )
}

/// Rewrites the maps in `array` as lists of their entries, sharing offsets,
/// null buffers and leaf values
fn to_row_encodable(array: &ArrayRef) -> Result<ArrayRef> {
    if !contains_map(array.data_type()) {
        return Ok(Arc::clone(array));
    }
    let encodable: ArrayRef = match array.data_type() {
        DataType::Map(entries, _) => {
            let map = array.as_map();
            let values: ArrayRef = Arc::new(map.entries().clone());
            Arc::new(ListArray::try_new(
                row_encodable_field(entries),
                map.offsets().clone(),
                to_row_encodable(&values)?,
                map.nulls().cloned(),
            )?)
        }
        DataType::List(item) => {
            let list = array.as_list::<i32>();
            Arc::new(ListArray::try_new(
                row_encodable_field(item),
                list.offsets().clone(),
                to_row_encodable(list.values())?,
                list.nulls().cloned(),
            )?)
        }
        DataType::LargeList(item) => {
            let list = array.as_list::<i64>();
            Arc::new(LargeListArray::try_new(
                row_encodable_field(item),
                list.offsets().clone(),
                to_row_encodable(list.values())?,
                list.nulls().cloned(),
            )?)
        }
        DataType::FixedSizeList(item, size) => {
            let list = array.as_fixed_size_list();
            Arc::new(FixedSizeListArray::try_new(
                row_encodable_field(item),
                *size,
                to_row_encodable(list.values())?,
                list.nulls().cloned(),
            )?)
        }
        DataType::Struct(fields) => {
            let array = array.as_struct();
            let columns = array
                .columns()
                .iter()
                .map(to_row_encodable)
                .collect::<Result<Vec<_>>>()?;
            Arc::new(StructArray::try_new(
                fields.iter().map(row_encodable_field).collect(),
                columns,
                array.nulls().cloned(),
            )?)
        }
        _ => Arc::clone(array),
    };
    Ok(encodable)
}

/// Inverse of [`to_row_encodable`]: rebuilds the maps of `data_type`
fn from_row_encodable(array: &ArrayRef, data_type: &DataType) -> Result<ArrayRef> {
    if !contains_map(data_type) {
        return Ok(Arc::clone(array));
    }
    let decoded: ArrayRef = match data_type {
        DataType::Map(entries, sorted) => {
            let Some(list) = array.as_list_opt::<i32>() else {
                return internal_err!(
                    "Expected map entries as a List, got {}",
                    array.data_type()
                );
            };
            let values = from_row_encodable(list.values(), entries.data_type())?;
            let Some(values) = values.as_struct_opt() else {
                return internal_err!(
                    "Expected Struct map entries, got {}",
                    values.data_type()
                );
            };
            Arc::new(MapArray::try_new(
                Arc::clone(entries),
                list.offsets().clone(),
                values.clone(),
                list.nulls().cloned(),
                *sorted,
            )?)
        }
        DataType::List(item) => {
            let Some(list) = array.as_list_opt::<i32>() else {
                return internal_err!("Expected a List, got {}", array.data_type());
            };
            Arc::new(ListArray::try_new(
                Arc::clone(item),
                list.offsets().clone(),
                from_row_encodable(list.values(), item.data_type())?,
                list.nulls().cloned(),
            )?)
        }
        DataType::LargeList(item) => {
            let Some(list) = array.as_list_opt::<i64>() else {
                return internal_err!("Expected a LargeList, got {}", array.data_type());
            };
            Arc::new(LargeListArray::try_new(
                Arc::clone(item),
                list.offsets().clone(),
                from_row_encodable(list.values(), item.data_type())?,
                list.nulls().cloned(),
            )?)
        }
        DataType::FixedSizeList(item, size) => {
            let Some(list) = array.as_fixed_size_list_opt() else {
                return internal_err!(
                    "Expected a FixedSizeList, got {}",
                    array.data_type()
                );
            };
            Arc::new(FixedSizeListArray::try_new(
                Arc::clone(item),
                *size,
                from_row_encodable(list.values(), item.data_type())?,
                list.nulls().cloned(),
            )?)
        }
        DataType::Struct(fields) => {
            let Some(array) = array.as_struct_opt() else {
                return internal_err!("Expected a Struct, got {}", array.data_type());
            };
            let columns = array
                .columns()
                .iter()
                .zip(fields.iter())
                .map(|(column, field)| from_row_encodable(column, field.data_type()))
                .collect::<Result<Vec<_>>>()?;
            Arc::new(StructArray::try_new(
                fields.clone(),
                columns,
                array.nulls().cloned(),
            )?)
        }
        _ => Arc::clone(array),
    };
    Ok(decoded)
}

/// Lists, structs and maps, compared through their row format encoding.
///
/// Maps are encoded as the list of their entries, at any nesting depth.
pub struct ComplexValues {
    data_type: DataType,
    converter: RowConverter,
}

impl fmt::Debug for ComplexValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComplexValues")
            .field("data_type", &self.data_type)
            .finish()
    }
}

pub struct ComplexReader {
    rows: ByteStore<RowEncoded>,
    nulls: Option<NullBuffer>,
}

impl ValueReader for ComplexReader {
    type Store = ByteStore<RowEncoded>;

    fn is_valid(&self, index: usize) -> bool {
        self.nulls.as_ref().map_or(true, |nulls| nulls.is_valid(index))
    }

    fn value(&self, index: usize) -> ScalarRef<'_> {
        self.rows.value(index)
    }

    fn append_to(&self, index: usize, store: &mut Self::Store) {
        store.append_from(&self.rows, index);
    }
}

impl PhysicalType for ComplexValues {
    type Store = ByteStore<RowEncoded>;
    type Reader = ComplexReader;

    fn try_new(data_type: &DataType) -> Result<Self> {
        check_kind(PhysicalKind::Complex, data_type)?;
        let converter =
            RowConverter::new(vec![SortField::new(row_encodable_type(data_type))])?;
        Ok(Self {
            data_type: data_type.clone(),
            converter,
        })
    }

    fn kind(&self) -> PhysicalKind {
        PhysicalKind::Complex
    }

    fn data_type(&self) -> &DataType {
        &self.data_type
    }

    fn reader(&self, values: &ArrayRef) -> Result<Self::Reader> {
        let converted = self.converter.convert_columns(&[to_row_encodable(values)?])?;
        let mut rows = ByteStore::default();
        rows.data.reserve(converted.size());
        rows.ends.reserve(converted.num_rows());
        for row in converted.iter() {
            rows.push(row.as_ref());
        }
        Ok(ComplexReader {
            rows,
            nulls: values.nulls().cloned(),
        })
    }

    fn build<'a>(
        &self,
        stores: impl IntoIterator<Item = &'a Self::Store>,
    ) -> Result<ArrayRef> {
        let parser = self.converter.parser();
        let parser = &parser;
        let rows = stores.into_iter().flat_map(|store| {
            (0..store.len()).map(move |index| parser.parse(store.bytes(index)))
        });
        let mut columns = self.converter.convert_rows(rows)?;
        match columns.pop() {
            Some(column) => from_row_encodable(&column, &self.data_type),
            None => internal_err!("Row conversion of {} produced no column", self.data_type),
        }
    }
}

/// The `Null` type: every value is null, so nothing is ever stored
#[derive(Debug)]
pub struct UnknownValues {
    data_type: DataType,
}

pub struct UnknownReader;

#[derive(Debug, Default)]
pub struct UnknownStore;

impl ValueStore for UnknownStore {
    fn value(&self, _index: usize) -> ScalarRef<'_> {
        ScalarRef::Unknown
    }

    fn len(&self) -> usize {
        0
    }

    fn append_from(&mut self, _other: &Self, _index: usize) {}

    fn size(&self) -> usize {
        0
    }
}

impl ValueReader for UnknownReader {
    type Store = UnknownStore;

    fn is_valid(&self, _index: usize) -> bool {
        false
    }

    fn value(&self, _index: usize) -> ScalarRef<'_> {
        ScalarRef::Unknown
    }

    fn append_to(&self, _index: usize, _store: &mut Self::Store) {}
}

impl PhysicalType for UnknownValues {
    type Store = UnknownStore;
    type Reader = UnknownReader;

    fn try_new(data_type: &DataType) -> Result<Self> {
        check_kind(PhysicalKind::Unknown, data_type)?;
        Ok(Self {
            data_type: data_type.clone(),
        })
    }

    fn kind(&self) -> PhysicalKind {
        PhysicalKind::Unknown
    }

    fn data_type(&self) -> &DataType {
        &self.data_type
    }

    fn reader(&self, _values: &ArrayRef) -> Result<Self::Reader> {
        Ok(UnknownReader)
    }

    fn build<'a>(
        &self,
        stores: impl IntoIterator<Item = &'a Self::Store>,
    ) -> Result<ArrayRef> {
        let len: usize = stores.into_iter().map(ValueStore::len).sum();
        Ok(new_null_array(&DataType::Null, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use arrow::array::{
        BinaryViewArray, Date32Array, Decimal128Array, Int32Array, Int32Builder,
        LargeStringArray, MapBuilder, StringArray, StringBuilder,
        TimestampMillisecondArray,
    };
    use arrow::datatypes::{Date32Type, Field, Fields, IntervalUnit, TimeUnit};

    fn read_all<P: PhysicalType>(physical: &P, values: &ArrayRef) -> Result<P::Store> {
        let reader = physical.reader(values)?;
        let mut store = P::Store::default();
        for index in 0..values.len() {
            if reader.is_valid(index) {
                reader.append_to(index, &mut store);
            }
        }
        Ok(store)
    }

    #[test]
    fn kind_of_supported_types() -> Result<()> {
        assert_eq!(PhysicalKind::of(&DataType::Date32)?, PhysicalKind::Int32);
        assert_eq!(
            PhysicalKind::of(&DataType::Time64(TimeUnit::Microsecond))?,
            PhysicalKind::Int64
        );
        assert_eq!(
            PhysicalKind::of(&DataType::Timestamp(TimeUnit::Second, Some("UTC".into())))?,
            PhysicalKind::Timestamp
        );
        assert_eq!(
            PhysicalKind::of(&DataType::Decimal128(38, 2))?,
            PhysicalKind::Int128
        );
        assert_eq!(PhysicalKind::of(&DataType::LargeUtf8)?, PhysicalKind::Bytes);
        assert_eq!(PhysicalKind::of(&DataType::Utf8View)?, PhysicalKind::Bytes);
        assert_eq!(PhysicalKind::of(&DataType::BinaryView)?, PhysicalKind::Bytes);
        assert_eq!(PhysicalKind::of(&DataType::Null)?, PhysicalKind::Unknown);
        assert!(!PhysicalKind::Complex.is_scalar());
        assert!(PhysicalKind::Bytes.is_scalar());
        Ok(())
    }

    #[test]
    fn kind_of_unsupported_types() {
        for data_type in [
            DataType::UInt32,
            DataType::Float16,
            DataType::Interval(IntervalUnit::DayTime),
            DataType::Decimal256(40, 2),
        ] {
            let err = PhysicalKind::of(&data_type).unwrap_err().to_string();
            assert!(err.contains("Unexpected type"), "{err}");
            assert!(err.contains(&data_type.to_string()), "{err}");
        }
    }

    #[test]
    fn primitive_keeps_logical_type() -> Result<()> {
        let physical = PrimitiveValues::<Int32Type>::try_new(&DataType::Date32)?;
        let values: ArrayRef = Arc::new(Date32Array::from(vec![Some(10), None, Some(20)]));
        let store = read_all(&physical, &values)?;
        assert_eq!(store.len(), 2);

        let array = physical.build([&store])?;
        assert_eq!(array.data_type(), &DataType::Date32);
        assert_eq!(array.as_primitive::<Date32Type>().values().to_vec(), vec![10, 20]);
        Ok(())
    }

    #[test]
    fn primitive_reads_sliced_arrays() -> Result<()> {
        let physical = PrimitiveValues::<Int32Type>::try_new(&DataType::Int32)?;
        let values: ArrayRef = Arc::new(Int32Array::from(vec![1, 2, 3, 4]).slice(2, 2));
        let reader = physical.reader(&values)?;
        assert!(matches!(reader.value(0), ScalarRef::Int32(3)));
        assert!(matches!(reader.value(1), ScalarRef::Int32(4)));
        Ok(())
    }

    #[test]
    fn timestamp_and_decimal_round_trip() -> Result<()> {
        let ts_type = DataType::Timestamp(TimeUnit::Millisecond, Some("+01:00".into()));
        let physical = PrimitiveValues::<TimestampNanosecondType>::try_new(&ts_type)?;
        let values: ArrayRef = Arc::new(
            TimestampMillisecondArray::from(vec![5, 6]).with_timezone("+01:00"),
        );
        let store = read_all(&physical, &values)?;
        assert!(matches!(store.value(1), ScalarRef::Timestamp(6)));
        assert_eq!(physical.build([&store])?.data_type(), &ts_type);

        let decimal_type = DataType::Decimal128(30, 3);
        let physical = PrimitiveValues::<Decimal128Type>::try_new(&decimal_type)?;
        let values: ArrayRef = Arc::new(
            Decimal128Array::from(vec![Some(i128::MAX / 7), None])
                .with_precision_and_scale(30, 3)?,
        );
        let store = read_all(&physical, &values)?;
        let array = physical.build([&store])?;
        assert_eq!(array.data_type(), &decimal_type);
        assert_eq!(array.as_primitive::<Decimal128Type>().value(0), i128::MAX / 7);
        Ok(())
    }

    #[test]
    fn primitive_rejects_other_storage() {
        let err = PrimitiveValues::<Int32Type>::try_new(&DataType::Int64)
            .unwrap_err()
            .to_string();
        assert!(err.contains("is stored as BIGINT"), "{err}");
    }

    #[test]
    fn bytes_concatenate_groups() -> Result<()> {
        let physical = BytesValues::<i32>::try_new(&DataType::Utf8)?;
        let first: ArrayRef = Arc::new(StringArray::from(vec![Some("a"), None, Some("bc")]));
        let second: ArrayRef = Arc::new(StringArray::from(vec!["", "def"]));
        let first = read_all(&physical, &first)?;
        let second = read_all(&physical, &second)?;

        let array = physical.build([&first, &second])?;
        let strings = array.as_string::<i32>();
        assert_eq!(
            strings.iter().collect::<Vec<_>>(),
            vec![Some("a"), Some("bc"), Some(""), Some("def")]
        );
        Ok(())
    }

    #[test]
    fn bytes_offset_width_must_match() -> Result<()> {
        assert!(BytesValues::<i32>::try_new(&DataType::LargeUtf8).is_err());
        let physical = BytesValues::<i64>::try_new(&DataType::LargeUtf8)?;
        let values: ArrayRef = Arc::new(LargeStringArray::from(vec!["x", "y"]));
        let store = read_all(&physical, &values)?;
        assert_eq!(physical.build([&store])?.data_type(), &DataType::LargeUtf8);
        Ok(())
    }

    #[test]
    fn view_types_keep_their_type() -> Result<()> {
        assert!(BytesValues::<i32>::try_new(&DataType::Utf8View).is_err());

        let physical = BytesViewValues::try_new(&DataType::Utf8View)?;
        let values: ArrayRef = Arc::new(StringViewArray::from(vec![
            Some("a string longer than twelve bytes"),
            None,
            Some("short"),
        ]));
        let store = read_all(&physical, &values)?;
        assert_eq!(store.len(), 2);
        let array = physical.build([&store])?;
        assert_eq!(
            array.as_string_view().iter().collect::<Vec<_>>(),
            vec![Some("a string longer than twelve bytes"), Some("short")]
        );

        let physical = BytesViewValues::try_new(&DataType::BinaryView)?;
        let values: ArrayRef =
            Arc::new(BinaryViewArray::from(vec![b"xy".as_slice(), b"z".as_slice()]));
        let store = read_all(&physical, &values)?;
        let array = physical.build([&store])?;
        assert_eq!(array.data_type(), &DataType::BinaryView);
        assert_eq!(array.as_binary_view().value(1), b"z");
        Ok(())
    }

    fn string_int_map(rows: Vec<Option<Vec<(&str, Option<i32>)>>>) -> Result<ArrayRef> {
        let mut builder = MapBuilder::new(None, StringBuilder::new(), Int32Builder::new());
        for row in rows {
            match row {
                Some(entries) => {
                    for (key, value) in entries {
                        builder.keys().append_value(key);
                        builder.values().append_option(value);
                    }
                    builder.append(true)?;
                }
                None => builder.append(false)?,
            }
        }
        Ok(Arc::new(builder.finish()))
    }

    #[test]
    fn map_values_round_trip() -> Result<()> {
        let values = string_int_map(vec![
            Some(vec![("a", Some(1)), ("b", None)]),
            None,
            Some(vec![]),
            Some(vec![("c", Some(3))]),
        ])?;
        let physical = ComplexValues::try_new(values.data_type())?;
        let reader = physical.reader(&values)?;
        assert!(!reader.is_valid(1));

        let store = read_all(&physical, &values)?;
        assert_eq!(store.len(), 3);
        let array = physical.build([&store])?;
        assert_eq!(array.data_type(), values.data_type());
        let expected = string_int_map(vec![
            Some(vec![("a", Some(1)), ("b", None)]),
            Some(vec![]),
            Some(vec![("c", Some(3))]),
        ])?;
        assert_eq!(&array, &expected);
        Ok(())
    }

    #[test]
    fn map_nested_in_struct_round_trip() -> Result<()> {
        let map = string_int_map(vec![Some(vec![("k", Some(7))]), Some(vec![])])?;
        let fields = Fields::from(vec![Field::new("m", map.data_type().clone(), true)]);
        let values: ArrayRef = Arc::new(StructArray::try_new(fields, vec![map], None)?);

        let physical = ComplexValues::try_new(values.data_type())?;
        let store = read_all(&physical, &values)?;
        let array = physical.build([&store])?;
        assert_eq!(&array, &values);
        Ok(())
    }

    #[test]
    fn complex_values_round_trip() -> Result<()> {
        let list_type = DataType::List(Arc::new(Field::new("item", DataType::Int32, true)));
        let physical = ComplexValues::try_new(&list_type)?;
        let values: ArrayRef = Arc::new(ListArray::from_iter_primitive::<Int32Type, _, _>(
            vec![
                Some(vec![Some(1), Some(2)]),
                None,
                Some(vec![]),
                Some(vec![Some(3), None]),
            ],
        ));
        let reader = physical.reader(&values)?;
        assert!(!reader.is_valid(1));
        assert!(matches!(reader.value(0), ScalarRef::Complex(_)));

        let store = read_all(&physical, &values)?;
        assert_eq!(store.len(), 3);
        let array = physical.build([&store])?;
        let expected: ArrayRef = Arc::new(ListArray::from_iter_primitive::<Int32Type, _, _>(
            vec![
                Some(vec![Some(1), Some(2)]),
                Some(vec![]),
                Some(vec![Some(3), None]),
            ],
        ));
        assert_eq!(&array, &expected);
        Ok(())
    }

    #[test]
    fn unknown_values_are_never_stored() -> Result<()> {
        let physical = UnknownValues::try_new(&DataType::Null)?;
        let values = new_null_array(&DataType::Null, 3);
        let store = read_all(&physical, &values)?;
        assert!(store.is_empty());
        let array = physical.build([&store])?;
        assert_eq!(array.data_type(), &DataType::Null);
        assert_eq!(array.len(), 0);
        Ok(())
    }
}
