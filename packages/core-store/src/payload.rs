//! Payload values: what a typed slot holds.
//!
//! The caller picks the variant at the call site; nothing is inferred from the
//! shape of the data.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Error, TypeTag, Value};

/// Element data type of an array payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

impl DType {
    const ALL: [DType; 11] = [
        DType::Bool,
        DType::Int8,
        DType::Int16,
        DType::Int32,
        DType::Int64,
        DType::UInt8,
        DType::UInt16,
        DType::UInt32,
        DType::UInt64,
        DType::Float32,
        DType::Float64,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::UInt8 => "uint8",
            DType::UInt16 => "uint16",
            DType::UInt32 => "uint32",
            DType::UInt64 => "uint64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }

    /// Size of one element in bytes.
    pub fn itemsize(&self) -> usize {
        match self {
            DType::Bool | DType::Int8 | DType::UInt8 => 1,
            DType::Int16 | DType::UInt16 => 2,
            DType::Int32 | DType::UInt32 | DType::Float32 => 4,
            DType::Int64 | DType::UInt64 | DType::Float64 => 8,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DType::ALL
            .iter()
            .find(|d| d.as_str() == s)
            .copied()
            .ok_or_else(|| Error::UnknownDtype(s.to_string()))
    }
}

/// Byte order of stored array data.
///
/// Recorded for information only: readers assume native order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    #[serde(rename = "little")]
    Little,
    #[serde(rename = "big")]
    Big,
    /// Single-byte element types have no byte order.
    #[serde(rename = "NA")]
    NotApplicable,
}

impl ByteOrder {
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    /// The order recorded for native-endian data of `dtype`.
    pub fn for_dtype(dtype: DType) -> Self {
        if dtype.itemsize() == 1 {
            ByteOrder::NotApplicable
        } else {
            Self::native()
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ByteOrder::Little => "little",
            ByteOrder::Big => "big",
            ByteOrder::NotApplicable => "NA",
        }
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Rust scalar that can be an array element.
pub trait Element: Copy {
    const DTYPE: DType;

    fn write_ne(self, out: &mut Vec<u8>);

    /// `bytes` is exactly `Self::DTYPE.itemsize()` long.
    fn read_ne(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($t:ty => $dtype:ident),* $(,)?) => {
        $(
            impl Element for $t {
                const DTYPE: DType = DType::$dtype;

                fn write_ne(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_ne_bytes());
                }

                fn read_ne(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    buf.copy_from_slice(bytes);
                    <$t>::from_ne_bytes(buf)
                }
            }
        )*
    };
}

impl_element! {
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
}

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn write_ne(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }

    fn read_ne(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// A C-ordered, native-endian n-dimensional array.
#[derive(Clone, Debug, PartialEq)]
pub struct NdArray {
    dtype: DType,
    shape: Vec<usize>,
    data: Bytes,
}

impl NdArray {
    /// Wrap raw element bytes.
    ///
    /// Fails if `data` is not exactly `product(shape) * itemsize` bytes.
    pub fn new(dtype: DType, shape: Vec<usize>, data: impl Into<Bytes>) -> Result<Self, Error> {
        let data = data.into();
        let expected = shape
            .iter()
            .try_fold(dtype.itemsize(), |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| {
                Error::InvalidPayload(format!(
                    "{} array of shape {:?} is too large",
                    dtype, shape
                ))
            })?;
        if data.len() != expected {
            return Err(Error::InvalidPayload(format!(
                "{} array of shape {:?} needs {} bytes, got {}",
                dtype,
                shape,
                expected,
                data.len()
            )));
        }
        Ok(NdArray { dtype, shape, data })
    }

    /// A one-dimensional array of `values`.
    pub fn from_vec<T: Element>(values: Vec<T>) -> Self {
        let shape = vec![values.len()];
        NdArray {
            dtype: T::DTYPE,
            shape,
            data: Self::encode_elements(&values),
        }
    }

    /// An array of `values` laid out in C order with the given shape.
    pub fn from_slice<T: Element>(values: &[T], shape: Vec<usize>) -> Result<Self, Error> {
        Self::new(T::DTYPE, shape, Self::encode_elements(values))
    }

    fn encode_elements<T: Element>(values: &[T]) -> Bytes {
        let mut out = Vec::with_capacity(values.len() * T::DTYPE.itemsize());
        for value in values {
            value.write_ne(&mut out);
        }
        Bytes::from(out)
    }

    /// Copy the elements out as `T`, which must match the array's dtype.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, Error> {
        if T::DTYPE != self.dtype {
            return Err(Error::InvalidPayload(format!(
                "array holds {} elements, requested {}",
                self.dtype,
                T::DTYPE
            )));
        }
        Ok(self
            .data
            .chunks_exact(self.dtype.itemsize())
            .map(T::read_ne)
            .collect())
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byteorder(&self) -> ByteOrder {
        ByteOrder::for_dtype(self.dtype)
    }
}

/// Rows of cells under named columns.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Table {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table, checking that every row has one cell per column.
    pub fn with_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, Error> {
        let mut table = Table::new(columns);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), Error> {
        if row.len() != self.columns.len() {
            return Err(Error::InvalidPayload(format!(
                "row {} has {} cells for {} columns",
                self.rows.len(),
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// The cells of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|row| &row[index]).collect())
    }
}

/// The content of a typed slot.
#[derive(Clone, Debug, PartialEq)]
pub enum PayloadValue {
    /// For `dataset` and `image` slots.
    Array(NdArray),
    Table(Table),
    KeyValue(BTreeMap<String, Value>),
    Binary(Bytes),
}

impl PayloadValue {
    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            PayloadValue::Array(_) => "array",
            PayloadValue::Table(_) => "table",
            PayloadValue::KeyValue(_) => "keyvalue",
            PayloadValue::Binary(_) => "binary",
        }
    }

    /// Whether this variant can be stored under `tag`.
    pub fn fits(&self, tag: TypeTag) -> bool {
        matches!(
            (self, tag),
            (PayloadValue::Array(_), TypeTag::Dataset | TypeTag::Image)
                | (PayloadValue::Table(_), TypeTag::Table)
                | (PayloadValue::KeyValue(_), TypeTag::KeyValue)
                | (PayloadValue::Binary(_), TypeTag::Binary)
        )
    }

    /// `TypeMismatch` unless this variant fits `tag`.
    pub fn check_fits(&self, tag: TypeTag, path: impl ToString) -> Result<(), Error> {
        if self.fits(tag) {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                path: path.to_string(),
                expected: tag,
                found: format!("{} payload", self.kind()),
            })
        }
    }

    pub fn as_array(&self) -> Option<&NdArray> {
        match self {
            PayloadValue::Array(array) => Some(array),
            _ => None,
        }
    }
}

impl From<NdArray> for PayloadValue {
    fn from(v: NdArray) -> Self {
        PayloadValue::Array(v)
    }
}

impl From<Table> for PayloadValue {
    fn from(v: Table) -> Self {
        PayloadValue::Table(v)
    }
}

impl From<BTreeMap<String, Value>> for PayloadValue {
    fn from(v: BTreeMap<String, Value>) -> Self {
        PayloadValue::KeyValue(v)
    }
}

impl From<Bytes> for PayloadValue {
    fn from(v: Bytes) -> Self {
        PayloadValue::Binary(v)
    }
}
