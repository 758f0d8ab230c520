//! Closed enumeration of the scalar kinds a row may carry.
//!
//! Incoming rows are dynamically typed: the first value seen for a column
//! name decides that column's type. Rather than open-ended reflection, the
//! supported kinds form a closed enum with an explicit normalization table
//! ([`ValueKind::storage`]) deciding which kinds are stored as strings.

use std::fmt;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanArray, Float32Array, Float64Array, Int8Array, Int16Array, Int32Array,
    Int64Array, StringArray, TimestampMicrosecondArray, UInt8Array, UInt16Array, UInt32Array,
    UInt64Array,
};
use arrow::datatypes::{DataType, TimeUnit};
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// A single dynamically-typed scalar value.
///
/// `Enum` carries a host-framework enumeration constant as its string form;
/// its storage type normalizes to `Utf8`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Utf8(String),
    Enum(String),
    Timestamp(DateTime<Utc>),
}

/// The runtime type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
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
    Utf8,
    Enum,
    Timestamp,
}

impl ValueKind {
    /// Source-type name used when a type collision suffixes a column name.
    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Bool => "Boolean",
            ValueKind::Int8 => "Int8",
            ValueKind::Int16 => "Int16",
            ValueKind::Int32 => "Int32",
            ValueKind::Int64 => "Int64",
            ValueKind::UInt8 => "UInt8",
            ValueKind::UInt16 => "UInt16",
            ValueKind::UInt32 => "UInt32",
            ValueKind::UInt64 => "UInt64",
            ValueKind::Float32 => "Float32",
            ValueKind::Float64 => "Float64",
            ValueKind::Utf8 => "Utf8",
            ValueKind::Enum => "Enum",
            ValueKind::Timestamp => "Timestamp",
        }
    }

    /// Normalization table from source kind to on-disk storage kind.
    ///
    /// Enumerations are stored as strings; every other kind keeps its
    /// natural type (always nullable on disk).
    pub fn storage(&self) -> ValueKind {
        match self {
            ValueKind::Enum => ValueKind::Utf8,
            other => *other,
        }
    }

    /// Arrow data type for this kind when used as a storage kind.
    pub fn arrow_type(&self) -> DataType {
        match self.storage() {
            ValueKind::Bool => DataType::Boolean,
            ValueKind::Int8 => DataType::Int8,
            ValueKind::Int16 => DataType::Int16,
            ValueKind::Int32 => DataType::Int32,
            ValueKind::Int64 => DataType::Int64,
            ValueKind::UInt8 => DataType::UInt8,
            ValueKind::UInt16 => DataType::UInt16,
            ValueKind::UInt32 => DataType::UInt32,
            ValueKind::UInt64 => DataType::UInt64,
            ValueKind::Float32 => DataType::Float32,
            ValueKind::Float64 => DataType::Float64,
            ValueKind::Utf8 => DataType::Utf8,
            ValueKind::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
            ValueKind::Enum => unreachable!("Enum normalizes to Utf8"),
        }
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Int8(_) => ValueKind::Int8,
            Value::Int16(_) => ValueKind::Int16,
            Value::Int32(_) => ValueKind::Int32,
            Value::Int64(_) => ValueKind::Int64,
            Value::UInt8(_) => ValueKind::UInt8,
            Value::UInt16(_) => ValueKind::UInt16,
            Value::UInt32(_) => ValueKind::UInt32,
            Value::UInt64(_) => ValueKind::UInt64,
            Value::Float32(_) => ValueKind::Float32,
            Value::Float64(_) => ValueKind::Float64,
            Value::Utf8(_) => ValueKind::Utf8,
            Value::Enum(_) => ValueKind::Enum,
            Value::Timestamp(_) => ValueKind::Timestamp,
        }
    }

    /// The value as stored on disk: enumeration constants collapse to their
    /// string form, every other variant is unchanged.
    pub(crate) fn normalize(&self) -> Value {
        match self {
            Value::Enum(v) => Value::Utf8(v.clone()),
            other => other.clone(),
        }
    }
}

/// String coercion rule for values written into a string-storage column.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int8(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::UInt8(v) => write!(f, "{v}"),
            Value::UInt16(v) => write!(f, "{v}"),
            Value::UInt32(v) => write!(f, "{v}"),
            Value::UInt64(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Utf8(v) | Value::Enum(v) => f.write_str(v),
            Value::Timestamp(v) => f.write_str(&v.to_rfc3339()),
        }
    }
}

macro_rules! value_from {
    ($native:ty, $variant:ident) => {
        impl From<$native> for Value {
            fn from(v: $native) -> Self {
                Value::$variant(v)
            }
        }
    };
}

value_from!(bool, Bool);
value_from!(i8, Int8);
value_from!(i16, Int16);
value_from!(i32, Int32);
value_from!(i64, Int64);
value_from!(u8, UInt8);
value_from!(u16, UInt16);
value_from!(u32, UInt32);
value_from!(u64, UInt64);
value_from!(f32, Float32);
value_from!(f64, Float64);
value_from!(String, Utf8);
value_from!(DateTime<Utc>, Timestamp);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Utf8(v.to_string())
    }
}

macro_rules! primitive_slots {
    ($slots:expr, $variant:ident, $native:ty) => {{
        let mut out: Vec<Option<$native>> = Vec::with_capacity($slots.len());
        for slot in $slots {
            match slot {
                None => out.push(None),
                Some(Value::$variant(v)) => out.push(Some(*v)),
                Some(other) => {
                    return Err(Error::Internal(format!(
                        "column buffer for {} storage holds a {} value",
                        stringify!($variant),
                        other.kind().name(),
                    )));
                }
            }
        }
        out
    }};
}

/// Build one Arrow array from a column buffer of nullable storage values.
///
/// Buffers are converted at write time, so every populated slot must already
/// match the storage kind; anything else is an internal invariant failure.
pub(crate) fn build_array(storage: ValueKind, slots: &[Option<Value>]) -> Result<ArrayRef> {
    let array: ArrayRef = match storage {
        ValueKind::Bool => Arc::new(BooleanArray::from(primitive_slots!(slots, Bool, bool))),
        ValueKind::Int8 => Arc::new(Int8Array::from(primitive_slots!(slots, Int8, i8))),
        ValueKind::Int16 => Arc::new(Int16Array::from(primitive_slots!(slots, Int16, i16))),
        ValueKind::Int32 => Arc::new(Int32Array::from(primitive_slots!(slots, Int32, i32))),
        ValueKind::Int64 => Arc::new(Int64Array::from(primitive_slots!(slots, Int64, i64))),
        ValueKind::UInt8 => Arc::new(UInt8Array::from(primitive_slots!(slots, UInt8, u8))),
        ValueKind::UInt16 => Arc::new(UInt16Array::from(primitive_slots!(slots, UInt16, u16))),
        ValueKind::UInt32 => Arc::new(UInt32Array::from(primitive_slots!(slots, UInt32, u32))),
        ValueKind::UInt64 => Arc::new(UInt64Array::from(primitive_slots!(slots, UInt64, u64))),
        ValueKind::Float32 => Arc::new(Float32Array::from(primitive_slots!(slots, Float32, f32))),
        ValueKind::Float64 => Arc::new(Float64Array::from(primitive_slots!(slots, Float64, f64))),
        ValueKind::Utf8 => {
            let mut out: Vec<Option<&str>> = Vec::with_capacity(slots.len());
            for slot in slots {
                match slot {
                    None => out.push(None),
                    Some(Value::Utf8(v)) => out.push(Some(v.as_str())),
                    Some(other) => {
                        return Err(Error::Internal(format!(
                            "column buffer for Utf8 storage holds a {} value",
                            other.kind().name(),
                        )));
                    }
                }
            }
            Arc::new(StringArray::from(out))
        }
        ValueKind::Timestamp => {
            let mut out: Vec<Option<i64>> = Vec::with_capacity(slots.len());
            for slot in slots {
                match slot {
                    None => out.push(None),
                    Some(Value::Timestamp(v)) => out.push(Some(v.timestamp_micros())),
                    Some(other) => {
                        return Err(Error::Internal(format!(
                            "column buffer for Timestamp storage holds a {} value",
                            other.kind().name(),
                        )));
                    }
                }
            }
            Arc::new(TimestampMicrosecondArray::from(out))
        }
        ValueKind::Enum => {
            return Err(Error::Internal(
                "Enum is a source kind, never a storage kind".into(),
            ));
        }
    };
    Ok(array)
}
