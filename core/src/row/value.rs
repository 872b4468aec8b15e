use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use uuid::Uuid;

/// Declared type of a row member.
///
/// Nullable members report the kind of their underlying type, nullability is tracked
/// separately on the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    U8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Decimal,
    String,
    Char,
    Bytes,
    Uuid,
    Date,
    Time,
    DateTime,
    DateTimeOffset,
    /// A nested record or any other non-scalar member. Never bulk loaded directly, only
    /// through a dotted nested path.
    Composite,
}

impl ValueKind {
    /// Whether "add all columns" picks up members of this kind.
    pub fn is_bulk_loadable(&self) -> bool {
        !matches!(self, ValueKind::Composite)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Bool => "bool",
            ValueKind::U8 => "u8",
            ValueKind::I16 => "i16",
            ValueKind::I32 => "i32",
            ValueKind::I64 => "i64",
            ValueKind::F32 => "f32",
            ValueKind::F64 => "f64",
            ValueKind::Decimal => "decimal",
            ValueKind::String => "string",
            ValueKind::Char => "char",
            ValueKind::Bytes => "bytes",
            ValueKind::Uuid => "uuid",
            ValueKind::Date => "date",
            ValueKind::Time => "time",
            ValueKind::DateTime => "datetime",
            ValueKind::DateTimeOffset => "datetimeoffset",
            ValueKind::Composite => "composite",
        }
    }
}

/// A single cell value moving between rows, the staging buffer and the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    U8(u8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    String(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn kind(&self) -> Option<ValueKind> {
        let kind = match self {
            SqlValue::Null => return None,
            SqlValue::Bool(_) => ValueKind::Bool,
            SqlValue::U8(_) => ValueKind::U8,
            SqlValue::I16(_) => ValueKind::I16,
            SqlValue::I32(_) => ValueKind::I32,
            SqlValue::I64(_) => ValueKind::I64,
            SqlValue::F32(_) => ValueKind::F32,
            SqlValue::F64(_) => ValueKind::F64,
            SqlValue::Decimal(_) => ValueKind::Decimal,
            SqlValue::String(_) => ValueKind::String,
            SqlValue::Bytes(_) => ValueKind::Bytes,
            SqlValue::Uuid(_) => ValueKind::Uuid,
            SqlValue::Date(_) => ValueKind::Date,
            SqlValue::Time(_) => ValueKind::Time,
            SqlValue::DateTime(_) => ValueKind::DateTime,
            SqlValue::DateTimeOffset(_) => ValueKind::DateTimeOffset,
        };
        Some(kind)
    }

    /// Integral view used when coercing engine-generated keys. `SCOPE_IDENTITY()` comes back
    /// as a zero-scale decimal, OUTPUT columns come back as whatever the identity column is.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            SqlValue::U8(v) => Some(i128::from(*v)),
            SqlValue::I16(v) => Some(i128::from(*v)),
            SqlValue::I32(v) => Some(i128::from(*v)),
            SqlValue::I64(v) => Some(i128::from(*v)),
            SqlValue::Decimal(v) if v.fract().is_zero() => v.to_i128(),
            _ => None,
        }
    }

    /// Converts an engine value into the representation a member of `kind` stores. Used when
    /// a generated key is written into a dynamic row, which has no Rust field type to
    /// convert through.
    pub fn coerce(self, kind: ValueKind) -> Result<SqlValue, ConversionError> {
        if self.is_null() || self.kind() == Some(kind) {
            return Ok(self);
        }

        match kind {
            ValueKind::U8 => u8::from_sql_value(self).map(SqlValue::U8),
            ValueKind::I16 => i16::from_sql_value(self).map(SqlValue::I16),
            ValueKind::I32 => i32::from_sql_value(self).map(SqlValue::I32),
            ValueKind::I64 => i64::from_sql_value(self).map(SqlValue::I64),
            ValueKind::F64 => f64::from_sql_value(self).map(SqlValue::F64),
            ValueKind::Decimal => Decimal::from_sql_value(self).map(SqlValue::Decimal),
            other => Err(ConversionError::new(other.as_str(), &self)),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Bool(v) => write!(f, "{}", v),
            SqlValue::U8(v) => write!(f, "{}", v),
            SqlValue::I16(v) => write!(f, "{}", v),
            SqlValue::I32(v) => write!(f, "{}", v),
            SqlValue::I64(v) => write!(f, "{}", v),
            SqlValue::F32(v) => write!(f, "{}", v),
            SqlValue::F64(v) => write!(f, "{}", v),
            SqlValue::Decimal(v) => write!(f, "{}", v),
            SqlValue::String(v) => write!(f, "'{}'", v),
            SqlValue::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            SqlValue::Uuid(v) => write!(f, "{}", v),
            SqlValue::Date(v) => write!(f, "{}", v),
            SqlValue::Time(v) => write!(f, "{}", v),
            SqlValue::DateTime(v) => write!(f, "{}", v),
            SqlValue::DateTimeOffset(v) => write!(f, "{}", v),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("Cannot convert {found} into {expected}")]
pub struct ConversionError {
    pub expected: &'static str,
    pub found: String,
}

impl ConversionError {
    pub fn new(expected: &'static str, found: &SqlValue) -> Self {
        ConversionError { expected, found: format!("{:?}", found) }
    }
}

/// Rust types that can sit behind a registered row member.
pub trait ColumnValue: Sized {
    const KIND: ValueKind;
    const NULLABLE: bool = false;

    fn to_sql_value(&self) -> SqlValue;

    fn from_sql_value(value: SqlValue) -> Result<Self, ConversionError>;
}

macro_rules! integer_column_value {
    ($ty:ty, $kind:ident) => {
        impl ColumnValue for $ty {
            const KIND: ValueKind = ValueKind::$kind;

            fn to_sql_value(&self) -> SqlValue {
                SqlValue::$kind(*self)
            }

            fn from_sql_value(value: SqlValue) -> Result<Self, ConversionError> {
                value
                    .as_i128()
                    .and_then(|v| <$ty>::try_from(v).ok())
                    .ok_or_else(|| ConversionError::new(stringify!($ty), &value))
            }
        }
    };
}

integer_column_value!(u8, U8);
integer_column_value!(i16, I16);
integer_column_value!(i32, I32);
integer_column_value!(i64, I64);

macro_rules! exact_column_value {
    ($ty:ty, $kind:ident) => {
        impl ColumnValue for $ty {
            const KIND: ValueKind = ValueKind::$kind;

            fn to_sql_value(&self) -> SqlValue {
                SqlValue::$kind(self.clone())
            }

            fn from_sql_value(value: SqlValue) -> Result<Self, ConversionError> {
                match value {
                    SqlValue::$kind(v) => Ok(v),
                    other => Err(ConversionError::new(stringify!($ty), &other)),
                }
            }
        }
    };
}

exact_column_value!(bool, Bool);
exact_column_value!(String, String);
exact_column_value!(Uuid, Uuid);
exact_column_value!(NaiveDate, Date);
exact_column_value!(NaiveTime, Time);
exact_column_value!(NaiveDateTime, DateTime);
exact_column_value!(DateTime<FixedOffset>, DateTimeOffset);

impl ColumnValue for f32 {
    const KIND: ValueKind = ValueKind::F32;

    fn to_sql_value(&self) -> SqlValue {
        SqlValue::F32(*self)
    }

    fn from_sql_value(value: SqlValue) -> Result<Self, ConversionError> {
        match value {
            SqlValue::F32(v) => Ok(v),
            other => Err(ConversionError::new("f32", &other)),
        }
    }
}

impl ColumnValue for f64 {
    const KIND: ValueKind = ValueKind::F64;

    fn to_sql_value(&self) -> SqlValue {
        SqlValue::F64(*self)
    }

    fn from_sql_value(value: SqlValue) -> Result<Self, ConversionError> {
        match value {
            SqlValue::F64(v) => Ok(v),
            SqlValue::F32(v) => Ok(f64::from(v)),
            other => Err(ConversionError::new("f64", &other)),
        }
    }
}

impl ColumnValue for Decimal {
    const KIND: ValueKind = ValueKind::Decimal;

    fn to_sql_value(&self) -> SqlValue {
        SqlValue::Decimal(*self)
    }

    fn from_sql_value(value: SqlValue) -> Result<Self, ConversionError> {
        match value {
            SqlValue::Decimal(v) => Ok(v),
            other => match other.as_i128().and_then(|v| i64::try_from(v).ok()) {
                Some(v) => Ok(Decimal::from(v)),
                None => Err(ConversionError::new("Decimal", &other)),
            },
        }
    }
}

impl ColumnValue for char {
    const KIND: ValueKind = ValueKind::Char;

    fn to_sql_value(&self) -> SqlValue {
        SqlValue::String(self.to_string())
    }

    fn from_sql_value(value: SqlValue) -> Result<Self, ConversionError> {
        if let SqlValue::String(s) = &value {
            let mut chars = s.chars();
            if let (Some(c), None) = (chars.next(), chars.next()) {
                return Ok(c);
            }
        }
        Err(ConversionError::new("char", &value))
    }
}

impl ColumnValue for Vec<u8> {
    const KIND: ValueKind = ValueKind::Bytes;

    fn to_sql_value(&self) -> SqlValue {
        SqlValue::Bytes(self.clone())
    }

    fn from_sql_value(value: SqlValue) -> Result<Self, ConversionError> {
        match value {
            SqlValue::Bytes(v) => Ok(v),
            other => Err(ConversionError::new("Vec<u8>", &other)),
        }
    }
}

impl ColumnValue for DateTime<Utc> {
    const KIND: ValueKind = ValueKind::DateTimeOffset;

    fn to_sql_value(&self) -> SqlValue {
        SqlValue::DateTimeOffset(self.fixed_offset())
    }

    fn from_sql_value(value: SqlValue) -> Result<Self, ConversionError> {
        match value {
            SqlValue::DateTimeOffset(v) => Ok(v.with_timezone(&Utc)),
            SqlValue::DateTime(v) => Ok(v.and_utc()),
            other => Err(ConversionError::new("DateTime<Utc>", &other)),
        }
    }
}

impl<V: ColumnValue> ColumnValue for Option<V> {
    const KIND: ValueKind = V::KIND;
    const NULLABLE: bool = true;

    fn to_sql_value(&self) -> SqlValue {
        match self {
            Some(v) => v.to_sql_value(),
            None => SqlValue::Null,
        }
    }

    fn from_sql_value(value: SqlValue) -> Result<Self, ConversionError> {
        match value {
            SqlValue::Null => Ok(None),
            other => V::from_sql_value(other).map(Some),
        }
    }
}
