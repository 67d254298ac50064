//! Decoded column value.
use std::fmt;

use super::DecodeError;
use crate::ext::FmtExt;

/// A dynamically typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Return `true` if value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Widened integer value.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int2(i) => Some(i.into()),
            Value::Int4(i) => Some(i.into()),
            Value::Int8(i) => Some(i),
            _ => None,
        }
    }

    /// Name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int2(_) => "int2",
            Value::Int4(_) => "int4",
            Value::Int8(_) => "int8",
            Value::Float4(_) => "float4",
            Value::Float8(_) => "float8",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
        }
    }

    /// Try convert using [`FromValue`] implementation.
    pub fn decode<T: FromValue>(&self) -> Result<T, DecodeError> {
        T::from_value(self)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => fmt::Display::fmt(b, f),
            Value::Int2(i) => fmt::Display::fmt(i, f),
            Value::Int4(i) => fmt::Display::fmt(i, f),
            Value::Int8(i) => fmt::Display::fmt(i, f),
            Value::Float4(n) => fmt::Display::fmt(n, f),
            Value::Float8(n) => fmt::Display::fmt(n, f),
            Value::Text(s) => f.write_str(s),
            Value::Bytes(b) => fmt::Display::fmt(&b.lossy(), f),
        }
    }
}

/// A type that can be constructed from [`Value`].
pub trait FromValue: Sized {
    /// Try convert value to self.
    fn from_value(value: &Value) -> Result<Self, DecodeError>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Null => Ok(None),
            value => T::from_value(value).map(Some),
        }
    }
}

macro_rules! from_value {
    ($ty:ty, $expect:literal, $($pat:pat => $body:expr),* $(,)?) => {
        impl FromValue for $ty {
            fn from_value(value: &Value) -> Result<Self, DecodeError> {
                match value {
                    $($pat => Ok($body),)*
                    Value::Null => Err(DecodeError::Null),
                    value => Err(DecodeError::TypeMismatch { expect: $expect, found: value.type_name() }),
                }
            }
        }
    };
}

from_value!(bool, "bool", Value::Bool(b) => *b);
from_value!(i16, "int2", Value::Int2(i) => *i);
from_value!(i32, "int4", Value::Int2(i) => (*i).into(), Value::Int4(i) => *i);
from_value!(i64, "int8", Value::Int2(i) => (*i).into(), Value::Int4(i) => (*i).into(), Value::Int8(i) => *i);
from_value!(f32, "float4", Value::Float4(n) => *n);
from_value!(f64, "float8", Value::Float4(n) => (*n).into(), Value::Float8(n) => *n);
from_value!(String, "text", Value::Text(s) => s.clone());
from_value!(Vec<u8>, "bytes", Value::Bytes(b) => b.clone(), Value::Text(s) => s.as_bytes().to_vec());

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn widening() {
        assert_eq!(Value::Int2(7).decode::<i64>().unwrap(), 7);
        assert_eq!(Value::Int4(-1).decode::<i32>().unwrap(), -1);
        assert!(matches!(
            Value::Int8(1).decode::<i32>(),
            Err(DecodeError::TypeMismatch { expect: "int4", found: "int8" })
        ));
    }

    #[test]
    fn null_handling() {
        assert_eq!(Value::Null.decode::<Option<String>>().unwrap(), None);
        assert!(matches!(Value::Null.decode::<String>(), Err(DecodeError::Null)));
        assert_eq!(Value::Text("Ok".into()).decode::<Option<String>>().unwrap().as_deref(), Some("Ok"));
    }

    #[test]
    fn display() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Float8(1.5).to_string(), "1.5");
        assert_eq!(Value::Text("abc".into()).to_string(), "abc");
    }
}
