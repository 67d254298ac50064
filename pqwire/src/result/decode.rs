//! Per type decode table.
use std::{borrow::Cow, collections::HashMap, fmt, str::Utf8Error};

use super::Value;
use crate::postgres::{Oid, pg_type};

/// Decode function for text formatted column.
pub type Decoder = Box<dyn Fn(&[u8]) -> Result<Value, DecodeError> + Send + Sync>;

/// Mapping from type [`Oid`] to its [`Decoder`].
///
/// Type without registered decoder is decoded as UTF-8 text.
///
/// ```
/// use pqwire::result::{DecodeTable, Value};
///
/// let mut table = DecodeTable::new();
/// // an enum type created with `CREATE TYPE mood AS ENUM (..)`
/// table.register(16_384, |raw| Ok(Value::Text(String::from_utf8_lossy(raw).to_uppercase())));
///
/// assert_eq!(table.decode(16_384, b"happy").unwrap(), Value::Text("HAPPY".into()));
/// assert_eq!(table.decode(23, b"42").unwrap(), Value::Int4(42));
/// ```
pub struct DecodeTable {
    decoders: HashMap<Oid, Decoder>,
}

impl DecodeTable {
    /// Table with default decoders.
    ///
    /// `bool`, `int2`, `int4`, `int8`, `oid`, `float4`, `float8` and `text`.
    pub fn new() -> DecodeTable {
        let mut me = DecodeTable::empty();
        me.register(pg_type::BOOL, decode_bool);
        me.register(pg_type::INT2, |raw| Ok(Value::Int2(parse(raw)?)));
        me.register(pg_type::INT4, |raw| Ok(Value::Int4(parse(raw)?)));
        me.register(pg_type::INT8, |raw| Ok(Value::Int8(parse(raw)?)));
        me.register(pg_type::OID, |raw| Ok(Value::Int8(parse::<u32>(raw)?.into())));
        me.register(pg_type::FLOAT4, |raw| Ok(Value::Float4(parse(raw)?)));
        me.register(pg_type::FLOAT8, |raw| Ok(Value::Float8(parse(raw)?)));
        me.register(pg_type::TEXT, decode_text);
        me
    }

    /// Table without any decoder, all column decoded as text.
    pub fn empty() -> DecodeTable {
        DecodeTable { decoders: HashMap::new() }
    }

    /// Register or replace decoder for `oid`.
    pub fn register<F>(&mut self, oid: Oid, decoder: F)
    where
        F: Fn(&[u8]) -> Result<Value, DecodeError> + Send + Sync + 'static,
    {
        self.decoders.insert(oid, Box::new(decoder));
    }

    /// Builder style [`register`][DecodeTable::register].
    pub fn with<F>(mut self, oid: Oid, decoder: F) -> DecodeTable
    where
        F: Fn(&[u8]) -> Result<Value, DecodeError> + Send + Sync + 'static,
    {
        self.register(oid, decoder);
        self
    }

    pub fn contains(&self, oid: Oid) -> bool {
        self.decoders.contains_key(&oid)
    }

    /// Decode text formatted value of type `oid`.
    pub fn decode(&self, oid: Oid, raw: &[u8]) -> Result<Value, DecodeError> {
        match self.decoders.get(&oid) {
            Some(decoder) => decoder(raw),
            None => decode_text(raw),
        }
    }
}

impl Default for DecodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DecodeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut oids = self.decoders.keys().collect::<Vec<_>>();
        oids.sort();
        f.debug_struct("DecodeTable").field("oids", &oids).finish()
    }
}

fn decode_bool(raw: &[u8]) -> Result<Value, DecodeError> {
    match raw {
        b"t" | b"T" => Ok(Value::Bool(true)),
        b"f" | b"F" => Ok(Value::Bool(false)),
        _ => Err(DecodeError::Parse { expect: "bool", found: String::from_utf8_lossy(raw).into_owned() }),
    }
}

fn decode_text(raw: &[u8]) -> Result<Value, DecodeError> {
    Ok(Value::Text(std::str::from_utf8(raw)?.to_owned()))
}

fn parse<T: std::str::FromStr>(raw: &[u8]) -> Result<T, DecodeError> {
    let text = std::str::from_utf8(raw)?;
    text.parse().map_err(|_| DecodeError::Parse {
        expect: std::any::type_name::<T>(),
        found: text.to_owned(),
    })
}

/// An error when decoding column value.
pub enum DecodeError {
    /// Column is transmitted in binary format, which is not supported.
    UnsupportedFormat {
        column: usize,
        oid: Oid,
    },
    /// Postgres return non utf8 string.
    Utf8(Utf8Error),
    /// Text could not be parsed as the column type.
    Parse {
        expect: &'static str,
        found: String,
    },
    /// Value type does not match the requested type.
    TypeMismatch {
        expect: &'static str,
        found: &'static str,
    },
    /// Error from user registered decoder.
    Custom(Cow<'static, str>),
    /// Column requested not found.
    ColumnNotFound(Cow<'static, str>),
    /// Index requested is out of bounds.
    IndexOutOfBounds(usize),
    /// Value is null.
    Null,
}

impl DecodeError {
    pub fn custom(reason: impl Into<Cow<'static, str>>) -> DecodeError {
        DecodeError::Custom(reason.into())
    }
}

impl From<Utf8Error> for DecodeError {
    fn from(e: Utf8Error) -> Self {
        Self::Utf8(e)
    }
}

impl std::error::Error for DecodeError { }

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to decode value, ")?;
        match self {
            Self::UnsupportedFormat { column, oid } => {
                write!(f, "binary format of column {column} (oid {oid}) is not supported")
            },
            Self::Utf8(e) => write!(f, "{e}"),
            Self::Parse { expect, found } => write!(f, "invalid {expect}: {found:?}"),
            Self::TypeMismatch { expect, found } => write!(f, "expected {expect} found {found}"),
            Self::Custom(reason) => f.write_str(reason),
            Self::ColumnNotFound(name) => write!(f, "column not found: {name:?}"),
            Self::IndexOutOfBounds(u) => write!(f, "index out of bounds: {u:?}"),
            Self::Null => write!(f, "unexpected NULL value"),
        }
    }
}

impl fmt::Debug for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let table = DecodeTable::new();
        assert_eq!(table.decode(pg_type::BOOL, b"t").unwrap(), Value::Bool(true));
        assert_eq!(table.decode(pg_type::BOOL, b"F").unwrap(), Value::Bool(false));
        assert_eq!(table.decode(pg_type::INT4, b"-12").unwrap(), Value::Int4(-12));
        assert_eq!(table.decode(pg_type::INT8, b"9000000000").unwrap(), Value::Int8(9_000_000_000));
        assert_eq!(table.decode(pg_type::FLOAT8, b"0.25").unwrap(), Value::Float8(0.25));
        assert_eq!(table.decode(pg_type::TEXT, b"Ok").unwrap(), Value::Text("Ok".into()));
    }

    #[test]
    fn unknown_type_is_text() {
        let table = DecodeTable::new();
        assert!(!table.contains(pg_type::NUMERIC));
        assert_eq!(table.decode(pg_type::NUMERIC, b"3.14").unwrap(), Value::Text("3.14".into()));
        assert!(matches!(table.decode(9999, &[0xff, 0xfe]), Err(DecodeError::Utf8(_))));
    }

    #[test]
    fn parse_failure() {
        let table = DecodeTable::new();
        assert!(matches!(table.decode(pg_type::INT4, b"abc"), Err(DecodeError::Parse { .. })));
        assert!(matches!(table.decode(pg_type::BOOL, b"yes"), Err(DecodeError::Parse { expect: "bool", .. })));
    }

    #[test]
    fn override_default() {
        let table = DecodeTable::new().with(pg_type::INT4, |_| Err(DecodeError::custom("nope")));
        assert!(matches!(table.decode(pg_type::INT4, b"1"), Err(DecodeError::Custom(_))));
    }
}
