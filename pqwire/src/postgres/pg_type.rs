/// Postgres object identifier.
///
/// The oid type is implemented as an unsigned four-byte integer.
///
/// <https://www.postgresql.org/docs/current/datatype-oid.html>
pub type Oid = u32;

macro_rules! oid {
    ($($name:ident = $oid:literal $(, $doc:literal)?;)*) => {$(
        $(#[doc = $doc])?
        pub const $name: Oid = $oid;
    )*};
}

oid! {
    UNSPECIFIED = 0, "Placing a zero as parameter type leaves the type unspecified";
    BOOL = 16, "`bool` boolean, 'true'/'false'";
    BYTEA = 17, "`bytea` variable-length string, binary values escaped";
    CHAR = 18;
    NAME = 19, "`name` 63-byte type for storing system identifiers";
    INT8 = 20, "`int8` ~18 digit integer, 8-byte storage";
    INT2 = 21, "`int2` -32 thousand to 32 thousand, 2-byte storage";
    INT4 = 23, "`int4` -2 billion to 2 billion integer, 4-byte storage";
    TEXT = 25, "`text` variable-length string, no limit specified";
    OID = 26, "`oid` object identifier(oid), maximum 4 billion";
    JSON = 114;
    FLOAT4 = 700, "`float4` single-precision floating point number, 4-byte storage";
    FLOAT8 = 701, "`float8` double-precision floating point number, 8-byte storage";
    VARCHAR = 1043;
    DATE = 1082;
    TIMESTAMP = 1114;
    TIMESTAMPTZ = 1184;
    NUMERIC = 1700;
    UUID = 2950;
    JSONB = 3802;
}

/// Postgres data transmission format.
///
/// <https://www.postgresql.org/docs/current/protocol-overview.html#PROTOCOL-FORMAT-CODES>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgFormat {
    /// Text has format code zero.
    ///
    /// In the [`Text`][t] transmitted representation, there is no trailing null character.
    ///
    /// [t]: PgFormat::Text
    Text,
    /// Binary has format code one.
    ///
    /// Binary column values are not decoded by this library.
    Binary,
}

impl PgFormat {
    /// Return format code for current format.
    pub fn format_code(&self) -> i16 {
        match self {
            PgFormat::Text => 0,
            PgFormat::Binary => 1,
        }
    }

    /// Returns `None` for unknown format code.
    pub fn from_code(code: i16) -> Option<PgFormat> {
        match code {
            0 => Some(PgFormat::Text),
            1 => Some(PgFormat::Binary),
            _ => None,
        }
    }
}
