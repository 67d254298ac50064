//! Server reported error and notice fields.
use std::{collections::BTreeMap, fmt};

use bytes::Bytes;

use super::ProtocolError;
use crate::ext::BytesExt;

/// Error or notice reported by the server.
///
/// A mapping from single byte field code to its value.
///
/// <https://www.postgresql.org/docs/current/protocol-error-fields.html>
#[derive(Clone, PartialEq, Eq)]
pub struct SqlError {
    fields: BTreeMap<u8, String>,
}

impl SqlError {
    pub const SEVERITY: u8 = b'S';
    /// Severity that is never localized.
    pub const SEVERITY_NONLOCALIZED: u8 = b'V';
    /// The SQLSTATE code for the error.
    pub const CODE: u8 = b'C';
    pub const MESSAGE: u8 = b'M';
    pub const DETAIL: u8 = b'D';
    pub const HINT: u8 = b'H';
    /// Cursor position as an index into the original query string.
    pub const POSITION: u8 = b'P';
    pub const INTERNAL_POSITION: u8 = b'p';
    pub const INTERNAL_QUERY: u8 = b'q';
    pub const WHERE: u8 = b'W';
    pub const SCHEMA: u8 = b's';
    pub const TABLE: u8 = b't';
    pub const COLUMN: u8 = b'c';
    pub const DATA_TYPE: u8 = b'd';
    pub const CONSTRAINT: u8 = b'n';
    pub const FILE: u8 = b'F';
    pub const LINE: u8 = b'L';
    pub const ROUTINE: u8 = b'R';

    /// SQLSTATE of a successful completion.
    pub const SUCCESS_CODE: &str = "00000";

    /// The success sentinel, `CODE` is `00000`.
    pub fn success() -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(Self::CODE, Self::SUCCESS_CODE.into());
        fields.insert(Self::MESSAGE, "success".into());
        Self { fields }
    }

    /// Parse `(code, string)` pairs terminated by a zero byte.
    ///
    /// Unrecognized field codes are kept as is.
    pub fn parse(mut body: Bytes) -> Result<Self, ProtocolError> {
        let mut fields = BTreeMap::new();
        loop {
            let code = body.get_u8_checked()?;
            if code == b'\0' {
                break;
            }
            let value = body.get_nul_bytestr()?;
            fields.insert(code, value.into());
        }
        Ok(Self { fields })
    }

    pub fn get(&self, code: u8) -> Option<&str> {
        self.fields.get(&code).map(String::as_str)
    }

    pub fn insert(&mut self, code: u8, value: impl Into<String>) {
        self.fields.insert(code, value.into());
    }

    /// SQLSTATE, empty if server did not send one.
    pub fn code(&self) -> &str {
        self.get(Self::CODE).unwrap_or_default()
    }

    pub fn message(&self) -> &str {
        self.get(Self::MESSAGE).unwrap_or_default()
    }

    pub fn severity(&self) -> &str {
        self.get(Self::SEVERITY).unwrap_or_default()
    }

    /// Returns `true` if `CODE` is `00000`.
    pub fn is_success(&self) -> bool {
        self.code() == Self::SUCCESS_CODE
    }

    pub fn fields(&self) -> impl Iterator<Item = (u8, &str)> {
        self.fields.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

impl Default for SqlError {
    fn default() -> Self {
        Self::success()
    }
}

impl std::error::Error for SqlError { }

impl fmt::Display for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = self.severity();
        if !severity.is_empty() {
            write!(f, "{severity}: ")?;
        }
        write!(f, "{} ({})", self.message(), self.code())?;
        if let Some(detail) = self.get(Self::DETAIL) {
            write!(f, ", {detail}")?;
        }
        if let Some(hint) = self.get(Self::HINT) {
            write!(f, ", hint: {hint}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_fields() {
        let body = Bytes::from_static(b"SERROR\0C42P01\0Mrelation \"foo\" does not exist\0P15\0\0");
        let err = SqlError::parse(body).unwrap();
        assert_eq!(err.severity(), "ERROR");
        assert_eq!(err.code(), "42P01");
        assert_eq!(err.get(SqlError::POSITION), Some("15"));
        assert!(!err.is_success());
    }

    #[test]
    fn success_sentinel() {
        assert!(SqlError::success().is_success());
        let mut err = SqlError::success();
        err.insert(SqlError::CODE, "23505");
        assert!(!err.is_success());
    }

    #[test]
    fn missing_terminator() {
        let body = Bytes::from_static(b"SERROR\0");
        assert!(matches!(SqlError::parse(body), Err(ProtocolError::Size { .. })));
    }
}
