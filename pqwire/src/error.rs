//! `pqwire` error types.
use std::{backtrace::Backtrace, fmt, io};

use crate::{
    options::ConfigError,
    postgres::{ProtocolError, SqlError},
    result::DecodeError,
};

/// A specialized [`Result`] type for `pqwire` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `pqwire` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Prefix the error message with `context`.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Returns `true` if an operation was rejected because another is outstanding.
    pub fn is_busy(&self) -> bool {
        matches!(self.kind, ErrorKind::Busy)
    }
}

/// All possible error kind from `pqwire` library.
pub enum ErrorKind {
    /// Connection options or TLS files are invalid.
    Config(ConfigError),
    /// Malformed or out of sequence message from server.
    Protocol(ProtocolError),
    Io(io::Error),
    Tls(rustls::Error),
    /// Another operation is outstanding.
    Busy,
    /// Connection is closed.
    Closed,
    Decode(DecodeError),
    UnsupportedAuth(u32),
    /// Server error outside of any result set.
    Database(SqlError),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ConfigError>e => ErrorKind::Config(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<io::Error>e => ErrorKind::Io(e));
from!(<rustls::Error>e => ErrorKind::Tls(e));
from!(<DecodeError>e => ErrorKind::Decode(e));
from!(<SqlError>e => ErrorKind::Database(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => fmt::Display::fmt(e, f),
            Self::Protocol(e) => fmt::Display::fmt(e, f),
            Self::Io(e) => fmt::Display::fmt(e, f),
            Self::Tls(e) => fmt::Display::fmt(e, f),
            Self::Busy => f.write_str("Connection is busy with another operation"),
            Self::Closed => f.write_str("Connection is closed"),
            Self::Decode(e) => fmt::Display::fmt(e, f),
            Self::UnsupportedAuth(auth) => write!(f, "Unsupported authentication type {auth}"),
            Self::Database(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
