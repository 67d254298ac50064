//! Protocol error
use std::{fmt, str::Utf8Error};

use super::backend::message_name;

/// An error when translating buffer from postgres.
pub enum ProtocolError {
    /// Buffer is shorter than the message claims.
    Size {
        expect: usize,
        found: usize,
    },
    /// Header declared a length smaller than the length field itself.
    InvalidLength {
        len: i32,
    },
    /// Value does not fit in the postgres integer type.
    TooLarge {
        len: usize,
    },
    Unexpected {
        expect: Option<u8>,
        found: u8,
    },
    UnknownAuth {
        auth: u32,
    },
    /// Server answered `N` to SSLRequest.
    SslDeclined,
    /// Server answered SSLRequest with something other than `S` or `N`.
    SslResponse {
        found: u8,
    },
    Utf8(Utf8Error),
}

impl ProtocolError {
    pub(crate) fn unknown(found: u8) -> ProtocolError {
        Self::Unexpected { expect: None, found }
    }

    pub(crate) fn unexpected(expect: u8, found: u8) -> ProtocolError {
        Self::Unexpected { expect: Some(expect), found }
    }

    pub(crate) fn unknown_auth(auth: u32) -> ProtocolError {
        Self::UnknownAuth { auth }
    }
}

impl From<bytes::TryGetError> for ProtocolError {
    fn from(e: bytes::TryGetError) -> Self {
        Self::Size { expect: e.requested, found: e.available }
    }
}

impl From<Utf8Error> for ProtocolError {
    fn from(e: Utf8Error) -> Self {
        Self::Utf8(e)
    }
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Size { expect, found } => {
                write!(f, "Message body too short, expected {expect} bytes found {found}")
            },
            Self::InvalidLength { len } => write!(f, "Invalid message length {len}"),
            Self::TooLarge { len } => write!(f, "Length {len} too large for postgres"),
            Self::Unexpected { expect, found } => {
                let found = message_name(*found);
                match expect {
                    Some(m) => write!(f, "Expected message `{}` found `{found}`", message_name(*m)),
                    None => write!(f, "Unexpected message `{found}`"),
                }
            },
            Self::UnknownAuth { auth } => write!(f, "Unknown authentication type {auth}"),
            Self::SslDeclined => f.write_str("Server does not support SSL"),
            Self::SslResponse { found } => {
                write!(f, "Unexpected SSLRequest response `{}`", found.escape_ascii())
            },
            Self::Utf8(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
