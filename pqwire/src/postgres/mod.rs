//! Postgres Frontend and Backend Protocol
//!
//! Docs here mostly quoted from the official postgres documentation.
//!
//! ## Messaging Overview
//!
//! All communication is through a stream of messages. The first byte of a message identifies the message type,
//! and the next four bytes specify the length of the rest of the message (this length count includes itself,
//! but not the message-type byte). The remaining contents of the message are determined by the message type.
//!
//! ```text
//! ┏━━━━┳━━━━━━━━━━━━━━━━━━━┳━━━━━━┓
//! ┃ Ty ┃       Length      ┃ Body ┃
//! ┣━━━━╋━━━━━━━━━━━━━━━━━━━╋━━━━━━┫
//! ┃ u8 ┃        i32        ┃ [u8] ┃
//! ┣━━━━╋━━━━━━━━━━━━━━━━━━━╋━━━━━━┫
//! ┃ 43 ┃ 00 | 00 | 00 | 32 ┃  ..  ┃
//! ┗━━━━┻━━━━━━━━━━━━━━━━━━━┻━━━━━━┛
//! ```
//!
//! For historical reasons, the very first message sent by the client (the startup message)
//! has no initial message-type byte.
//!
//! ## Format Codes
//!
//! Data of a particular data type might be transmitted in any of several different formats.
//! Text has format code zero, and Binary has format code one. This library always requests
//! text, and reports binary column as [`UnsupportedFormat`][crate::result::DecodeError::UnsupportedFormat].
//!
//! <https://www.postgresql.org/docs/17/protocol-overview.html>

mod header;
mod error;
mod sql_error;

pub mod pg_type;
pub mod frontend;
pub mod backend;

pub use header::Header;
pub use error::ProtocolError;
pub use sql_error::SqlError;
pub use pg_type::{Oid, PgFormat};

pub use frontend::{Frame, FrontendProtocol};
pub use backend::{BackendMessage, BackendProtocol, FieldSpec};
