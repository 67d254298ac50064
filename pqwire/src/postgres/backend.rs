//! Postgres Backend Messages
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
use bytes::Bytes;

use super::{Header, Oid, PgFormat, ProtocolError, SqlError};
use crate::{common::ByteStr, ext::BytesExt};

/// A type that can be decoded into postgres backend message
pub trait BackendProtocol: Sized {
    /// Decode message body.
    ///
    /// Implementor only see a body that is already checked against the header,
    /// see [`decode`].
    fn decode_body(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError>;
}

/// Decode a backend message from its header and body.
///
/// Rejects a `body` shorter than the header declares, and a message type
/// other than the one `B` expects. Bytes past the declared length are ignored.
pub fn decode<B: BackendProtocol>(header: Header, mut body: Bytes) -> Result<B, ProtocolError> {
    let Some(msgtype) = header.msgtype else {
        return Err(ProtocolError::InvalidLength { len: header.body_len });
    };
    let body_len = header.body_size();
    if body.len() < body_len {
        return Err(ProtocolError::Size { expect: body_len, found: body.len() });
    }
    body.truncate(body_len);
    B::decode_body(msgtype, body)
}

/// Postgres backend messages
#[derive(Debug)]
pub enum BackendMessage {
    Authentication(Authentication),
    BackendKeyData(BackendKeyData),
    BindComplete(BindComplete),
    CloseComplete(CloseComplete),
    CommandComplete(CommandComplete),
    DataRow(DataRow),
    ErrorResponse(ErrorResponse),
    EmptyQueryResponse(EmptyQueryResponse),
    NegotiateProtocolVersion(NegotiateProtocolVersion),
    NoData(NoData),
    NoticeResponse(NoticeResponse),
    ParameterDescription(ParameterDescription),
    ParameterStatus(ParameterStatus),
    ParseComplete(ParseComplete),
    PortalSuspended(PortalSuspended),
    ReadyForQuery(ReadyForQuery),
    RowDescription(RowDescription),
}

macro_rules! match_backend {
    ($($name:ident,)*) => {
        impl BackendMessage {
            pub fn msgtype(&self) -> u8 {
                match self {
                    $(Self::$name(_) => $name::MSGTYPE,)*
                }
            }
        }

        /// Get message name from message type.
        ///
        /// Returns `"Unknown"` for unknown message type.
        pub fn message_name(msgtype: u8) -> &'static str {
            match msgtype {
                $($name::MSGTYPE => stringify!($name),)*
                _ => "Unknown",
            }
        }

        impl BackendProtocol for BackendMessage {
            fn decode_body(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
                let message = match msgtype {
                    $($name::MSGTYPE => Self::$name($name::decode_body(msgtype, body)?),)*
                    _ => return Err(ProtocolError::unknown(msgtype)),
                };
                Ok(message)
            }
        }
    };
}

match_backend! {
    Authentication,
    BackendKeyData,
    BindComplete,
    CloseComplete,
    CommandComplete,
    DataRow,
    ErrorResponse,
    EmptyQueryResponse,
    NegotiateProtocolVersion,
    NoData,
    NoticeResponse,
    ParameterDescription,
    ParameterStatus,
    ParseComplete,
    PortalSuspended,
    ReadyForQuery,
    RowDescription,
}

macro_rules! assert_msgtype {
    ($typ:ident) => {
        if Self::MSGTYPE != $typ {
            return Err(ProtocolError::unexpected(Self::MSGTYPE, $typ))
        }
    };
}

/// Identifies the message as an authentication request.
#[derive(Debug)]
pub enum Authentication {
    /// Specifies that the authentication was successful.
    Ok,
    /// Specifies that Kerberos V5 authentication is required.
    KerberosV5,
    /// Specifies that a clear-text password is required.
    CleartextPassword,
    /// Specifies that an MD5-encrypted password is required.
    MD5Password {
        /// The salt to use when encrypting the password.
        salt: [u8; 4],
    },
    /// Specifies that GSSAPI authentication is required.
    GSS,
    /// GSSAPI or SSPI authentication data.
    GSSContinue {
        data: Bytes,
    },
    /// Specifies that SSPI authentication is required.
    SSPI,
    /// Specifies that SASL authentication is required.
    SASL {
        /// List of SASL authentication mechanisms, in the server's order of preference.
        mechanisms: Bytes,
    },
    /// Specifies that this message contains a SASL challenge.
    SASLContinue {
        data: Bytes,
    },
    /// Specifies that SASL authentication has completed.
    SASLFinal {
        data: Bytes,
    },
}

impl Authentication {
    pub const MSGTYPE: u8 = b'R';

    pub const OK: u32 = 0;
    pub const KERBEROS_V5: u32 = 2;
    pub const CLEARTEXT_PASSWORD: u32 = 3;
    pub const MD5_PASSWORD: u32 = 5;

    /// Authentication type code.
    pub fn code(&self) -> u32 {
        match self {
            Self::Ok => Self::OK,
            Self::KerberosV5 => Self::KERBEROS_V5,
            Self::CleartextPassword => Self::CLEARTEXT_PASSWORD,
            Self::MD5Password { .. } => Self::MD5_PASSWORD,
            Self::GSS => 7,
            Self::GSSContinue { .. } => 8,
            Self::SSPI => 9,
            Self::SASL { .. } => 10,
            Self::SASLContinue { .. } => 11,
            Self::SASLFinal { .. } => 12,
        }
    }
}

impl BackendProtocol for Authentication {
    fn decode_body(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let auth = match body.get_i32_checked()? as u32 {
            0 => Authentication::Ok,
            2 => Authentication::KerberosV5,
            3 => Authentication::CleartextPassword,
            5 => {
                let salt = body.get_exact(4)?;
                Authentication::MD5Password { salt: [salt[0], salt[1], salt[2], salt[3]] }
            },
            7 => Authentication::GSS,
            8 => Authentication::GSSContinue { data: body },
            9 => Authentication::SSPI,
            10 => Authentication::SASL { mechanisms: body },
            11 => Authentication::SASLContinue { data: body },
            12 => Authentication::SASLFinal { data: body },
            auth => return Err(ProtocolError::unknown_auth(auth)),
        };
        Ok(auth)
    }
}

/// Identifies the message as cancellation key data.
///
/// The frontend must save these values if it wishes to be able to issue CancelRequest messages later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendKeyData {
    /// The process ID of this backend.
    pub process_id: i32,
    /// The secret key of this backend.
    pub secret_key: i32,
}

impl BackendKeyData {
    pub const MSGTYPE: u8 = b'K';
}

impl BackendProtocol for BackendKeyData {
    fn decode_body(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            process_id: body.get_i32_checked()?,
            secret_key: body.get_i32_checked()?,
        })
    }
}

/// Identifies the message as a run-time parameter status report
#[derive(Debug)]
pub struct ParameterStatus {
    /// The name of the run-time parameter being reported
    pub name: ByteStr,
    /// The current value of the parameter
    pub value: ByteStr,
}

impl ParameterStatus {
    pub const MSGTYPE: u8 = b'S';
}

impl BackendProtocol for ParameterStatus {
    fn decode_body(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            name: body.get_nul_bytestr()?,
            value: body.get_nul_bytestr()?,
        })
    }
}

/// Identifies the message type. ReadyForQuery is sent whenever the backend is ready for a new query cycle.
#[derive(Debug)]
pub struct ReadyForQuery {
    /// Current backend transaction status indicator.
    ///
    /// `I` if idle (not in a transaction block), `T` if in a transaction block,
    /// or `E` if in a failed transaction block.
    pub status: u8,
}

impl ReadyForQuery {
    pub const MSGTYPE: u8 = b'Z';
}

impl BackendProtocol for ReadyForQuery {
    fn decode_body(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { status: body.get_u8_checked()? })
    }
}

/// Column description from a [`RowDescription`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// The field name.
    pub name: ByteStr,
    /// If the field can be identified as a column of a specific table,
    /// the object ID of the table; otherwise zero.
    pub table_oid: Oid,
    /// If the field can be identified as a column of a specific table,
    /// the attribute number of the column; otherwise zero.
    pub column: i16,
    /// The object ID of the field's data type.
    pub type_oid: Oid,
    /// The data type size, negative values denote variable-width types.
    pub type_size: i16,
    /// The type modifier, the meaning is type-specific.
    pub type_modifier: i32,
    /// The format code being used for the field, zero (text) or one (binary).
    pub format: i16,
}

impl FieldSpec {
    /// Returns `None` for unknown format code.
    pub fn pg_format(&self) -> Option<PgFormat> {
        PgFormat::from_code(self.format)
    }
}

/// Identifies the message as a row description
#[derive(Debug)]
pub struct RowDescription {
    pub fields: Vec<FieldSpec>,
}

impl RowDescription {
    pub const MSGTYPE: u8 = b'T';
}

impl BackendProtocol for RowDescription {
    fn decode_body(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let len = body.get_i16_checked()?.max(0) as usize;
        let mut fields = Vec::with_capacity(len);
        for _ in 0..len {
            fields.push(FieldSpec {
                name: body.get_nul_bytestr()?,
                table_oid: body.get_i32_checked()? as Oid,
                column: body.get_i16_checked()?,
                type_oid: body.get_i32_checked()? as Oid,
                type_size: body.get_i16_checked()?,
                type_modifier: body.get_i32_checked()?,
                format: body.get_i16_checked()?,
            });
        }
        Ok(Self { fields })
    }
}

/// Identifies the message as a data row.
#[derive(Debug)]
pub struct DataRow {
    /// Column values, `None` is sql `NULL`.
    ///
    /// Each value slices the message body, no copy is made.
    pub columns: Vec<Option<Bytes>>,
}

impl DataRow {
    pub const MSGTYPE: u8 = b'D';
}

impl BackendProtocol for DataRow {
    fn decode_body(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let len = body.get_i16_checked()?.max(0) as usize;
        let mut columns = Vec::with_capacity(len);
        for _ in 0..len {
            // -1 indicates a NULL column value, no value bytes follow
            let column = match body.get_i32_checked()? {
                len if len < 0 => None,
                len => Some(body.get_exact(len as usize)?),
            };
            columns.push(column);
        }
        Ok(Self { columns })
    }
}

/// Identifies the message as a command-completed response
///
/// For an INSERT command, the tag is INSERT oid rows, where rows is the number of rows inserted.
///
/// For a DELETE, UPDATE, MERGE, SELECT, MOVE, FETCH or COPY command, the tag is the command
/// followed by the number of rows affected.
#[derive(Debug)]
pub struct CommandComplete {
    /// The command tag. This is usually a single word that identifies which SQL command was completed.
    pub tag: ByteStr,
}

impl CommandComplete {
    pub const MSGTYPE: u8 = b'C';
}

impl BackendProtocol for CommandComplete {
    fn decode_body(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { tag: body.get_nul_bytestr()? })
    }
}

/// Identifies the message as a parameter description.
#[derive(Debug)]
pub struct ParameterDescription {
    /// The object ID of each parameter data type.
    pub oids: Vec<Oid>,
}

impl ParameterDescription {
    pub const MSGTYPE: u8 = b't';
}

impl BackendProtocol for ParameterDescription {
    fn decode_body(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let len = body.get_i16_checked()?.max(0) as usize;
        let mut oids = Vec::with_capacity(len);
        for _ in 0..len {
            oids.push(body.get_i32_checked()? as Oid);
        }
        Ok(Self { oids })
    }
}

/// Identifies the message as an error
///
/// The message body consists of one or more identified fields, followed by a zero byte as a terminator.
#[derive(Debug)]
pub struct ErrorResponse(pub SqlError);

impl ErrorResponse {
    pub const MSGTYPE: u8 = b'E';
}

impl BackendProtocol for ErrorResponse {
    fn decode_body(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self(SqlError::parse(body)?))
    }
}

/// A warning message. The frontend should display the message.
#[derive(Debug)]
pub struct NoticeResponse(pub SqlError);

impl NoticeResponse {
    pub const MSGTYPE: u8 = b'N';
}

impl BackendProtocol for NoticeResponse {
    fn decode_body(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self(SqlError::parse(body)?))
    }
}

/// Identifies the message as a protocol version negotiation message.
#[derive(Debug)]
pub struct NegotiateProtocolVersion {
    /// Newest minor protocol version supported by the server for the major protocol version requested by the client.
    pub minor: i32,
    /// Protocol options not recognized by the server.
    pub options: Vec<ByteStr>,
}

impl NegotiateProtocolVersion {
    pub const MSGTYPE: u8 = b'v';
}

impl BackendProtocol for NegotiateProtocolVersion {
    fn decode_body(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let minor = body.get_i32_checked()?;
        let len = body.get_i32_checked()?.max(0) as usize;
        let mut options = Vec::with_capacity(len.min(64));
        for _ in 0..len {
            options.push(body.get_nul_bytestr()?);
        }
        Ok(Self { minor, options })
    }
}

macro_rules! unit_msg {
    ($(
        $(#[$doc:meta])* struct $name:ident, $ty:literal;
    )*) => {$(
        $(#[$doc])*
        #[derive(Debug)]
        pub struct $name;

        impl $name {
            pub const MSGTYPE: u8 = $ty;
        }

        impl BackendProtocol for $name {
            fn decode_body(msgtype: u8, _: Bytes) -> Result<Self, ProtocolError> {
                assert_msgtype!(msgtype);
                Ok(Self)
            }
        }
    )*};
}

unit_msg! {
    /// Identifies the message as a Bind-complete indicator.
    struct BindComplete, b'2';

    /// Identifies the message as a Close-complete indicator.
    struct CloseComplete, b'3';

    /// Identifies the message as a response to an empty query string.
    ///
    /// This substitutes for CommandComplete.
    struct EmptyQueryResponse, b'I';

    /// Identifies the message as a no-data indicator.
    struct NoData, b'n';

    /// Identifies the message as a Parse-complete indicator.
    struct ParseComplete, b'1';

    /// Identifies the message as a portal-suspended indicator.
    ///
    /// Note this only appears if an Execute message's row-count limit was reached.
    struct PortalSuspended, b's';
}
