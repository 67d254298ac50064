//! Postgres Frontend Messages
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
use bytes::{BufMut, Bytes, BytesMut};
use md5::{Digest, Md5};

use super::{Header, ProtocolError};
use crate::ext::{BufMutExt, StrExt, UsizeExt};

/// A type which can be encoded into postgres frontend message
pub trait FrontendProtocol {
    /// Message type, `None` for startup phase messages.
    const MSGTYPE: Option<u8>;

    /// Size of the main body.
    ///
    /// Note that this is **only** the size of main body as oppose of actual postgres message which
    /// include the length itself.
    fn size_hint(&self) -> usize;

    /// Check counts that are encoded narrower than `usize`.
    fn validate(&self) -> Result<(), ProtocolError> {
        Ok(())
    }

    /// Write the main body of the message.
    ///
    /// The lenght of body written must be equal to the
    /// length returned by [`size_hint`][FrontendProtocol::size_hint].
    fn encode(&self, buf: impl BufMut);
}

/// An encoded frontend message, ready to be written.
///
/// Header and body are kept in separate buffers so transports can write them
/// in one vectored call.
#[derive(Debug, Clone)]
pub struct Frame {
    msgtype: Option<u8>,
    header: Bytes,
    body: Bytes,
}

impl Frame {
    /// Encode a frontend message.
    pub fn new<F: FrontendProtocol>(msg: &F) -> Result<Frame, ProtocolError> {
        msg.validate()?;
        let size_hint = msg.size_hint();
        let header = Header { msgtype: F::MSGTYPE, body_len: size_hint.to_i32()? };

        let mut head = BytesMut::with_capacity(header.size());
        header.encode(&mut head);

        let mut body = BytesMut::with_capacity(size_hint);
        msg.encode(&mut body);

        assert_eq!(body.len(), size_hint, "Frontend message body size not equal to size hint");

        Ok(Frame { msgtype: F::MSGTYPE, header: head.freeze(), body: body.freeze() })
    }

    pub fn msgtype(&self) -> Option<u8> {
        self.msgtype
    }

    pub fn header(&self) -> &Bytes {
        &self.header
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Total bytes on the wire.
    pub fn len(&self) -> usize {
        self.header.len() + self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Header followed by body as one [`Buf`][bytes::Buf].
    pub fn chain(&self) -> bytes::buf::Chain<Bytes, Bytes> {
        bytes::Buf::chain(self.header.clone(), self.body.clone())
    }
}

/// Postgres Startup message.
///
/// For historical reasons, the very first message sent by the client
/// has no initial message-type byte.
#[derive(Debug)]
pub struct StartUp<'a> {
    /// Parameter name and value pairs, `user` is required.
    pub params: &'a [(&'a str, &'a str)],
}

impl StartUp<'_> {
    /// The protocol version number, major 3 minor 0.
    pub const VERSION: i32 = 196_608;
}

impl FrontendProtocol for StartUp<'_> {
    const MSGTYPE: Option<u8> = None;

    fn size_hint(&self) -> usize {
        4 + self
            .params
            .iter()
            .map(|(k, v)| k.nul_string_len() + v.nul_string_len())
            .sum::<usize>()
            + 1
    }

    fn encode(&self, mut buf: impl BufMut) {
        buf.put_i32(Self::VERSION);
        for (key, value) in self.params {
            buf.put_nul_string(key);
            buf.put_nul_string(value);
        }
        // A zero byte is required as a terminator after the last name/value pair.
        buf.put_u8(b'\0');
    }
}

/// Ask the server to upgrade the connection to TLS.
///
/// Server answers with single byte, `S` to proceed, `N` to decline.
#[derive(Debug)]
pub struct SslRequest;

impl SslRequest {
    pub const CODE: i32 = 80_877_103;
}

impl FrontendProtocol for SslRequest {
    const MSGTYPE: Option<u8> = None;

    fn size_hint(&self) -> usize { 4 }

    fn encode(&self, mut buf: impl BufMut) {
        buf.put_i32(Self::CODE);
    }
}

/// Identifies the message as a password response.
#[derive(Debug)]
pub struct Password<'a> {
    /// The password (encrypted, if requested)
    pub password: &'a str,
}

impl FrontendProtocol for Password<'_> {
    const MSGTYPE: Option<u8> = Some(b'p');

    fn size_hint(&self) -> usize {
        self.password.nul_string_len()
    }

    fn encode(&self, mut buf: impl BufMut) {
        buf.put_nul_string(self.password);
    }
}

/// Hash a password for `AuthenticationMD5Password`.
///
/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`
pub fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let mut md5 = Md5::new();
    md5.update(password);
    md5.update(user);
    let step1 = format!("{:x}", md5.finalize());

    let mut md5 = Md5::new();
    md5.update(step1);
    md5.update(salt);
    format!("md5{:x}", md5.finalize())
}

/// Identifies the message as a simple query
#[derive(Debug)]
pub struct Query<'a> {
    /// the query string itself
    pub sql: &'a str,
}

impl FrontendProtocol for Query<'_> {
    const MSGTYPE: Option<u8> = Some(b'Q');

    fn size_hint(&self) -> usize {
        self.sql.nul_string_len()
    }

    fn encode(&self, mut buf: impl BufMut) {
        buf.put_nul_string(self.sql);
    }
}

/// Identifies the message as a Parse command
///
/// No parameter types are prespecified, the server infers them.
#[derive(Debug)]
pub struct Parse<'a> {
    /// prepared statement name (an empty string selects the unnamed prepared statement).
    pub name: &'a str,
    /// The query string to be parsed.
    pub sql: &'a str,
}

impl FrontendProtocol for Parse<'_> {
    const MSGTYPE: Option<u8> = Some(b'P');

    fn size_hint(&self) -> usize {
        self.name.nul_string_len() + self.sql.nul_string_len() + 2
    }

    fn encode(&self, mut buf: impl BufMut) {
        buf.put_nul_string(self.name);
        buf.put_nul_string(self.sql);
        buf.put_i16(0);
    }
}

/// Identifies the message as a Bind command.
///
/// All parameters and result columns use text format.
#[derive(Debug)]
pub struct Bind<'a> {
    /// The name of the destination portal (an empty string selects the unnamed portal).
    pub portal: &'a str,
    /// The name of the source prepared statement.
    pub name: &'a str,
    /// Textual parameter values, `None` is sql `NULL`.
    pub params: &'a [Option<String>],
}

impl FrontendProtocol for Bind<'_> {
    const MSGTYPE: Option<u8> = Some(b'B');

    fn size_hint(&self) -> usize {
        self.portal.nul_string_len()
            + self.name.nul_string_len()
            + 2 // param format count
            + 2 // param count
            + self.params.iter().map(|p| 4 + p.as_ref().map_or(0, String::len)).sum::<usize>()
            + 2 // result format count
            + 2 // result format
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        self.params.len().to_i16()?;
        Ok(())
    }

    fn encode(&self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal);
        buf.put_nul_string(self.name);

        // zero format codes, all parameters are text
        buf.put_i16(0);

        // checked in `validate`
        buf.put_i16(self.params.len() as i16);
        for param in self.params {
            match param {
                Some(value) => {
                    buf.put_i32(value.len() as i32);
                    buf.put(value.as_bytes());
                }
                // -1 indicates a NULL parameter value, no value bytes follow
                None => buf.put_i32(-1),
            }
        }

        // one result format code applied to all columns
        buf.put_i16(1);
        buf.put_i16(0);
    }
}

/// Identifies the message as a Describe command.
#[derive(Debug)]
pub struct Describe<'a> {
    /// 'S' to describe a prepared statement; or 'P' to describe a portal.
    pub kind: u8,
    /// The name of the prepared statement or portal to describe
    pub name: &'a str,
}

impl<'a> Describe<'a> {
    /// Describe the portal if it is named, otherwise the statement.
    pub fn portal_or_statement(portal: &'a str, statement: &'a str) -> Self {
        if portal.is_empty() {
            Self { kind: b'S', name: statement }
        } else {
            Self { kind: b'P', name: portal }
        }
    }
}

impl FrontendProtocol for Describe<'_> {
    const MSGTYPE: Option<u8> = Some(b'D');

    fn size_hint(&self) -> usize {
        1 + self.name.nul_string_len()
    }

    fn encode(&self, mut buf: impl BufMut) {
        buf.put_u8(self.kind);
        buf.put_nul_string(self.name);
    }
}

/// Identifies the message as a Execute command
#[derive(Debug)]
pub struct Execute<'a> {
    /// The name of the portal to execute (an empty string selects the unnamed portal).
    pub portal: &'a str,
    /// Maximum number of rows to return, zero denotes “no limit”.
    pub max_rows: i32,
}

impl FrontendProtocol for Execute<'_> {
    const MSGTYPE: Option<u8> = Some(b'E');

    fn size_hint(&self) -> usize {
        self.portal.nul_string_len() + 4
    }

    fn encode(&self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal);
        buf.put_i32(self.max_rows);
    }
}

/// Identifies the message as a Close command
#[derive(Debug)]
pub struct Close<'a> {
    /// 'S' to close a prepared statement; or 'P' to close a portal.
    pub kind: u8,
    /// The name of the prepared statement or portal to close
    pub name: &'a str,
}

impl FrontendProtocol for Close<'_> {
    const MSGTYPE: Option<u8> = Some(b'C');

    fn size_hint(&self) -> usize {
        1 + self.name.nul_string_len()
    }

    fn encode(&self, mut buf: impl BufMut) {
        buf.put_u8(self.kind);
        buf.put_nul_string(self.name);
    }
}

macro_rules! unit_msg {
    ($(
        $(#[$doc:meta])* struct $name:ident, $ty:literal;
    )*) => {$(
        $(#[$doc])*
        #[derive(Debug)]
        pub struct $name;

        impl FrontendProtocol for $name {
            const MSGTYPE: Option<u8> = Some($ty);

            fn size_hint(&self) -> usize { 0 }

            fn encode(&self, _: impl BufMut) { }
        }
    )*};
}

unit_msg! {
    /// Identifies the message as a Sync command
    struct Sync, b'S';

    /// Identifies the message as a Flush command
    struct Flush, b'H';

    /// Identifies the message as a termination.
    struct Terminate, b'X';
}

#[cfg(test)]
mod test {
    use super::*;

    fn wire(frame: &Frame) -> Vec<u8> {
        [&frame.header()[..], &frame.body()[..]].concat()
    }

    #[test]
    fn md5_password_digest() {
        let hashed = md5_password("gptest", "secret", [1, 2, 3, 4]);
        assert_eq!(hashed, "md5d5e6cfcf2a52491bcfa9c19caad6195b");
        assert_eq!(hashed.len(), 3 + 32);
    }

    #[test]
    fn startup() {
        let frame = Frame::new(&StartUp { params: &[("user", "pg")] }).unwrap();
        assert_eq!(
            wire(&frame),
            b"\0\0\0\x11\0\x03\0\0user\0pg\0\0",
        );
    }

    #[test]
    fn ssl_request() {
        let frame = Frame::new(&SslRequest).unwrap();
        assert_eq!(wire(&frame), [0, 0, 0, 8, 0x04, 0xd2, 0x16, 0x2f]);
    }

    #[test]
    fn query() {
        let frame = Frame::new(&Query { sql: "select 1" }).unwrap();
        assert_eq!(frame.msgtype(), Some(b'Q'));
        assert_eq!(wire(&frame), b"Q\0\0\0\x0dselect 1\0");
    }

    #[test]
    fn bind() {
        let params = [Some("hi".to_owned()), None];
        let frame = Frame::new(&Bind { portal: "s_portal", name: "s", params: &params }).unwrap();
        let mut expect = b"B\0\0\0\x21s_portal\0s\0".to_vec();
        expect.extend_from_slice(&[0, 0, 0, 2, 0, 0, 0, 2, b'h', b'i', 0xff, 0xff, 0xff, 0xff, 0, 1, 0, 0]);
        assert_eq!(wire(&frame), expect);
    }

    #[test]
    fn bind_param_count_overflow() {
        let params: Vec<Option<String>> = vec![None; i16::MAX as usize + 1];
        let err = Frame::new(&Bind { portal: "", name: "", params: &params }).unwrap_err();
        assert!(matches!(err, ProtocolError::TooLarge { len } if len == params.len()));

        let params: Vec<Option<String>> = vec![None; i16::MAX as usize];
        assert!(Frame::new(&Bind { portal: "", name: "", params: &params }).is_ok());
    }

    #[test]
    fn describe_kind() {
        let d = Describe::portal_or_statement("", "stmt");
        assert_eq!((d.kind, d.name), (b'S', "stmt"));
        let d = Describe::portal_or_statement("stmt_portal", "stmt");
        assert_eq!((d.kind, d.name), (b'P', "stmt_portal"));
    }

    #[test]
    fn terminate() {
        let frame = Frame::new(&Terminate).unwrap();
        assert_eq!(wire(&frame), b"X\0\0\0\x04");
        assert_eq!(frame.len(), 5);
    }
}
