//! Scripted server for tests.
use std::io;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    ErrorKind, Result,
    postgres::{Frame, Oid},
    transport::{Transport, read_exact, write_frame},
};

/// Builder of backend message bytes.
#[derive(Default)]
pub struct Server {
    buf: BytesMut,
}

impl Server {
    pub fn new() -> Server {
        Server::default()
    }

    pub fn msg(mut self, msgtype: u8, body: &[u8]) -> Server {
        self.buf.put_u8(msgtype);
        self.buf.put_i32(body.len() as i32 + 4);
        self.buf.put_slice(body);
        self
    }

    pub fn auth_ok(self) -> Server {
        self.msg(b'R', &0i32.to_be_bytes())
    }

    pub fn auth_md5(self, salt: [u8; 4]) -> Server {
        let mut body = 5i32.to_be_bytes().to_vec();
        body.extend_from_slice(&salt);
        self.msg(b'R', &body)
    }

    pub fn parameter_status(self, name: &str, value: &str) -> Server {
        let body = [name.as_bytes(), b"\0", value.as_bytes(), b"\0"].concat();
        self.msg(b'S', &body)
    }

    pub fn backend_key(self, process_id: i32, secret_key: i32) -> Server {
        let body = [process_id.to_be_bytes(), secret_key.to_be_bytes()].concat();
        self.msg(b'K', &body)
    }

    pub fn ready(self) -> Server {
        self.msg(b'Z', b"I")
    }

    /// Startup completion after authentication.
    pub fn connected(self) -> Server {
        self.auth_ok()
            .parameter_status("server_version", "17.0")
            .backend_key(42, 7)
            .ready()
    }

    /// `(name, type oid, format)`
    pub fn row_description(self, fields: &[(&str, Oid, i16)]) -> Server {
        let mut body = BytesMut::new();
        body.put_i16(fields.len() as i16);
        for (name, oid, format) in fields {
            body.put_slice(name.as_bytes());
            body.put_u8(0);
            body.put_i32(0);
            body.put_i16(0);
            body.put_u32(*oid);
            body.put_i16(-1);
            body.put_i32(-1);
            body.put_i16(*format);
        }
        self.msg(b'T', &body)
    }

    pub fn data_row(self, columns: &[Option<&[u8]>]) -> Server {
        let mut body = BytesMut::new();
        body.put_i16(columns.len() as i16);
        for column in columns {
            match column {
                Some(value) => {
                    body.put_i32(value.len() as i32);
                    body.put_slice(value);
                },
                None => body.put_i32(-1),
            }
        }
        self.msg(b'D', &body)
    }

    pub fn command_complete(self, tag: &str) -> Server {
        self.msg(b'C', &[tag.as_bytes(), b"\0"].concat())
    }

    pub fn error(self, code: &str, message: &str) -> Server {
        let body = [&b"SERROR\0C"[..], code.as_bytes(), b"\0M", message.as_bytes(), b"\0\0"].concat();
        self.msg(b'E', &body)
    }

    pub fn notice(self, message: &str) -> Server {
        let body = [&b"SNOTICE\0C00000\0M"[..], message.as_bytes(), b"\0\0"].concat();
        self.msg(b'N', &body)
    }

    pub fn parameter_description(self, oids: &[Oid]) -> Server {
        let mut body = BytesMut::new();
        body.put_i16(oids.len() as i16);
        for oid in oids {
            body.put_u32(*oid);
        }
        self.msg(b't', &body)
    }

    pub fn parse_complete(self) -> Server {
        self.msg(b'1', b"")
    }

    pub fn bind_complete(self) -> Server {
        self.msg(b'2', b"")
    }

    pub fn bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

/// In memory [`Transport`], reading scripted server bytes and recording writes.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    pub server: Bytes,
    pub written: Vec<u8>,
    pub connected: bool,
    pub closed: bool,
    /// Writes allowed before the peer goes away, unlimited if `None`.
    pub writes_left: Option<usize>,
}

impl ScriptedTransport {
    pub fn new(server: Server) -> ScriptedTransport {
        ScriptedTransport { server: server.bytes(), ..Default::default() }
    }

    /// Message types written by the client, startup message is `None`.
    pub fn written_types(&self) -> Vec<Option<u8>> {
        let mut types = vec![];
        let mut rest = &self.written[..];
        // startup message has no type byte
        if self.connected && rest.len() >= 4 {
            let len = i32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
            types.push(None);
            rest = &rest[len..];
        }
        while rest.len() >= 5 {
            let len = i32::from_be_bytes([rest[1], rest[2], rest[3], rest[4]]) as usize;
            types.push(Some(rest[0]));
            rest = &rest[1 + len..];
        }
        types
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    fn read(&mut self, len: usize) -> Result<Bytes> {
        if self.closed {
            return Err(ErrorKind::Closed.into());
        }
        let mut server = &self.server[..];
        let bytes = read_exact(&mut server, len)?;
        self.server = self.server.slice(len..);
        Ok(bytes)
    }

    fn write(&mut self, frame: &Frame) -> Result<usize> {
        if self.closed {
            return Err(ErrorKind::Closed.into());
        }
        if let Some(left) = &mut self.writes_left {
            if *left == 0 {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe).into());
            }
            *left -= 1;
        }
        Ok(write_frame(&mut self.written, frame)?)
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
