//! Message header.
//!
//! ```text
//! ┏━━━━┳━━━━━━━━━━━━━━━━━━━┓
//! ┃ Ty ┃       Length      ┃
//! ┣━━━━╋━━━━━━━━━━━━━━━━━━━┫
//! ┃ u8 ┃        i32        ┃
//! ┗━━━━┻━━━━━━━━━━━━━━━━━━━┛
//! ```
use bytes::{Buf, BufMut};

use super::ProtocolError;

/// Size of the length field, which the wire length always counts.
const LEN_SIZE: i32 = 4;

/// Postgres message header.
///
/// `body_len` is the size of the payload only. On the wire the length field
/// also counts its own 4 bytes, but never the message type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Message type, `None` for startup phase messages.
    pub msgtype: Option<u8>,
    /// Payload size.
    pub body_len: i32,
}

impl Header {
    /// Size of a typed header on the wire.
    pub const SIZE: usize = 5;

    pub fn new(msgtype: u8, body_len: i32) -> Self {
        Self { msgtype: Some(msgtype), body_len }
    }

    /// Header of a startup phase message, which has no type byte.
    pub fn untyped(body_len: i32) -> Self {
        Self { msgtype: None, body_len }
    }

    /// Header size on the wire.
    pub fn size(&self) -> usize {
        match self.msgtype {
            Some(_) => Self::SIZE,
            None => Self::SIZE - 1,
        }
    }

    /// Payload size as `usize`.
    pub fn body_size(&self) -> usize {
        self.body_len.max(0) as usize
    }

    pub fn encode(&self, mut buf: impl BufMut) {
        if let Some(msgtype) = self.msgtype {
            buf.put_u8(msgtype);
        }
        buf.put_i32(self.body_len + LEN_SIZE);
    }

    /// Decode a typed header.
    pub fn decode(mut buf: impl Buf) -> Result<Self, ProtocolError> {
        if buf.remaining() < Self::SIZE {
            return Err(ProtocolError::Size { expect: Self::SIZE, found: buf.remaining() });
        }
        let msgtype = buf.get_u8();
        let len = buf.get_i32();
        if len < LEN_SIZE {
            return Err(ProtocolError::InvalidLength { len });
        }
        Ok(Self { msgtype: Some(msgtype), body_len: len - LEN_SIZE })
    }
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;

    use super::*;

    #[test]
    fn round_trip() {
        for (msgtype, body_len) in [(b'Q', 0), (b'D', 11), (b'Z', 1), (b'T', i32::MAX - 4)] {
            let header = Header::new(msgtype, body_len);
            let mut buf = BytesMut::new();
            header.encode(&mut buf);
            assert_eq!(buf.len(), header.size());
            assert_eq!(Header::decode(buf.freeze()).unwrap(), header);
        }
    }

    #[test]
    fn wire_length_counts_itself() {
        let mut buf = BytesMut::new();
        Header::new(b'Q', 10).encode(&mut buf);
        assert_eq!(&buf[..], &[b'Q', 0, 0, 0, 14]);

        let mut buf = BytesMut::new();
        Header::untyped(4).encode(&mut buf);
        assert_eq!(&buf[..], &[0, 0, 0, 8]);
    }

    #[test]
    fn reject_short_or_negative() {
        assert!(matches!(
            Header::decode(&[b'Z', 0, 0][..]),
            Err(ProtocolError::Size { expect: 5, found: 3 })
        ));
        assert!(matches!(
            Header::decode(&[b'Z', 0, 0, 0, 3][..]),
            Err(ProtocolError::InvalidLength { len: 3 })
        ));
    }
}
