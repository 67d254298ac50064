//! The [`Transport`] and [`AsyncTransport`] traits.
//!
//! Four implementations are provided, plain and TLS, each in blocking and
//! async flavor:
//!
//! | | blocking | async |
//! |---|---|---|
//! | plain | [`PlainTransport`] | [`AsyncPlainTransport`] |
//! | TLS | [`TlsTransport`] | [`AsyncTlsTransport`] |
use std::io::{self, IoSlice, Read, Write};

use bytes::{Buf, Bytes, BytesMut};

use crate::{Result, postgres::Frame};

mod socket;
mod blocking;
#[cfg(feature = "tokio")]
pub(crate) mod nonblocking;

pub use socket::Socket;
pub use blocking::{PlainTransport, TlsTransport};
#[cfg(feature = "tokio")]
pub use socket::AsyncSocket;
#[cfg(feature = "tokio")]
pub use nonblocking::{AsyncPlainTransport, AsyncTlsTransport};

/// A byte stream to a postgres server.
pub trait Transport {
    /// Establish the underlying stream to the configured endpoint.
    fn connect(&mut self) -> Result<()>;

    /// Negotiate TLS over the connected stream.
    ///
    /// Plain transport returns [`Unsupported`][io::ErrorKind::Unsupported].
    fn handshake(&mut self) -> Result<()> {
        Err(io::Error::from(io::ErrorKind::Unsupported).into())
    }

    /// Read exactly `len` bytes.
    fn read(&mut self, len: usize) -> Result<Bytes>;

    /// Write the whole frame, returns bytes written.
    fn write(&mut self, frame: &Frame) -> Result<usize>;

    /// Release the underlying stream.
    fn close(&mut self) -> Result<()>;
}

/// Async version of [`Transport`].
pub trait AsyncTransport: Send {
    /// Establish the underlying stream to the configured endpoint.
    fn connect(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Negotiate TLS over the connected stream.
    ///
    /// Plain transport returns [`Unsupported`][io::ErrorKind::Unsupported].
    fn handshake(&mut self) -> impl Future<Output = Result<()>> + Send {
        async { Err(io::Error::from(io::ErrorKind::Unsupported).into()) }
    }

    /// Read exactly `len` bytes.
    fn read(&mut self, len: usize) -> impl Future<Output = Result<Bytes>> + Send;

    /// Write the whole frame, returns bytes written.
    fn write(&mut self, frame: &Frame) -> impl Future<Output = Result<usize>> + Send;

    /// Release the underlying stream.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn connect(&mut self) -> Result<()> {
        T::connect(self)
    }

    fn handshake(&mut self) -> Result<()> {
        T::handshake(self)
    }

    fn read(&mut self, len: usize) -> Result<Bytes> {
        T::read(self, len)
    }

    fn write(&mut self, frame: &Frame) -> Result<usize> {
        T::write(self, frame)
    }

    fn close(&mut self) -> Result<()> {
        T::close(self)
    }
}

const MAX_VECTOR_ELEMENTS: usize = 64;

/// Read exactly `len` bytes, retrying partial reads.
pub(crate) fn read_exact<R: Read + ?Sized>(reader: &mut R, len: usize) -> io::Result<Bytes> {
    let mut buf = BytesMut::zeroed(len);
    reader.read_exact(&mut buf)?;
    Ok(buf.freeze())
}

/// Write header and body in vectored write until fully flushed.
pub(crate) fn write_frame<W: Write + ?Sized>(writer: &mut W, frame: &Frame) -> io::Result<usize> {
    let mut buf = frame.chain();
    let mut written = 0;

    while buf.has_remaining() {
        let mut slices = [IoSlice::new(&[]); MAX_VECTOR_ELEMENTS];
        let cnt = buf.chunks_vectored(&mut slices);
        let n = match writer.write_vectored(&slices[..cnt]) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if n == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        buf.advance(n);
        written += n;
    }

    writer.flush()?;
    Ok(written)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::postgres::frontend::Query;

    /// Accepts at most 3 bytes per call.
    struct Trickle(Vec<u8>);

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(3);
            self.0.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_loops_until_flushed() {
        let frame = Frame::new(&Query { sql: "select 1" }).unwrap();
        let mut w = Trickle(vec![]);
        assert_eq!(write_frame(&mut w, &frame).unwrap(), frame.len());
        assert_eq!(w.0, b"Q\0\0\0\x0dselect 1\0");
    }

    #[test]
    fn write_zero_is_error() {
        let frame = Frame::new(&Query { sql: "" }).unwrap();
        let mut w: &mut [u8] = &mut [0u8; 2];
        let err = write_frame(&mut w, &frame).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }

    #[test]
    fn read_exact_bytes() {
        let mut r: &[u8] = b"Z\0\0\0\x05I";
        assert_eq!(&read_exact(&mut r, 5).unwrap()[..], b"Z\0\0\0\x05");
        assert!(read_exact(&mut r, 2).is_err());
    }
}
