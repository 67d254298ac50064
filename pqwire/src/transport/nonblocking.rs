use std::{
    io,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::{Buf, Bytes, BytesMut};
use rustls::{ClientConfig, pki_types::ServerName};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::TlsConnector;

use super::{AsyncSocket, AsyncTransport, MAX_VECTOR_ELEMENTS, blocking::accept_ssl_response};
use crate::{
    ErrorKind, Result,
    common::verbose,
    options::{Endpoint, Options},
    postgres::{Frame, frontend::SslRequest},
    tls,
};

/// Async transport over tcp or unix socket.
#[derive(Debug)]
pub struct AsyncPlainTransport {
    endpoint: Endpoint,
    socket: Option<AsyncSocket>,
}

impl AsyncPlainTransport {
    pub fn new(endpoint: Endpoint) -> AsyncPlainTransport {
        Self { endpoint, socket: None }
    }

    pub fn from_options(options: &Options) -> Result<AsyncPlainTransport> {
        Ok(Self::new(options.endpoint()?))
    }
}

impl AsyncTransport for AsyncPlainTransport {
    async fn connect(&mut self) -> Result<()> {
        verbose!(endpoint = %self.endpoint, "connecting");
        let socket = match &self.endpoint {
            Endpoint::Unix(path) => AsyncSocket::connect_socket(path).await?,
            Endpoint::Tcp { host, port } => AsyncSocket::connect_tcp(host, *port).await?,
        };
        self.socket = Some(socket);
        Ok(())
    }

    async fn read(&mut self, len: usize) -> Result<Bytes> {
        let socket = self.socket.as_mut().ok_or(ErrorKind::Closed)?;
        Ok(read_exact(socket, len).await?)
    }

    async fn write(&mut self, frame: &Frame) -> Result<usize> {
        let socket = self.socket.as_mut().ok_or(ErrorKind::Closed)?;
        Ok(write_frame(socket, frame).await?)
    }

    async fn close(&mut self) -> Result<()> {
        match self.socket.take() {
            Some(mut socket) => Ok(socket.shutdown().await?),
            None => Ok(()),
        }
    }
}

/// Async transport with TLS over tcp.
pub struct AsyncTlsTransport {
    host: String,
    port: u16,
    server_name: ServerName<'static>,
    connector: TlsConnector,
    socket: Option<AsyncSocket>,
}

impl AsyncTlsTransport {
    pub fn new(host: impl Into<String>, port: u16, config: Arc<ClientConfig>) -> Result<AsyncTlsTransport> {
        let host = host.into();
        let server_name = tls::server_name(&host)?;
        Ok(Self { host, port, server_name, connector: TlsConnector::from(config), socket: None })
    }

    /// Tcp endpoint and TLS config from options.
    pub fn from_options(options: &Options) -> Result<AsyncTlsTransport> {
        let (host, port) = options.tcp_endpoint()?;
        Self::new(host, port, Arc::new(tls::client_config(options)?))
    }

    pub fn is_encrypted(&self) -> bool {
        self.socket.as_ref().is_some_and(AsyncSocket::is_tls)
    }
}

impl AsyncTransport for AsyncTlsTransport {
    async fn connect(&mut self) -> Result<()> {
        verbose!(host = %self.host, port = self.port, "connecting");
        self.socket = Some(AsyncSocket::connect_tcp(&self.host, self.port).await?);
        Ok(())
    }

    async fn handshake(&mut self) -> Result<()> {
        let socket = self.socket.take().ok_or(ErrorKind::Closed)?;
        let mut tcp = match socket.into_tcp() {
            Ok(tcp) => tcp,
            Err(socket) => {
                // already encrypted
                self.socket = Some(socket);
                return Ok(());
            },
        };

        write_frame(&mut tcp, &Frame::new(&SslRequest)?).await?;
        let response = read_exact(&mut tcp, 1).await?;
        accept_ssl_response(response[0])?;

        let stream = self.connector.connect(self.server_name.clone(), tcp).await?;
        verbose!(version = ?stream.get_ref().1.protocol_version(), "tls established");

        self.socket = Some(AsyncSocket::tls(stream));
        Ok(())
    }

    async fn read(&mut self, len: usize) -> Result<Bytes> {
        let socket = self.socket.as_mut().ok_or(ErrorKind::Closed)?;
        Ok(read_exact(socket, len).await?)
    }

    async fn write(&mut self, frame: &Frame) -> Result<usize> {
        let socket = self.socket.as_mut().ok_or(ErrorKind::Closed)?;
        Ok(write_frame(socket, frame).await?)
    }

    async fn close(&mut self) -> Result<()> {
        match self.socket.take() {
            Some(mut socket) => Ok(socket.shutdown().await?),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for AsyncTlsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncTlsTransport")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("socket", &self.socket)
            .finish()
    }
}

/// Read exactly `len` bytes.
pub(crate) async fn read_exact<R>(reader: &mut R, len: usize) -> io::Result<Bytes>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = BytesMut::zeroed(len);
    reader.read_exact(&mut buf).await?;
    Ok(buf.freeze())
}

/// Write header and body until fully flushed.
pub(crate) async fn write_frame<W>(writer: &mut W, frame: &Frame) -> io::Result<usize>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = frame.chain();
    std::future::poll_fn(|cx| poll_write_all(writer, &mut buf, cx)).await?;
    writer.flush().await?;
    Ok(frame.len())
}

fn poll_write_all<W, B>(writer: &mut W, buf: &mut B, cx: &mut Context) -> Poll<io::Result<()>>
where
    W: AsyncWrite + Unpin + ?Sized,
    B: Buf + ?Sized,
{
    use std::{io::IoSlice, pin::Pin, task::ready};

    while buf.has_remaining() {
        let n = if writer.is_write_vectored() {
            let mut slices = [IoSlice::new(&[]); MAX_VECTOR_ELEMENTS];
            let cnt = buf.chunks_vectored(&mut slices);
            ready!(Pin::new(&mut *writer).poll_write_vectored(cx, &slices[..cnt]))?
        } else {
            ready!(Pin::new(&mut *writer).poll_write(cx, buf.chunk()))?
        };
        if n == 0 {
            return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
        }
        buf.advance(n);
    }

    Poll::Ready(Ok(()))
}

#[cfg(test)]
mod test {
    use tokio_test::io::Builder;

    use super::*;
    use crate::postgres::frontend::Query;

    #[tokio::test]
    async fn write_then_read() {
        let mut mock = Builder::new()
            .write(b"Q\0\0\0\x0dselect 1\0")
            .read(b"Z\0\0\0\x05I")
            .build();

        let frame = Frame::new(&Query { sql: "select 1" }).unwrap();
        assert_eq!(write_frame(&mut mock, &frame).await.unwrap(), frame.len());
        assert_eq!(&read_exact(&mut mock, 5).await.unwrap()[..], b"Z\0\0\0\x05");
        assert_eq!(&read_exact(&mut mock, 1).await.unwrap()[..], b"I");
    }

    #[tokio::test]
    async fn plain_handshake_unsupported() {
        let mut t = AsyncPlainTransport::new(Endpoint::Tcp { host: "localhost".into(), port: 5432 });
        let err = t.handshake().await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Io(e) if e.kind() == io::ErrorKind::Unsupported));
    }
}
