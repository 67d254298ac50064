use std::{
    io::{self, IoSlice, Read, Write},
    net::TcpStream,
    path::Path,
};

use rustls::{ClientConnection, StreamOwned};

/// Either `TcpStream`, `UnixStream` or TLS over `TcpStream`, which implement
/// `Read` and `Write` transparently.
pub struct Socket {
    kind: Kind,
}

enum Kind {
    Tcp(TcpStream),
    #[cfg(unix)]
    UnixSocket(std::os::unix::net::UnixStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Socket {
    pub fn connect_tcp(host: &str, port: u16) -> io::Result<Socket> {
        let socket = TcpStream::connect((host, port))?;
        socket.set_nodelay(true)?;
        Ok(Socket { kind: Kind::Tcp(socket) })
    }

    pub fn connect_socket(path: &Path) -> io::Result<Socket> {
        #[cfg(unix)]
        {
            let socket = std::os::unix::net::UnixStream::connect(path)?;
            Ok(Socket { kind: Kind::UnixSocket(socket) })
        }

        #[cfg(not(unix))]
        {
            let _ = path;
            Err(io::ErrorKind::Unsupported.into())
        }
    }

    pub(crate) fn tls(stream: StreamOwned<ClientConnection, TcpStream>) -> Socket {
        Socket { kind: Kind::Tls(Box::new(stream)) }
    }

    /// Take the plain tcp stream, for upgrading to TLS.
    pub(crate) fn into_tcp(self) -> Result<TcpStream, Socket> {
        match self.kind {
            Kind::Tcp(tcp) => Ok(tcp),
            kind => Err(Socket { kind }),
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.kind, Kind::Tls(_))
    }

    pub fn shutdown(&mut self) -> io::Result<()> {
        match &mut self.kind {
            Kind::Tcp(t) => t.shutdown(std::net::Shutdown::Both),
            #[cfg(unix)]
            Kind::UnixSocket(u) => u.shutdown(std::net::Shutdown::Both),
            Kind::Tls(t) => {
                t.conn.send_close_notify();
                // best effort, peer may already be gone
                let _ = t.conn.complete_io(&mut t.sock);
                t.sock.shutdown(std::net::Shutdown::Both)
            },
        }
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.kind {
            Kind::Tcp(t) => t.read(buf),
            #[cfg(unix)]
            Kind::UnixSocket(u) => u.read(buf),
            Kind::Tls(t) => t.read(buf),
        }
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.kind {
            Kind::Tcp(t) => t.write(buf),
            #[cfg(unix)]
            Kind::UnixSocket(u) => u.write(buf),
            Kind::Tls(t) => t.write(buf),
        }
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        match &mut self.kind {
            Kind::Tcp(t) => t.write_vectored(bufs),
            #[cfg(unix)]
            Kind::UnixSocket(u) => u.write_vectored(bufs),
            Kind::Tls(t) => t.write_vectored(bufs),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.kind {
            Kind::Tcp(t) => t.flush(),
            #[cfg(unix)]
            Kind::UnixSocket(u) => u.flush(),
            Kind::Tls(t) => t.flush(),
        }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            Kind::Tcp(tcp) => std::fmt::Debug::fmt(tcp, f),
            #[cfg(unix)]
            Kind::UnixSocket(unix) => std::fmt::Debug::fmt(unix, f),
            Kind::Tls(tls) => f.debug_tuple("Tls").field(&tls.sock).finish(),
        }
    }
}

#[cfg(feature = "tokio")]
pub use nonblocking::AsyncSocket;

#[cfg(feature = "tokio")]
mod nonblocking {
    use std::{
        io,
        path::Path,
        pin::Pin,
        task::{Context, Poll},
    };

    use tokio::{
        io::{AsyncRead, AsyncWrite, ReadBuf},
        net::TcpStream,
    };
    use tokio_rustls::client::TlsStream;

    /// Either `TcpStream`, `UnixStream` or TLS over `TcpStream`, which implement
    /// `AsyncRead` and `AsyncWrite` transparently.
    pub struct AsyncSocket {
        kind: Kind,
    }

    enum Kind {
        TokioTcp(TcpStream),
        #[cfg(unix)]
        TokioUnixSocket(tokio::net::UnixStream),
        TokioTls(Box<TlsStream<TcpStream>>),
    }

    impl AsyncSocket {
        pub async fn connect_tcp(host: &str, port: u16) -> io::Result<AsyncSocket> {
            let socket = TcpStream::connect((host, port)).await?;
            socket.set_nodelay(true)?;
            Ok(AsyncSocket { kind: Kind::TokioTcp(socket) })
        }

        pub async fn connect_socket(path: &Path) -> io::Result<AsyncSocket> {
            #[cfg(unix)]
            {
                let socket = tokio::net::UnixStream::connect(path).await?;
                Ok(AsyncSocket { kind: Kind::TokioUnixSocket(socket) })
            }

            #[cfg(not(unix))]
            {
                let _ = path;
                Err(io::ErrorKind::Unsupported.into())
            }
        }

        pub(crate) fn tls(stream: TlsStream<TcpStream>) -> AsyncSocket {
            AsyncSocket { kind: Kind::TokioTls(Box::new(stream)) }
        }

        /// Take the plain tcp stream, for upgrading to TLS.
        pub(crate) fn into_tcp(self) -> Result<TcpStream, AsyncSocket> {
            match self.kind {
                Kind::TokioTcp(tcp) => Ok(tcp),
                kind => Err(AsyncSocket { kind }),
            }
        }

        pub fn is_tls(&self) -> bool {
            matches!(self.kind, Kind::TokioTls(_))
        }
    }

    impl AsyncRead for AsyncSocket {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match &mut self.kind {
                Kind::TokioTcp(t) => Pin::new(t).poll_read(cx, buf),
                #[cfg(unix)]
                Kind::TokioUnixSocket(u) => Pin::new(u).poll_read(cx, buf),
                Kind::TokioTls(t) => Pin::new(t.as_mut()).poll_read(cx, buf),
            }
        }
    }

    impl AsyncWrite for AsyncSocket {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            match &mut self.kind {
                Kind::TokioTcp(t) => Pin::new(t).poll_write(cx, buf),
                #[cfg(unix)]
                Kind::TokioUnixSocket(u) => Pin::new(u).poll_write(cx, buf),
                Kind::TokioTls(t) => Pin::new(t.as_mut()).poll_write(cx, buf),
            }
        }

        fn poll_write_vectored(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            bufs: &[io::IoSlice<'_>],
        ) -> Poll<io::Result<usize>> {
            match &mut self.kind {
                Kind::TokioTcp(t) => Pin::new(t).poll_write_vectored(cx, bufs),
                #[cfg(unix)]
                Kind::TokioUnixSocket(u) => Pin::new(u).poll_write_vectored(cx, bufs),
                Kind::TokioTls(t) => Pin::new(t.as_mut()).poll_write_vectored(cx, bufs),
            }
        }

        fn is_write_vectored(&self) -> bool {
            match &self.kind {
                Kind::TokioTcp(t) => t.is_write_vectored(),
                #[cfg(unix)]
                Kind::TokioUnixSocket(u) => u.is_write_vectored(),
                Kind::TokioTls(t) => t.is_write_vectored(),
            }
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            match &mut self.kind {
                Kind::TokioTcp(t) => Pin::new(t).poll_flush(cx),
                #[cfg(unix)]
                Kind::TokioUnixSocket(u) => Pin::new(u).poll_flush(cx),
                Kind::TokioTls(t) => Pin::new(t.as_mut()).poll_flush(cx),
            }
        }

        fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            match &mut self.kind {
                Kind::TokioTcp(t) => Pin::new(t).poll_shutdown(cx),
                #[cfg(unix)]
                Kind::TokioUnixSocket(u) => Pin::new(u).poll_shutdown(cx),
                Kind::TokioTls(t) => Pin::new(t.as_mut()).poll_shutdown(cx),
            }
        }
    }

    impl std::fmt::Debug for AsyncSocket {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match &self.kind {
                Kind::TokioTcp(tcp) => std::fmt::Debug::fmt(tcp, f),
                #[cfg(unix)]
                Kind::TokioUnixSocket(unix) => std::fmt::Debug::fmt(unix, f),
                Kind::TokioTls(tls) => f.debug_tuple("Tls").field(tls.get_ref().0).finish(),
            }
        }
    }
}
