use std::{net::TcpStream, sync::Arc};

use bytes::Bytes;
use rustls::{ClientConfig, ClientConnection, StreamOwned, pki_types::ServerName};

use super::{Socket, Transport, read_exact, write_frame};
use crate::{
    ErrorKind, Result,
    common::verbose,
    options::{Endpoint, Options},
    postgres::{Frame, ProtocolError, frontend::SslRequest},
    tls,
};

/// Blocking transport over tcp or unix socket.
#[derive(Debug)]
pub struct PlainTransport {
    endpoint: Endpoint,
    socket: Option<Socket>,
}

impl PlainTransport {
    pub fn new(endpoint: Endpoint) -> PlainTransport {
        Self { endpoint, socket: None }
    }

    pub fn from_options(options: &Options) -> Result<PlainTransport> {
        Ok(Self::new(options.endpoint()?))
    }
}

impl Transport for PlainTransport {
    fn connect(&mut self) -> Result<()> {
        verbose!(endpoint = %self.endpoint, "connecting");
        let socket = match &self.endpoint {
            Endpoint::Unix(path) => Socket::connect_socket(path)?,
            Endpoint::Tcp { host, port } => Socket::connect_tcp(host, *port)?,
        };
        self.socket = Some(socket);
        Ok(())
    }

    fn read(&mut self, len: usize) -> Result<Bytes> {
        let socket = self.socket.as_mut().ok_or(ErrorKind::Closed)?;
        Ok(read_exact(socket, len)?)
    }

    fn write(&mut self, frame: &Frame) -> Result<usize> {
        let socket = self.socket.as_mut().ok_or(ErrorKind::Closed)?;
        Ok(write_frame(socket, frame)?)
    }

    fn close(&mut self) -> Result<()> {
        match self.socket.take() {
            Some(mut socket) => Ok(socket.shutdown()?),
            None => Ok(()),
        }
    }
}

/// Blocking transport with TLS over tcp.
pub struct TlsTransport {
    host: String,
    port: u16,
    server_name: ServerName<'static>,
    config: Arc<ClientConfig>,
    socket: Option<Socket>,
}

impl TlsTransport {
    pub fn new(host: impl Into<String>, port: u16, config: Arc<ClientConfig>) -> Result<TlsTransport> {
        let host = host.into();
        let server_name = tls::server_name(&host)?;
        Ok(Self { host, port, server_name, config, socket: None })
    }

    /// Tcp endpoint and TLS config from options.
    pub fn from_options(options: &Options) -> Result<TlsTransport> {
        let (host, port) = options.tcp_endpoint()?;
        Self::new(host, port, Arc::new(tls::client_config(options)?))
    }

    pub fn is_encrypted(&self) -> bool {
        self.socket.as_ref().is_some_and(Socket::is_tls)
    }
}

impl Transport for TlsTransport {
    fn connect(&mut self) -> Result<()> {
        verbose!(host = %self.host, port = self.port, "connecting");
        self.socket = Some(Socket::connect_tcp(&self.host, self.port)?);
        Ok(())
    }

    fn handshake(&mut self) -> Result<()> {
        let socket = self.socket.take().ok_or(ErrorKind::Closed)?;
        let mut tcp = match socket.into_tcp() {
            Ok(tcp) => tcp,
            Err(socket) => {
                // already encrypted
                self.socket = Some(socket);
                return Ok(());
            },
        };

        write_frame(&mut tcp, &Frame::new(&SslRequest)?)?;
        let response = read_exact(&mut tcp, 1)?;
        accept_ssl_response(response[0])?;

        let conn = ClientConnection::new(self.config.clone(), self.server_name.clone())?;
        let mut stream = StreamOwned::<ClientConnection, TcpStream>::new(conn, tcp);
        while stream.conn.is_handshaking() {
            stream.conn.complete_io(&mut stream.sock)?;
        }
        verbose!(version = ?stream.conn.protocol_version(), "tls established");

        self.socket = Some(Socket::tls(stream));
        Ok(())
    }

    fn read(&mut self, len: usize) -> Result<Bytes> {
        let socket = self.socket.as_mut().ok_or(ErrorKind::Closed)?;
        Ok(read_exact(socket, len)?)
    }

    fn write(&mut self, frame: &Frame) -> Result<usize> {
        let socket = self.socket.as_mut().ok_or(ErrorKind::Closed)?;
        Ok(write_frame(socket, frame)?)
    }

    fn close(&mut self) -> Result<()> {
        match self.socket.take() {
            Some(mut socket) => Ok(socket.shutdown()?),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsTransport")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("socket", &self.socket)
            .finish()
    }
}

/// Check the single byte answer to SSLRequest.
pub(crate) fn accept_ssl_response(byte: u8) -> Result<(), ProtocolError> {
    match byte {
        b'S' => Ok(()),
        b'N' => Err(ProtocolError::SslDeclined),
        found => Err(ProtocolError::SslResponse { found }),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ssl_response() {
        assert!(accept_ssl_response(b'S').is_ok());
        assert!(matches!(accept_ssl_response(b'N'), Err(ProtocolError::SslDeclined)));
        assert!(matches!(accept_ssl_response(b'E'), Err(ProtocolError::SslResponse { found: b'E' })));
    }

    #[test]
    fn plain_handshake_unsupported() {
        let mut t = PlainTransport::new(Endpoint::Tcp { host: "localhost".into(), port: 5432 });
        let err = t.handshake().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Io(e) if e.kind() == std::io::ErrorKind::Unsupported));
    }

    #[test]
    fn io_before_connect_is_closed() {
        let mut t = PlainTransport::new(Endpoint::Unix("/nonexistent/.s.PGSQL.5432".into()));
        assert!(matches!(t.read(1).unwrap_err().kind(), ErrorKind::Closed));
        assert!(t.close().is_ok());
    }
}
