//! Postgres connection.
//!
//! [`Connection`] drives the [`StateMachine`] over a blocking [`Transport`],
//! [`AsyncConnection`] over an [`AsyncTransport`][crate::transport::AsyncTransport].
//!
//! One operation runs at a time, starting another while one is outstanding
//! returns [`ErrorKind::Busy`][crate::ErrorKind::Busy] without writing anything.
use std::sync::Arc;

use crate::{
    Result,
    common::span,
    options::Options,
    postgres::{Frame, Header, backend::BackendKeyData},
    protocol::{State, StateMachine, Step},
    query::PreparedQuery,
    result::{DecodeTable, ResultSet, ResultSink},
    transport::{PlainTransport, TlsTransport, Transport},
};

#[cfg(feature = "tokio")]
mod nonblocking;
#[cfg(feature = "tokio")]
mod shared;

#[cfg(feature = "tokio")]
pub use nonblocking::AsyncConnection;
#[cfg(feature = "tokio")]
pub use shared::SharedConnection;

/// Blocking postgres connection.
#[derive(Debug)]
pub struct Connection<T> {
    transport: T,
    machine: StateMachine,
    table: Arc<DecodeTable>,
}

impl<T: Transport> Connection<T> {
    /// Connect and authenticate in plain text.
    pub fn connect(mut transport: T, options: &Options) -> Result<Connection<T>> {
        transport.connect()?;
        Self::startup(transport, options)
    }

    /// Connect, negotiate TLS, then authenticate.
    pub fn connect_ssl(mut transport: T, options: &Options) -> Result<Connection<T>> {
        transport.connect()?;
        transport.handshake()?;
        Self::startup(transport, options)
    }

    fn startup(transport: T, options: &Options) -> Result<Connection<T>> {
        let mut conn = Connection {
            transport,
            machine: StateMachine::new(options),
            table: Arc::new(DecodeTable::new()),
        };
        let frame = conn.machine.startup(options)?;
        if let Err(err) = conn.drive(&[frame], &mut ()) {
            let _ = conn.transport.close();
            return Err(err);
        }
        Ok(conn)
    }

    /// Decode table used by [`query`][Connection::query] and
    /// [`query_prepared`][Connection::query_prepared].
    pub fn with_decode_table(mut self, table: Arc<DecodeTable>) -> Connection<T> {
        self.table = table;
        self
    }

    /// Run simple query, which may contain multiple statements.
    pub fn exec<S: ResultSink>(&mut self, sql: &str, sink: &mut S) -> Result<()> {
        span!("exec", sql);
        let frame = self.machine.exec(sql)?;
        self.drive(&[frame], sink)
    }

    /// Run simple query into a new [`ResultSet`].
    pub fn query(&mut self, sql: &str) -> Result<ResultSet> {
        let mut set = ResultSet::new(self.table.clone());
        self.exec(sql, &mut set)?;
        Ok(set)
    }

    /// Execute previously prepared statement with its bound parameters.
    pub fn exec_prepared<S: ResultSink>(&mut self, query: &PreparedQuery, sink: &mut S) -> Result<()> {
        span!("exec_prepared", name = query.name());
        let frames = self.machine.exec_prepared(query)?;
        self.drive(&frames, sink)
    }

    /// Execute prepared statement into a new [`ResultSet`].
    pub fn query_prepared(&mut self, query: &PreparedQuery) -> Result<ResultSet> {
        let mut set = ResultSet::new(self.table.clone());
        self.exec_prepared(query, &mut set)?;
        Ok(set)
    }

    /// Create prepared statement on the server.
    pub fn prepare(&mut self, query: &PreparedQuery) -> Result<()> {
        span!("prepare", name = query.name());
        let frames = self.machine.prepare(query)?;
        self.drive(&frames, &mut ())
    }

    /// Send Terminate and release the transport.
    ///
    /// The transport is released even if writing Terminate failed. Only the
    /// Terminate write error is reported.
    pub fn close(&mut self) -> Result<()> {
        if self.machine.state() == State::End {
            return Ok(());
        }
        let frame = self.machine.close()?;
        let written = self.transport.write(&frame);
        let _ = self.transport.close();
        self.machine.closed();
        written?;
        Ok(())
    }

    pub fn state(&self) -> State {
        self.machine.state()
    }

    /// Run-time parameter reported by server.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.machine.parameter(name)
    }

    pub fn backend_key_data(&self) -> Option<BackendKeyData> {
        self.machine.backend_key_data()
    }

    pub fn transaction_status(&self) -> Option<u8> {
        self.machine.transaction_status()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Write `frames` then feed backend messages until the operation completes.
    fn drive(&mut self, frames: &[Frame], sink: &mut dyn ResultSink) -> Result<()> {
        let result = self.drive_inner(frames, sink);
        if result.is_err() {
            self.machine.abort();
        }
        result
    }

    fn drive_inner(&mut self, frames: &[Frame], sink: &mut dyn ResultSink) -> Result<()> {
        for frame in frames {
            self.transport.write(frame)?;
        }

        loop {
            let header = Header::decode(self.transport.read(Header::SIZE)?)?;
            let body = self.transport.read(header.body_size())?;
            match self.machine.receive(header, body, sink)? {
                Step::Continue => { },
                Step::Write(frame) => {
                    self.transport.write(&frame)?;
                },
                Step::Done => return Ok(()),
            }
        }
    }
}

impl Connection<PlainTransport> {
    /// Plain connection to the endpoint in `options`.
    pub fn connect_plain(options: &Options) -> Result<Self> {
        Self::connect(PlainTransport::from_options(options)?, options)
    }
}

impl Connection<TlsTransport> {
    /// TLS connection configured by the `ssl*` keys in `options`.
    pub fn connect_tls(options: &Options) -> Result<Self> {
        Self::connect_ssl(TlsTransport::from_options(options)?, options)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        ErrorKind,
        postgres::{SqlError, pg_type},
        result::DecodeError,
        test_support::{ScriptedTransport, Server},
    };

    fn options() -> Options {
        Options::new()
            .set(Options::USER, "gptest")
            .set(Options::PASSWORD, "secret")
            .set(Options::DATABASE, "postgres")
    }

    fn connect(server: Server) -> Connection<ScriptedTransport> {
        Connection::connect(ScriptedTransport::new(Server::new().connected()), &options())
            .map(|mut conn| {
                conn.transport.server = server.bytes();
                conn
            })
            .unwrap()
    }

    #[test]
    fn simple_query() {
        let server = Server::new()
            .row_description(&[("abc", pg_type::TEXT, 0)])
            .data_row(&[Some(b"Ok")])
            .command_complete("SELECT 1")
            .ready();
        let mut conn = connect(server);

        let set = conn.query("select 'Ok'::text as abc;").unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].fields()[0].name, "abc");
        assert_eq!(set[0].fields()[0].type_oid, pg_type::TEXT);
        assert_eq!(set[0].rows().len(), 1);
        assert_eq!(set[0].get::<String, _>(0, 0).unwrap(), "Ok");

        assert_eq!(conn.state(), State::Idle);
        assert_eq!(conn.parameter("server_version"), Some("17.0"));
        assert_eq!(conn.transport().written_types(), [None, Some(b'Q')]);
    }

    #[test]
    fn md5_authentication() {
        let server = Server::new().auth_md5([1, 2, 3, 4]).connected();
        let conn = Connection::connect(ScriptedTransport::new(server), &options()).unwrap();
        assert_eq!(conn.state(), State::Idle);
        assert_eq!(conn.transport().written_types(), [None, Some(b'p')]);
        assert_eq!(conn.backend_key_data().map(|k| k.secret_key), Some(7));
    }

    #[test]
    fn failed_authentication() {
        let server = Server::new().error("28P01", "password authentication failed");
        let err = Connection::connect(ScriptedTransport::new(server), &options()).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Database(_)));
    }

    #[test]
    fn prepare_then_exec_bound() {
        let server = Server::new()
            .parse_complete()
            .ready()
            .bind_complete()
            .row_description(&[("text", pg_type::TEXT, 0)])
            .data_row(&[Some(b"hi")])
            .command_complete("SELECT 1")
            .ready();
        let mut conn = connect(server);

        let query = PreparedQuery::new("greet", "select $1::text").bind("hi");
        conn.prepare(&query).unwrap();
        let set = conn.query_prepared(&query).unwrap();

        assert_eq!(set[0].get::<String, _>(0, "text").unwrap(), "hi");
        assert_eq!(
            conn.transport().written_types(),
            [None, Some(b'P'), Some(b'S'), Some(b'B'), Some(b'D'), Some(b'E'), Some(b'S')],
        );
    }

    #[test]
    fn binary_format_is_recoverable() {
        let server = Server::new()
            .row_description(&[("int4", pg_type::INT4, 1)])
            .data_row(&[Some(b"\0\0\0\x01")])
            .command_complete("SELECT 1")
            .ready()
            .row_description(&[("int4", pg_type::INT4, 0)])
            .data_row(&[Some(b"1")])
            .command_complete("SELECT 1")
            .ready();
        let mut conn = connect(server);

        let err = conn.query("select 1::int4").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Decode(DecodeError::UnsupportedFormat { .. })));
        assert_eq!(conn.state(), State::Idle);

        let set = conn.query("select 1::int4").unwrap();
        assert_eq!(set[0].get::<i32, _>(0, 0).unwrap(), 1);
    }

    #[test]
    fn server_error_in_result() {
        let server = Server::new()
            .error("42P01", "relation \"missing\" does not exist")
            .ready();
        let mut conn = connect(server);

        let set = conn.query("select * from missing").unwrap();
        assert!(!set.is_success());
        assert_eq!(set[0].error().map(SqlError::code), Some("42P01"));
        assert_eq!(conn.state(), State::Idle);
    }

    #[test]
    fn one_result_per_statement() {
        let server = Server::new()
            .command_complete("INSERT 0 3")
            .row_description(&[("n", pg_type::INT8, 0)])
            .data_row(&[Some(b"3")])
            .command_complete("SELECT 1")
            .notice("some notice")
            .ready();
        let mut conn = connect(server);

        let set = conn.query("insert into t select 1; select count(*) n from t").unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set[0].rows_affected(), 3);
        assert!(set[0].fields().is_empty());
        assert_eq!(set[1].get::<i64, _>(0, "n").unwrap(), 3);
    }

    #[test]
    fn close_releases_transport() {
        let mut conn = connect(Server::new());
        conn.close().unwrap();
        assert_eq!(conn.state(), State::End);
        assert!(conn.transport().closed);
        assert_eq!(conn.transport().written_types().last(), Some(&Some(b'X')));

        let err = conn.query("select 1").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Closed));
        conn.close().unwrap();
    }

    #[test]
    fn failed_write_stops_extended_exec() {
        let mut conn = connect(Server::new());
        conn.transport.writes_left = Some(2);

        let query = PreparedQuery::new("greet", "select $1::text").bind("hi");
        let err = conn.query_prepared(&query).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Io(e) if e.kind() == std::io::ErrorKind::BrokenPipe));

        // Execute failed, Sync never written
        assert_eq!(conn.transport().written_types(), [None, Some(b'B'), Some(b'D')]);
        assert_eq!(conn.state(), State::End);
    }

    #[test]
    fn close_releases_transport_after_failed_write() {
        let mut conn = connect(Server::new());
        conn.transport.writes_left = Some(0);

        let err = conn.close().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Io(_)));
        assert!(conn.transport().closed);
        assert_eq!(conn.state(), State::End);
        assert_eq!(conn.transport().written_types(), [None]);
    }

    #[test]
    fn truncated_stream_poisons() {
        let server = Server::new().row_description(&[("abc", pg_type::TEXT, 0)]);
        let mut conn = connect(server);

        let err = conn.query("select 'Ok'::text as abc").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Io(_)));
        assert_eq!(conn.state(), State::End);
    }
}
