//! Protocol state machine.
//!
//! [`StateMachine`] does no I/O. Callers write the [`Frame`]s it returns and
//! feed every backend message to [`StateMachine::receive`] until it yields
//! [`Step::Done`] or an error.
//!
//! ```text
//! Auth -> Conn -> Idle <-> Query
//!                      <-> EQuery
//! (any) -> Close -> End
//! ```
//!
//! Dispatch is a static table keyed by `(State, message type)`. Messages with
//! no entry for the current state are logged and skipped.
use std::{collections::BTreeMap, fmt};

use bytes::Bytes;

use crate::{
    Error, ErrorKind, Result,
    common::{span, verbose, warning},
    options::{ConfigError, Options},
    postgres::{
        Frame, Header, ProtocolError,
        backend::{self, *},
        frontend::{self, Bind, Describe, Execute, Parse, Password, Query, StartUp, Sync, Terminate},
    },
    query::PreparedQuery,
    result::ResultSink,
};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Startup sent, authenticating.
    Auth,
    /// Authenticated, waiting for the first `ReadyForQuery`.
    Conn,
    /// Ready for a new operation.
    Idle,
    /// Simple query or prepare in flight.
    Query,
    /// Bound execution in flight.
    EQuery,
    /// Terminate sent.
    Close,
    /// Transport released, no further operation allowed.
    End,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of one received message.
#[derive(Debug)]
pub enum Step {
    /// Keep reading.
    Continue,
    /// Write the frame, then keep reading.
    Write(Frame),
    /// Operation finished successfully.
    Done,
}

type Handler = fn(&mut StateMachine, Header, Bytes, &mut dyn ResultSink) -> Result<Step>;

static TRANSITIONS: &[(State, u8, Handler)] = &[
    (State::Auth, Authentication::MSGTYPE, StateMachine::authenticate),
    (State::Auth, ErrorResponse::MSGTYPE, StateMachine::startup_error),
    (State::Auth, NoticeResponse::MSGTYPE, StateMachine::notice),
    (State::Auth, ParameterStatus::MSGTYPE, StateMachine::parameter_status),
    (State::Auth, NegotiateProtocolVersion::MSGTYPE, StateMachine::negotiate),

    (State::Conn, BackendKeyData::MSGTYPE, StateMachine::backend_key),
    (State::Conn, ParameterStatus::MSGTYPE, StateMachine::parameter_status),
    (State::Conn, ReadyForQuery::MSGTYPE, StateMachine::ready_for_query),
    (State::Conn, NoticeResponse::MSGTYPE, StateMachine::notice),
    (State::Conn, ErrorResponse::MSGTYPE, StateMachine::startup_error),

    (State::Idle, ParameterStatus::MSGTYPE, StateMachine::parameter_status),
    (State::Idle, NoticeResponse::MSGTYPE, StateMachine::notice),

    (State::Query, RowDescription::MSGTYPE, StateMachine::row_description),
    (State::Query, DataRow::MSGTYPE, StateMachine::data_row),
    (State::Query, CommandComplete::MSGTYPE, StateMachine::command_complete),
    (State::Query, ParseComplete::MSGTYPE, StateMachine::acknowledge),
    (State::Query, ReadyForQuery::MSGTYPE, StateMachine::ready_for_query),
    (State::Query, NoticeResponse::MSGTYPE, StateMachine::notice),
    (State::Query, ErrorResponse::MSGTYPE, StateMachine::error_response),
    (State::Query, EmptyQueryResponse::MSGTYPE, StateMachine::acknowledge),
    (State::Query, ParameterStatus::MSGTYPE, StateMachine::parameter_status),
    (State::Query, NoData::MSGTYPE, StateMachine::acknowledge),
    (State::Query, ParameterDescription::MSGTYPE, StateMachine::parameter_description),

    (State::EQuery, BindComplete::MSGTYPE, StateMachine::acknowledge),
    (State::EQuery, ParameterDescription::MSGTYPE, StateMachine::parameter_description),
    (State::EQuery, RowDescription::MSGTYPE, StateMachine::row_description),
    (State::EQuery, DataRow::MSGTYPE, StateMachine::data_row),
    (State::EQuery, CommandComplete::MSGTYPE, StateMachine::command_complete),
    (State::EQuery, ReadyForQuery::MSGTYPE, StateMachine::ready_for_query),
    (State::EQuery, NoticeResponse::MSGTYPE, StateMachine::notice),
    (State::EQuery, ErrorResponse::MSGTYPE, StateMachine::error_response),
    (State::EQuery, NoData::MSGTYPE, StateMachine::acknowledge),
    (State::EQuery, EmptyQueryResponse::MSGTYPE, StateMachine::acknowledge),
    (State::EQuery, ParameterStatus::MSGTYPE, StateMachine::parameter_status),
    (State::EQuery, ParseComplete::MSGTYPE, StateMachine::acknowledge),
    (State::EQuery, PortalSuspended::MSGTYPE, StateMachine::acknowledge),
];

fn lookup(state: State, msgtype: u8) -> Option<Handler> {
    TRANSITIONS
        .iter()
        .find(|(s, m, _)| *s == state && *m == msgtype)
        .map(|(_, _, handler)| *handler)
}

/// Sans-io postgres protocol driver.
pub struct StateMachine {
    state: State,
    user: String,
    password: Option<String>,
    /// ErrorResponse goes to the sink instead of failing the operation.
    sink_attached: bool,
    /// First failure of the current operation, reported at `ReadyForQuery`.
    pending: Option<Error>,
    parameters: BTreeMap<String, String>,
    key_data: Option<BackendKeyData>,
    transaction_status: Option<u8>,
}

impl StateMachine {
    /// New machine in [`State::Auth`], credentials taken from `options`.
    pub fn new(options: &Options) -> StateMachine {
        StateMachine {
            state: State::Auth,
            user: options.user().to_owned(),
            password: options.password().map(ToOwned::to_owned),
            sink_attached: false,
            pending: None,
            parameters: BTreeMap::new(),
            key_data: None,
            transaction_status: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Run-time parameter reported by server, e.g. `server_version`.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    /// Cancellation key of the backend process.
    pub fn backend_key_data(&self) -> Option<BackendKeyData> {
        self.key_data
    }

    /// Transaction status from the last `ReadyForQuery`: `I`, `T` or `E`.
    pub fn transaction_status(&self) -> Option<u8> {
        self.transaction_status
    }

    /// Startup message carrying `options` startup parameters.
    pub fn startup(&mut self, options: &Options) -> Result<Frame> {
        match self.state {
            State::Auth => { },
            State::Close | State::End => return Err(ErrorKind::Closed.into()),
            _ => return Err(ErrorKind::Busy.into()),
        }
        let params = options.startup_params();
        Ok(Frame::new(&StartUp { params: &params })?)
    }

    /// Simple query, results are sent to the sink.
    pub fn exec(&mut self, sql: &str) -> Result<Frame> {
        self.check_idle()?;
        let frame = Frame::new(&Query { sql })?;
        self.begin(State::Query, true);
        Ok(frame)
    }

    /// Bind, describe, execute and sync of a prepared statement.
    pub fn exec_prepared(&mut self, query: &PreparedQuery) -> Result<Vec<Frame>> {
        self.check_idle()?;
        let frames = vec![
            Frame::new(&Bind { portal: query.portal(), name: query.name(), params: query.params() })?,
            Frame::new(&Describe::portal_or_statement(query.portal(), query.name()))?,
            Frame::new(&Execute { portal: query.portal(), max_rows: 0 })?,
            Frame::new(&Sync)?,
        ];
        self.begin(State::EQuery, true);
        Ok(frames)
    }

    /// Parse and sync, server error fails the operation.
    pub fn prepare(&mut self, query: &PreparedQuery) -> Result<Vec<Frame>> {
        self.check_idle()?;
        let frames = vec![
            Frame::new(&Parse { name: query.name(), sql: query.sql() })?,
            Frame::new(&Sync)?,
        ];
        self.begin(State::Query, false);
        Ok(frames)
    }

    /// Terminate message, allowed in any state.
    pub fn close(&mut self) -> Result<Frame> {
        let frame = Frame::new(&Terminate)?;
        self.state = State::Close;
        self.sink_attached = false;
        self.pending = None;
        Ok(frame)
    }

    /// Transport released.
    pub fn closed(&mut self) {
        self.state = State::End;
    }

    /// Transport or framing failure, the connection can not be reused
    /// unless it was idle.
    pub fn abort(&mut self) {
        if self.state != State::Idle {
            verbose!(state = %self.state, "connection poisoned");
            self.state = State::End;
        }
        self.sink_attached = false;
        self.pending = None;
    }

    /// Handle one backend message.
    pub fn receive(&mut self, header: Header, body: Bytes, sink: &mut dyn ResultSink) -> Result<Step> {
        let Some(msgtype) = header.msgtype else {
            return Err(ProtocolError::unknown(0).into());
        };

        span!("receive", state = %self.state, msg = backend::message_name(msgtype));

        match lookup(self.state, msgtype) {
            Some(handler) => handler(self, header, body, sink),
            None => {
                warning!(
                    "skipping `{}` message in {} state",
                    backend::message_name(msgtype),
                    self.state,
                );
                Ok(Step::Continue)
            },
        }
    }

    fn check_idle(&self) -> Result<()> {
        match self.state {
            State::Idle => Ok(()),
            State::Close | State::End => Err(ErrorKind::Closed.into()),
            _ => Err(ErrorKind::Busy.into()),
        }
    }

    fn begin(&mut self, state: State, sink_attached: bool) {
        verbose!(from = %self.state, to = %state, "begin operation");
        self.state = state;
        self.sink_attached = sink_attached;
        self.pending = None;
    }

    /// Keep the first failure only.
    fn record(&mut self, error: Error) {
        if self.pending.is_none() {
            self.pending = Some(error);
        }
    }

    fn password(&self) -> Result<&str> {
        match self.password.as_deref() {
            Some(password) => Ok(password),
            None => Err(ConfigError::new("server requested password, but none is configured").into()),
        }
    }

    fn authenticate(&mut self, header: Header, body: Bytes, _: &mut dyn ResultSink) -> Result<Step> {
        match backend::decode(header, body)? {
            Authentication::Ok => {
                verbose!("authenticated");
                self.state = State::Conn;
                Ok(Step::Continue)
            },
            Authentication::MD5Password { salt } => {
                let hashed = frontend::md5_password(&self.user, self.password()?, salt);
                Ok(Step::Write(Frame::new(&Password { password: &hashed })?))
            },
            Authentication::CleartextPassword => {
                Ok(Step::Write(Frame::new(&Password { password: self.password()? })?))
            },
            auth => Err(ErrorKind::UnsupportedAuth(auth.code()).into()),
        }
    }

    fn startup_error(&mut self, header: Header, body: Bytes, _: &mut dyn ResultSink) -> Result<Step> {
        let ErrorResponse(error) = backend::decode(header, body)?;
        self.state = State::End;
        Err(error.into())
    }

    fn notice(&mut self, header: Header, body: Bytes, _: &mut dyn ResultSink) -> Result<Step> {
        let NoticeResponse(notice) = backend::decode(header, body)?;
        warning!("{notice}");
        Ok(Step::Continue)
    }

    fn negotiate(&mut self, header: Header, body: Bytes, _: &mut dyn ResultSink) -> Result<Step> {
        let negotiate: NegotiateProtocolVersion = backend::decode(header, body)?;
        warning!(
            "server supports protocol minor version {}, unrecognized options: {:?}",
            negotiate.minor, negotiate.options,
        );
        Ok(Step::Continue)
    }

    fn backend_key(&mut self, header: Header, body: Bytes, _: &mut dyn ResultSink) -> Result<Step> {
        self.key_data = Some(backend::decode(header, body)?);
        Ok(Step::Continue)
    }

    fn parameter_status(&mut self, header: Header, body: Bytes, _: &mut dyn ResultSink) -> Result<Step> {
        let ParameterStatus { name, value } = backend::decode(header, body)?;
        verbose!(%name, %value, "parameter status");
        self.parameters.insert(name.into(), value.into());
        Ok(Step::Continue)
    }

    fn ready_for_query(&mut self, header: Header, body: Bytes, _: &mut dyn ResultSink) -> Result<Step> {
        let ReadyForQuery { status } = backend::decode(header, body)?;
        self.transaction_status = Some(status);
        self.state = State::Idle;
        self.sink_attached = false;
        match self.pending.take() {
            Some(error) => Err(error),
            None => Ok(Step::Done),
        }
    }

    fn row_description(&mut self, header: Header, body: Bytes, sink: &mut dyn ResultSink) -> Result<Step> {
        let RowDescription { fields } = backend::decode(header, body)?;
        sink.begin_result(fields);
        Ok(Step::Continue)
    }

    fn data_row(&mut self, header: Header, body: Bytes, sink: &mut dyn ResultSink) -> Result<Step> {
        let DataRow { columns } = backend::decode(header, body)?;
        sink.add_row();
        for (index, column) in columns.iter().enumerate() {
            if let Err(err) = sink.add_column(index, column.as_deref()) {
                self.record(err.into());
            }
        }
        Ok(Step::Continue)
    }

    fn command_complete(&mut self, header: Header, body: Bytes, sink: &mut dyn ResultSink) -> Result<Step> {
        let CommandComplete { tag } = backend::decode(header, body)?;
        verbose!(%tag, "command complete");
        sink.complete(&tag);
        Ok(Step::Continue)
    }

    fn parameter_description(&mut self, header: Header, body: Bytes, sink: &mut dyn ResultSink) -> Result<Step> {
        let ParameterDescription { oids } = backend::decode(header, body)?;
        sink.parameter_types(&oids);
        Ok(Step::Continue)
    }

    fn error_response(&mut self, header: Header, body: Bytes, sink: &mut dyn ResultSink) -> Result<Step> {
        let ErrorResponse(error) = backend::decode(header, body)?;
        if self.sink_attached {
            sink.begin_error(error);
        } else {
            self.record(error.into());
        }
        Ok(Step::Continue)
    }

    /// Messages with nothing to act on.
    fn acknowledge(&mut self, header: Header, body: Bytes, _: &mut dyn ResultSink) -> Result<Step> {
        let _: BackendMessage = backend::decode(header, body)?;
        Ok(Step::Continue)
    }
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("state", &self.state)
            .field("user", &self.user)
            .field("transaction_status", &self.transaction_status)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use bytes::Buf;

    use super::*;
    use crate::{
        postgres::pg_type,
        result::{DecodeError, ResultSet},
        test_support::Server,
    };

    fn options() -> Options {
        Options::new().set(Options::USER, "gptest").set(Options::PASSWORD, "secret")
    }

    /// Feed all messages, collecting the steps.
    fn feed(machine: &mut StateMachine, server: Server, sink: &mut dyn ResultSink) -> Vec<Result<Step>> {
        let mut bytes = server.bytes();
        let mut steps = vec![];
        while bytes.has_remaining() {
            let header = Header::decode(&bytes[..Header::SIZE]).unwrap();
            bytes.advance(Header::SIZE);
            let body = bytes.split_to(header.body_size());
            steps.push(machine.receive(header, body, sink));
        }
        steps
    }

    fn idle() -> StateMachine {
        let mut machine = StateMachine::new(&options());
        machine.startup(&options()).unwrap();
        let steps = feed(&mut machine, Server::new().connected(), &mut ());
        assert!(matches!(steps.last(), Some(Ok(Step::Done))));
        machine
    }

    #[test]
    fn startup_with_md5() {
        let mut machine = StateMachine::new(&options());
        machine.startup(&options()).unwrap();

        let mut steps = feed(&mut machine, Server::new().auth_md5([1, 2, 3, 4]), &mut ());
        let Some(Ok(Step::Write(frame))) = steps.pop() else {
            panic!("expected password message");
        };
        assert_eq!(frame.msgtype(), Some(b'p'));
        assert_eq!(&frame.body()[..], b"md5d5e6cfcf2a52491bcfa9c19caad6195b\0");
        assert_eq!(machine.state(), State::Auth);

        feed(&mut machine, Server::new().connected(), &mut ());
        assert_eq!(machine.state(), State::Idle);
        assert_eq!(machine.parameter("server_version"), Some("17.0"));
        assert_eq!(machine.backend_key_data().map(|k| k.process_id), Some(42));
        assert_eq!(machine.transaction_status(), Some(b'I'));
    }

    #[test]
    fn password_required() {
        let mut machine = StateMachine::new(&Options::new());
        let mut steps = feed(&mut machine, Server::new().msg(b'R', &3i32.to_be_bytes()), &mut ());
        let err = steps.pop().unwrap().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Config(_)));
    }

    #[test]
    fn unsupported_auth() {
        let mut machine = StateMachine::new(&options());
        let server = Server::new().msg(b'R', b"\0\0\0\x0aSCRAM-SHA-256\0\0");
        let err = feed(&mut machine, server, &mut ()).pop().unwrap().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::UnsupportedAuth(10)));
    }

    #[test]
    fn startup_error_ends_connection() {
        let mut machine = StateMachine::new(&options());
        let server = Server::new().error("28P01", "password authentication failed");
        let err = feed(&mut machine, server, &mut ()).pop().unwrap().unwrap_err();
        let ErrorKind::Database(err) = err.kind() else {
            panic!("expected database error");
        };
        assert_eq!(err.code(), "28P01");
        assert_eq!(machine.state(), State::End);
    }

    #[test]
    fn busy_leaves_state() {
        let mut machine = idle();
        let frame = machine.exec("select 1").unwrap();
        assert_eq!(frame.msgtype(), Some(b'Q'));
        assert_eq!(machine.state(), State::Query);

        assert!(machine.exec("select 2").unwrap_err().is_busy());
        assert!(machine.prepare(&PreparedQuery::unnamed("select 2")).unwrap_err().is_busy());
        assert!(machine.exec_prepared(&PreparedQuery::unnamed("select 2")).unwrap_err().is_busy());
        assert_eq!(machine.state(), State::Query);
    }

    #[test]
    fn exec_prepared_frames() {
        let mut machine = idle();
        let query = PreparedQuery::new("q", "select $1::text").bind("hi");
        let frames = machine.exec_prepared(&query).unwrap();
        let types: Vec<_> = frames.iter().map(Frame::msgtype).collect();
        assert_eq!(types, [Some(b'B'), Some(b'D'), Some(b'E'), Some(b'S')]);
        assert_eq!(&frames[1].body()[..], b"Pqport\0");
        assert_eq!(machine.state(), State::EQuery);
    }

    #[test]
    fn too_many_params_stays_idle() {
        let mut machine = idle();
        let mut query = PreparedQuery::new("q", "select 1");
        for _ in 0..70_000 {
            query.push(None::<i32>);
        }
        let err = machine.exec_prepared(&query).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Protocol(ProtocolError::TooLarge { len: 70_000 })));
        assert_eq!(machine.state(), State::Idle);
    }

    #[test]
    fn simple_query() {
        let mut machine = idle();
        machine.exec("select 'Ok'::text as abc;").unwrap();

        let mut set = ResultSet::default();
        let server = Server::new()
            .row_description(&[("abc", pg_type::TEXT, 0)])
            .data_row(&[Some(b"Ok")])
            .command_complete("SELECT 1")
            .ready();
        let steps = feed(&mut machine, server, &mut set);

        assert!(matches!(steps.last(), Some(Ok(Step::Done))));
        assert_eq!(machine.state(), State::Idle);
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].get::<String, _>(0, "abc").unwrap(), "Ok");
        assert_eq!(set[0].tag(), Some("SELECT 1"));
    }

    #[test]
    fn unexpected_message_skipped() {
        let mut machine = idle();
        let steps = feed(&mut machine, Server::new().data_row(&[Some(b"1")]), &mut ());
        assert!(matches!(steps[..], [Ok(Step::Continue)]));
        assert_eq!(machine.state(), State::Idle);
    }

    #[test]
    fn decode_error_reported_after_ready() {
        let mut machine = idle();
        machine.exec("select 1::int4").unwrap();

        let mut set = ResultSet::default();
        let server = Server::new()
            .row_description(&[("int4", pg_type::INT4, 1)])
            .data_row(&[Some(b"\0\0\0\x01")])
            .command_complete("SELECT 1")
            .ready();
        let mut steps = feed(&mut machine, server, &mut set);

        let err = steps.pop().unwrap().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Decode(DecodeError::UnsupportedFormat { .. })));
        assert!(steps.iter().all(|step| matches!(step, Ok(Step::Continue))));
        assert_eq!(machine.state(), State::Idle);
    }

    #[test]
    fn prepare_error_fails_operation() {
        let mut machine = idle();
        machine.prepare(&PreparedQuery::new("q", "selec 1")).unwrap();

        let server = Server::new().error("42601", "syntax error").ready();
        let err = feed(&mut machine, server, &mut ()).pop().unwrap().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Database(_)));
        assert_eq!(machine.state(), State::Idle);
    }

    #[test]
    fn close_from_any_state() {
        let mut machine = idle();
        machine.exec("select pg_sleep(10)").unwrap();
        let frame = machine.close().unwrap();
        assert_eq!(frame.msgtype(), Some(b'X'));
        assert_eq!(machine.state(), State::Close);

        machine.closed();
        assert_eq!(machine.state(), State::End);
        assert!(matches!(machine.exec("select 1").unwrap_err().kind(), ErrorKind::Closed));
    }

    #[test]
    fn abort_poisons_busy_machine() {
        let mut machine = idle();
        machine.abort();
        assert_eq!(machine.state(), State::Idle);

        machine.exec("select 1").unwrap();
        machine.abort();
        assert_eq!(machine.state(), State::End);
    }
}
