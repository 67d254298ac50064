use std::sync::Arc;

use crate::{
    Result,
    options::Options,
    postgres::{Frame, Header, backend::BackendKeyData},
    protocol::{State, StateMachine, Step},
    query::PreparedQuery,
    result::{DecodeTable, ResultSet, ResultSink},
    transport::{AsyncPlainTransport, AsyncTlsTransport, AsyncTransport},
};

/// Async postgres connection.
///
/// Dropping an operation future before it completes leaves the connection
/// in its operation state, later operations return
/// [`ErrorKind::Busy`][crate::ErrorKind::Busy] until [`close`][AsyncConnection::close].
#[derive(Debug)]
pub struct AsyncConnection<T> {
    transport: T,
    machine: StateMachine,
    table: Arc<DecodeTable>,
}

impl<T: AsyncTransport> AsyncConnection<T> {
    /// Connect and authenticate in plain text.
    pub async fn connect(mut transport: T, options: &Options) -> Result<AsyncConnection<T>> {
        transport.connect().await?;
        Self::startup(transport, options).await
    }

    /// Connect, negotiate TLS, then authenticate.
    pub async fn connect_ssl(mut transport: T, options: &Options) -> Result<AsyncConnection<T>> {
        transport.connect().await?;
        transport.handshake().await?;
        Self::startup(transport, options).await
    }

    async fn startup(transport: T, options: &Options) -> Result<AsyncConnection<T>> {
        let mut conn = AsyncConnection {
            transport,
            machine: StateMachine::new(options),
            table: Arc::new(DecodeTable::new()),
        };
        let frame = conn.machine.startup(options)?;
        if let Err(err) = conn.drive(&[frame], &mut ()).await {
            let _ = conn.transport.close().await;
            return Err(err);
        }
        Ok(conn)
    }

    pub fn with_decode_table(mut self, table: Arc<DecodeTable>) -> AsyncConnection<T> {
        self.table = table;
        self
    }

    /// Run simple query, which may contain multiple statements.
    pub async fn exec<S: ResultSink + Send>(&mut self, sql: &str, sink: &mut S) -> Result<()> {
        let frame = self.machine.exec(sql)?;
        self.drive(&[frame], sink).await
    }

    pub async fn query(&mut self, sql: &str) -> Result<ResultSet> {
        let mut set = ResultSet::new(self.table.clone());
        self.exec(sql, &mut set).await?;
        Ok(set)
    }

    pub async fn exec_prepared<S: ResultSink + Send>(
        &mut self,
        query: &PreparedQuery,
        sink: &mut S,
    ) -> Result<()> {
        let frames = self.machine.exec_prepared(query)?;
        self.drive(&frames, sink).await
    }

    pub async fn query_prepared(&mut self, query: &PreparedQuery) -> Result<ResultSet> {
        let mut set = ResultSet::new(self.table.clone());
        self.exec_prepared(query, &mut set).await?;
        Ok(set)
    }

    pub async fn prepare(&mut self, query: &PreparedQuery) -> Result<()> {
        let frames = self.machine.prepare(query)?;
        self.drive(&frames, &mut ()).await
    }

    /// Send Terminate and release the transport.
    pub async fn close(&mut self) -> Result<()> {
        if self.machine.state() == State::End {
            return Ok(());
        }
        let frame = self.machine.close()?;
        let written = self.transport.write(&frame).await;
        let _ = self.transport.close().await;
        self.machine.closed();
        written?;
        Ok(())
    }

    pub fn state(&self) -> State {
        self.machine.state()
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.machine.parameter(name)
    }

    pub fn backend_key_data(&self) -> Option<BackendKeyData> {
        self.machine.backend_key_data()
    }

    pub fn transaction_status(&self) -> Option<u8> {
        self.machine.transaction_status()
    }

    pub fn decode_table(&self) -> &Arc<DecodeTable> {
        &self.table
    }

    async fn drive(&mut self, frames: &[Frame], sink: &mut (dyn ResultSink + Send)) -> Result<()> {
        let result = self.drive_inner(frames, sink).await;
        if result.is_err() {
            self.machine.abort();
        }
        result
    }

    async fn drive_inner(&mut self, frames: &[Frame], sink: &mut (dyn ResultSink + Send)) -> Result<()> {
        for frame in frames {
            self.transport.write(frame).await?;
        }

        loop {
            let header = Header::decode(self.transport.read(Header::SIZE).await?)?;
            let body = self.transport.read(header.body_size()).await?;
            match self.machine.receive(header, body, sink)? {
                Step::Continue => { },
                Step::Write(frame) => {
                    self.transport.write(&frame).await?;
                },
                Step::Done => return Ok(()),
            }
        }
    }
}

impl AsyncConnection<AsyncPlainTransport> {
    /// Plain connection to the endpoint in `options`.
    pub async fn connect_plain(options: &Options) -> Result<Self> {
        Self::connect(AsyncPlainTransport::from_options(options)?, options).await
    }
}

impl AsyncConnection<AsyncTlsTransport> {
    /// TLS connection configured by the `ssl*` keys in `options`.
    pub async fn connect_tls(options: &Options) -> Result<Self> {
        Self::connect_ssl(AsyncTlsTransport::from_options(options)?, options).await
    }
}
