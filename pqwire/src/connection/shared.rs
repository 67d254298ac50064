use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    oneshot,
};

use super::AsyncConnection;
use crate::{
    ErrorKind, Result,
    common::verbose,
    query::PreparedQuery,
    result::ResultSet,
    transport::AsyncTransport,
};

type Reply<T> = oneshot::Sender<Result<T>>;

enum Request {
    Query { sql: String, reply: Reply<ResultSet> },
    QueryPrepared { query: PreparedQuery, reply: Reply<ResultSet> },
    Prepare { query: PreparedQuery, reply: Reply<()> },
    Close { reply: Reply<()> },
}

/// Cloneable handle to a connection owned by a spawned task.
///
/// Requests from every clone are queued and run one at a time. The task
/// closes the connection when [`close`][SharedConnection::close] is called
/// or all handles are dropped.
#[derive(Clone)]
pub struct SharedConnection {
    send: UnboundedSender<Request>,
}

impl SharedConnection {
    /// Spawn the task owning `conn`.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn spawn<T: AsyncTransport + 'static>(conn: AsyncConnection<T>) -> SharedConnection {
        let (send, recv) = mpsc::unbounded_channel();
        tokio::spawn(run(conn, recv));
        SharedConnection { send }
    }

    pub async fn query(&self, sql: impl Into<String>) -> Result<ResultSet> {
        let sql = sql.into();
        self.request(|reply| Request::Query { sql, reply }).await
    }

    pub async fn query_prepared(&self, query: PreparedQuery) -> Result<ResultSet> {
        self.request(|reply| Request::QueryPrepared { query, reply }).await
    }

    pub async fn prepare(&self, query: PreparedQuery) -> Result<()> {
        self.request(|reply| Request::Prepare { query, reply }).await
    }

    /// Close the connection, pending requests from other handles still run.
    pub async fn close(&self) -> Result<()> {
        self.request(|reply| Request::Close { reply }).await
    }

    /// Returns `true` if the owning task has stopped.
    pub fn is_closed(&self) -> bool {
        self.send.is_closed()
    }

    async fn request<T>(&self, f: impl FnOnce(Reply<T>) -> Request) -> Result<T> {
        let (reply, recv) = oneshot::channel();
        if self.send.send(f(reply)).is_err() {
            return Err(ErrorKind::Closed.into());
        }
        match recv.await {
            Ok(result) => result,
            Err(_) => Err(ErrorKind::Closed.into()),
        }
    }
}

impl std::fmt::Debug for SharedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedConnection")
    }
}

async fn run<T: AsyncTransport>(mut conn: AsyncConnection<T>, mut recv: UnboundedReceiver<Request>) {
    while let Some(request) = recv.recv().await {
        match request {
            Request::Query { sql, reply } => {
                let _ = reply.send(conn.query(&sql).await);
            },
            Request::QueryPrepared { query, reply } => {
                let _ = reply.send(conn.query_prepared(&query).await);
            },
            Request::Prepare { query, reply } => {
                let _ = reply.send(conn.prepare(&query).await);
            },
            Request::Close { reply } => {
                let _ = reply.send(conn.close().await);
                return;
            },
        }
    }

    verbose!("all handles dropped, closing connection");
    let _ = conn.close().await;
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        connection::nonblocking::test::{MockTransport, bytes, options, query, startup},
        postgres::{Frame, frontend::Terminate, pg_type},
        test_support::Server,
    };

    fn select(value: &str) -> Vec<u8> {
        Server::new()
            .row_description(&[("v", pg_type::INT4, 0)])
            .data_row(&[Some(value.as_bytes())])
            .command_complete("SELECT 1")
            .ready()
            .bytes()
            .to_vec()
    }

    #[tokio::test]
    async fn requests_run_in_order() {
        let mock = startup()
            .write(&query("select 1 v"))
            .read(&select("1"))
            .write(&query("select 2 v"))
            .read(&select("2"))
            .write(&bytes(Frame::new(&Terminate).unwrap()))
            .build();
        let conn = AsyncConnection::connect(MockTransport(mock), &options()).await.unwrap();

        let shared = SharedConnection::spawn(conn);
        let other = shared.clone();

        let (one, two) = tokio::join!(shared.query("select 1 v"), other.query("select 2 v"));
        assert_eq!(one.unwrap()[0].get::<i32, _>(0, "v").unwrap(), 1);
        assert_eq!(two.unwrap()[0].get::<i32, _>(0, "v").unwrap(), 2);

        shared.close().await.unwrap();
        let err = other.query("select 3").await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Closed));
    }
}
