use pqwire::{AsyncConnection, Options, Result, SharedConnection};

pub async fn main(options: &Options) -> Result<()> {
    let conn = AsyncConnection::connect_plain(options).await?;
    let shared = SharedConnection::spawn(conn);

    let mut handles = vec![];

    for i in 0..4 {
        let shared = shared.clone();
        let t = tokio::spawn(async move {
            shared.query(format!("select {i} as n, pg_backend_pid() as pid")).await
        });
        handles.push(t);
    }

    for h in handles {
        let results = h.await.unwrap()?;
        crate::print(&results);
    }

    shared.close().await
}
