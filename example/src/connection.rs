use pqwire::{AsyncConnection, Options, PreparedQuery, Result, transport::AsyncTransport};

pub async fn main(options: &Options) -> Result<()> {
    if options.get(Options::SSLMODE).is_some() {
        println!("ssl mode: {:?}", options.ssl_mode());
        let mut conn = AsyncConnection::connect_tls(options).await?;
        run(&mut conn).await?;
        return conn.close().await;
    }

    let mut conn = AsyncConnection::connect_plain(options).await?;
    run(&mut conn).await?;
    conn.close().await
}

async fn run<T: AsyncTransport>(conn: &mut AsyncConnection<T>) -> Result<()> {
    println!("server version: {:?}", conn.parameter("server_version"));

    let results = conn.query("select 'Ok'::text as abc; select 1 + 1 as two").await?;
    crate::print(&results);

    let query = PreparedQuery::generated("select $1::text as greeting, $2::int4 as n")
        .bind("hi")
        .bind(420);
    conn.prepare(&query).await?;
    let results = conn.query_prepared(&query).await?;
    crate::print(&results);

    // server error is a result entry, not a failed call
    let results = conn.query("select * from missing_table").await?;
    assert!(!results.is_success());
    crate::print(&results);

    Ok(())
}
