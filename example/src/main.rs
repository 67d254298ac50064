use tracing::{Instrument, trace_span};
use tracing_subscriber::{
    EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

use pqwire::{Options, ResultSet, Result};

mod blocking;
mod connection;
mod shared;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::Registry::default()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let options = match std::env::var("DATABASE_URL") {
        Ok(url) => Options::parse(&url)?.with_env(),
        Err(_) => Options::from_env(),
    };

    connection::main(&options).instrument(trace_span!("connection")).await?;
    shared::main(&options).instrument(trace_span!("shared")).await?;

    let blocking = options.clone();
    tokio::task::spawn_blocking(move || blocking::main(&blocking)).await.unwrap()?;

    Ok(())
}

/// Print every statement result as a table.
pub fn print(results: &ResultSet) {
    for set in results {
        if let Some(err) = set.error() {
            println!("error: {err}");
            continue;
        }

        let names = set.fields().iter().map(|f| f.name.as_str()).collect::<Vec<_>>();
        if !names.is_empty() {
            println!("{}", names.join(" | "));
        }
        for row in set.rows() {
            let values = row.values().iter().map(ToString::to_string).collect::<Vec<_>>();
            println!("{}", values.join(" | "));
        }
        if let Some(tag) = set.tag() {
            println!("({tag})");
        }
    }
}
