//! partline CLI entrypoint

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use partline::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // PARTLINE_LOG takes precedence over RUST_LOG; plans go to stdout, logs to stderr
    let filter = EnvFilter::try_from_env("PARTLINE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn,partline=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    Cli::parse().execute().await
}
