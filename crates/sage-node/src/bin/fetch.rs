//! One-shot quote fetch CLI.

use anyhow::{Context, Result};
use clap::Parser;
use sage_client::{retry_with_backoff, Client, ClientConfig, ExponentialBackoff};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Fetch one quote from a sage server.
#[derive(Parser, Debug)]
#[command(name = "sage-fetch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "localhost:4040")]
    server: String,

    /// Connection and I/O timeout in seconds
    #[arg(long, default_value = "5")]
    timeout_secs: u64,

    /// Attempts before giving up
    #[arg(long, default_value = "3")]
    attempts: u32,

    /// Delay before the first retry in milliseconds
    #[arg(long, default_value = "1000")]
    retry_delay_ms: u64,

    /// Ceiling for any retry delay in milliseconds
    #[arg(long, default_value = "30000")]
    max_retry_delay_ms: u64,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ClientConfig {
        server_addr: args.server.clone(),
        connect_timeout: Duration::from_secs(args.timeout_secs),
        read_timeout: Duration::from_secs(args.timeout_secs),
        write_timeout: Duration::from_secs(args.timeout_secs),
    };

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("interrupted, cancelling");
        signal_cancel.cancel();
    });

    let backoff = ExponentialBackoff::new(
        Duration::from_millis(args.retry_delay_ms),
        Duration::from_millis(args.max_retry_delay_ms),
    );

    let fetching = retry_with_backoff(args.attempts, &backoff, || {
        let config = config.clone();
        let cancel = cancel.clone();
        async move {
            let mut client = Client::connect(config).await?;
            let quote = client.get_quote(&cancel).await?;
            client.close().await?;
            Ok::<_, sage_client::ClientError>(quote)
        }
    });

    let quote = tokio::select! {
        result = fetching => result.context("failed to fetch a quote")?,
        _ = cancel.cancelled() => anyhow::bail!("interrupted"),
    };

    println!("{}", quote.text);
    println!("  -- {}", quote.author);

    Ok(())
}
