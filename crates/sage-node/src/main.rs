//! sage quote service daemon.

use anyhow::Result;
use clap::Parser;
use sage_server::{GateServer, QuoteBook};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod config;

use config::NodeConfig;

/// PoW-gated quote service.
#[derive(Parser, Debug)]
#[command(name = "sage-node")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "sage.toml")]
    config: PathBuf,

    /// Listen address (overrides the config file)
    #[arg(short, long)]
    bind: Option<String>,

    /// Global connection cap (overrides the config file)
    #[arg(long)]
    max_connections: Option<usize>,

    /// Base PoW difficulty (overrides the config file)
    #[arg(long)]
    difficulty: Option<u8>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("starting sage-node v{}", env!("CARGO_PKG_VERSION"));

    let config = NodeConfig::load(&args.config, &args)?;
    let server_config = config.server_config()?;

    info!(
        bind = %server_config.bind_addr,
        max_connections = server_config.max_connections,
        difficulty = server_config.initial_difficulty,
        "configuration loaded"
    );

    let server = GateServer::bind(server_config, Arc::new(QuoteBook::new())).await?;
    let shutdown = server.shutdown_token();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received");
        shutdown.cancel();
    });

    server.run().await?;
    info!("sage-node stopped");

    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
