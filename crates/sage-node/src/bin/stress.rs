//! Load simulation against a sage server.
//!
//! Spawns a fleet of clients that fetch quotes in a loop for a fixed
//! duration and reports how the admission pipeline held up.

use anyhow::Result;
use clap::Parser;
use sage_client::{Client, ClientConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

/// Hammer a sage server with concurrent clients.
#[derive(Parser, Debug)]
#[command(name = "sage-stress")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "localhost:4040")]
    server: String,

    /// Number of concurrent clients
    #[arg(short, long, default_value = "100")]
    clients: usize,

    /// Test duration in seconds
    #[arg(short, long, default_value = "30")]
    duration_secs: u64,

    /// Delay between requests per client in milliseconds
    #[arg(long, default_value = "100")]
    pace_ms: u64,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[derive(Default)]
struct Stats {
    success: AtomicU64,
    failed: AtomicU64,
    total_latency_ms: AtomicU64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let duration = Duration::from_secs(args.duration_secs);
    let stats = Arc::new(Stats::default());
    let stop = CancellationToken::new();

    println!(
        "running {} clients against {} for {:?}",
        args.clients, args.server, duration
    );

    let mut workers = Vec::with_capacity(args.clients);
    for id in 0..args.clients {
        let config = ClientConfig {
            server_addr: args.server.clone(),
            ..Default::default()
        };
        let stats = Arc::clone(&stats);
        let stop = stop.clone();
        let pace = Duration::from_millis(args.pace_ms);

        workers.push(tokio::spawn(async move {
            while !stop.is_cancelled() {
                let started = Instant::now();
                match fetch_once(config.clone(), &stop).await {
                    Ok(()) => {
                        stats.success.fetch_add(1, Ordering::Relaxed);
                        stats
                            .total_latency_ms
                            .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);
                    }
                    Err(e) => {
                        stats.failed.fetch_add(1, Ordering::Relaxed);
                        debug!(client = id, error = %e, "request failed");
                    }
                }
                tokio::time::sleep(pace).await;
            }
        }));
    }

    // Periodic progress report until the deadline
    let deadline = Instant::now() + duration;
    let mut report = tokio::time::interval(Duration::from_secs(1));
    report.tick().await;
    while Instant::now() < deadline {
        report.tick().await;
        println!(
            "ok={} failed={}",
            stats.success.load(Ordering::Relaxed),
            stats.failed.load(Ordering::Relaxed)
        );
    }

    stop.cancel();
    for worker in workers {
        let _ = worker.await;
    }

    let success = stats.success.load(Ordering::Relaxed);
    let failed = stats.failed.load(Ordering::Relaxed);
    let avg_latency = if success > 0 {
        stats.total_latency_ms.load(Ordering::Relaxed) / success
    } else {
        0
    };

    println!("--- results ---");
    println!("successful requests: {success}");
    println!("failed/rejected:     {failed}");
    println!("avg latency:         {avg_latency} ms");
    println!(
        "throughput:          {:.1} req/s",
        success as f64 / duration.as_secs_f64()
    );

    Ok(())
}

async fn fetch_once(config: ClientConfig, stop: &CancellationToken) -> Result<()> {
    let mut client = Client::connect(config).await?;
    client.get_quote(stop).await?;
    client.close().await?;
    Ok(())
}
