//! Accept loop, background tasks and graceful shutdown.

use crate::admission::{AdmissionPipeline, ProtectionConfig};
use crate::difficulty::DifficultyController;
use crate::error::{ServerError, ServerResult};
use crate::handler::{handle_connection, HandlerContext};
use crate::quotes::QuoteSource;
use sage_pow::PowService;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address.
    pub bind_addr: String,
    /// Total deadline for a connection's exchange.
    pub read_timeout: Duration,
    /// Per-write ceiling.
    pub write_timeout: Duration,
    /// Grace period for in-flight handlers on shutdown.
    pub shutdown_timeout: Duration,
    /// Global concurrent connection cap.
    pub max_connections: usize,
    /// Base proof-of-work difficulty.
    pub initial_difficulty: u8,
    /// Ceiling the difficulty controller may not exceed.
    pub max_difficulty: u8,
    /// Challenge time-to-live.
    pub challenge_ttl: Duration,
    /// Difficulty adjustment interval.
    pub adjust_interval: Duration,
    /// Admission pipeline knobs.
    pub protection: ProtectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:4040".to_string(),
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(10),
            max_connections: 1000,
            initial_difficulty: 4,
            max_difficulty: 8,
            challenge_ttl: Duration::from_secs(300),
            adjust_interval: Duration::from_secs(10),
            protection: ProtectionConfig::default(),
        }
    }
}

/// The PoW-gated quote server.
///
/// [`bind`](Self::bind) claims the listen address eagerly so callers can
/// read the bound port before the accept loop starts; [`run`](Self::run)
/// then drives the server until its shutdown token is cancelled.
pub struct GateServer {
    config: ServerConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    pow: Arc<PowService>,
    quotes: Arc<dyn QuoteSource>,
    admission: Arc<AdmissionPipeline>,
    difficulty: Arc<DifficultyController>,
    shutdown: CancellationToken,
}

impl GateServer {
    /// Bind the listener and assemble the server.
    pub async fn bind(config: ServerConfig, quotes: Arc<dyn QuoteSource>) -> ServerResult<Self> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let pow = Arc::new(PowService::new(config.challenge_ttl));
        let admission = Arc::new(AdmissionPipeline::new(
            config.protection.clone(),
            config.max_connections,
        ));
        let difficulty = Arc::new(DifficultyController::new(
            config.initial_difficulty,
            config.max_difficulty,
            config.max_connections,
            config.adjust_interval,
        ));

        Ok(Self {
            config,
            listener,
            local_addr,
            pow,
            quotes,
            admission,
            difficulty,
            shutdown: CancellationToken::new(),
        })
    }

    /// The bound listen address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A token that stops the server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The admission pipeline (live counters, failure registry).
    pub fn admission(&self) -> Arc<AdmissionPipeline> {
        Arc::clone(&self.admission)
    }

    /// The published proof-of-work difficulty.
    pub fn current_difficulty(&self) -> u8 {
        self.difficulty.current()
    }

    /// Run until the shutdown token is cancelled, then drain handlers.
    ///
    /// Returns [`ServerError::ShutdownTimeout`] if in-flight handlers do not
    /// finish within the configured grace period.
    pub async fn run(self) -> ServerResult<()> {
        let GateServer {
            config,
            listener,
            local_addr,
            pow,
            quotes,
            admission,
            difficulty,
            shutdown,
        } = self;

        info!(addr = %local_addr, "server listening");

        // Background tasks stop on the same token as the accept loop
        tokio::spawn(admission.memory().run(shutdown.clone()));
        tokio::spawn(admission.flood().run(shutdown.clone()));
        tokio::spawn(Arc::clone(&admission).run_cleanup(shutdown.clone()));
        tokio::spawn(Arc::clone(&pow).sweep_expired(shutdown.clone()));
        tokio::spawn(Arc::clone(&difficulty).run(Arc::clone(&admission), shutdown.clone()));

        let ctx = Arc::new(HandlerContext {
            pow,
            quotes,
            exchange_timeout: config.read_timeout,
            read_timeout: config.protection.read_timeout,
            write_timeout: config.write_timeout,
        });

        let tracker = TaskTracker::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        accept_connection(stream, addr, &admission, &difficulty, &tracker, &ctx);
                    }
                    Err(e) => {
                        error!(error = %e, "accept error");
                    }
                },
            }
        }

        // Stop accepting before draining; new dials now fail to connect
        drop(listener);
        tracker.close();
        info!(in_flight = tracker.len(), "listener closed, draining handlers");

        match tokio::time::timeout(config.shutdown_timeout, tracker.wait()).await {
            Ok(()) => {
                info!("shutdown complete");
                Ok(())
            }
            Err(_) => Err(ServerError::ShutdownTimeout),
        }
    }
}

/// Admit one accepted connection and spawn its handler.
fn accept_connection(
    stream: TcpStream,
    addr: SocketAddr,
    admission: &Arc<AdmissionPipeline>,
    difficulty: &Arc<DifficultyController>,
    tracker: &TaskTracker,
    ctx: &Arc<HandlerContext>,
) {
    let ip = addr.ip();

    // Dropping the stream on rejection closes it without framing anything,
    // so the peer learns nothing about which check tripped
    let guarded = match admission.admit(stream, ip) {
        Ok(guarded) => guarded,
        Err(rejection) => {
            info!(addr = %addr, reason = %rejection, "connection rejected");
            return;
        }
    };

    let difficulty = difficulty.current();
    let admission = Arc::clone(admission);
    let ctx = Arc::clone(ctx);

    tracker.spawn(async move {
        let result = handle_connection(guarded, addr, difficulty, &ctx).await;
        admission.release(ip);

        if let Err(e) = result {
            warn!(addr = %addr, error = %e, "connection error");
            if e.counts_as_failure() {
                admission.register_failure(ip);
            }
        }
    });
}
