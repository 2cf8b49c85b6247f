//! Multi-layer admission pipeline.
//!
//! Every accepted connection runs the same ordered checks, cheapest first,
//! so a flood cannot force the expensive ones:
//!
//! 1. IP allow/deny list
//! 2. Failed-attempt block
//! 3. Memory overload
//! 4. Per-IP flood token bucket
//! 5. Slow-read guard wrapping
//! 6. Per-IP concurrent-connection cap
//! 7. Per-IP request-rate bucket
//! 8. Global concurrent-connection cap
//!
//! Rejected connections are closed without a frame; the reason is logged
//! and never sent to the peer.

mod conn_count;
mod failed;
mod flood;
mod ip_filter;
mod memory;
mod request_rate;
mod slow_read;

pub use conn_count::ConnCounter;
pub use failed::FailedAttempts;
pub use flood::FloodBucket;
pub use ip_filter::IpFilter;
pub use memory::MemoryMonitor;
pub use request_rate::RequestRate;
pub use slow_read::SlowReadGuard;

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Why a connection was refused.
///
/// The display strings are log labels only; no rejection is ever framed
/// back to the peer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    #[error("ip-blocked")]
    IpBlocked,
    #[error("too-many-failures")]
    TooManyFailures,
    #[error("server-overloaded")]
    ServerOverloaded,
    #[error("too-many-requests")]
    TooManyRequests,
    #[error("conn-limit")]
    ConnLimit,
    #[error("rate-limit")]
    RateLimit,
    #[error("server-full")]
    ServerFull,
}

/// Protection knobs for the admission pipeline.
#[derive(Debug, Clone)]
pub struct ProtectionConfig {
    /// Minimum sustained read rate in bytes per second.
    pub min_read_rate: u64,
    /// Per-read deadline applied by the handler.
    pub read_timeout: Duration,
    /// If non-empty, only these IPs are admitted.
    pub ip_allowlist: Vec<IpAddr>,
    /// Rejected IPs (ignored while the allow-list is non-empty).
    pub ip_denylist: Vec<IpAddr>,
    /// Failures before an IP is blocked.
    pub max_failed_attempts: u32,
    /// How long a failed-attempt block lasts.
    pub failed_block_time: Duration,
    /// Memory usage percentage above which admissions are rejected.
    pub memory_threshold_percent: u64,
    /// Memory sampling interval.
    pub memory_check_interval: Duration,
    /// Flood bucket capacity per IP.
    pub flood_bucket_size: i64,
    /// Flood bucket refill rate in tokens per second.
    pub flood_fill_rate: f64,
    /// Request-rate burst per IP.
    pub request_burst: u32,
    /// Request-rate entry lifetime.
    pub request_ttl: Duration,
    /// Concurrent connections allowed per IP.
    pub max_conns_per_ip: u32,
    /// Connection counter reset window.
    pub conn_ttl: Duration,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            min_read_rate: 100,
            read_timeout: Duration::from_secs(10),
            ip_allowlist: Vec::new(),
            ip_denylist: Vec::new(),
            max_failed_attempts: 5,
            failed_block_time: Duration::from_secs(15 * 60),
            memory_threshold_percent: 80,
            memory_check_interval: Duration::from_secs(60),
            flood_bucket_size: 100,
            flood_fill_rate: 10.0,
            request_burst: 10,
            request_ttl: Duration::from_secs(3600),
            max_conns_per_ip: 10,
            conn_ttl: Duration::from_secs(60),
        }
    }
}

/// The admission pipeline and the per-IP state behind it.
pub struct AdmissionPipeline {
    config: ProtectionConfig,
    max_connections: usize,
    ip_filter: IpFilter,
    failed: FailedAttempts,
    memory: Arc<MemoryMonitor>,
    flood: Arc<FloodBucket>,
    conns: ConnCounter,
    request_rate: RequestRate,
    live: AtomicUsize,
}

impl AdmissionPipeline {
    /// Build the pipeline from its configuration.
    pub fn new(config: ProtectionConfig, max_connections: usize) -> Self {
        Self {
            ip_filter: IpFilter::new(&config.ip_allowlist, &config.ip_denylist),
            failed: FailedAttempts::new(config.max_failed_attempts, config.failed_block_time),
            memory: Arc::new(MemoryMonitor::new(
                config.memory_threshold_percent,
                config.memory_check_interval,
            )),
            flood: Arc::new(FloodBucket::new(
                config.flood_bucket_size,
                config.flood_fill_rate,
            )),
            conns: ConnCounter::new(config.max_conns_per_ip, config.conn_ttl),
            request_rate: RequestRate::new(config.request_burst, config.request_ttl),
            live: AtomicUsize::new(0),
            max_connections,
            config,
        }
    }

    /// Run every admission check against a new connection.
    ///
    /// On success the stream comes back wrapped in the slow-read guard and
    /// the caller owns one global and one per-IP slot, which it must return
    /// through [`release`](Self::release) when the connection ends. On
    /// rejection the stream is dropped, which closes it without framing
    /// anything.
    pub fn admit<S>(&self, stream: S, ip: IpAddr) -> Result<SlowReadGuard<S>, Rejection> {
        if !self.ip_filter.is_allowed(ip) {
            return Err(Rejection::IpBlocked);
        }
        if self.failed.is_blocked(ip) {
            return Err(Rejection::TooManyFailures);
        }
        if self.memory.is_overloaded() {
            return Err(Rejection::ServerOverloaded);
        }
        if !self.flood.take(ip) {
            return Err(Rejection::TooManyRequests);
        }

        let guarded = SlowReadGuard::new(stream, self.config.min_read_rate);

        if !self.conns.acquire(ip) {
            return Err(Rejection::ConnLimit);
        }
        if !self.request_rate.allow(ip) {
            self.conns.release(ip);
            return Err(Rejection::RateLimit);
        }
        if self.live.load(Ordering::SeqCst) >= self.max_connections {
            self.conns.release(ip);
            return Err(Rejection::ServerFull);
        }

        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(guarded)
    }

    /// Return the slots held by an admitted connection.
    pub fn release(&self, ip: IpAddr) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.conns.release(ip);
    }

    /// Record a failed exchange against an IP.
    pub fn register_failure(&self, ip: IpAddr) {
        self.failed.register_failure(ip);
    }

    /// Live admitted connections.
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Current failure count for an IP.
    pub fn failure_count(&self, ip: IpAddr) -> u32 {
        self.failed.failure_count(ip)
    }

    /// The memory monitor, for spawning its sampling task.
    pub fn memory(&self) -> Arc<MemoryMonitor> {
        Arc::clone(&self.memory)
    }

    /// The flood bucket, for spawning its refill task.
    pub fn flood(&self) -> Arc<FloodBucket> {
        Arc::clone(&self.flood)
    }

    /// Run the periodic eviction of stale per-IP state until shutdown.
    ///
    /// Each map is swept at its own TTL, capped at five minutes.
    pub async fn run_cleanup(self: Arc<Self>, shutdown: CancellationToken) {
        let cap = Duration::from_secs(300);
        let floor = Duration::from_millis(100);

        let mut failed_tick =
            tokio::time::interval(self.config.failed_block_time.min(cap).max(floor));
        let mut conns_tick = tokio::time::interval(self.config.conn_ttl.min(cap).max(floor));
        let mut rate_tick = tokio::time::interval(self.config.request_ttl.min(cap).max(floor));
        failed_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        conns_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        rate_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = failed_tick.tick() => self.failed.cleanup(),
                _ = conns_tick.tick() => self.conns.cleanup(),
                _ = rate_tick.tick() => self.request_rate.cleanup(),
                _ = shutdown.cancelled() => break,
            }
        }
    }
}
