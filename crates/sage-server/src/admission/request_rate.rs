//! Per-IP request-rate limiter.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct RateEntry {
    tokens: u32,
    last_reset: Instant,
    blocked: bool,
    attempts: u32,
}

/// Burst-based request limiter, distinct from the flood bucket.
///
/// Each IP gets `burst` tokens, refilled to the full burst once per minute.
/// An IP that keeps requesting with no tokens left accrues an attempt
/// counter; past `2 * burst` attempts the entry is marked blocked and stays
/// that way until the periodic cleanup evicts it after the TTL.
pub struct RequestRate {
    entries: RwLock<HashMap<IpAddr, RateEntry>>,
    burst: u32,
    ttl: Duration,
}

/// Refill window for the burst allowance.
const REFILL_WINDOW: Duration = Duration::from_secs(60);

impl RequestRate {
    /// Create a limiter.
    pub fn new(burst: u32, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            burst,
            ttl,
        }
    }

    /// Consume a token for an IP.
    pub fn allow(&self, ip: IpAddr) -> bool {
        let mut entries = self.entries.write();
        let entry = entries.entry(ip).or_insert(RateEntry {
            tokens: self.burst,
            last_reset: Instant::now(),
            blocked: false,
            attempts: 0,
        });

        // A blocked entry never earns tokens again; it only goes away when
        // the cleanup evicts it
        if entry.blocked {
            return false;
        }

        if entry.last_reset.elapsed() > REFILL_WINDOW {
            entry.tokens = self.burst;
            entry.last_reset = Instant::now();
        }

        if entry.tokens > 0 {
            entry.tokens -= 1;
            return true;
        }

        entry.attempts += 1;
        if entry.attempts > self.burst * 2 {
            entry.blocked = true;
            info!(ip = %ip, attempts = entry.attempts, "ip blocked by request-rate limiter");
        }

        false
    }

    /// Whether an IP is currently marked blocked.
    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        self.entries.read().get(&ip).map_or(false, |e| e.blocked)
    }

    /// Drop entries whose last refill is past the TTL.
    pub fn cleanup(&self) {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.last_reset.elapsed() <= self.ttl);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "stale request-rate entries dropped");
        }
    }

    #[cfg(test)]
    fn backdate(&self, ip: IpAddr, by: Duration) {
        let mut entries = self.entries.write();
        if let Some(e) = entries.get_mut(&ip) {
            e.last_reset -= by;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_burst_consumed_then_rejected() {
        let rate = RequestRate::new(3, Duration::from_secs(3600));
        let addr = ip("10.0.0.1");

        for _ in 0..3 {
            assert!(rate.allow(addr));
        }
        assert!(!rate.allow(addr));
    }

    #[test]
    fn test_refill_after_window() {
        let rate = RequestRate::new(2, Duration::from_secs(3600));
        let addr = ip("10.0.0.1");

        assert!(rate.allow(addr));
        assert!(rate.allow(addr));
        assert!(!rate.allow(addr));

        rate.backdate(addr, Duration::from_secs(61));
        assert!(rate.allow(addr));
    }

    #[test]
    fn test_persistent_offender_blocked() {
        let rate = RequestRate::new(2, Duration::from_secs(3600));
        let addr = ip("10.0.0.1");

        // Exhaust the burst, then keep hammering past 2 * burst attempts
        while rate.allow(addr) {}
        for _ in 0..5 {
            assert!(!rate.allow(addr));
        }
        assert!(rate.is_blocked(addr));

        // Blocked entries do not refill
        rate.backdate(addr, Duration::from_secs(120));
        assert!(!rate.allow(addr));
    }

    #[test]
    fn test_cleanup_unblocks() {
        let rate = RequestRate::new(1, Duration::from_secs(300));
        let addr = ip("10.0.0.1");

        while rate.allow(addr) {}
        for _ in 0..3 {
            rate.allow(addr);
        }
        assert!(rate.is_blocked(addr));

        rate.backdate(addr, Duration::from_secs(301));
        rate.cleanup();
        assert!(!rate.is_blocked(addr));
        assert!(rate.allow(addr));
    }
}
