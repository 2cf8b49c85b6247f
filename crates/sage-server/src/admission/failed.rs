//! Reactive blocking of IPs after repeated failed exchanges.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct AttemptRecord {
    count: u32,
    last_fail: Instant,
    blocked_at: Option<Instant>,
}

/// Tracks failed exchanges per IP and blocks repeat offenders.
///
/// Once an IP accumulates `max_attempts` failures it is blocked for
/// `block_time` from the moment the threshold was crossed. Entries whose
/// last failure is older than `block_time` are dropped lazily on query and
/// by the periodic cleanup.
pub struct FailedAttempts {
    records: RwLock<HashMap<IpAddr, AttemptRecord>>,
    max_attempts: u32,
    block_time: Duration,
}

impl FailedAttempts {
    /// Create a tracker.
    pub fn new(max_attempts: u32, block_time: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            max_attempts,
            block_time,
        }
    }

    /// Record a failed exchange from an IP.
    pub fn register_failure(&self, ip: IpAddr) {
        let mut records = self.records.write();
        let record = records.entry(ip).or_insert(AttemptRecord {
            count: 0,
            last_fail: Instant::now(),
            blocked_at: None,
        });

        record.count += 1;
        record.last_fail = Instant::now();

        if record.count >= self.max_attempts && record.blocked_at.is_none() {
            record.blocked_at = Some(Instant::now());
            info!(ip = %ip, failures = record.count, "ip blocked after repeated failures");
        }
    }

    /// Check whether an IP is currently blocked.
    ///
    /// Stale entries are removed on the way out.
    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        let mut records = self.records.write();
        let record = match records.get(&ip) {
            Some(r) => r.clone(),
            None => return false,
        };

        if record.count >= self.max_attempts {
            if let Some(blocked_at) = record.blocked_at {
                if blocked_at.elapsed() < self.block_time {
                    return true;
                }
            }
        }

        // Block window passed or the last failure is old: forget the entry
        if record.last_fail.elapsed() > self.block_time {
            records.remove(&ip);
        }

        false
    }

    /// Clear the record for an IP.
    pub fn reset(&self, ip: IpAddr) {
        self.records.write().remove(&ip);
    }

    /// Current failure count for an IP.
    pub fn failure_count(&self, ip: IpAddr) -> u32 {
        self.records.read().get(&ip).map_or(0, |r| r.count)
    }

    /// Drop entries whose block window or failure history has expired.
    pub fn cleanup(&self) {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, r| {
            let block_expired = r
                .blocked_at
                .is_some_and(|at| at.elapsed() > self.block_time);
            let stale = r.last_fail.elapsed() > self.block_time;
            !(block_expired || stale)
        });
        let removed = before - records.len();
        if removed > 0 {
            debug!(removed, "stale failed-attempt records dropped");
        }
    }

    #[cfg(test)]
    fn backdate(&self, ip: IpAddr, by: Duration) {
        let mut records = self.records.write();
        if let Some(r) = records.get_mut(&ip) {
            r.last_fail -= by;
            if let Some(at) = r.blocked_at.as_mut() {
                *at -= by;
            }
        }
    }
}
