//! Per-IP concurrent connection counter.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct Slot {
    count: u32,
    last_reset: Instant,
}

/// Caps the number of concurrent connections per remote IP.
///
/// An entry is created on first acquire and removed when its count drops to
/// zero, so the map only holds IPs with live connections. Counts older than
/// the TTL are reset, which stops a leaked slot from pinning an IP out
/// forever.
pub struct ConnCounter {
    slots: RwLock<HashMap<IpAddr, Slot>>,
    max_per_ip: u32,
    ttl: Duration,
}

impl ConnCounter {
    /// Create a counter.
    pub fn new(max_per_ip: u32, ttl: Duration) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            max_per_ip,
            ttl,
        }
    }

    /// Reserve a connection slot for an IP.
    pub fn acquire(&self, ip: IpAddr) -> bool {
        let mut slots = self.slots.write();
        let slot = slots.entry(ip).or_insert(Slot {
            count: 0,
            last_reset: Instant::now(),
        });

        if slot.last_reset.elapsed() > self.ttl {
            slot.count = 0;
            slot.last_reset = Instant::now();
        }

        if slot.count >= self.max_per_ip {
            return false;
        }

        slot.count += 1;
        true
    }

    /// Release a connection slot.
    ///
    /// Releasing an IP with no live slots is a no-op. The entry is removed
    /// when its count reaches zero.
    pub fn release(&self, ip: IpAddr) {
        let mut slots = self.slots.write();
        let emptied = match slots.get_mut(&ip) {
            Some(slot) => {
                slot.count = slot.count.saturating_sub(1);
                slot.count == 0
            }
            None => false,
        };
        if emptied {
            slots.remove(&ip);
        }
    }

    /// Live connection count for an IP.
    pub fn active(&self, ip: IpAddr) -> u32 {
        self.slots.read().get(&ip).map_or(0, |s| s.count)
    }

    /// Drop entries whose last reset is past the TTL.
    pub fn cleanup(&self) {
        let mut slots = self.slots.write();
        let before = slots.len();
        slots.retain(|_, s| s.last_reset.elapsed() <= self.ttl);
        let removed = before - slots.len();
        if removed > 0 {
            debug!(removed, "stale connection counters dropped");
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
    fn test_cap_enforced() {
        let counter = ConnCounter::new(2, Duration::from_secs(60));
        let addr = ip("10.0.0.1");

        assert!(counter.acquire(addr));
        assert!(counter.acquire(addr));
        assert!(!counter.acquire(addr));
        assert_eq!(counter.active(addr), 2);
    }

    #[test]
    fn test_release_restores_capacity() {
        let counter = ConnCounter::new(1, Duration::from_secs(60));
        let addr = ip("10.0.0.1");

        assert!(counter.acquire(addr));
        assert!(!counter.acquire(addr));

        counter.release(addr);
        assert!(counter.acquire(addr));
    }

    #[test]
    fn test_release_without_acquire_is_noop() {
        let counter = ConnCounter::new(1, Duration::from_secs(60));
        let addr = ip("10.0.0.1");

        counter.release(addr);
        assert_eq!(counter.active(addr), 0);
        assert!(counter.acquire(addr));
    }

    #[test]
    fn test_entry_removed_at_zero() {
        let counter = ConnCounter::new(2, Duration::from_secs(60));
        let addr = ip("10.0.0.1");

        counter.acquire(addr);
        counter.release(addr);
        assert!(counter.slots.read().is_empty());
    }

    #[test]
    fn test_ips_are_independent() {
        let counter = ConnCounter::new(1, Duration::from_secs(60));

        assert!(counter.acquire(ip("10.0.0.1")));
        assert!(counter.acquire(ip("10.0.0.2")));
        assert!(!counter.acquire(ip("10.0.0.1")));
    }
}
