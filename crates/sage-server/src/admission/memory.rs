//! Memory pressure monitor.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Samples system memory in the background and caches an overload flag.
///
/// Overload is `used / total × 100 > threshold_percent`. The admission path
/// only reads the cached flag; sampling never happens per connection.
pub struct MemoryMonitor {
    threshold_percent: u64,
    check_interval: Duration,
    overloaded: AtomicBool,
    system: Mutex<System>,
}

impl MemoryMonitor {
    /// Create a monitor.
    pub fn new(threshold_percent: u64, check_interval: Duration) -> Self {
        Self {
            threshold_percent,
            check_interval,
            overloaded: AtomicBool::new(false),
            system: Mutex::new(System::new()),
        }
    }

    /// Last sampled overload state.
    pub fn is_overloaded(&self) -> bool {
        self.overloaded.load(Ordering::Relaxed)
    }

    /// Take one sample and update the cached flag.
    pub fn sample(&self) {
        let (used, total) = {
            let mut system = self.system.lock();
            system.refresh_memory();
            (system.used_memory(), system.total_memory())
        };

        if total == 0 {
            return;
        }

        let percent = used * 100 / total;
        let over = percent > self.threshold_percent;
        let was = self.overloaded.swap(over, Ordering::Relaxed);

        if over && !was {
            warn!(
                used_percent = percent,
                threshold = self.threshold_percent,
                "memory pressure: admissions will be rejected"
            );
        } else if !over && was {
            debug!(used_percent = percent, "memory pressure cleared");
        }
    }

    /// Run the sampling loop until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let period = self.check_interval.max(Duration::from_millis(100));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => self.sample(),
                _ = shutdown.cancelled() => break,
            }
        }
    }

    /// Override the cached flag (for tests).
    #[doc(hidden)]
    pub fn set_overloaded(&self, overloaded: bool) {
        self.overloaded.store(overloaded, Ordering::Relaxed);
    }
}
