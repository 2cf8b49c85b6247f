//! Load-driven difficulty controller.

use crate::admission::AdmissionPipeline;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Publishes the proof-of-work difficulty as a function of load.
///
/// Every adjust interval the live connection count is compared to the
/// server's capacity: above 80% the published difficulty is `base + 2`,
/// above 50% it is `base + 1`, otherwise `base`. The value is clamped to
/// `max_difficulty` and swapped atomically so handlers read it without
/// coordination.
pub struct DifficultyController {
    base: u8,
    max_difficulty: u8,
    max_connections: usize,
    adjust_interval: Duration,
    current: AtomicU32,
}

impl DifficultyController {
    /// Create a controller publishing `base` initially.
    pub fn new(
        base: u8,
        max_difficulty: u8,
        max_connections: usize,
        adjust_interval: Duration,
    ) -> Self {
        let base = base.min(max_difficulty);
        Self {
            base,
            max_difficulty,
            max_connections,
            adjust_interval,
            current: AtomicU32::new(base as u32),
        }
    }

    /// The currently published difficulty.
    pub fn current(&self) -> u8 {
        self.current.load(Ordering::Relaxed) as u8
    }

    /// Difficulty for a given live connection count.
    pub fn target_for(&self, live: usize) -> u8 {
        let raised = if live > self.max_connections * 8 / 10 {
            self.base.saturating_add(2)
        } else if live > self.max_connections * 5 / 10 {
            self.base.saturating_add(1)
        } else {
            self.base
        };
        raised.min(self.max_difficulty)
    }

    /// Publish the difficulty for the observed load.
    pub fn adjust(&self, live: usize) {
        let new = self.target_for(live);
        let old = self.current.swap(new as u32, Ordering::Relaxed) as u8;
        if old != new {
            info!(
                old_difficulty = old,
                new_difficulty = new,
                connections = live,
                "difficulty adjusted"
            );
        }
    }

    /// Run the adjustment loop until shutdown.
    pub async fn run(
        self: Arc<Self>,
        admission: Arc<AdmissionPipeline>,
        shutdown: CancellationToken,
    ) {
        let period = self.adjust_interval.max(Duration::from_millis(10));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The immediate first tick would re-publish the base value
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => self.adjust(admission.live_connections()),
                _ = shutdown.cancelled() => break,
            }
        }
    }
}
