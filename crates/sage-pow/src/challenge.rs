//! Challenge issuance, storage and verification.

use crate::{hash_hex, meets_difficulty, Clock, SystemClock, DEFAULT_CHALLENGE_TTL_SECS};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use sage_protocol::{ChallengePayload, SolutionPayload};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Proof-of-work errors.
#[derive(Error, Debug)]
pub enum PowError {
    /// A challenge cannot be issued with zero difficulty.
    #[error("difficulty must be greater than 0")]
    ZeroDifficulty,
}

/// Result type for proof-of-work operations.
pub type PowResult<T> = Result<T, PowError>;

/// A stored challenge record.
#[derive(Debug, Clone, PartialEq)]
pub struct Challenge {
    /// Random hex prefix hashed together with the solution.
    pub prefix: String,
    /// Required number of leading '0' hex characters.
    pub difficulty: u8,
    /// Random hex identifier for the record.
    pub nonce: String,
    /// Expiry timestamp.
    pub expires_at: DateTime<Utc>,
}

impl From<&Challenge> for ChallengePayload {
    fn from(c: &Challenge) -> Self {
        ChallengePayload {
            prefix: c.prefix.clone(),
            difficulty: c.difficulty,
            nonce: c.nonce.clone(),
            expires_at: c.expires_at,
        }
    }
}

/// Issues and verifies proof-of-work challenges.
///
/// Records live in a concurrent map keyed by nonce. Expired records are
/// removed by a periodic sweeper and checked lazily on verification, so a
/// record past its `expires_at` can never verify. A record is removed on
/// successful verification: solutions are single-use and cannot be replayed
/// within the TTL.
pub struct PowService {
    /// Challenge time-to-live.
    ttl: Duration,
    /// Time source.
    clock: Arc<dyn Clock>,
    /// Randomness for prefix/nonce generation.
    rng: Mutex<Box<dyn RngCore + Send>>,
    /// Live challenge records, keyed by nonce.
    challenges: DashMap<String, Challenge>,
}

impl PowService {
    /// Create a service with the system clock and OS randomness.
    ///
    /// A zero TTL falls back to the default.
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    /// Create a service with an injected clock.
    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let ttl = if ttl.is_zero() {
            Duration::from_secs(DEFAULT_CHALLENGE_TTL_SECS)
        } else {
            ttl
        };
        Self {
            ttl,
            clock,
            rng: Mutex::new(Box::new(OsRng)),
            challenges: DashMap::new(),
        }
    }

    /// Replace the randomness source (for tests).
    pub fn with_rng(mut self, rng: Box<dyn RngCore + Send>) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    /// Issue a new challenge at the given difficulty.
    pub fn create_challenge(&self, difficulty: u8) -> PowResult<Challenge> {
        if difficulty == 0 {
            return Err(PowError::ZeroDifficulty);
        }

        let prefix = self.random_token();
        let nonce = self.random_token();
        let ttl = chrono::Duration::from_std(self.ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_CHALLENGE_TTL_SECS as i64));

        let challenge = Challenge {
            prefix,
            difficulty,
            nonce: nonce.clone(),
            expires_at: self.clock.now() + ttl,
        };

        self.challenges.insert(nonce, challenge.clone());
        trace!(
            nonce = %challenge.nonce,
            difficulty,
            "challenge issued"
        );

        Ok(challenge)
    }

    /// Verify a solution against the stored challenge it references.
    ///
    /// Returns true iff the record exists under the solution's nonce, the
    /// prefixes match, the record has not expired, and the hash of
    /// `prefix ∥ solution` carries the required leading zeros. A successful
    /// verification consumes the record.
    pub fn verify_solution(&self, solution: &SolutionPayload) -> bool {
        let challenge = match self.challenges.get(&solution.nonce) {
            Some(entry) => entry.value().clone(),
            None => {
                debug!(nonce = %solution.nonce, "challenge not found");
                return false;
            }
        };

        if challenge.prefix != solution.prefix {
            debug!(nonce = %solution.nonce, "prefix mismatch");
            return false;
        }

        if self.clock.now() > challenge.expires_at {
            self.challenges.remove(&solution.nonce);
            debug!(nonce = %solution.nonce, "challenge expired");
            return false;
        }

        let hash = hash_hex(&format!("{}{}", solution.prefix, solution.solution));
        if !meets_difficulty(&hash, challenge.difficulty) {
            return false;
        }

        // Single-use: a verified record cannot be replayed
        self.challenges.remove(&solution.nonce);
        true
    }

    /// Number of live challenge records.
    pub fn challenge_count(&self) -> usize {
        self.challenges.len()
    }

    /// Drop all records past their expiry.
    pub fn purge_expired(&self) {
        let now = self.clock.now();
        let before = self.challenges.len();
        self.challenges.retain(|_, c| c.expires_at >= now);
        let removed = before - self.challenges.len();
        if removed > 0 {
            debug!(removed, "expired challenges purged");
        }
    }

    /// Run the expiry sweeper until shutdown.
    ///
    /// The sweep period is the TTL capped at one minute, so short-lived
    /// challenges do not linger long after expiry.
    pub async fn sweep_expired(self: Arc<Self>, shutdown: CancellationToken) {
        let period = self.ttl.min(Duration::from_secs(60));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => self.purge_expired(),
                _ = shutdown.cancelled() => break,
            }
        }
    }

    fn random_token(&self) -> String {
        let mut bytes = [0u8; crate::TOKEN_HEX_LEN / 2];
        self.rng.lock().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}
