//! # sage-pow
//!
//! Proof-of-work for the sage quote service.
//!
//! This crate provides:
//! - Challenge issuance and verification with a TTL-bounded store
//! - A multi-threaded client-side solver
//! - Injectable clock and randomness for deterministic tests

mod challenge;
mod clock;
mod hash;
mod solver;

pub use challenge::{Challenge, PowError, PowResult, PowService};
pub use clock::{Clock, ManualClock, SystemClock};
pub use hash::{hash_hex, meets_difficulty};
pub use solver::{solve, solve_blocking};

/// Length of the random challenge prefix and nonce, in hex characters.
pub const TOKEN_HEX_LEN: usize = 16;

/// Default challenge time-to-live in seconds.
pub const DEFAULT_CHALLENGE_TTL_SECS: u64 = 300;
