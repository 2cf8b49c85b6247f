//! # sage-server
//!
//! PoW-gated TCP quote server.
//!
//! This crate provides:
//! - The multi-layer admission pipeline (IP filter, failed-attempt block,
//!   memory pressure, flood bucket, per-IP caps, slow-read guard)
//! - The per-connection challenge/solution handler
//! - The load-driven difficulty controller
//! - The accept loop with graceful shutdown

pub mod admission;
mod difficulty;
mod error;
mod handler;
mod quotes;
mod service;

pub use admission::{AdmissionPipeline, ProtectionConfig, Rejection, SlowReadGuard};
pub use difficulty::DifficultyController;
pub use error::{ServerError, ServerResult};
pub use quotes::{Quote, QuoteBook, QuoteSource};
pub use service::{GateServer, ServerConfig};
