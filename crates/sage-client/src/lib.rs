//! # sage-client
//!
//! Client for the sage quote service.
//!
//! This crate provides:
//! - The challenge/solve/quote exchange over a framed TCP connection
//! - An exponential backoff utility for retrying transient failures

mod backoff;
mod client;
mod error;

pub use backoff::{retry_with_backoff, ExponentialBackoff};
pub use client::{Client, ClientConfig};
pub use error::{ClientError, ClientResult};
