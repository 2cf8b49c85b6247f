//! Node configuration.

use crate::Args;
use anyhow::{Context, Result};
use sage_server::{ProtectionConfig, ServerConfig};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

/// Complete node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Server section.
    #[serde(default)]
    pub server: ServerSection,
    /// Proof-of-work section.
    #[serde(default)]
    pub pow: PowSection,
    /// Protection section.
    #[serde(default)]
    pub protection: ProtectionSection,
}

/// Server knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Listen address.
    pub bind_addr: String,
    /// Total exchange deadline in seconds.
    pub read_timeout_secs: u64,
    /// Per-write ceiling in seconds.
    pub write_timeout_secs: u64,
    /// Shutdown grace period in seconds.
    pub shutdown_timeout_secs: u64,
    /// Global concurrent connection cap.
    pub max_connections: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:4040".to_string(),
            read_timeout_secs: 5,
            write_timeout_secs: 5,
            shutdown_timeout_secs: 10,
            max_connections: 1000,
        }
    }
}

/// Proof-of-work knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowSection {
    /// Base difficulty.
    pub initial_difficulty: u8,
    /// Difficulty ceiling.
    pub max_difficulty: u8,
    /// Challenge lifetime in seconds.
    pub challenge_ttl_secs: u64,
    /// Difficulty adjustment interval in seconds.
    pub adjust_interval_secs: u64,
}

impl Default for PowSection {
    fn default() -> Self {
        Self {
            initial_difficulty: 4,
            max_difficulty: 8,
            challenge_ttl_secs: 300,
            adjust_interval_secs: 10,
        }
    }
}

/// Admission protection knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionSection {
    /// Minimum sustained read rate in bytes per second.
    pub min_read_rate: u64,
    /// Per-read ceiling in seconds.
    pub read_timeout_secs: u64,
    /// If non-empty, only these IPs are admitted.
    pub ip_allowlist: Vec<String>,
    /// Rejected IPs.
    pub ip_denylist: Vec<String>,
    /// Failures before an IP is blocked.
    pub max_failed_attempts: u32,
    /// Failed-attempt block duration in seconds.
    pub failed_block_secs: u64,
    /// Memory usage percentage that rejects admissions.
    pub memory_threshold_percent: u64,
    /// Memory sampling interval in seconds.
    pub memory_check_secs: u64,
    /// Flood bucket capacity per IP.
    pub flood_bucket_size: i64,
    /// Flood bucket refill rate in tokens per second.
    pub flood_fill_rate: f64,
    /// Request-rate burst per IP.
    pub request_burst: u32,
    /// Request-rate entry lifetime in seconds.
    pub request_ttl_secs: u64,
    /// Concurrent connections allowed per IP.
    pub max_conns_per_ip: u32,
    /// Connection counter reset window in seconds.
    pub conn_ttl_secs: u64,
}

impl Default for ProtectionSection {
    fn default() -> Self {
        Self {
            min_read_rate: 100,
            read_timeout_secs: 10,
            ip_allowlist: Vec::new(),
            ip_denylist: Vec::new(),
            max_failed_attempts: 5,
            failed_block_secs: 900,
            memory_threshold_percent: 80,
            memory_check_secs: 60,
            flood_bucket_size: 100,
            flood_fill_rate: 10.0,
            request_burst: 10,
            request_ttl_secs: 3600,
            max_conns_per_ip: 10,
            conn_ttl_secs: 60,
        }
    }
}

impl NodeConfig {
    /// Load configuration from file and CLI args.
    pub fn load(config_path: &Path, args: &Args) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("failed to read config file {}", config_path.display()))?;
            toml::from_str(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        // Override with CLI args
        if let Some(ref bind) = args.bind {
            config.server.bind_addr = bind.clone();
        }
        if let Some(max) = args.max_connections {
            config.server.max_connections = max;
        }
        if let Some(difficulty) = args.difficulty {
            config.pow.initial_difficulty = difficulty;
        }

        Ok(config)
    }

    /// Assemble the server configuration.
    pub fn server_config(&self) -> Result<ServerConfig> {
        Ok(ServerConfig {
            bind_addr: self.server.bind_addr.clone(),
            read_timeout: Duration::from_secs(self.server.read_timeout_secs),
            write_timeout: Duration::from_secs(self.server.write_timeout_secs),
            shutdown_timeout: Duration::from_secs(self.server.shutdown_timeout_secs),
            max_connections: self.server.max_connections,
            initial_difficulty: self.pow.initial_difficulty,
            max_difficulty: self.pow.max_difficulty,
            challenge_ttl: Duration::from_secs(self.pow.challenge_ttl_secs),
            adjust_interval: Duration::from_secs(self.pow.adjust_interval_secs),
            protection: self.protection_config()?,
        })
    }

    fn protection_config(&self) -> Result<ProtectionConfig> {
        let p = &self.protection;
        Ok(ProtectionConfig {
            min_read_rate: p.min_read_rate,
            read_timeout: Duration::from_secs(p.read_timeout_secs),
            ip_allowlist: parse_ip_list(&p.ip_allowlist).context("invalid ip_allowlist entry")?,
            ip_denylist: parse_ip_list(&p.ip_denylist).context("invalid ip_denylist entry")?,
            max_failed_attempts: p.max_failed_attempts,
            failed_block_time: Duration::from_secs(p.failed_block_secs),
            memory_threshold_percent: p.memory_threshold_percent,
            memory_check_interval: Duration::from_secs(p.memory_check_secs),
            flood_bucket_size: p.flood_bucket_size,
            flood_fill_rate: p.flood_fill_rate,
            request_burst: p.request_burst,
            request_ttl: Duration::from_secs(p.request_ttl_secs),
            max_conns_per_ip: p.max_conns_per_ip,
            conn_ttl: Duration::from_secs(p.conn_ttl_secs),
        })
    }
}

fn parse_ip_list(entries: &[String]) -> Result<Vec<IpAddr>> {
    entries
        .iter()
        .map(|s| {
            s.parse::<IpAddr>()
                .with_context(|| format!("not an IP address: {s}"))
        })
        .collect()
}
