// src/config.rs

//! Manages server configuration: loading, applying master-supplied overrides, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

fn default_address() -> SocketAddr {
    "0.0.0.0:60020".parse().expect("static address parses")
}
fn default_master_address() -> SocketAddr {
    "127.0.0.1:60000".parse().expect("static address parses")
}
fn default_rootdir() -> PathBuf {
    PathBuf::from("regiond_data")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_handler_count() -> usize {
    10
}
fn default_info_port() -> i32 {
    60030
}
fn default_msg_interval() -> Duration {
    Duration::from_millis(3000)
}
fn default_master_lease_period() -> Duration {
    Duration::from_millis(30000)
}
fn default_scanner_lease_period() -> Duration {
    Duration::from_millis(180_000)
}
fn default_split_compact_check_frequency() -> Duration {
    Duration::from_millis(20000)
}
fn default_optional_flush_interval() -> Duration {
    Duration::from_millis(1_800_000)
}
fn default_global_memtable_limit() -> usize {
    512 * 1024 * 1024
}
fn default_retry_count() -> u32 {
    2
}
fn default_thread_wake_frequency() -> Duration {
    Duration::from_millis(10000)
}
fn default_instruction_queue_depth() -> usize {
    64
}

/// Tuning knobs for the region storage layer.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RegionConfig {
    /// A family is compacted once it holds at least this many store files.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: usize,
    /// A region is split once any family's merged stores exceed this size in bytes.
    #[serde(default = "default_max_store_size")]
    pub max_store_size: u64,
    /// A region requests its own flush once its memtable exceeds this size in bytes.
    #[serde(default = "default_memtable_flush_size")]
    pub memtable_flush_size: usize,
    /// The write-ahead log requests a roll once the live segment exceeds this size in bytes.
    #[serde(default = "default_wal_roll_size")]
    pub wal_roll_size: u64,
}

fn default_compaction_threshold() -> usize {
    3
}
fn default_max_store_size() -> u64 {
    256 * 1024 * 1024
}
fn default_memtable_flush_size() -> usize {
    64 * 1024 * 1024
}
fn default_wal_roll_size() -> u64 {
    64 * 1024 * 1024
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            compaction_threshold: default_compaction_threshold(),
            max_store_size: default_max_store_size(),
            memtable_flush_size: default_memtable_flush_size(),
            wal_roll_size: default_wal_roll_size(),
        }
    }
}

/// The server's runtime configuration.
///
/// Every field has a default so an empty TOML file yields a working
/// configuration; the master may override individual fields at startup
/// through [`Config::apply_overrides`].
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// Bind address for the client RPC listener.
    #[serde(default = "default_address")]
    pub address: SocketAddr,
    /// Address of the master this server reports to.
    #[serde(default = "default_master_address")]
    pub master_address: SocketAddr,
    /// Root directory of the shared filesystem namespace.
    #[serde(default = "default_rootdir")]
    pub rootdir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Number of concurrent RPC handler permits.
    #[serde(default = "default_handler_count")]
    pub handler_count: usize,
    /// Info/status port; a negative value disables it.
    #[serde(default = "default_info_port")]
    pub info_port: i32,
    /// Heartbeat interval to the master.
    #[serde(with = "humantime_serde", default = "default_msg_interval")]
    pub msg_interval: Duration,
    /// How long the master may be unreachable before this server aborts.
    #[serde(with = "humantime_serde", default = "default_master_lease_period")]
    pub master_lease_period: Duration,
    /// How long an idle scanner is kept alive.
    #[serde(with = "humantime_serde", default = "default_scanner_lease_period")]
    pub scanner_lease_period: Duration,
    /// Poll interval of the compaction/split worker.
    #[serde(with = "humantime_serde", default = "default_split_compact_check_frequency")]
    pub split_compact_check_frequency: Duration,
    /// A region whose last flush is older than this is flushed opportunistically.
    #[serde(with = "humantime_serde", default = "default_optional_flush_interval")]
    pub optional_flush_interval: Duration,
    /// Hard cap on the summed size of all region memtables.
    #[serde(default = "default_global_memtable_limit")]
    pub global_memtable_limit: usize,
    /// Relief target for memory admission; defaults to half the hard cap.
    #[serde(default)]
    pub global_memtable_limit_low_mark: Option<usize>,
    /// Consecutive master-report failures tolerated before stopping.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Generic poll period for background workers.
    #[serde(with = "humantime_serde", default = "default_thread_wake_frequency")]
    pub thread_wake_frequency: Duration,
    /// Capacity of the inbound master-instruction queue.
    #[serde(default = "default_instruction_queue_depth")]
    pub instruction_queue_depth: usize,
    #[serde(default)]
    pub region: RegionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: default_address(),
            master_address: default_master_address(),
            rootdir: default_rootdir(),
            log_level: default_log_level(),
            handler_count: default_handler_count(),
            info_port: default_info_port(),
            msg_interval: default_msg_interval(),
            master_lease_period: default_master_lease_period(),
            scanner_lease_period: default_scanner_lease_period(),
            split_compact_check_frequency: default_split_compact_check_frequency(),
            optional_flush_interval: default_optional_flush_interval(),
            global_memtable_limit: default_global_memtable_limit(),
            global_memtable_limit_low_mark: None,
            retry_count: default_retry_count(),
            thread_wake_frequency: default_thread_wake_frequency(),
            instruction_queue_depth: default_instruction_queue_depth(),
            region: RegionConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    /// The effective memory-admission relief target.
    pub fn memtable_low_mark(&self) -> usize {
        self.global_memtable_limit_low_mark
            .unwrap_or(self.global_memtable_limit / 2)
    }

    /// Applies the master's startup override map on top of this configuration.
    ///
    /// Keys are the flat field names; durations are given in milliseconds.
    /// Unknown keys are logged and ignored so old servers survive new masters.
    pub fn apply_overrides(&mut self, overrides: &HashMap<String, String>) {
        for (key, value) in overrides {
            let applied = match key.as_str() {
                "rootdir" => {
                    self.rootdir = PathBuf::from(value);
                    true
                }
                "msg_interval" => parse_millis(value).map(|d| self.msg_interval = d).is_some(),
                "master_lease_period" => parse_millis(value)
                    .map(|d| self.master_lease_period = d)
                    .is_some(),
                "scanner_lease_period" => parse_millis(value)
                    .map(|d| self.scanner_lease_period = d)
                    .is_some(),
                "split_compact_check_frequency" => parse_millis(value)
                    .map(|d| self.split_compact_check_frequency = d)
                    .is_some(),
                "optional_flush_interval" => parse_millis(value)
                    .map(|d| self.optional_flush_interval = d)
                    .is_some(),
                "thread_wake_frequency" => parse_millis(value)
                    .map(|d| self.thread_wake_frequency = d)
                    .is_some(),
                "global_memtable_limit" => value
                    .parse::<usize>()
                    .map(|v| self.global_memtable_limit = v)
                    .is_ok(),
                "global_memtable_limit_low_mark" => value
                    .parse::<usize>()
                    .map(|v| self.global_memtable_limit_low_mark = Some(v))
                    .is_ok(),
                "retry_count" => value.parse::<u32>().map(|v| self.retry_count = v).is_ok(),
                other => {
                    warn!("Ignoring unknown configuration override '{}'", other);
                    continue;
                }
            };
            if applied {
                info!("Applied master configuration override: {} = {}", key, value);
            } else {
                warn!(
                    "Master configuration override '{}' has unparseable value '{}'",
                    key, value
                );
            }
        }
    }

    /// Validates the resolved configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.handler_count == 0 {
            return Err(anyhow!("handler_count cannot be 0"));
        }
        if self.msg_interval.is_zero() {
            return Err(anyhow!("msg_interval cannot be 0"));
        }
        if self.global_memtable_limit == 0 {
            return Err(anyhow!("global_memtable_limit cannot be 0"));
        }
        if self.memtable_low_mark() >= self.global_memtable_limit {
            return Err(anyhow!(
                "global_memtable_limit_low_mark must be below global_memtable_limit"
            ));
        }
        if self.instruction_queue_depth == 0 {
            return Err(anyhow!("instruction_queue_depth cannot be 0"));
        }
        if self.region.compaction_threshold < 2 {
            return Err(anyhow!("region.compaction_threshold must be at least 2"));
        }
        if self.master_lease_period < self.msg_interval {
            warn!(
                "master_lease_period {:?} is shorter than msg_interval {:?}; the server will abort after a single missed heartbeat",
                self.master_lease_period, self.msg_interval
            );
        }
        Ok(())
    }
}

fn parse_millis(value: &str) -> Option<Duration> {
    value.parse::<u64>().ok().map(Duration::from_millis)
}
