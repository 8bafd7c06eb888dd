// src/core/metrics.rs

//! Defines and registers Prometheus metrics for server monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{Counter, Gauge, TextEncoder, register_counter, register_gauge};

lazy_static! {
    // --- Server-wide Gauges ---
    /// The number of regions currently online on this server.
    pub static ref ONLINE_REGIONS: Gauge =
        register_gauge!("regiond_online_regions", "Number of regions currently online.").unwrap();
    /// The summed size of all region memtables in bytes.
    pub static ref MEMTABLE_BYTES: Gauge =
        register_gauge!("regiond_memtable_bytes", "Total bytes held in region memtables.").unwrap();
    /// The number of scanners currently open.
    pub static ref OPEN_SCANNERS: Gauge =
        register_gauge!("regiond_open_scanners", "Number of currently open scanners.").unwrap();

    // --- Server-wide Counters ---
    /// The total number of client requests processed since startup.
    pub static ref REQUESTS_TOTAL: Counter =
        register_counter!("regiond_requests_total", "Total number of client requests processed.").unwrap();
    /// The total number of memtable flushes performed.
    pub static ref MEMTABLE_FLUSHES_TOTAL: Counter =
        register_counter!("regiond_memtable_flushes_total", "Total number of memtable flushes.").unwrap();
    /// The total number of store compactions performed.
    pub static ref COMPACTIONS_TOTAL: Counter =
        register_counter!("regiond_compactions_total", "Total number of store compactions.").unwrap();
    /// The total number of region splits performed.
    pub static ref REGION_SPLITS_TOTAL: Counter =
        register_counter!("regiond_region_splits_total", "Total number of region splits.").unwrap();
    /// The total number of scanner leases that expired without being renewed.
    pub static ref EXPIRED_SCANNER_LEASES_TOTAL: Counter =
        register_counter!("regiond_expired_scanner_leases_total", "Total number of expired scanner leases.").unwrap();
    /// The total number of write-ahead log rolls.
    pub static ref LOG_ROLLS_TOTAL: Counter =
        register_counter!("regiond_log_rolls_total", "Total number of write-ahead log rolls.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
