// src/core/state/stats.rs

//! Contains state definitions and logic for server statistics and the
//! master-dialog health counters.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Holds all state and logic related to server-wide statistics and the
/// health of the master dialog.
#[derive(Debug)]
pub struct StatsState {
    /// Requests served since the last successful heartbeat.
    interval_requests: AtomicU64,
    /// Requests served since startup.
    total_requests: AtomicU64,
    /// When the master last acknowledged a startup or report call.
    last_master_contact: Mutex<Instant>,
    /// Consecutive failed report calls.
    report_failures: AtomicU32,
}

impl Default for StatsState {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsState {
    pub fn new() -> Self {
        Self {
            interval_requests: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
            last_master_contact: Mutex::new(Instant::now()),
            report_failures: AtomicU32::new(0),
        }
    }

    /// Counts one served request.
    pub fn increment_requests(&self) {
        self.interval_requests.fetch_add(1, Ordering::Relaxed);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests served in the current heartbeat interval.
    pub fn interval_requests(&self) -> u64 {
        self.interval_requests.load(Ordering::Relaxed)
    }

    /// Resets the per-interval request counter after a successful heartbeat.
    pub fn reset_interval_requests(&self) {
        self.interval_requests.store(0, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Records a successful exchange with the master.
    pub fn note_master_contact(&self) {
        *self.last_master_contact.lock() = Instant::now();
        self.report_failures.store(0, Ordering::SeqCst);
    }

    /// How long the master has been unreachable.
    pub fn master_contact_age(&self) -> Duration {
        self.last_master_contact.lock().elapsed()
    }

    /// Counts one failed report call; returns the new consecutive total.
    pub fn note_report_failure(&self) -> u32 {
        self.report_failures.fetch_add(1, Ordering::SeqCst) + 1
    }
}
