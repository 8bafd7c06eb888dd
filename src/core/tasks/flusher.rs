// src/core/tasks/flusher.rs

//! The memtable flusher: a FIFO flush queue with duplicate suppression, a
//! periodic staleness scan, and the global memory-admission path every write
//! passes through.

use crate::core::RegionServerError;
use crate::core::fs;
use crate::core::metrics;
use crate::core::region::{CompactionRequester, FlushRequester, Region};
use crate::core::state::ServerState;
use dashmap::DashSet;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// The shared flush queue. The suppression set keeps a region from being
/// enqueued twice; the working lock delays shutdown and the admission path
/// past the current flush so no flush is ever torn mid-way.
#[derive(Default)]
pub struct FlushScheduler {
    queue: Mutex<VecDeque<Arc<Region>>>,
    queued: DashSet<String>,
    notify: Notify,
    pub work_lock: tokio::sync::Mutex<()>,
}

impl FlushScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a region for flushing; a no-op while it is already queued.
    pub fn request(&self, region: Arc<Region>) {
        if self.queued.insert(region.name().to_string()) {
            self.queue.lock().push_back(region);
            self.notify.notify_one();
        }
    }

    /// Drops a pending enqueue of the region, used when the admission path
    /// preempts it to avoid a double flush.
    pub fn remove_pending(&self, name: &str) {
        if self.queued.remove(name).is_some() {
            self.queue.lock().retain(|r| r.name() != name);
        }
    }

    /// Dequeues the next region, waiting up to `timeout`.
    pub async fn poll(&self, timeout: Duration) -> Option<Arc<Region>> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if let Some(region) = self.queue.lock().pop_front() {
                self.queued.remove(region.name());
                return Some(region);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn is_queued(&self, name: &str) -> bool {
        self.queued.contains(name)
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
        self.queued.clear();
    }
}

impl FlushRequester for FlushScheduler {
    fn request_flush(&self, region: Arc<Region>) {
        self.request(region);
    }
}

/// The flusher task draining the queue and scanning for stale memtables.
pub struct MemtableFlusher {
    state: Arc<ServerState>,
}

impl MemtableFlusher {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let (wake_frequency, optional_flush_interval) = {
            let config = self.state.config.lock().await;
            (config.thread_wake_frequency, config.optional_flush_interval)
        };
        info!(
            "Memtable flusher started (wake every {:?}, optional flush after {:?}).",
            wake_frequency, optional_flush_interval
        );
        let mut periodic = tokio::time::interval(wake_frequency);

        loop {
            if self.state.is_stopped() {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    break;
                }
                _ = periodic.tick() => {
                    self.enqueue_stale_regions(optional_flush_interval);
                }
                maybe_region = self.state.flusher.poll(wake_frequency) => {
                    if let Some(region) = maybe_region
                        && !self.flush_one(region).await
                    {
                        return;
                    }
                }
            }
        }
        info!("Memtable flusher shutting down.");
    }

    /// The periodic path: regions unflushed for longer than the optional
    /// flush interval are enqueued.
    fn enqueue_stale_regions(&self, optional_flush_interval: Duration) {
        for region in self.state.registry.online_snapshot() {
            if region.last_flush_instant().elapsed() >= optional_flush_interval {
                debug!("Enqueueing region {} for an age-based flush", region.name());
                self.state.flusher.request(region);
            }
        }
    }

    /// Flushes one region under the working lock. Returns `false` when the
    /// flusher must stop.
    async fn flush_one(&self, region: Arc<Region>) -> bool {
        let _work = self.state.flusher.work_lock.lock().await;
        match region.flush_cache().await {
            Ok(compaction_warranted) => {
                if compaction_warranted {
                    self.state.compactor.request_compaction(region.clone());
                }
                if let Ok(wal) = self.state.wal().await {
                    wal.set_flush_floor(min_flushed_sequence(&self.state));
                }
                metrics::MEMTABLE_BYTES.set(self.state.global_memtable_size() as f64);
                true
            }
            Err(RegionServerError::DroppedSnapshot(msg)) => {
                error!(
                    "Replay of the log required for region {}: {}. Aborting.",
                    region.name(),
                    msg
                );
                self.state.abort();
                false
            }
            Err(e) => {
                error!("Flush of region {} failed: {}", region.name(), e);
                fs::check_file_system(&self.state).await
            }
        }
    }
}

/// The WAL durability floor: the lowest flushed sequence across online
/// regions. Sealed segments wholly below it are prunable.
fn min_flushed_sequence(state: &ServerState) -> u64 {
    state
        .registry
        .online_snapshot()
        .iter()
        .map(|r| r.flushed_sequence_id())
        .min()
        .unwrap_or(0)
}

/// The global memory-admission path, called by every write before touching a
/// region. While the summed memtable size is over the hard cap, regions are
/// flushed in descending memtable size until the total is below the relief
/// target; the caller's write is blocked for the duration.
pub async fn reclaim_memtable_memory(state: &Arc<ServerState>) -> Result<(), RegionServerError> {
    let (limit, low_mark) = {
        let config = state.config.lock().await;
        (config.global_memtable_limit, config.memtable_low_mark())
    };
    if state.global_memtable_size() <= limit {
        return Ok(());
    }

    let _work = state.flusher.work_lock.lock().await;
    warn!(
        "Global memtable size {} is over the {} byte cap; flushing largest regions",
        state.global_memtable_size(),
        limit
    );
    while state.global_memtable_size() > low_mark {
        if state.is_stopped() {
            return Err(RegionServerError::ServerNotRunning);
        }
        let candidate = state
            .registry
            .online_snapshot()
            .into_iter()
            .filter(|r| r.memtable_size() > 0)
            .max_by_key(|r| r.memtable_size());
        let Some(region) = candidate else { break };

        // Preempt any pending enqueue so the flusher does not flush it again.
        state.flusher.remove_pending(region.name());
        match region.flush_cache().await {
            Ok(compaction_warranted) => {
                if compaction_warranted {
                    state.compactor.request_compaction(region.clone());
                }
            }
            Err(e @ RegionServerError::DroppedSnapshot(_)) => {
                error!("Replay of the log required during memory relief: {}", e);
                state.abort();
                return Err(e);
            }
            Err(e) => {
                fs::check_file_system(state).await;
                return Err(e);
            }
        }
    }
    metrics::MEMTABLE_BYTES.set(state.global_memtable_size() as f64);
    Ok(())
}
