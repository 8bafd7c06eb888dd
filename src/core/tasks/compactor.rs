// src/core/tasks/compactor.rs

//! The compactor/splitter: drains a FIFO compaction queue, and when a
//! compaction reveals the region has outgrown its range, runs the split
//! protocol: split the region, record the split in the catalog, then tell
//! the master. It also carries the unavailability callbacks a region fires
//! while splitting, moving it through `retiring` so in-flight scanners can
//! finish.

use crate::core::catalog;
use crate::core::fs;
use crate::core::master::OutboundMessage;
use crate::core::region::{CompactionRequester, Region, RegionUnavailableListener};
use crate::core::registry::RegionRegistry;
use crate::core::state::ServerState;
use dashmap::DashSet;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tokio::time::Instant;
use tracing::{debug, error, info};

/// The shared compaction queue with duplicate suppression, plus the registry
/// handle the unavailability callbacks operate on.
pub struct CompactionScheduler {
    queue: Mutex<VecDeque<Arc<Region>>>,
    queued: DashSet<String>,
    notify: Notify,
    pub work_lock: tokio::sync::Mutex<()>,
    registry: Arc<RegionRegistry>,
}

impl CompactionScheduler {
    pub fn new(registry: Arc<RegionRegistry>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            queued: DashSet::new(),
            notify: Notify::new(),
            work_lock: tokio::sync::Mutex::new(()),
            registry,
        }
    }

    /// Enqueues a region for a compaction check; a no-op while it is already
    /// queued.
    pub fn request(&self, region: Arc<Region>) {
        if self.queued.insert(region.name().to_string()) {
            self.queue.lock().push_back(region);
            self.notify.notify_one();
        }
    }

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

    pub fn is_queued(&self, name: &str) -> bool {
        self.queued.contains(name)
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
        self.queued.clear();
    }
}

impl CompactionRequester for CompactionScheduler {
    fn request_compaction(&self, region: Arc<Region>) {
        self.request(region);
    }
}

impl RegionUnavailableListener for CompactionScheduler {
    /// The region is becoming unavailable: move it to `retiring` so pending
    /// scanners can still complete against it.
    fn closing(&self, region_name: &str) {
        if self.registry.retire(region_name) {
            debug!("Region {} moved to retiring for split", region_name);
        }
    }

    /// The region has finished closing; drop it from `retiring`.
    fn closed(&self, region_name: &str) {
        self.registry.drop_retired(region_name);
        debug!("Region {} fully closed after split", region_name);
    }
}

/// The compactor task.
pub struct CompactionRunner {
    state: Arc<ServerState>,
}

impl CompactionRunner {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let check_frequency = self
            .state
            .config
            .lock()
            .await
            .split_compact_check_frequency;
        info!(
            "Compactor started (checking every {:?}).",
            check_frequency
        );

        loop {
            if self.state.is_stopped() {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    break;
                }
                maybe_region = self.state.compactor.poll(check_frequency) => {
                    if let Some(region) = maybe_region
                        && !self.compact_one(region).await
                    {
                        break;
                    }
                }
            }
        }
        self.state.compactor.clear();
        info!("Compactor shutting down.");
    }

    /// Compacts one region under the working lock; splits it when the
    /// compaction says a split is due. Returns `false` when the compactor
    /// must stop.
    async fn compact_one(&self, region: Arc<Region>) -> bool {
        let _work = self.state.compactor.work_lock.lock().await;
        match region.compact_stores().await {
            Ok(true) => self.split_region(region).await,
            Ok(false) => true,
            Err(e) => {
                error!("Compaction of region {} failed: {}", region.name(), e);
                fs::check_file_system(&self.state).await
            }
        }
    }

    /// The split protocol: split the region (which closes the parent through
    /// the retiring callbacks), make the catalog update durable, then buffer
    /// `ReportSplit` and the children's `ReportOpen`s in that order. The
    /// children are not served here; the master assigns them.
    async fn split_region(&self, region: Arc<Region>) -> bool {
        let root = self.state.config.lock().await.rootdir.clone();
        match region.split(&root, self.state.compactor.as_ref()).await {
            Ok(None) => true,
            Ok(Some((child_a, child_b))) => {
                let parent = region.descriptor();
                match catalog::apply_split(&self.state, &parent, &child_a, &child_b).await {
                    Ok(()) => {
                        self.state.outbound.push(OutboundMessage::ReportSplit(parent));
                        self.state
                            .outbound
                            .push(OutboundMessage::ReportOpen(child_a));
                        self.state
                            .outbound
                            .push(OutboundMessage::ReportOpen(child_b));
                        true
                    }
                    Err(e) => {
                        error!(
                            "Could not record split of region {} in the catalog: {}",
                            region.name(),
                            e
                        );
                        fs::check_file_system(&self.state).await
                    }
                }
            }
            Err(e) => {
                error!("Split of region {} failed: {}", region.name(), e);
                fs::check_file_system(&self.state).await
            }
        }
    }
}
