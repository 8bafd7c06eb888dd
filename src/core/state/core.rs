// src/core/state/core.rs

//! Defines the central `ServerState` struct, holding all shared server-wide state.

use super::stats::StatsState;
use crate::config::Config;
use crate::core::RegionServerError;
use crate::core::master::{InstructionQueue, MessageBuffer, ServerIdentity, ServerLoad};
use crate::core::now_ms;
use crate::core::registry::RegionRegistry;
use crate::core::scanners::ScannerRegistry;
use crate::core::tasks::compactor::CompactionScheduler;
use crate::core::tasks::flusher::FlushScheduler;
use crate::core::wal::{RollSignal, Wal};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{error, info};

/// The central struct holding all shared, server-wide state.
///
/// Wrapped in an `Arc` and passed to every background task and request
/// handler; nothing in the process reaches for globals.
pub struct ServerState {
    /// The server's runtime configuration, mutable because the master's
    /// startup response may override fields.
    pub config: Arc<Mutex<Config>>,
    /// The identity the master tracks this server under. The start code is
    /// regenerated when the master orders a dialog restart.
    pub identity: parking_lot::Mutex<ServerIdentity>,
    /// Online and retiring regions.
    pub registry: Arc<RegionRegistry>,
    /// The write-ahead log; absent until initialization installs it and
    /// swapped out when the master orders a restart.
    pub wal: RwLock<Option<Arc<Wal>>>,
    /// Process-wide lock serializing log rolls against the restart-driven
    /// close-and-recreate sequence.
    pub log_roller_lock: Mutex<()>,
    /// Raised by the WAL when the live segment wants rotation.
    pub roll_signal: Arc<RollSignal>,
    /// Events awaiting the next heartbeat to the master.
    pub outbound: MessageBuffer,
    /// Master instructions awaiting the worker.
    pub instructions: InstructionQueue,
    /// Open scanners and their leases.
    pub scanners: ScannerRegistry,
    /// The flush queue shared between the flusher task, the write-path
    /// memory admission and regions requesting their own flush.
    pub flusher: Arc<FlushScheduler>,
    /// The compaction queue and the split unavailability callbacks.
    pub compactor: Arc<CompactionScheduler>,
    /// Cleared by the filesystem watchdog once the filesystem is unusable.
    pub fs_ok: AtomicBool,
    /// Graceful-stop flag polled by every worker at its loop head.
    pub stop_requested: AtomicBool,
    /// Abort flag; implies `stop_requested`.
    pub abort_requested: AtomicBool,
    /// Set once user regions have been closed on a quiesce order.
    pub quiesced: AtomicBool,
    /// Ensures a quiesce order is enqueued to the worker only once per run.
    pub quiesce_enqueued: AtomicBool,
    /// Best-effort wake for loops sleeping between heartbeats.
    pub stop_notify: Notify,
    pub stats: StatsState,
}

impl ServerState {
    /// Builds the shared state from a validated configuration. The WAL is
    /// installed separately once the master dialog has settled the root
    /// directory.
    pub fn initialize(config: Config) -> Result<Arc<ServerState>, RegionServerError> {
        let identity = ServerIdentity {
            address: config.address,
            start_code: now_ms(),
            info_port: config.info_port,
        };
        let registry = Arc::new(RegionRegistry::new());
        let scanners = ScannerRegistry::new(config.scanner_lease_period);
        let instructions = InstructionQueue::new(config.instruction_queue_depth);

        let state = Arc::new(ServerState {
            identity: parking_lot::Mutex::new(identity),
            wal: RwLock::new(None),
            log_roller_lock: Mutex::new(()),
            roll_signal: Arc::new(RollSignal::default()),
            outbound: MessageBuffer::new(),
            instructions,
            scanners,
            flusher: Arc::new(FlushScheduler::new()),
            compactor: Arc::new(CompactionScheduler::new(registry.clone())),
            registry,
            fs_ok: AtomicBool::new(true),
            stop_requested: AtomicBool::new(false),
            abort_requested: AtomicBool::new(false),
            quiesced: AtomicBool::new(false),
            quiesce_enqueued: AtomicBool::new(false),
            stop_notify: Notify::new(),
            stats: StatsState::new(),
            config: Arc::new(Mutex::new(config)),
        });
        Ok(state)
    }

    /// Installs (or replaces) the write-ahead log.
    pub async fn install_wal(&self, wal: Arc<Wal>) {
        *self.wal.write().await = Some(wal);
    }

    /// The current WAL; absent only before initialization or after shutdown.
    pub async fn wal(&self) -> Result<Arc<Wal>, RegionServerError> {
        self.wal
            .read()
            .await
            .clone()
            .ok_or(RegionServerError::ServerNotRunning)
    }

    pub fn identity_snapshot(&self) -> ServerIdentity {
        self.identity.lock().clone()
    }

    /// Regenerates the start code after the master loses its state.
    pub fn regenerate_start_code(&self) -> u64 {
        let mut identity = self.identity.lock();
        identity.start_code = now_ms().max(identity.start_code + 1);
        info!("Regenerated start code: {}", identity.start_code);
        identity.start_code
    }

    /// The load snapshot published with a heartbeat.
    pub fn load_snapshot(&self) -> ServerLoad {
        ServerLoad {
            requests: self.stats.interval_requests(),
            regions: self.registry.online_count() as u32,
        }
    }

    /// Fails requests once the server is stopping or the filesystem is gone.
    pub fn check_open(&self) -> Result<(), RegionServerError> {
        if self.stop_requested.load(Ordering::SeqCst) || self.abort_requested.load(Ordering::SeqCst)
        {
            return Err(RegionServerError::ServerNotRunning);
        }
        if !self.fs_ok.load(Ordering::SeqCst) {
            return Err(RegionServerError::FilesystemUnavailable);
        }
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn is_aborting(&self) -> bool {
        self.abort_requested.load(Ordering::SeqCst)
    }

    /// Requests a graceful stop. The wake is best effort; loops also poll
    /// the flag at their heads.
    pub fn stop(&self) {
        if !self.stop_requested.swap(true, Ordering::SeqCst) {
            info!("Stop requested");
        }
        self.stop_notify.notify_waiters();
    }

    /// Requests an abort: stop without the graceful close/report sequence.
    pub fn abort(&self) {
        if !self.abort_requested.swap(true, Ordering::SeqCst) {
            error!("Aborting region server");
        }
        self.stop();
    }

    /// Total memtable bytes across online regions, the memory-admission input.
    pub fn global_memtable_size(&self) -> usize {
        self.registry
            .online_snapshot()
            .iter()
            .map(|r| r.memtable_size())
            .sum()
    }
}
