// src/core/tasks/worker.rs

//! The worker: the single serial consumer of master instructions. Slow
//! operations (opening and closing regions, quiescing) run here so the
//! heartbeat loop never blocks on them.

use crate::core::fs;
use crate::core::master::{Instruction, QueuedInstruction};
use crate::core::state::ServerState;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

pub struct Worker {
    state: Arc<ServerState>,
}

impl Worker {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let (wake_frequency, retries) = {
            let config = self.state.config.lock().await;
            (config.thread_wake_frequency, config.retry_count)
        };
        info!("Worker started.");

        loop {
            if self.state.is_stopped() {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    break;
                }
                maybe_entry = self.state.instructions.poll(wake_frequency) => {
                    if let Some(entry) = maybe_entry
                        && !self.process(entry, retries).await
                    {
                        break;
                    }
                }
            }
        }
        info!("Worker shutting down.");
    }

    /// Executes one instruction. IO failures under the retry budget are
    /// requeued; any IO failure probes the filesystem and a bad verdict
    /// stops the worker. Returns `false` to stop.
    async fn process(&self, mut entry: QueuedInstruction, retries: u32) -> bool {
        debug!(
            "Worker processing {:?} (attempt {})",
            entry.instruction, entry.attempts
        );
        let result = match &entry.instruction {
            Instruction::RegionOpen(descriptor) => {
                self.state.open_region(descriptor.clone()).await
            }
            Instruction::RegionClose(descriptor) => {
                self.state.close_region(descriptor, true).await
            }
            Instruction::RegionCloseWithoutReport(descriptor) => {
                self.state.close_region(descriptor, false).await
            }
            Instruction::ServerQuiesce => self.state.close_user_regions().await,
            other => {
                // Control-flow instructions are the main loop's business.
                debug!("Worker ignoring control instruction {:?}", other);
                Ok(())
            }
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                entry.attempts += 1;
                if e.is_io() {
                    if entry.attempts < retries {
                        warn!(
                            "Instruction failed with an IO error ({}); requeueing (attempt {})",
                            e, entry.attempts
                        );
                        self.state.instructions.requeue(entry);
                    } else {
                        error!(
                            "Giving up on {:?} after {} attempts: {}",
                            entry.instruction, entry.attempts, e
                        );
                    }
                    fs::check_file_system(&self.state).await
                } else {
                    error!("Instruction {:?} failed: {}", entry.instruction, e);
                    true
                }
            }
        }
    }
}
