// src/core/tasks/lease_checker.rs

//! The lease checker: periodically drains due scanner leases and drops the
//! cursors they guarded.

use crate::core::state::ServerState;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::info;

pub struct LeaseChecker {
    state: Arc<ServerState>,
}

impl LeaseChecker {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let wake_frequency = self.state.config.lock().await.thread_wake_frequency;
        info!("Lease checker started (wake every {:?}).", wake_frequency);
        let mut interval = tokio::time::interval(wake_frequency);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let due = self.state.scanners.leases().expire_due(Instant::now());
                    for lease in due {
                        self.state.scanners.expire(&lease);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Lease checker shutting down.");
                    return;
                }
            }
        }
    }
}
