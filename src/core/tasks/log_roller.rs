// src/core/tasks/log_roller.rs

//! The log roller: waits for the WAL's roll signal and rotates the log under
//! the process-wide roller lock, which it shares with the restart-driven
//! close-and-recreate sequence.

use crate::core::fs;
use crate::core::state::ServerState;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

pub struct LogRoller {
    state: Arc<ServerState>,
}

impl LogRoller {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Log roller started.");
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    break;
                }
                _ = self.state.roll_signal.wait() => {
                    if !self.roll_once().await {
                        break;
                    }
                }
            }
            if self.state.is_stopped() {
                break;
            }
        }
        info!("Log roller shutting down.");
    }

    /// Performs one roll. Returns `false` when the roller must stop.
    async fn roll_once(&self) -> bool {
        self.state.roll_signal.take();
        let _roller = self.state.log_roller_lock.lock().await;
        let Ok(wal) = self.state.wal().await else {
            return true;
        };
        match wal.roll().await {
            Ok(()) => true,
            Err(e) => {
                error!("Log roll failed: {}", e);
                fs::check_file_system(&self.state).await
            }
        }
    }
}
