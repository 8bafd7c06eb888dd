// src/core/fs.rs

//! The filesystem watchdog. Every IO failure anywhere in the process funnels
//! through [`check_file_system`]; a failed probe marks the filesystem
//! unusable and aborts the server.

use crate::core::state::ServerState;
use std::path::Path;
use std::sync::atomic::Ordering;
use tracing::error;

const PROBE_FILE: &str = ".fsprobe";

/// Verifies the filesystem under `root` is usable by writing and removing a
/// probe file.
pub async fn probe(root: &Path) -> std::io::Result<()> {
    let probe = root.join(PROBE_FILE);
    tokio::fs::write(&probe, b"ok").await?;
    tokio::fs::remove_file(&probe).await
}

/// Probes the filesystem and returns its verdict. On failure the `fs_ok`
/// flag is cleared (which also stops the heartbeat loop from enqueueing
/// further master instructions) and the server aborts.
pub async fn check_file_system(state: &ServerState) -> bool {
    if !state.fs_ok.load(Ordering::SeqCst) {
        return false;
    }
    let root = state.config.lock().await.rootdir.clone();
    match probe(&root).await {
        Ok(()) => true,
        Err(e) => {
            error!("Filesystem probe under {} failed: {}", root.display(), e);
            state.fs_ok.store(false, Ordering::SeqCst);
            state.abort();
            false
        }
    }
}
