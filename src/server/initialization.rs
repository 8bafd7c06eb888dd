// src/server/initialization.rs

//! Handles the complete server initialization process: reporting for duty to
//! the master, settling configuration, creating the write-ahead log and
//! binding the client listener.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::RegionServerError;
use crate::core::master::{MasterClient, ServerIdentity};
use crate::core::state::ServerState;
use crate::core::wal::Wal;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// The log directory of one server instance: `<root>/log_<ip>_<startcode>_<port>`.
/// Its presence at init means another server already runs under this identity.
pub fn wal_dir(root: &Path, identity: &ServerIdentity) -> PathBuf {
    root.join(format!(
        "log_{}_{}_{}",
        identity.address.ip(),
        identity.start_code,
        identity.address.port()
    ))
}

/// Repeatedly reports for duty until the master accepts, applying the
/// returned configuration overrides. A lease-still-held answer means a
/// previous generation of this identity has not timed out yet (commonly a
/// DNS misconfiguration); it is logged and retried like any other failure.
pub async fn report_for_duty(
    state: &Arc<ServerState>,
    master: &Arc<dyn MasterClient>,
) -> Result<(), RegionServerError> {
    let interval = state.config.lock().await.msg_interval;
    loop {
        if state.is_stopped() {
            return Err(RegionServerError::ServerNotRunning);
        }
        let identity = state.identity_snapshot();
        match master.startup(&identity).await {
            Ok(overrides) => {
                state.config.lock().await.apply_overrides(&overrides);
                state.stats.note_master_contact();
                info!("Reported for duty as {:?}", identity);
                return Ok(());
            }
            Err(RegionServerError::LeaseStillHeld) => {
                warn!(
                    "Master still holds a lease on this identity; check for DNS misconfiguration. Retrying."
                );
            }
            Err(e) => {
                warn!("Unable to report for duty: {}. Retrying.", e);
            }
        }
        tokio::time::sleep(interval).await;
    }
}

/// Creates this instance's write-ahead log under the configured root and
/// installs it into the state. Two servers must never share a log: the
/// directory already existing means this identity is running somewhere else,
/// a fatal condition at init.
pub async fn create_wal(state: &Arc<ServerState>) -> Result<(), RegionServerError> {
    let (root, roll_size) = {
        let config = state.config.lock().await;
        (config.rootdir.clone(), config.region.wal_roll_size)
    };
    tokio::fs::create_dir_all(&root).await?;

    let log_dir = wal_dir(&root, &state.identity_snapshot());
    if tokio::fs::try_exists(&log_dir).await? {
        return Err(RegionServerError::RegionServerRunning(
            log_dir.display().to_string(),
        ));
    }
    let wal = Arc::new(Wal::create(log_dir, roll_size, state.roll_signal.clone()).await?);
    state.install_wal(wal).await;
    Ok(())
}

/// Initializes all server components before background tasks start.
pub async fn setup(config: Config, master: Arc<dyn MasterClient>) -> Result<ServerContext> {
    config.validate()?;
    let state = ServerState::initialize(config)?;
    let (shutdown_tx, _) = broadcast::channel(1);

    // The master answers with configuration overrides, including the root
    // directory this cluster stores under.
    report_for_duty(&state, &master).await?;

    create_wal(&state).await?;

    let address = state.config.lock().await.address;
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("Failed to bind client listener on {address}"))?;
    info!("Region server listening on {}", listener.local_addr()?);

    Ok(ServerContext {
        state,
        master,
        listener: Some(listener),
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}
