// src/server/main_loop.rs

//! The master-dialog control loop: heartbeats, instruction intake, the
//! liveness guard, quiesce completion, and the orderly (or aborting)
//! shutdown sequence.

use super::context::ServerContext;
use super::initialization::{create_wal, report_for_duty};
use crate::core::fs;
use crate::core::master::{Instruction, MasterClient, OutboundMessage};
use crate::core::state::ServerState;
use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{error, info, warn};

// Platform-specific signal handling imports
#[cfg(windows)]
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Waits for a shutdown signal based on the operating system.
/// On Unix, it listens for SIGINT and SIGTERM.
/// On Windows, it listens for Ctrl+C.
async fn await_shutdown_signal() {
    #[cfg(unix)]
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to create SIGINT stream");
    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to create SIGTERM stream");

    #[cfg(windows)]
    let mut ctrl_c = signal::ctrl_c().expect("Failed to create Ctrl+C stream");

    tokio::select! {
        _ = async { #[cfg(unix)] { sigint.recv().await; info!("SIGINT received, initiating graceful shutdown."); } } => {},
        _ = async { #[cfg(unix)] { sigterm.recv().await; info!("SIGTERM received, initiating graceful shutdown."); } } => {},
        _ = async { #[cfg(windows)] { ctrl_c.await; info!("Ctrl-C received, initiating graceful shutdown."); } } => {},
    }
}

/// Runs the heartbeat loop until a stop or abort is requested, then performs
/// the shutdown sequence.
pub async fn run(mut ctx: ServerContext) -> Result<()> {
    let state = ctx.state.clone();
    let master = ctx.master.clone();
    let (msg_interval, lease_period, retries) = {
        let config = state.config.lock().await;
        (
            config.msg_interval,
            config.master_lease_period,
            config.retry_count,
        )
    };
    info!(
        "Entering the master dialog (heartbeat every {:?}, master lease {:?}).",
        msg_interval, lease_period
    );

    while !state.is_stopped() {
        tokio::select! {
            _ = tokio::time::sleep(msg_interval) => {}
            _ = state.stop_notify.notified() => {}
            _ = await_shutdown_signal() => {
                state.stop();
            }
            // The shared last-resort handler: a panicking background task
            // takes the whole server down.
            Some(joined) = ctx.background_tasks.join_next() => {
                if let Err(e) = joined {
                    error!("Background task panicked: {e:?}. Aborting.");
                    state.abort();
                } else if !state.is_stopped() {
                    warn!("A background task exited early.");
                }
            }
        }
        if state.is_stopped() {
            break;
        }

        // Liveness guard: a master silent past the lease period means this
        // server may already have been given away.
        if state.stats.master_contact_age() >= lease_period {
            error!(
                "No successful contact with the master for {:?}; aborting.",
                lease_period
            );
            state.abort();
            break;
        }

        // Heartbeat: swap the outbound buffer, publish load, reset the
        // request counter on success, and drain the master's instructions.
        let identity = state.identity_snapshot();
        let load = state.load_snapshot();
        let messages = state.outbound.take_all();
        match master.report(&identity, load, messages).await {
            Ok(instructions) => {
                state.stats.note_master_contact();
                state.stats.reset_interval_requests();
                for instruction in instructions {
                    dispatch(&state, &master, instruction).await;
                    if state.is_stopped() {
                        break;
                    }
                }
            }
            Err(e) => {
                let failures = state.stats.note_report_failure();
                warn!("Report to master failed ({} consecutive): {}", failures, e);
                if failures > retries && fs::check_file_system(&state).await {
                    error!("Exceeded the retry budget talking to the master; stopping.");
                    state.stop();
                }
            }
        }

        // Housekeeping: re-announce every open still waiting in the worker
        // queue so the master does not reassign those regions. An open
        // already dequeued keeps announcing through its progress callback.
        for descriptor in state.instructions.pending_opens() {
            state
                .outbound
                .push(OutboundMessage::ReportProcessOpen(descriptor));
        }

        // Quiesce completion: once the catalog regions are gone too, stop.
        if state.quiesced.load(Ordering::SeqCst) && state.registry.online_is_empty() {
            info!("Quiesced and no regions remain online; stopping.");
            state.stop();
        }
    }

    shutdown(ctx).await
}

/// Applies one master instruction. Control-flow instructions are handled
/// here; region work is queued for the worker, but only while the
/// filesystem is usable.
async fn dispatch(state: &Arc<ServerState>, master: &Arc<dyn MasterClient>, instruction: Instruction) {
    match instruction {
        Instruction::CallServerStartup => restart_dialog(state, master).await,
        Instruction::ServerStop => state.stop(),
        Instruction::ServerQuiesce => {
            // Idempotent per run: quiescing twice would double-close.
            if !state.quiesce_enqueued.swap(true, Ordering::SeqCst)
                && let Err(dropped) = state.instructions.try_push(Instruction::ServerQuiesce)
            {
                warn!("Instruction queue full; dropping {:?}", dropped);
                state.quiesce_enqueued.store(false, Ordering::SeqCst);
            }
        }
        other => {
            if !state.fs_ok.load(Ordering::SeqCst) {
                warn!(
                    "Filesystem is unusable; refusing master instruction {:?}",
                    other
                );
                return;
            }
            if let Err(dropped) = state.instructions.try_push(other) {
                warn!(
                    "Instruction queue full; dropping {:?} (the master will reissue it)",
                    dropped
                );
            }
        }
    }
}

/// The master has lost its state: close everything, recreate the WAL under a
/// fresh start code, and report for duty again.
async fn restart_dialog(state: &Arc<ServerState>, master: &Arc<dyn MasterClient>) {
    info!("Master ordered a dialog restart.");
    if !fs::check_file_system(state).await {
        return;
    }

    state.close_all_regions(false).await;

    {
        // Shared with the log roller so a roll never races the swap.
        let _roller = state.log_roller_lock.lock().await;
        if let Ok(wal) = state.wal().await
            && let Err(e) = wal.close_and_delete().await
        {
            error!("Could not delete the old log during restart: {}", e);
            fs::check_file_system(state).await;
            return;
        }
        state.regenerate_start_code();
        if let Err(e) = create_wal(state).await {
            error!("Could not recreate the log during restart: {}", e);
            fs::check_file_system(state).await;
            return;
        }
    }

    state.quiesced.store(false, Ordering::SeqCst);
    state.quiesce_enqueued.store(false, Ordering::SeqCst);

    if let Err(e) = report_for_duty(state, master).await {
        error!("Could not re-report for duty after restart: {}", e);
        state.stop();
    }
}

/// The shutdown sequence: release scanner leases, stop the worker and the
/// RPC endpoint, wait out the background tasks, then either abort (best
/// effort, filesystem permitting) or close everything and send the final
/// report.
async fn shutdown(mut ctx: ServerContext) -> Result<()> {
    let state = ctx.state.clone();

    state.scanners.close_all();
    let _ = ctx.shutdown_tx.send(());
    while ctx.background_tasks.join_next().await.is_some() {}

    if state.is_aborting() {
        if fs::check_file_system(&state).await {
            if let Ok(wal) = state.wal().await
                && let Err(e) = wal.close().await
            {
                warn!("Could not close the log while aborting: {}", e);
            }
            state.close_all_regions(true).await;
        } else {
            warn!("Filesystem unusable at abort; skipping log close and region closes.");
        }
        error!("Region server aborted.");
        return Ok(());
    }

    let closed = state.close_all_regions(false).await;
    if let Ok(wal) = state.wal().await
        && let Err(e) = wal.close_and_delete().await
    {
        warn!("Could not delete the log at shutdown: {}", e);
    }

    // The final report leads with the exit notice, then the regions this
    // shutdown just closed.
    let mut final_messages = vec![OutboundMessage::ReportExiting];
    final_messages.extend(closed.into_iter().map(OutboundMessage::ReportClose));
    let identity = state.identity_snapshot();
    if let Err(e) = ctx
        .master
        .report(&identity, state.load_snapshot(), final_messages)
        .await
    {
        warn!("Could not deliver the final report to the master: {}", e);
    }

    info!("Region server stopped.");
    Ok(())
}
