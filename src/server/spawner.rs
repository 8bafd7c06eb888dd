// src/server/spawner.rs

//! Spawns all of the server's long-running background tasks.

use super::context::ServerContext;
use crate::connection;
use crate::core::tasks::{
    compactor::CompactionRunner, flusher::MemtableFlusher, lease_checker::LeaseChecker,
    log_roller::LogRoller, worker::Worker,
};
use anyhow::{Result, anyhow};
use tracing::info;

/// Spawns all critical background tasks into the context's JoinSet.
pub async fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let state = &ctx.state;
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    // --- Worker: serial executor of master instructions ---
    let worker = Worker::new(state.clone());
    let shutdown_rx_worker = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        worker.run(shutdown_rx_worker).await;
    });

    // --- Memtable flusher ---
    let flusher = MemtableFlusher::new(state.clone());
    let shutdown_rx_flush = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        flusher.run(shutdown_rx_flush).await;
    });

    // --- Compactor / splitter ---
    let compactor = CompactionRunner::new(state.clone());
    let shutdown_rx_compact = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        compactor.run(shutdown_rx_compact).await;
    });

    // --- Log roller ---
    let roller = LogRoller::new(state.clone());
    let shutdown_rx_roll = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        roller.run(shutdown_rx_roll).await;
    });

    // --- Lease checker ---
    let lease_checker = LeaseChecker::new(state.clone());
    let shutdown_rx_lease = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        lease_checker.run(shutdown_rx_lease).await;
    });

    // --- Client RPC endpoint ---
    let listener = ctx
        .listener
        .take()
        .ok_or_else(|| anyhow!("Client listener was already consumed"))?;
    let handler_count = state.config.lock().await.handler_count;
    let listener_state = state.clone();
    let listener_shutdown = shutdown_tx.clone();
    background_tasks.spawn(async move {
        connection::run_listener(listener, listener_state, listener_shutdown, handler_count).await;
    });

    info!("All background tasks have been spawned.");
    Ok(())
}
