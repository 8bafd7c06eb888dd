// src/connection/mod.rs

//! The client RPC endpoint: a TCP listener and per-connection handlers. The
//! handler pool is a semaphore of permits bounding concurrent in-flight
//! requests across all connections.

mod handler;

pub use handler::ConnectionHandler;

use crate::core::state::ServerState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Accepts client connections until shutdown; each connection runs its own
/// handler task.
pub async fn run_listener(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown_tx: broadcast::Sender<()>,
    handler_count: usize,
) {
    let permits = Arc::new(Semaphore::new(handler_count));
    let mut shutdown_rx = shutdown_tx.subscribe();
    let mut client_tasks = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, peer)) => {
                        debug!("Accepted client connection from {}", peer);
                        let handler = ConnectionHandler::new(
                            socket,
                            peer,
                            state.clone(),
                            permits.clone(),
                            shutdown_tx.subscribe(),
                        );
                        client_tasks.spawn(handler.run());
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            }
        }
    }

    client_tasks.abort_all();
    while client_tasks.join_next().await.is_some() {}
    info!("Client RPC endpoint stopped.");
}
