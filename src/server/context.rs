// src/server/context.rs

use crate::core::master::MasterClient;
use crate::core::state::ServerState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

/// Holds all the initialized state required to run the server's main loop.
pub struct ServerContext {
    pub state: Arc<ServerState>,
    pub master: Arc<dyn MasterClient>,
    /// Consumed by the spawner when it starts the client RPC endpoint.
    pub listener: Option<TcpListener>,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<()>,
}
