// src/server/mod.rs

use crate::config::Config;
use crate::core::master::{MasterClient, TcpMasterClient};
use anyhow::Result;
use std::sync::Arc;

mod context;
mod initialization;
mod main_loop;
mod spawner;

pub use context::ServerContext;
pub use initialization::{create_wal, report_for_duty, setup, wal_dir};

/// The main server startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    let master: Arc<dyn MasterClient> = Arc::new(TcpMasterClient::new(
        config.master_address,
        config.msg_interval,
    ));
    run_with_master(config, master).await
}

/// Runs the server against an explicit master client; the seam tests use to
/// drive the control loop with an in-process master.
pub async fn run_with_master(config: Config, master: Arc<dyn MasterClient>) -> Result<()> {
    // 1. Report for duty, settle configuration, create the WAL, bind the listener.
    let mut server_context = initialization::setup(config, master).await?;

    // 2. Spawn all background tasks.
    spawner::spawn_all(&mut server_context).await?;

    // 3. Run the master-dialog loop until shutdown completes.
    main_loop::run(server_context).await?;

    Ok(())
}
