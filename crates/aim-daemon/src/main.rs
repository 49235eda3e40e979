//! aimd: the AIM private-messaging daemon.
//!
//! Single OS process on a Tokio runtime. UI clients talk JSON-RPC over a
//! Unix socket in the data directory; notifications stream over the same
//! socket via `notify.subscribe`.

mod commands;
mod config;
mod rpc;
mod state;

use tracing::{info, warn};

use crate::config::DaemonConfig;
use crate::rpc::RpcServer;
use crate::state::DaemonState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("aim=info".parse()?),
        )
        .init();

    info!("aim daemon starting");

    let config = DaemonConfig::load()?;
    let data_dir = config.data_dir();
    let state = DaemonState::new(config, data_dir.clone())?;

    // A passphrase in the environment unlocks a persisted identity at
    // boot; otherwise the first identity.create/import_seed call does it.
    if let Ok(passphrase) = std::env::var("AIM_PASSPHRASE") {
        match state.unlock_identity(&passphrase).await {
            Ok(identity) => info!(identity = %identity.id, "identity unlocked from environment"),
            Err(e) => warn!("startup unlock failed: {}", e.message),
        }
    }

    let socket_path = data_dir.join("aimd.sock");
    let server = RpcServer::new(state.clone(), socket_path.clone());

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                tracing::error!("RPC server error: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
        }
    }

    if let Some(service) = state.try_service().await {
        if let Err(e) = service.stop_networking().await {
            warn!("shutdown error: {e}");
        }
    }
    let _ = std::fs::remove_file(&socket_path);

    info!("daemon stopped");
    Ok(())
}
