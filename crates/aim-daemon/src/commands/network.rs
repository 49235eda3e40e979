//! Network and observability command handlers.

use std::sync::Arc;

use super::CmdResult;
use crate::state::DaemonState;

/// `network.status`
pub async fn status(state: &Arc<DaemonState>) -> CmdResult {
    let service = state.service().await?;
    Ok(serde_json::json!({ "status": service.network_status() }))
}

/// `metrics.get`
pub async fn metrics(state: &Arc<DaemonState>) -> CmdResult {
    let service = state.service().await?;
    Ok(serde_json::json!({ "metrics": service.metrics() }))
}
