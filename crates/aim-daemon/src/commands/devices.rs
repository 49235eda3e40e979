//! Device command handlers.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use super::{str_param, CmdResult};
use crate::rpc::RpcError;
use crate::state::DaemonState;

/// `device.list`
pub async fn list(state: &Arc<DaemonState>) -> CmdResult {
    let service = state.service().await?;
    Ok(serde_json::json!({ "devices": service.identity().list_devices() }))
}

/// `device.add(name)`
pub async fn add(state: &Arc<DaemonState>, params: &Value) -> CmdResult {
    let name = str_param(params, "name")?;
    let service = state.service().await?;
    let device = service
        .identity()
        .add_device(name)
        .map_err(|e| RpcError::internal_error(&e.to_string()))?;
    info!(device = %device.id, "device certified");
    Ok(serde_json::json!({ "device": device }))
}

/// `device.revoke(id)` → `DeviceRevocation`, with -32053/-32054 on
/// delivery failures.
pub async fn revoke(state: &Arc<DaemonState>, params: &Value) -> CmdResult {
    let id = str_param(params, "id")?;
    let service = state.service().await?;
    let revocation = service
        .revoke_device(id)
        .await
        .map_err(RpcError::from_messaging)?;
    Ok(serde_json::json!({ "revocation": revocation }))
}
