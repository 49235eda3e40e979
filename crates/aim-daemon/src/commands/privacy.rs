//! Privacy, blocklist and message-request command handlers.

use std::sync::Arc;

use serde_json::Value;

use aim_messaging::policy::PrivacyMode;
use aim_messaging::privacy::Blocklist;

use super::{str_param, CmdResult};
use crate::rpc::RpcError;
use crate::state::DaemonState;

/// `privacy.get` → `PrivacySettings`
pub async fn get(state: &Arc<DaemonState>) -> CmdResult {
    let service = state.service().await?;
    Ok(serde_json::json!(service.privacy_settings()))
}

/// `privacy.set(mode)` → `PrivacySettings`; unknown modes answer -32081.
pub async fn set(state: &Arc<DaemonState>, params: &Value) -> CmdResult {
    let mode_str = str_param(params, "mode")?;
    let mode = PrivacyMode::parse(mode_str)
        .ok_or_else(|| RpcError::invalid_privacy_mode(mode_str))?;
    let service = state.service().await?;
    let settings = service
        .set_privacy_mode(mode)
        .map_err(RpcError::from_messaging)?;
    Ok(serde_json::json!(settings))
}

/// `blocklist.add(id)` → `{blocked}`; implausible ids answer -32091.
pub async fn blocklist_add(state: &Arc<DaemonState>, params: &Value) -> CmdResult {
    let id = str_param(params, "id")?;
    Blocklist::validate_id(id).map_err(|_| RpcError::invalid_blocklist_add(id))?;
    let service = state.service().await?;
    let blocked = service.block_sender(id).map_err(RpcError::from_messaging)?;
    Ok(serde_json::json!({ "blocked": blocked }))
}

/// `blocklist.remove(id)` → `{unblocked}`; implausible ids answer -32092.
pub async fn blocklist_remove(state: &Arc<DaemonState>, params: &Value) -> CmdResult {
    let id = str_param(params, "id")?;
    Blocklist::validate_id(id).map_err(|_| RpcError::invalid_blocklist_remove(id))?;
    let service = state.service().await?;
    let unblocked = service
        .unblock_sender(id)
        .map_err(RpcError::from_messaging)?;
    Ok(serde_json::json!({ "unblocked": unblocked }))
}

/// `blocklist.list` → `[identity_id]`
pub async fn blocklist_list(state: &Arc<DaemonState>) -> CmdResult {
    let service = state.service().await?;
    Ok(serde_json::json!({ "blocked": service.blocked_senders() }))
}

/// `request.list` → `[RequestThread]`
pub async fn request_list(state: &Arc<DaemonState>) -> CmdResult {
    let service = state.service().await?;
    Ok(serde_json::json!({ "requests": service.list_requests() }))
}

/// `request.get(sender)` → `RequestThread`
pub async fn request_get(state: &Arc<DaemonState>, params: &Value) -> CmdResult {
    let sender = str_param(params, "sender")?;
    let service = state.service().await?;
    let thread = service
        .get_request(sender)
        .ok_or_else(|| RpcError::not_found(&format!("request thread {sender}")))?;
    Ok(serde_json::json!({ "request": thread }))
}

/// `request.accept(sender)` → `{accepted}`
pub async fn request_accept(state: &Arc<DaemonState>, params: &Value) -> CmdResult {
    let sender = str_param(params, "sender")?;
    let service = state.service().await?;
    let moved = service
        .accept_request(sender)
        .map_err(RpcError::from_messaging)?;
    Ok(serde_json::json!({ "accepted": true, "messages_moved": moved }))
}

/// `request.decline(sender)` → `{declined}`
pub async fn request_decline(state: &Arc<DaemonState>, params: &Value) -> CmdResult {
    let sender = str_param(params, "sender")?;
    let service = state.service().await?;
    let declined = service
        .decline_request(sender)
        .map_err(RpcError::from_messaging)?;
    Ok(serde_json::json!({ "declined": declined }))
}

/// `request.block(sender)` → `{blocked}`
pub async fn request_block(state: &Arc<DaemonState>, params: &Value) -> CmdResult {
    let sender = str_param(params, "sender")?;
    let service = state.service().await?;
    service
        .block_request(sender)
        .map_err(RpcError::from_messaging)?;
    Ok(serde_json::json!({ "blocked": true }))
}
