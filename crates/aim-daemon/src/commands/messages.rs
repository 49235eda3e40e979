//! Message command handlers.

use std::sync::Arc;

use serde_json::Value;

use super::{str_param, u32_param, CmdResult};
use crate::rpc::RpcError;
use crate::state::DaemonState;

/// `message.send(contact, content)` → `{message_id}`
pub async fn send(state: &Arc<DaemonState>, params: &Value) -> CmdResult {
    let contact = str_param(params, "contact")?;
    let content = str_param(params, "content")?;
    let service = state.service().await?;
    let message_id = service
        .send_message(contact, content.as_bytes())
        .await
        .map_err(RpcError::from_messaging)?;
    Ok(serde_json::json!({ "message_id": message_id }))
}

/// `message.list(contact, limit, offset)` → `[Message]`
pub async fn list(state: &Arc<DaemonState>, params: &Value) -> CmdResult {
    let contact = str_param(params, "contact")?;
    let limit = u32_param(params, "limit")?;
    let offset = u32_param(params, "offset")?;
    let service = state.service().await?;
    let messages = service
        .list_messages(contact, limit, offset)
        .await
        .map_err(RpcError::from_messaging)?;
    Ok(serde_json::json!({ "messages": messages }))
}

/// `message.status(id)` → `MessageStatus`
pub async fn status(state: &Arc<DaemonState>, params: &Value) -> CmdResult {
    let id = str_param(params, "id")?;
    let service = state.service().await?;
    let status = service
        .message_status(id)
        .map_err(RpcError::from_messaging)?;
    Ok(serde_json::json!({ "status": status }))
}

/// `message.edit(contact, id, content)` → `Message`
pub async fn edit(state: &Arc<DaemonState>, params: &Value) -> CmdResult {
    let contact = str_param(params, "contact")?;
    let id = str_param(params, "id")?;
    let content = str_param(params, "content")?;
    let service = state.service().await?;
    let message = service
        .edit_message(contact, id, content.as_bytes())
        .map_err(RpcError::from_messaging)?;
    Ok(serde_json::json!({ "message": message }))
}

/// `message.delete(contact, id)` → `{deleted}`
pub async fn delete(state: &Arc<DaemonState>, params: &Value) -> CmdResult {
    let contact = str_param(params, "contact")?;
    let id = str_param(params, "id")?;
    let service = state.service().await?;
    let deleted = service
        .delete_message(contact, id)
        .map_err(RpcError::from_messaging)?;
    Ok(serde_json::json!({ "deleted": deleted }))
}

/// `message.clear(contact)` → `{cleared}`
pub async fn clear(state: &Arc<DaemonState>, params: &Value) -> CmdResult {
    let contact = str_param(params, "contact")?;
    let service = state.service().await?;
    let cleared = service
        .clear_messages(contact)
        .map_err(RpcError::from_messaging)?;
    Ok(serde_json::json!({ "cleared": cleared }))
}
