//! Session command handlers.

use std::sync::Arc;

use base64::Engine;
use serde_json::Value;

use super::{str_param, CmdResult};
use crate::rpc::RpcError;
use crate::state::DaemonState;

/// `session.init(contact_id, peer_pub_b64)` → `SessionState`
pub async fn init(state: &Arc<DaemonState>, params: &Value) -> CmdResult {
    let contact_id = str_param(params, "contact_id")?;
    let peer_pub_b64 = str_param(params, "peer_pub_b64")?;

    let peer_pub: [u8; 32] = base64::engine::general_purpose::STANDARD
        .decode(peer_pub_b64)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| RpcError::invalid_params("peer_pub_b64 must decode to 32 bytes"))?;

    let service = state.service().await?;
    if !service.identity().is_known_contact(contact_id) {
        return Err(RpcError::not_found(&format!("contact {contact_id}")));
    }
    let local_id = service
        .identity()
        .identity_id()
        .map_err(|e| RpcError::internal_error(&e.to_string()))?;
    let session = service
        .sessions()
        .init_session(&local_id, contact_id, peer_pub)
        .map_err(|e| RpcError::internal_error(&e.to_string()))?;
    Ok(serde_json::json!({ "session": session }))
}
