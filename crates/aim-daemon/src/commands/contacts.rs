//! Contact command handlers.

use std::sync::Arc;

use serde_json::Value;

use aim_identity::manager::verify_card;
use aim_types::identity::ContactCard;

use super::{str_param, CmdResult};
use crate::rpc::RpcError;
use crate::state::DaemonState;

/// `contact.add(card | [id, name])` → `{added}`
pub async fn add(state: &Arc<DaemonState>, params: &Value) -> CmdResult {
    let service = state.service().await?;
    let identity = service.identity();

    let contact = if let Some(card_value) = params.get("card") {
        let card: ContactCard = serde_json::from_value(card_value.clone())
            .map_err(|e| RpcError::invalid_params(&format!("malformed card: {e}")))?;
        identity.add_contact_card(&card).map_err(|e| {
            RpcError::from_messaging(aim_messaging::MessagingError::from(e))
        })?
    } else {
        let id = str_param(params, "id")?;
        let name = str_param(params, "name")?;
        identity
            .add_contact_by_id(id, name)
            .map_err(|e| RpcError::invalid_params(&e.to_string()))?
    };

    Ok(serde_json::json!({ "added": true, "contact": contact }))
}

/// `contact.remove(id)` → `{removed}`
pub async fn remove(state: &Arc<DaemonState>, params: &Value) -> CmdResult {
    let id = str_param(params, "id")?;
    let service = state.service().await?;
    let removed = service
        .identity()
        .remove_contact(id)
        .map_err(|e| RpcError::internal_error(&e.to_string()))?;
    Ok(serde_json::json!({ "removed": removed }))
}

/// `contact.verify(card)` → `{valid}`
pub async fn verify(params: &Value) -> CmdResult {
    let card_value = params
        .get("card")
        .ok_or_else(|| RpcError::invalid_params("card required"))?;
    let card: ContactCard = serde_json::from_value(card_value.clone())
        .map_err(|e| RpcError::invalid_params(&format!("malformed card: {e}")))?;
    Ok(serde_json::json!({ "valid": verify_card(&card).is_ok() }))
}

/// `contact.list` → `[Contact]`
pub async fn list(state: &Arc<DaemonState>) -> CmdResult {
    let service = state.service().await?;
    let contacts = service.identity().list_contacts();
    Ok(serde_json::json!({ "contacts": contacts }))
}
