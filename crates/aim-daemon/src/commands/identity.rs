//! Identity command handlers.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use aim_identity::seed::SeedStore;

use super::{str_param, CmdResult};
use crate::rpc::RpcError;
use crate::state::DaemonState;

/// `identity.get`
pub async fn get(state: &Arc<DaemonState>) -> CmdResult {
    let service = state.service().await?;
    let identity = service
        .identity()
        .identity()
        .map_err(|e| RpcError::internal_error(&e.to_string()))?;
    Ok(serde_json::json!({ "identity": identity }))
}

/// `identity.create(password)` → `{identity, mnemonic}`
pub async fn create(state: &Arc<DaemonState>, params: &Value) -> CmdResult {
    let password = str_param(params, "password")?;
    info!("creating identity");
    let (identity, mnemonic) = state.create_identity(password).await?;
    Ok(serde_json::json!({ "identity": identity, "mnemonic": mnemonic }))
}

/// `identity.import_seed(mnemonic, password)`
pub async fn import_seed(state: &Arc<DaemonState>, params: &Value) -> CmdResult {
    let mnemonic = str_param(params, "mnemonic")?;
    let password = str_param(params, "password")?;
    info!("importing identity from seed");
    let identity = state.import_identity(mnemonic, password).await?;
    Ok(serde_json::json!({ "identity": identity }))
}

/// `identity.export_seed(password)` → `{mnemonic}`
pub async fn export_seed(state: &Arc<DaemonState>, params: &Value) -> CmdResult {
    let password = str_param(params, "password")?;
    let service = state.service().await?;
    let mnemonic = service
        .identity()
        .seed_store()
        .export(password)
        .map_err(|e| RpcError::unauthorized(&e.to_string()))?;
    Ok(serde_json::json!({ "mnemonic": mnemonic }))
}

/// `identity.change_password(old, new)` → `{changed}`
pub async fn change_password(state: &Arc<DaemonState>, params: &Value) -> CmdResult {
    let old = str_param(params, "old")?;
    let new = str_param(params, "new")?;
    let service = state.service().await?;
    service
        .identity()
        .change_password(old, new)
        .map_err(|e| RpcError::unauthorized(&e.to_string()))?;
    Ok(serde_json::json!({ "changed": true }))
}

/// `identity.validate_mnemonic(mnemonic)` → `{valid}`
pub async fn validate_mnemonic(params: &Value) -> CmdResult {
    let mnemonic = str_param(params, "mnemonic")?;
    Ok(serde_json::json!({ "valid": SeedStore::validate_mnemonic(mnemonic) }))
}

/// `identity.self_contact_card(name)`
pub async fn self_contact_card(state: &Arc<DaemonState>, params: &Value) -> CmdResult {
    let name = str_param(params, "name")?;
    let service = state.service().await?;
    let card = service
        .identity()
        .self_contact_card(name)
        .map_err(|e| RpcError::internal_error(&e.to_string()))?;
    Ok(serde_json::json!({ "card": card }))
}
