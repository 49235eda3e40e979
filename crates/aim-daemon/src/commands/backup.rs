//! Backup export.
//!
//! Emits an encrypted blob of the daemon's state files. There is no
//! import path; restore goes through `identity.import_seed`.

use std::sync::Arc;

use base64::Engine;
use serde_json::Value;
use tracing::info;

use super::{str_param, CmdResult};
use crate::rpc::RpcError;
use crate::state::DaemonState;

/// The fixed consent token the caller must echo.
const CONSENT_TOKEN: &str = "I_UNDERSTAND_BACKUP_RISK";

/// State files swept into the backup when present.
const BACKUP_FILES: &[&str] = &[
    "identity/seed.json",
    "identity/identity.json",
    "privacy.json",
    "blocklist.json",
    "requests.json",
];

/// `backup.export(consent_token, passphrase)` → `{backup_blob}`
pub async fn export(state: &Arc<DaemonState>, params: &Value) -> CmdResult {
    let consent = str_param(params, "consent_token")?;
    if consent != CONSENT_TOKEN {
        return Err(RpcError::backup_consent_required());
    }
    let passphrase = str_param(params, "passphrase")?;
    state.service().await?;

    let mut files = serde_json::Map::new();
    for name in BACKUP_FILES {
        let path = state.data_dir.join(name);
        if let Ok(bytes) = std::fs::read(&path) {
            files.insert(
                (*name).to_string(),
                Value::String(base64::engine::general_purpose::STANDARD.encode(bytes)),
            );
        }
    }
    let file_count = files.len();
    let payload = serde_json::json!({ "version": 1, "files": files });
    let plain =
        serde_json::to_vec(&payload).map_err(|e| RpcError::internal_error(&e.to_string()))?;

    let sealed = aim_crypto::envelope::seal(passphrase, &plain)
        .map_err(|e| RpcError::internal_error(&e.to_string()))?;
    let sealed_bytes =
        serde_json::to_vec(&sealed).map_err(|e| RpcError::internal_error(&e.to_string()))?;

    info!(files = file_count, "backup exported");
    Ok(serde_json::json!({
        "backup_blob": base64::engine::general_purpose::STANDARD.encode(sealed_bytes),
    }))
}
