//! Attachment command handlers.

use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use super::{str_param, CmdResult};
use crate::rpc::RpcError;
use crate::state::DaemonState;

/// Decoded attachment size cap: 5 MiB.
const MAX_ATTACHMENT_BYTES: usize = 5 * 1024 * 1024;

/// Stored attachment metadata.
#[derive(Serialize)]
pub struct AttachmentMeta {
    pub id: String,
    pub name: String,
    pub mime: String,
    pub size: usize,
    pub stored_at: DateTime<Utc>,
}

/// `file.put(name, mime, base64)` → `AttachmentMeta`
pub async fn put(state: &Arc<DaemonState>, params: &Value) -> CmdResult {
    let name = str_param(params, "name")?;
    let mime = str_param(params, "mime")?;
    let encoded = str_param(params, "base64")?;

    // Ensure the caller holds an unlocked identity before writing blobs.
    state.service().await?;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| RpcError::invalid_params("base64 payload malformed"))?;
    if bytes.len() > MAX_ATTACHMENT_BYTES {
        return Err(RpcError::invalid_params(&format!(
            "attachment of {} bytes exceeds the 5 MiB cap",
            bytes.len()
        )));
    }

    let mut suffix = [0u8; 8];
    rand::rngs::OsRng.fill_bytes(&mut suffix);
    let id = format!("att_{}", hex::encode(suffix));

    let dir = state.data_dir.join("attachments");
    std::fs::create_dir_all(&dir).map_err(|e| RpcError::internal_error(&e.to_string()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))
            .map_err(|e| RpcError::internal_error(&e.to_string()))?;
    }
    let path = dir.join(format!("{id}.bin"));
    std::fs::write(&path, &bytes).map_err(|e| RpcError::internal_error(&e.to_string()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| RpcError::internal_error(&e.to_string()))?;
    }

    info!(id = %id, size = bytes.len(), "attachment stored");
    let meta = AttachmentMeta {
        id,
        name: name.to_string(),
        mime: mime.to_string(),
        size: bytes.len(),
        stored_at: Utc::now(),
    };
    Ok(serde_json::json!(meta))
}
