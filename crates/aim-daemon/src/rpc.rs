//! JSON-RPC server over a Unix socket.
//!
//! Line-delimited JSON-RPC 2.0. `notify.subscribe` upgrades the
//! connection: after the response, hub events stream to the client as
//! notification lines (`params: {version, seq, payload}`), the same shape
//! the HTTP/SSE front end emits.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tracing::{debug, error, info, warn};

use aim_messaging::{DeviceRevocationDeliveryError, ErrorCategory, MessagingError};

use crate::commands;
use crate::state::DaemonState;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: serde_json::Value,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcError {
    pub fn parse_error() -> Self {
        Self {
            code: -32700,
            message: "PARSE_ERROR".to_string(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: "METHOD_NOT_FOUND".to_string(),
            data: Some(serde_json::json!({ "method": method })),
        }
    }

    pub fn invalid_params(detail: &str) -> Self {
        Self {
            code: -32602,
            message: "INVALID_PARAMS".to_string(),
            data: Some(serde_json::json!({ "detail": detail })),
        }
    }

    pub fn internal_error(detail: &str) -> Self {
        Self {
            code: -32603,
            message: "INTERNAL_ERROR".to_string(),
            data: Some(serde_json::json!({ "detail": detail })),
        }
    }

    pub fn identity_locked() -> Self {
        Self {
            code: -32010,
            message: "IDENTITY_LOCKED".to_string(),
            data: None,
        }
    }

    /// Missing or wrong backup consent token (-32024).
    pub fn backup_consent_required() -> Self {
        Self {
            code: -32024,
            message: "BACKUP_CONSENT_REQUIRED".to_string(),
            data: None,
        }
    }

    /// Invalid privacy mode (-32081).
    pub fn invalid_privacy_mode(mode: &str) -> Self {
        Self {
            code: -32081,
            message: "INVALID_PRIVACY_MODE".to_string(),
            data: Some(serde_json::json!({ "mode": mode })),
        }
    }

    /// Invalid identity id on blocklist add (-32091).
    pub fn invalid_blocklist_add(id: &str) -> Self {
        Self {
            code: -32091,
            message: "INVALID_IDENTITY_ID".to_string(),
            data: Some(serde_json::json!({ "id": id })),
        }
    }

    /// Invalid identity id on blocklist remove (-32092).
    pub fn invalid_blocklist_remove(id: &str) -> Self {
        Self {
            code: -32092,
            message: "INVALID_IDENTITY_ID".to_string(),
            data: Some(serde_json::json!({ "id": id })),
        }
    }

    pub fn not_found(detail: &str) -> Self {
        Self {
            code: -32001,
            message: "NOT_FOUND".to_string(),
            data: Some(serde_json::json!({ "detail": detail })),
        }
    }

    pub fn unauthorized(detail: &str) -> Self {
        Self {
            code: -32002,
            message: "UNAUTHORIZED".to_string(),
            data: Some(serde_json::json!({ "detail": detail })),
        }
    }

    pub fn conflict(detail: &str) -> Self {
        Self {
            code: -32003,
            message: "CONFLICT".to_string(),
            data: Some(serde_json::json!({ "detail": detail })),
        }
    }

    /// Aggregate device-revocation delivery failure (-32053 partial,
    /// -32054 full).
    pub fn revocation_delivery(error: &DeviceRevocationDeliveryError) -> Self {
        let code = if error.is_full_failure() { -32054 } else { -32053 };
        Self {
            code,
            message: "DEVICE_REVOCATION_DELIVERY_FAILED".to_string(),
            data: Some(serde_json::json!({
                "attempted": error.attempted,
                "failed": error.failed,
                "failures": error.failures,
            })),
        }
    }

    /// Map a service error onto the RPC surface.
    pub fn from_messaging(error: MessagingError) -> Self {
        match &error {
            MessagingError::RevocationDelivery(delivery) => Self::revocation_delivery(delivery),
            _ => match error.category() {
                ErrorCategory::InvalidParams => Self::invalid_params(&error.to_string()),
                ErrorCategory::NotFound => Self::not_found(&error.to_string()),
                ErrorCategory::Unauthorized => Self::unauthorized(&error.to_string()),
                ErrorCategory::Conflict => Self::conflict(&error.to_string()),
                _ => Self::internal_error(&error.to_string()),
            },
        }
    }
}

/// The RPC server.
pub struct RpcServer {
    state: Arc<DaemonState>,
    socket_path: PathBuf,
}

impl RpcServer {
    pub fn new(state: Arc<DaemonState>, socket_path: PathBuf) -> Self {
        Self { state, socket_path }
    }

    /// Accept connections until the process shuts down.
    pub async fn run(&self) -> anyhow::Result<()> {
        let _ = std::fs::remove_file(&self.socket_path);
        let listener = UnixListener::bind(&self.socket_path)?;
        info!("RPC server listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            warn!("connection error: {e}");
                        }
                    });
                }
                Err(e) => error!("accept error: {e}"),
            }
        }
    }
}

async fn handle_connection(
    state: Arc<DaemonState>,
    stream: tokio::net::UnixStream,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }

        let request = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => request,
            Err(_) => {
                write_json(
                    &mut writer,
                    &RpcResponse::error(serde_json::Value::Null, RpcError::parse_error()),
                )
                .await?;
                continue;
            }
        };

        // Event streaming upgrades the connection.
        if request.method == "notify.subscribe" {
            let cursor = request
                .params
                .get("cursor")
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            let response =
                RpcResponse::success(request.id.clone(), serde_json::json!({ "subscribed": true }));
            write_json(&mut writer, &response).await?;
            return stream_events(state, writer, cursor).await;
        }

        let response = dispatch_request(state.clone(), request).await;
        write_json(&mut writer, &response).await?;
    }

    Ok(())
}

async fn write_json<W, T>(writer: &mut W, value: &T) -> anyhow::Result<()>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let mut text = serde_json::to_string(value)?;
    text.push('\n');
    writer.write_all(text.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Forward hub events to the connection, replaying past the cursor first.
async fn stream_events(
    state: Arc<DaemonState>,
    mut writer: tokio::net::unix::OwnedWriteHalf,
    cursor: i64,
) -> anyhow::Result<()> {
    let service = match state.try_service().await {
        Some(service) => service,
        None => return Ok(()),
    };
    let hub = service.notifications().clone();
    let mut subscription = hub.subscribe(cursor);

    for event in subscription.replay.drain(..) {
        write_json(&mut writer, &notification_frame(&event)).await?;
    }
    while let Some(event) = subscription.receiver.recv().await {
        if write_json(&mut writer, &notification_frame(&event)).await.is_err() {
            break;
        }
    }
    hub.cancel(subscription.id);
    Ok(())
}

fn notification_frame(event: &aim_types::events::NotificationEvent) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": event.method,
        "params": {
            "version": 1,
            "seq": event.seq,
            "payload": event.payload,
        },
    })
}

/// Dispatch a request to its command handler.
pub async fn dispatch_request(state: Arc<DaemonState>, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    let method = request.method.as_str();
    let params = &request.params;
    debug!(method, "dispatching RPC method");

    let result = match method {
        // Identity
        "identity.get" => commands::identity::get(&state).await,
        "identity.create" => commands::identity::create(&state, params).await,
        "identity.import_seed" => commands::identity::import_seed(&state, params).await,
        "identity.export_seed" => commands::identity::export_seed(&state, params).await,
        "identity.change_password" => commands::identity::change_password(&state, params).await,
        "identity.validate_mnemonic" => commands::identity::validate_mnemonic(params).await,
        "identity.self_contact_card" => {
            commands::identity::self_contact_card(&state, params).await
        }

        // Contacts
        "contact.add" => commands::contacts::add(&state, params).await,
        "contact.remove" => commands::contacts::remove(&state, params).await,
        "contact.verify" => commands::contacts::verify(params).await,
        "contact.list" => commands::contacts::list(&state).await,

        // Devices
        "device.list" => commands::devices::list(&state).await,
        "device.add" => commands::devices::add(&state, params).await,
        "device.revoke" => commands::devices::revoke(&state, params).await,

        // Sessions
        "session.init" => commands::sessions::init(&state, params).await,

        // Messages
        "message.send" => commands::messages::send(&state, params).await,
        "message.list" => commands::messages::list(&state, params).await,
        "message.status" => commands::messages::status(&state, params).await,
        "message.edit" => commands::messages::edit(&state, params).await,
        "message.delete" => commands::messages::delete(&state, params).await,
        "message.clear" => commands::messages::clear(&state, params).await,

        // Privacy & blocklist
        "privacy.get" => commands::privacy::get(&state).await,
        "privacy.set" => commands::privacy::set(&state, params).await,
        "blocklist.add" => commands::privacy::blocklist_add(&state, params).await,
        "blocklist.remove" => commands::privacy::blocklist_remove(&state, params).await,
        "blocklist.list" => commands::privacy::blocklist_list(&state).await,

        // Message requests
        "request.list" => commands::privacy::request_list(&state).await,
        "request.get" => commands::privacy::request_get(&state, params).await,
        "request.accept" => commands::privacy::request_accept(&state, params).await,
        "request.decline" => commands::privacy::request_decline(&state, params).await,
        "request.block" => commands::privacy::request_block(&state, params).await,

        // Attachments & backup
        "file.put" => commands::files::put(&state, params).await,
        "backup.export" => commands::backup::export(&state, params).await,

        // Observability
        "network.status" => commands::network::status(&state).await,
        "metrics.get" => commands::network::metrics(&state).await,

        _ => Err(RpcError::method_not_found(method)),
    };

    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(err) => RpcResponse::error(id, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn error_codes_match_contract() {
        assert_eq!(RpcError::parse_error().code, -32700);
        assert_eq!(RpcError::invalid_params("x").code, -32602);
        assert_eq!(RpcError::backup_consent_required().code, -32024);
        assert_eq!(RpcError::invalid_privacy_mode("open").code, -32081);
        assert_eq!(RpcError::invalid_blocklist_add("x").code, -32091);
        assert_eq!(RpcError::invalid_blocklist_remove("x").code, -32092);
    }

    #[test]
    fn revocation_codes_split_partial_and_full() {
        let partial = DeviceRevocationDeliveryError {
            attempted: 2,
            failed: 1,
            failures: BTreeMap::new(),
        };
        assert_eq!(RpcError::revocation_delivery(&partial).code, -32053);

        let full = DeviceRevocationDeliveryError {
            attempted: 2,
            failed: 2,
            failures: BTreeMap::new(),
        };
        assert_eq!(RpcError::revocation_delivery(&full).code, -32054);
    }

    #[test]
    fn messaging_errors_map_by_category() {
        let err = RpcError::from_messaging(MessagingError::InvalidParams("x".into()));
        assert_eq!(err.code, -32602);
        let err = RpcError::from_messaging(MessagingError::UnknownContact("aim1x".into()));
        assert_eq!(err.code, -32001);
        let err = RpcError::from_messaging(MessagingError::Conflict("dup".into()));
        assert_eq!(err.code, -32003);
    }
}
