//! Notification events pushed from the daemon to UI subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Notification method names.
pub mod methods {
    pub const MESSAGE_RECEIVED: &str = "notify.message.received";
    pub const MESSAGE_STATUS: &str = "notify.message.status";
    pub const MESSAGE_REQUEST: &str = "notify.message.request";
    pub const NETWORK_STATUS: &str = "notify.network.status";
    pub const DEVICE_REVOKED: &str = "notify.device.revoked";
}

/// A single notification with its hub-assigned sequence number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Strictly monotonic per hub.
    pub seq: i64,
    pub method: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}
