//! # aim-transport
//!
//! The abstract gossip node consumed by the messaging core, plus the
//! in-process mock transport used by tests and local development.
//!
//! The core talks only to [`TransportNode`]; concrete backends (the mock
//! bus here, a gossip backend elsewhere) are plug-ins injected at
//! construction. History fetches of real backends run through the
//! store-query fanout in [`fanout`].

pub mod fanout;
pub mod mock;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aim_types::wire::PrivateMessage;

/// Error types for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The node is not started.
    #[error("transport not started")]
    NotStarted,

    /// The recipient could not be reached; retried in the background.
    #[error("unreachable recipient: {0}")]
    Unreachable(String),

    /// Publishing failed.
    #[error("publish failed: {0}")]
    Publish(String),

    /// A call exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Subscription management failed.
    #[error("subscribe failed: {0}")]
    Subscribe(String),

    /// Malformed call.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Connection state of the node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Degraded,
}

/// A point-in-time node status snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub state: LinkState,
    pub peer_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    /// Where the active bootstrap set came from: `manifest`, `cache`,
    /// `baked`, or `none`.
    pub bootstrap_source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_version: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_key_id: Option<String>,
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self {
            state: LinkState::Disconnected,
            peer_count: 0,
            last_sync: None,
            bootstrap_source: "none".to_string(),
            manifest_version: None,
            manifest_key_id: None,
        }
    }
}

/// Reconnect backoff policy applied to the node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    pub base_ms: u32,
    pub max_ms: u32,
    pub jitter_ratio: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_ms: 1000,
            max_ms: 30_000,
            jitter_ratio: 0.2,
        }
    }
}

/// The tuple applied to the transport at start: where to connect and how
/// eagerly to reconnect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BootstrapSet {
    pub bootstrap_nodes: Vec<String>,
    pub min_peers: u32,
    pub reconnect_policy: ReconnectPolicy,
}

impl Default for BootstrapSet {
    fn default() -> Self {
        Self {
            bootstrap_nodes: Vec::new(),
            min_peers: 1,
            reconnect_policy: ReconnectPolicy::default(),
        }
    }
}

/// Bootstrap configuration pushed into the node before start (and on
/// refresh while running).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppliedBootstrap {
    pub source: String,
    pub manifest_version: Option<i32>,
    pub manifest_key_id: Option<String>,
    pub set: BootstrapSet,
}

/// Inbound delivery callback. Called once per wire; implementations hand
/// off to a channel rather than doing work inline.
pub type PrivateMessageHandler = Arc<dyn Fn(PrivateMessage) + Send + Sync>;

/// The abstract gossip node.
#[async_trait]
pub trait TransportNode: Send + Sync {
    /// Connect to the network. Idempotent.
    async fn start(&self) -> Result<()>;

    /// Disconnect. Idempotent.
    async fn stop(&self) -> Result<()>;

    /// Point-in-time status snapshot.
    fn status(&self) -> NodeStatus;

    /// Bind the node to a local identity id before starting.
    fn set_identity(&self, identity_id: &str);

    /// Apply a bootstrap set. May be called before start and again on
    /// refresh.
    fn apply_bootstrap(&self, bootstrap: AppliedBootstrap);

    /// Register the inbound delivery handler.
    fn subscribe_private(&self, handler: PrivateMessageHandler) -> Result<()>;

    /// Publish one wire to its recipient. Callers wrap this in a timeout.
    async fn publish_private(&self, message: PrivateMessage) -> Result<()>;

    /// Best-effort history fetch; mock transports return an empty page.
    async fn fetch_private_since(
        &self,
        recipient: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PrivateMessage>>;

    /// Local listen addresses, for diagnostics.
    fn listen_addresses(&self) -> Vec<String>;

    /// Counter snapshot for `metrics.get`.
    fn network_metrics(&self) -> HashMap<String, i64>;
}
