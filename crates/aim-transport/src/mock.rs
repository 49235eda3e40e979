//! In-process mock transport.
//!
//! A process-wide [`MockBus`] routes wires between any number of node
//! instances by recipient id, with a per-recipient mailbox for wires
//! published after a node attached but before it subscribed. Publishing to
//! an identity that is not attached fails as unreachable, which is what
//! drives the pending-retry path in tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use aim_types::wire::PrivateMessage;

use crate::fanout::{store_query_fanout, DEFAULT_STORE_QUERY_FANOUT};
use crate::{
    AppliedBootstrap, LinkState, NodeStatus, PrivateMessageHandler, Result, TransportError,
    TransportNode,
};

#[derive(Default)]
struct BusInner {
    attached: HashSet<String>,
    handlers: HashMap<String, PrivateMessageHandler>,
    mailboxes: HashMap<String, Vec<PrivateMessage>>,
    fail_recipients: HashSet<String>,
}

/// The in-process message router shared by every mock node in a test.
#[derive(Default)]
pub struct MockBus {
    inner: Mutex<BusInner>,
}

impl MockBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Force publishes to `recipient` to fail (delivery fault injection).
    pub fn set_publish_failure(&self, recipient: &str, fail: bool) {
        let mut inner = self.lock();
        if fail {
            inner.fail_recipients.insert(recipient.to_string());
        } else {
            inner.fail_recipients.remove(recipient);
        }
    }

    /// Number of attached identities other than `exclude`.
    fn peer_count(&self, exclude: &str) -> u32 {
        self.lock()
            .attached
            .iter()
            .filter(|id| id.as_str() != exclude)
            .count() as u32
    }

    fn attach(&self, identity_id: &str) {
        let mut inner = self.lock();
        inner.attached.insert(identity_id.to_string());
        inner.mailboxes.entry(identity_id.to_string()).or_default();
    }

    fn detach(&self, identity_id: &str) {
        let mut inner = self.lock();
        inner.attached.remove(identity_id);
        inner.handlers.remove(identity_id);
    }

    /// Register the delivery handler and drain any mailboxed wires.
    fn subscribe(&self, identity_id: &str, handler: PrivateMessageHandler) {
        let backlog = {
            let mut inner = self.lock();
            inner
                .handlers
                .insert(identity_id.to_string(), handler.clone());
            inner
                .mailboxes
                .get_mut(identity_id)
                .map(std::mem::take)
                .unwrap_or_default()
        };
        for message in backlog {
            handler(message);
        }
    }

    /// Route a wire: handler if subscribed, mailbox if only attached,
    /// unreachable otherwise. Returns `true` when handed to a handler.
    fn deliver(&self, message: PrivateMessage) -> Result<bool> {
        let (handler, mailboxed) = {
            let mut inner = self.lock();
            if inner.fail_recipients.contains(&message.recipient) {
                return Err(TransportError::Publish(format!(
                    "injected failure for {}",
                    message.recipient
                )));
            }
            if !inner.attached.contains(&message.recipient) {
                return Err(TransportError::Unreachable(message.recipient.clone()));
            }
            match inner.handlers.get(&message.recipient).cloned() {
                Some(handler) => (Some(handler), false),
                None => {
                    inner
                        .mailboxes
                        .entry(message.recipient.clone())
                        .or_default()
                        .push(message.clone());
                    (None, true)
                }
            }
        };
        if let Some(handler) = handler {
            handler(message);
            return Ok(true);
        }
        debug!(mailboxed, "wire mailboxed pending subscription");
        Ok(false)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[derive(Default)]
struct NodeState {
    started: bool,
    identity: Option<String>,
    handler: Option<PrivateMessageHandler>,
    bootstrap: Option<AppliedBootstrap>,
    last_sync: Option<DateTime<Utc>>,
    metrics: HashMap<String, i64>,
}

/// One mock node bound to a [`MockBus`].
pub struct MockTransport {
    bus: Arc<MockBus>,
    state: Mutex<NodeState>,
}

impl MockTransport {
    pub fn new(bus: Arc<MockBus>) -> Self {
        Self {
            bus,
            state: Mutex::new(NodeState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NodeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn bump(&self, metric: &str) {
        *self.lock().metrics.entry(metric.to_string()).or_insert(0) += 1;
    }
}

#[async_trait]
impl TransportNode for MockTransport {
    async fn start(&self) -> Result<()> {
        let (identity, handler) = {
            let mut state = self.lock();
            if state.started {
                return Ok(());
            }
            let identity = state
                .identity
                .clone()
                .ok_or_else(|| TransportError::InvalidInput("identity not set".into()))?;
            state.started = true;
            state.last_sync = Some(Utc::now());
            (identity, state.handler.clone())
        };

        self.bus.attach(&identity);
        if let Some(handler) = handler {
            self.bus.subscribe(&identity, handler);
        }
        debug!(identity = %identity, "mock transport started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let identity = {
            let mut state = self.lock();
            if !state.started {
                return Ok(());
            }
            state.started = false;
            state.identity.clone()
        };
        if let Some(identity) = identity {
            self.bus.detach(&identity);
        }
        Ok(())
    }

    fn status(&self) -> NodeStatus {
        let state = self.lock();
        let (link, peers) = match (&state.started, &state.identity) {
            (true, Some(identity)) => (LinkState::Connected, self.bus.peer_count(identity)),
            _ => (LinkState::Disconnected, 0),
        };
        let bootstrap = state.bootstrap.as_ref();
        NodeStatus {
            state: link,
            peer_count: peers,
            last_sync: state.last_sync,
            bootstrap_source: bootstrap
                .map(|b| b.source.clone())
                .unwrap_or_else(|| "none".to_string()),
            manifest_version: bootstrap.and_then(|b| b.manifest_version),
            manifest_key_id: bootstrap.and_then(|b| b.manifest_key_id.clone()),
        }
    }

    fn set_identity(&self, identity_id: &str) {
        self.lock().identity = Some(identity_id.to_string());
    }

    fn apply_bootstrap(&self, bootstrap: AppliedBootstrap) {
        self.lock().bootstrap = Some(bootstrap);
    }

    fn subscribe_private(&self, handler: PrivateMessageHandler) -> Result<()> {
        let (identity, started) = {
            let mut state = self.lock();
            state.handler = Some(handler.clone());
            (state.identity.clone(), state.started)
        };
        if started {
            let identity =
                identity.ok_or_else(|| TransportError::Subscribe("identity not set".into()))?;
            self.bus.subscribe(&identity, handler);
        }
        Ok(())
    }

    async fn publish_private(&self, message: PrivateMessage) -> Result<()> {
        if !self.lock().started {
            return Err(TransportError::NotStarted);
        }
        if message.recipient.is_empty() {
            return Err(TransportError::InvalidInput("recipient required".into()));
        }

        self.bump("published");
        match self.bus.deliver(message) {
            Ok(true) => {
                self.bump("delivered");
                self.lock().last_sync = Some(Utc::now());
                Ok(())
            }
            Ok(false) => {
                self.bump("mailboxed");
                Ok(())
            }
            Err(e) => {
                self.bump("publish_failed");
                Err(e)
            }
        }
    }

    async fn fetch_private_since(
        &self,
        _recipient: &str,
        _since: DateTime<Utc>,
        _limit: usize,
    ) -> Result<Vec<PrivateMessage>> {
        if !self.lock().started {
            return Err(TransportError::NotStarted);
        }
        // No store peers behind the bus; the peerless fallback returns an
        // empty page.
        let outcome = store_query_fanout(&[], DEFAULT_STORE_QUERY_FANOUT, |_| async {
            Ok(Vec::new())
        })
        .await?;
        if outcome.failover {
            self.bump("store_query_failover");
        }
        Ok(outcome.result)
    }

    fn listen_addresses(&self) -> Vec<String> {
        match self.lock().identity.as_ref() {
            Some(identity) => vec![format!("mock://{identity}")],
            None => Vec::new(),
        }
    }

    fn network_metrics(&self) -> HashMap<String, i64> {
        self.lock().metrics.clone()
    }
}
