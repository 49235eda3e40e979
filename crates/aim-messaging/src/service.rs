//! The messaging service: orchestrates outbound and inbound flows.
//!
//! Outbound: allocate an id, persist as pending, build and sign the wire,
//! publish under a timeout; network failures land in the pending queue and
//! are retried by a single background loop with exponential backoff.
//! Inbound: policy → trust → device auth → receipt handling → decryption,
//! then persistence and notification fan-out.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use aim_db::MessageRepository;
use aim_identity::manager::IdentityManager;
use aim_session::SessionManager;
use aim_types::events::methods;
use aim_types::identity::DeviceRevocation;
use aim_types::message::{ContentType, Direction, Message, MessageStatus, PendingMessage};
use aim_types::wire::{PrivateMessage, WireKind, WirePayload};
use aim_types::{MESSAGE_PREFIX, RECEIPT_PREFIX};
use aim_transport::{LinkState, NodeStatus, PrivateMessageHandler, TransportNode};

use crate::metrics::MetricsState;
use crate::notify::NotificationHub;
use crate::policy::{self, PolicyAction, PolicyInput, PrivacyMode};
use crate::privacy::{Blocklist, PrivacySettings, PrivacyStore};
use crate::requests::{RequestInbox, RequestThread};
use crate::wire;
use crate::{
    DeviceRevocationDeliveryError, ErrorCategory, MessagingError, Result,
};

/// Wire id prefix for device-revocation fan-out wires.
const REVOCATION_PREFIX: &str = "rev_";

/// Retry backoff: `min(2·2^(k−1), 30)` seconds for attempt `k`.
pub fn backoff(retry_count: u32) -> StdDuration {
    let k = retry_count.clamp(1, 5);
    StdDuration::from_secs((1u64 << k).min(30))
}

/// Allocate a fresh wire id with the given prefix.
fn new_wire_id(prefix: &str) -> String {
    let mut bytes = [0u8; 12];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!("{prefix}{}", hex::encode(bytes))
}

/// Service tuning knobs.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Display name advertised on self contact cards.
    pub display_name: String,
    /// Deadline wrapped around every `publish_private`.
    pub publish_timeout: StdDuration,
    /// Retry-loop cadence.
    pub retry_tick: StdDuration,
    /// Pending-queue window drained once at startup.
    pub startup_recovery_window: StdDuration,
    /// Deadline for `transport.stop`.
    pub stop_timeout: StdDuration,
    /// Attach the self contact card to plain wires.
    pub attach_self_card: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            display_name: "aim".to_string(),
            publish_timeout: StdDuration::from_secs(5),
            retry_tick: StdDuration::from_secs(1),
            startup_recovery_window: StdDuration::from_secs(24 * 3600),
            stop_timeout: StdDuration::from_secs(2),
            attach_self_card: true,
        }
    }
}

#[derive(Default)]
struct RuntimeState {
    running: bool,
    shutdown: Option<broadcast::Sender<()>>,
    retry_task: Option<JoinHandle<()>>,
    inbound_task: Option<JoinHandle<()>>,
}

/// The orchestrator. Construct with [`MessagingService::new`] and share as
/// an `Arc`.
pub struct MessagingService {
    identity: Arc<IdentityManager>,
    sessions: Arc<SessionManager>,
    repo: Arc<dyn MessageRepository>,
    transport: Arc<dyn TransportNode>,
    hub: Arc<NotificationHub>,
    privacy: PrivacyStore,
    blocklist: Blocklist,
    requests: RequestInbox,
    metrics: Arc<MetricsState>,
    config: ServiceConfig,
    runtime: tokio::sync::Mutex<RuntimeState>,
}

impl MessagingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: Arc<IdentityManager>,
        sessions: Arc<SessionManager>,
        repo: Arc<dyn MessageRepository>,
        transport: Arc<dyn TransportNode>,
        hub: Arc<NotificationHub>,
        privacy: PrivacyStore,
        blocklist: Blocklist,
        requests: RequestInbox,
        config: ServiceConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            identity,
            sessions,
            repo,
            transport,
            hub,
            privacy,
            blocklist,
            requests,
            metrics: Arc::new(MetricsState::new()),
            config,
            runtime: tokio::sync::Mutex::new(RuntimeState::default()),
        })
    }

    pub fn identity(&self) -> &Arc<IdentityManager> {
        &self.identity
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn notifications(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    pub fn metrics_state(&self) -> &Arc<MetricsState> {
        &self.metrics
    }

    // ---- networking lifecycle ----

    /// Attach to the transport and start the background tasks. Serialized
    /// with [`stop_networking`](Self::stop_networking) and idempotent.
    pub async fn start_networking(self: &Arc<Self>) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        if runtime.running {
            return Ok(());
        }

        let identity_id = self.identity.identity_id()?;
        self.transport.set_identity(&identity_id);

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let backlog_tx = inbound_tx.clone();
        let handler: PrivateMessageHandler = Arc::new(move |message| {
            // Channel hand-off only; processing happens on the inbound task.
            let _ = inbound_tx.send(message);
        });
        self.transport.subscribe_private(handler)?;
        self.transport.start().await?;

        // Best-effort history fetch; mock transports return an empty page.
        let since = Utc::now() - Duration::hours(24);
        match tokio::time::timeout(
            self.config.publish_timeout,
            self.transport.fetch_private_since(&identity_id, since, 256),
        )
        .await
        {
            Ok(Ok(backlog)) => {
                for message in backlog {
                    let _ = backlog_tx.send(message);
                }
            }
            Ok(Err(e)) => debug!(error = %e, "history fetch failed"),
            Err(_) => debug!("history fetch timed out"),
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        runtime.inbound_task = Some(self.spawn_inbound_task(inbound_rx, shutdown_tx.subscribe()));
        runtime.retry_task = Some(self.spawn_retry_task(shutdown_tx.subscribe()));
        runtime.shutdown = Some(shutdown_tx);
        runtime.running = true;
        info!(identity = %identity_id, "networking started");
        Ok(())
    }

    /// Stop the background tasks (joining them) and detach the transport.
    /// Idempotent.
    pub async fn stop_networking(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        if !runtime.running {
            return Ok(());
        }
        if let Some(shutdown) = runtime.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = runtime.retry_task.take() {
            let _ = task.await;
        }
        if let Some(task) = runtime.inbound_task.take() {
            let _ = task.await;
        }
        match tokio::time::timeout(self.config.stop_timeout, self.transport.stop()).await {
            Ok(result) => result?,
            Err(_) => warn!("transport stop timed out"),
        }
        runtime.running = false;
        info!("networking stopped");
        Ok(())
    }

    fn spawn_inbound_task(
        self: &Arc<Self>,
        mut inbound_rx: mpsc::UnboundedReceiver<PrivateMessage>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    maybe = inbound_rx.recv() => match maybe {
                        Some(message) => service.handle_inbound(message).await,
                        None => break,
                    },
                }
            }
        })
    }

    fn spawn_retry_task(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            // Startup recovery: push out anything recent without waiting
            // for the first tick.
            let window =
                Utc::now() + Duration::from_std(service.config.startup_recovery_window)
                    .unwrap_or_else(|_| Duration::hours(24));
            service.drain_due(window).await;

            let mut last_status: Option<(LinkState, u32)> = None;
            service.emit_network_status(&mut last_status, true);

            let mut interval = tokio::time::interval(service.config.retry_tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = interval.tick() => {
                        service.emit_network_status(&mut last_status, false);
                        service.drain_due(Utc::now()).await;
                    }
                }
            }
        })
    }

    /// Emit a network-status notification when `(state, peer_count)`
    /// changed, or unconditionally when forced.
    fn emit_network_status(&self, last: &mut Option<(LinkState, u32)>, force: bool) {
        let status = self.transport.status();
        let key = (status.state, status.peer_count);
        if force || last.map_or(true, |prev| prev != key) {
            self.hub.publish(
                methods::NETWORK_STATUS,
                serde_json::json!({ "status": status }),
            );
            *last = Some(key);
        }
    }

    /// Republish every pending message due inside the window.
    async fn drain_due(&self, window: DateTime<Utc>) {
        let due = match self.repo.due_pending(window) {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "pending scan failed");
                self.metrics.inc_category(ErrorCategory::Storage);
                return;
            }
        };
        for pending in due {
            self.retry_pending(pending).await;
        }
    }

    async fn retry_pending(&self, pending: PendingMessage) {
        match self.publish_message_wire(&pending.message).await {
            Ok(()) => {
                if let Err(e) = self.mark_sent(&pending.message.id) {
                    warn!(error = %e, "post-publish bookkeeping failed");
                }
            }
            Err(e) => {
                self.metrics.inc_category(e.category());
                let count = pending.retry_count + 1;
                let next = Utc::now()
                    + Duration::from_std(backoff(count)).unwrap_or_else(|_| Duration::seconds(30));
                debug!(
                    message = %pending.message.id,
                    retry = count,
                    error = %e,
                    "retry failed; rescheduled"
                );
                if let Err(store_err) = self.repo.add_or_update_pending(
                    &pending.message,
                    count,
                    next,
                    &e.to_string(),
                ) {
                    warn!(error = %store_err, "pending reschedule failed");
                }
            }
        }
    }

    // ---- outbound ----

    /// Send a message to a known contact. Returns the allocated message
    /// id; on network failure the message stays pending and is retried in
    /// the background.
    pub async fn send_message(&self, contact_id: &str, content: &[u8]) -> Result<String> {
        if contact_id.is_empty() {
            return Err(self.count(MessagingError::InvalidParams("contact id required".into())));
        }
        if content.is_empty() {
            return Err(self.count(MessagingError::InvalidParams("content required".into())));
        }
        if !self.identity.is_known_contact(contact_id) {
            return Err(self.count(MessagingError::UnknownContact(contact_id.to_string())));
        }

        let encrypted = self.sessions.has_session(contact_id)?;
        let mut message = None;
        for _ in 0..3 {
            let candidate = Message {
                id: new_wire_id(MESSAGE_PREFIX),
                contact_id: contact_id.to_string(),
                content: content.to_vec(),
                timestamp: Utc::now(),
                direction: Direction::Out,
                status: MessageStatus::Pending,
                content_type: if encrypted {
                    ContentType::E2ee
                } else {
                    ContentType::Text
                },
                edited: false,
            };
            match self.repo.save_message(&candidate) {
                Ok(()) => {
                    message = Some(candidate);
                    break;
                }
                Err(aim_db::DbError::MessageIdConflict(_)) => continue,
                Err(e) => return Err(self.count(e.into())),
            }
        }
        let message = message.ok_or_else(|| {
            self.count(MessagingError::Conflict(
                "message id allocation exhausted".into(),
            ))
        })?;

        match self.publish_message_wire(&message).await {
            Ok(()) => {
                self.mark_sent(&message.id)?;
                self.metrics.inc("messages_sent");
            }
            Err(e) if e.category() == ErrorCategory::Network => {
                self.metrics.inc_category(ErrorCategory::Network);
                let next = Utc::now()
                    + Duration::from_std(backoff(1)).unwrap_or_else(|_| Duration::seconds(2));
                self.repo
                    .add_or_update_pending(&message, 1, next, &e.to_string())?;
                debug!(message = %message.id, error = %e, "send queued for retry");
            }
            Err(e) => {
                return Err(self.count(e));
            }
        }
        Ok(message.id)
    }

    /// Build, sign and publish the wire for a stored message.
    async fn publish_message_wire(&self, message: &Message) -> Result<()> {
        let self_card = if self.config.attach_self_card {
            self.identity
                .self_contact_card(&self.config.display_name)
                .ok()
        } else {
            None
        };
        let ratchet_pub_key = self.identity.encryption_public()?;
        let (payload, _) = wire::build_wire_for_outbound(
            message,
            &self.sessions,
            ratchet_pub_key,
            self_card,
        )?;
        let private = wire::compose_signed_private_message(
            &message.id,
            &message.contact_id,
            payload,
            &self.identity,
        )?;
        self.publish_with_timeout(private).await
    }

    async fn publish_with_timeout(&self, message: PrivateMessage) -> Result<()> {
        match tokio::time::timeout(
            self.config.publish_timeout,
            self.transport.publish_private(message),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(MessagingError::Network("publish timed out".into())),
        }
    }

    fn mark_sent(&self, message_id: &str) -> Result<()> {
        let (message, changed) = self.repo.update_status(message_id, MessageStatus::Sent)?;
        self.repo.remove_pending(message_id)?;
        if changed {
            self.notify_status(&message, false);
        }
        Ok(())
    }

    fn notify_status(&self, message: &Message, edited: bool) {
        self.hub.publish(
            methods::MESSAGE_STATUS,
            serde_json::json!({
                "message_id": message.id,
                "contact_id": message.contact_id,
                "status": message.status,
                "edited": edited,
            }),
        );
    }

    // ---- message surface ----

    /// List a page of messages, advancing unread inbound messages to
    /// `read` and dispatching read receipts.
    pub async fn list_messages(
        self: &Arc<Self>,
        contact_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        let mut messages = self.repo.list_messages(contact_id, limit, offset)?;
        for message in &mut messages {
            if message.direction == Direction::In && message.status != MessageStatus::Read {
                let (updated, changed) =
                    self.repo.update_status(&message.id, MessageStatus::Read)?;
                message.status = updated.status;
                if changed {
                    self.notify_status(&updated, false);
                    self.dispatch_receipt(&updated, MessageStatus::Read);
                }
            }
        }
        Ok(messages)
    }

    /// Best-effort asynchronous receipt for an inbound message.
    fn dispatch_receipt(self: &Arc<Self>, message: &Message, status: MessageStatus) {
        let verified = self
            .identity
            .contact(&message.contact_id)
            .map(|c| c.is_verified())
            .unwrap_or(false);
        if !verified {
            return;
        }
        let service = self.clone();
        let contact_id = message.contact_id.clone();
        let message_id = message.id.clone();
        tokio::spawn(async move {
            if let Err(e) = service.send_receipt(&contact_id, &message_id, status).await {
                debug!(error = %e, "receipt dispatch failed");
            }
        });
    }

    /// Send a delivery receipt to a verified contact.
    pub async fn send_receipt(
        &self,
        contact_id: &str,
        message_id: &str,
        status: MessageStatus,
    ) -> Result<()> {
        let contact = self
            .identity
            .contact(contact_id)
            .ok_or_else(|| MessagingError::UnknownContact(contact_id.to_string()))?;
        if !contact.is_verified() {
            return Err(MessagingError::Unauthorized(
                "receipts require a verified contact".into(),
            ));
        }
        let payload = wire::build_receipt_wire(message_id, status);
        let private = wire::compose_signed_private_message(
            &new_wire_id(RECEIPT_PREFIX),
            contact_id,
            payload,
            &self.identity,
        )?;
        self.publish_with_timeout(private).await
    }

    /// Edit an outbound message belonging to the contact.
    pub fn edit_message(
        &self,
        contact_id: &str,
        message_id: &str,
        content: &[u8],
    ) -> Result<Message> {
        let message = self.repo.get_message(message_id)?;
        if message.contact_id != contact_id {
            return Err(self.count(MessagingError::NotFound(format!(
                "message {message_id} for contact {contact_id}"
            ))));
        }
        if message.direction != Direction::Out {
            return Err(self.count(MessagingError::InvalidParams(
                "only outbound messages can be edited".into(),
            )));
        }
        let (updated, _) =
            self.repo
                .update_content(message_id, content, message.content_type, true)?;
        self.notify_status(&updated, true);
        Ok(updated)
    }

    pub fn message_status(&self, message_id: &str) -> Result<MessageStatus> {
        Ok(self.repo.get_message(message_id)?.status)
    }

    pub fn delete_message(&self, contact_id: &str, message_id: &str) -> Result<bool> {
        self.repo.remove_pending(message_id)?;
        Ok(self.repo.delete_message(contact_id, message_id)?)
    }

    pub fn clear_messages(&self, contact_id: &str) -> Result<u64> {
        Ok(self.repo.clear_messages(contact_id)?)
    }

    // ---- devices ----

    /// Revoke one of our devices and fan the signed revocation out to
    /// every contact. Per-recipient failures aggregate into a
    /// [`DeviceRevocationDeliveryError`].
    pub async fn revoke_device(&self, device_id: &str) -> Result<DeviceRevocation> {
        let revocation = self.identity.revoke_device(device_id)?;
        self.hub.publish(
            methods::DEVICE_REVOKED,
            serde_json::json!({ "revocation": revocation }),
        );

        let contacts = self.identity.list_contacts();
        let attempted = contacts.len();
        let mut failures = BTreeMap::new();
        for contact in contacts {
            let payload = wire::build_revocation_wire(revocation.clone());
            let result = match wire::compose_signed_private_message(
                &new_wire_id(REVOCATION_PREFIX),
                &contact.id,
                payload,
                &self.identity,
            ) {
                Ok(private) => self.publish_with_timeout(private).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(contact = %contact.id, error = %e, "revocation delivery failed");
                failures.insert(contact.id, e.to_string());
            }
        }

        if !failures.is_empty() {
            let error = DeviceRevocationDeliveryError {
                attempted,
                failed: failures.len(),
                failures,
            };
            self.metrics.inc_category(ErrorCategory::Network);
            return Err(MessagingError::RevocationDelivery(error));
        }
        Ok(revocation)
    }

    // ---- privacy, blocklist, requests ----

    pub fn privacy_settings(&self) -> PrivacySettings {
        self.privacy.settings()
    }

    pub fn set_privacy_mode(&self, mode: PrivacyMode) -> Result<PrivacySettings> {
        self.privacy.set_mode(mode)
    }

    pub fn block_sender(&self, id: &str) -> Result<bool> {
        self.blocklist.add(id)
    }

    pub fn unblock_sender(&self, id: &str) -> Result<bool> {
        self.blocklist.remove(id)
    }

    pub fn blocked_senders(&self) -> Vec<String> {
        self.blocklist.list()
    }

    pub fn list_requests(&self) -> Vec<RequestThread> {
        self.requests.list()
    }

    pub fn get_request(&self, sender_id: &str) -> Option<RequestThread> {
        self.requests.get(sender_id)
    }

    /// Move a queued thread into the main chat and record the sender as a
    /// raw-id contact. Idempotent.
    pub fn accept_request(&self, sender_id: &str) -> Result<usize> {
        let messages = self.requests.take(sender_id)?;
        if messages.is_empty() {
            return Ok(0);
        }
        self.identity.add_contact_by_id(sender_id, sender_id)?;
        let mut moved = 0;
        for message in messages {
            match self.repo.save_message(&message) {
                Ok(()) => moved += 1,
                Err(aim_db::DbError::MessageIdConflict(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(moved)
    }

    /// Drop a queued thread. Idempotent.
    pub fn decline_request(&self, sender_id: &str) -> Result<bool> {
        self.requests.discard(sender_id)
    }

    /// Block the sender and drop the thread. Idempotent.
    pub fn block_request(&self, sender_id: &str) -> Result<bool> {
        self.blocklist.add(sender_id)?;
        self.requests.discard(sender_id)
    }

    // ---- observability ----

    pub fn network_status(&self) -> NodeStatus {
        self.transport.status()
    }

    /// Service counters merged with the transport's counters.
    pub fn metrics(&self) -> std::collections::HashMap<String, i64> {
        let mut metrics = self.metrics.snapshot();
        for (name, value) in self.transport.network_metrics() {
            metrics.insert(format!("transport_{name}"), value);
        }
        metrics
    }

    // ---- inbound ----

    async fn handle_inbound(self: &Arc<Self>, message: PrivateMessage) {
        let sender = message.sender_id.clone();
        if let Err(e) = self.process_inbound(message).await {
            self.metrics.inc_category(e.category());
            match &e {
                MessagingError::PolicyRejected(reason) => {
                    debug!(sender = %sender, reason, "inbound wire rejected by policy");
                }
                other => {
                    warn!(sender = %sender, error = %other, "inbound wire dropped");
                }
            }
        }
    }

    async fn process_inbound(self: &Arc<Self>, private: PrivateMessage) -> Result<()> {
        let payload = wire::decode_wire(&private.payload)?;
        let sender = private.sender_id.clone();

        // 1. Policy.
        let decision = policy::evaluate(PolicyInput {
            is_known_contact: self.identity.is_known_contact(&sender),
            is_blocked: self.blocklist.contains(&sender),
            privacy_mode: Some(self.privacy.mode()),
        });
        if decision.action == PolicyAction::Reject {
            self.metrics.inc("policy_rejections");
            return Err(MessagingError::PolicyRejected(decision.reason));
        }

        // 2. Trust: a card, when present, must bind the sender id and
        // match any pinned key; it pins the key for raw-id contacts.
        if let Some(card) = &payload.card {
            if card.identity_id != sender {
                return Err(MessagingError::Trust(
                    "card identity does not match sender".into(),
                ));
            }
            aim_identity::manager::verify_card(card)
                .map_err(|e| MessagingError::Trust(e.to_string()))?;
            if self.identity.is_known_contact(&sender) {
                // Re-pins an identical key, rejects a different one.
                self.identity.add_contact_card(card)?;
            }
        }

        let contact = self.identity.contact(&sender);
        let is_known = contact.is_some();
        let pinned = contact.as_ref().and_then(|c| c.public_key).is_some();

        if !is_known && decision.action == PolicyAction::QueueRequest && payload.card.is_none() {
            return Err(MessagingError::Trust(
                "message request without a contact card".into(),
            ));
        }

        // 3. Device-auth binding. Unknown cardless senders only reach
        // here under `everyone` mode, which is the single bypass.
        if pinned {
            wire::verify_wire_device_auth(&self.identity, &private, &payload)?;
        } else if let Some(card) = &payload.card {
            wire::verify_wire_device_auth_with_card(&private, &payload, card)?;
        } else if payload.device.is_some() || payload.device_sig.is_some() {
            return Err(MessagingError::Trust(
                "device auth present but unverifiable".into(),
            ));
        }

        // 4. Receipts and revocations terminate here.
        match payload.kind {
            WireKind::Receipt => return self.apply_receipt(&sender, &payload),
            WireKind::DeviceRevoke => return self.apply_revocation(&sender, &payload),
            WireKind::Plain | WireKind::E2ee => {}
        }

        // 5. Content.
        let message = self.build_inbound_message(&private, &payload)?;
        match decision.action {
            PolicyAction::AcceptChat => {
                match self.repo.save_message(&message) {
                    Ok(()) => {}
                    // Duplicate delivery of the same wire.
                    Err(aim_db::DbError::MessageIdConflict(_)) => return Ok(()),
                    Err(e) => return Err(e.into()),
                }
                self.metrics.inc("messages_received");
                self.hub.publish(
                    methods::MESSAGE_RECEIVED,
                    serde_json::json!({ "message": message }),
                );
                self.dispatch_receipt(&message, MessageStatus::Delivered);
            }
            PolicyAction::QueueRequest => {
                if self.requests.queue(&sender, message.clone())? {
                    self.metrics.inc("requests_queued");
                    self.hub.publish(
                        methods::MESSAGE_REQUEST,
                        serde_json::json!({
                            "sender_id": sender,
                            "message_id": message.id,
                        }),
                    );
                }
            }
            PolicyAction::Reject => {}
        }
        Ok(())
    }

    fn apply_receipt(&self, sender: &str, payload: &WirePayload) -> Result<()> {
        let receipt = payload
            .receipt
            .as_ref()
            .ok_or_else(|| MessagingError::Trust("receipt wire without receipt".into()))?;
        let message = match self.repo.get_message(&receipt.message_id) {
            Ok(message) => message,
            // A receipt for something we no longer hold is not an error.
            Err(aim_db::DbError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if message.contact_id != sender {
            return Err(MessagingError::Trust(
                "receipt from a different conversation".into(),
            ));
        }
        let (updated, changed) = self.repo.update_status(&receipt.message_id, receipt.status)?;
        if changed {
            self.notify_status(&updated, false);
        }
        Ok(())
    }

    fn apply_revocation(&self, sender: &str, payload: &WirePayload) -> Result<()> {
        let revocation = payload
            .revocation
            .as_ref()
            .ok_or_else(|| MessagingError::Trust("revoke wire without revocation".into()))?;
        self.identity.apply_device_revocation(sender, revocation)?;
        self.hub.publish(
            methods::DEVICE_REVOKED,
            serde_json::json!({
                "contact_id": sender,
                "device_id": revocation.device_id,
            }),
        );
        Ok(())
    }

    fn build_inbound_message(
        &self,
        private: &PrivateMessage,
        payload: &WirePayload,
    ) -> Result<Message> {
        match payload.kind {
            WireKind::Plain => {
                let content = payload
                    .plain
                    .clone()
                    .ok_or_else(|| MessagingError::Crypto("plain wire without body".into()))?;
                Ok(Message {
                    id: private.id.clone(),
                    contact_id: private.sender_id.clone(),
                    content,
                    timestamp: private.sent_at,
                    direction: Direction::In,
                    status: MessageStatus::Delivered,
                    content_type: ContentType::Text,
                    edited: false,
                })
            }
            WireKind::E2ee => {
                let envelope = payload
                    .envelope
                    .as_ref()
                    .ok_or_else(|| MessagingError::Crypto("e2ee wire without envelope".into()))?;
                match self.sessions.decrypt(&private.sender_id, envelope) {
                    Ok(content) => Ok(Message {
                        id: envelope.message_id.clone(),
                        contact_id: private.sender_id.clone(),
                        content,
                        timestamp: envelope.sent_at,
                        direction: Direction::In,
                        status: MessageStatus::Delivered,
                        content_type: ContentType::E2ee,
                        edited: false,
                    }),
                    Err(aim_session::SessionError::ReplayDetected(id)) => Err(
                        MessagingError::Crypto(format!("replayed envelope {id}")),
                    ),
                    Err(e) => {
                        warn!(error = %e, "envelope undecryptable; stored as unreadable");
                        self.metrics.inc_category(ErrorCategory::Crypto);
                        Ok(Message {
                            id: envelope.message_id.clone(),
                            contact_id: private.sender_id.clone(),
                            content: envelope.ciphertext.clone(),
                            timestamp: envelope.sent_at,
                            direction: Direction::In,
                            status: MessageStatus::Delivered,
                            content_type: ContentType::E2eeUnreadable,
                            edited: false,
                        })
                    }
                }
            }
            _ => Err(MessagingError::Crypto("unexpected wire kind".into())),
        }
    }

    fn count(&self, e: MessagingError) -> MessagingError {
        self.metrics.inc_category(e.category());
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff(1), StdDuration::from_secs(2));
        assert_eq!(backoff(2), StdDuration::from_secs(4));
        assert_eq!(backoff(3), StdDuration::from_secs(8));
        assert_eq!(backoff(4), StdDuration::from_secs(16));
        for k in 5..=10 {
            assert_eq!(backoff(k), StdDuration::from_secs(30));
        }
    }

    #[test]
    fn wire_ids_have_prefix_and_entropy() {
        let a = new_wire_id(MESSAGE_PREFIX);
        let b = new_wire_id(MESSAGE_PREFIX);
        assert!(a.starts_with("msg_"));
        assert_eq!(a.len(), 4 + 24);
        assert_ne!(a, b);
    }

    #[test]
    fn default_config_matches_contract() {
        let config = ServiceConfig::default();
        assert_eq!(config.publish_timeout, StdDuration::from_secs(5));
        assert_eq!(config.retry_tick, StdDuration::from_secs(1));
        assert_eq!(
            config.startup_recovery_window,
            StdDuration::from_secs(24 * 3600)
        );
    }
}
