//! The message-request inbox.
//!
//! Wires from unknown senders under `requests` mode queue here as
//! per-sender threads. Accepting a thread hands its messages to the caller
//! (who moves them into the main chat and records the sender as a raw-id
//! contact); declining or blocking discards it. All three resolutions are
//! idempotent.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use aim_crypto::envelope;
use aim_types::message::Message;

use crate::{MessagingError, Result};

const INBOX_FILE: &str = "requests.json";

/// A queued per-sender thread.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestThread {
    pub sender_id: String,
    pub messages: Vec<Message>,
    pub last_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct InboxFile {
    version: u32,
    inbox: BTreeMap<String, Vec<Message>>,
}

/// The inbox. Internally synchronized; persists then swaps on mutation.
pub struct RequestInbox {
    file: Option<(PathBuf, String)>,
    threads: RwLock<BTreeMap<String, Vec<Message>>>,
}

impl RequestInbox {
    pub fn open(dir: &std::path::Path, passphrase: &str) -> Result<Self> {
        let path = dir.join(INBOX_FILE);
        let threads = if path.exists() {
            let bytes =
                std::fs::read(&path).map_err(|e| MessagingError::Storage(e.to_string()))?;
            let sealed: envelope::SealedEnvelope = serde_json::from_slice(&bytes)
                .map_err(|e| MessagingError::Storage(e.to_string()))?;
            let plain = envelope::open(passphrase, &sealed)
                .map_err(|e| MessagingError::Storage(e.to_string()))?;
            let file: InboxFile = serde_json::from_slice(&plain)
                .map_err(|e| MessagingError::Storage(e.to_string()))?;
            file.inbox
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            file: Some((path, passphrase.to_string())),
            threads: RwLock::new(threads),
        })
    }

    pub fn ephemeral() -> Self {
        Self {
            file: None,
            threads: RwLock::new(BTreeMap::new()),
        }
    }

    /// Queue a message into the sender's thread. Duplicate message ids in
    /// the same thread are dropped.
    pub fn queue(&self, sender_id: &str, message: Message) -> Result<bool> {
        let mut next = self.read().clone();
        let thread = next.entry(sender_id.to_string()).or_default();
        if thread.iter().any(|m| m.id == message.id) {
            return Ok(false);
        }
        thread.push(message);
        self.persist(&next)?;
        *self.write() = next;
        Ok(true)
    }

    /// All threads, most recent activity last.
    pub fn list(&self) -> Vec<RequestThread> {
        self.read()
            .iter()
            .map(|(sender, messages)| RequestThread {
                sender_id: sender.clone(),
                messages: messages.clone(),
                last_at: messages
                    .last()
                    .map(|m| m.timestamp)
                    .unwrap_or_else(Utc::now),
            })
            .collect()
    }

    pub fn get(&self, sender_id: &str) -> Option<RequestThread> {
        self.read().get(sender_id).map(|messages| RequestThread {
            sender_id: sender_id.to_string(),
            messages: messages.clone(),
            last_at: messages
                .last()
                .map(|m| m.timestamp)
                .unwrap_or_else(Utc::now),
        })
    }

    /// Remove and return the thread's messages. Idempotent: an absent
    /// thread yields an empty list.
    pub fn take(&self, sender_id: &str) -> Result<Vec<Message>> {
        let mut next = self.read().clone();
        let messages = next.remove(sender_id).unwrap_or_default();
        if !messages.is_empty() {
            self.persist(&next)?;
            *self.write() = next;
            info!(sender = %sender_id, count = messages.len(), "request thread resolved");
        }
        Ok(messages)
    }

    /// Discard the thread. Idempotent.
    pub fn discard(&self, sender_id: &str) -> Result<bool> {
        let mut next = self.read().clone();
        let existed = next.remove(sender_id).is_some();
        if existed {
            self.persist(&next)?;
            *self.write() = next;
        }
        Ok(existed)
    }

    fn persist(&self, threads: &BTreeMap<String, Vec<Message>>) -> Result<()> {
        if let Some((path, passphrase)) = &self.file {
            let file = InboxFile {
                version: 1,
                inbox: threads.clone(),
            };
            let plain =
                serde_json::to_vec(&file).map_err(|e| MessagingError::Storage(e.to_string()))?;
            let sealed = envelope::seal(passphrase, &plain)
                .map_err(|e| MessagingError::Storage(e.to_string()))?;
            let bytes = serde_json::to_vec_pretty(&sealed)
                .map_err(|e| MessagingError::Storage(e.to_string()))?;
            let tmp = path.with_extension("tmp");
            std::fs::write(&tmp, &bytes).map_err(|e| MessagingError::Storage(e.to_string()))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                    .map_err(|e| MessagingError::Storage(e.to_string()))?;
            }
            std::fs::rename(&tmp, path).map_err(|e| MessagingError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Vec<Message>>> {
        match self.threads.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Vec<Message>>> {
        match self.threads.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aim_types::message::{ContentType, Direction, MessageStatus};

    fn message(id: &str, sender: &str) -> Message {
        Message {
            id: id.to_string(),
            contact_id: sender.to_string(),
            content: b"hi there".to_vec(),
            timestamp: Utc::now(),
            direction: Direction::In,
            status: MessageStatus::Delivered,
            content_type: ContentType::Text,
            edited: false,
        }
    }

    #[test]
    fn queue_groups_by_sender() {
        let inbox = RequestInbox::ephemeral();
        inbox.queue("aim1stranger", message("msg_aa", "aim1stranger")).expect("queue");
        inbox.queue("aim1stranger", message("msg_bb", "aim1stranger")).expect("queue");
        inbox.queue("aim1other", message("msg_cc", "aim1other")).expect("queue");

        let threads = inbox.list();
        assert_eq!(threads.len(), 2);
        let stranger = inbox.get("aim1stranger").expect("thread");
        assert_eq!(stranger.messages.len(), 2);
    }

    #[test]
    fn duplicate_message_ids_dropped() {
        let inbox = RequestInbox::ephemeral();
        assert!(inbox.queue("aim1s", message("msg_aa", "aim1s")).expect("queue"));
        assert!(!inbox.queue("aim1s", message("msg_aa", "aim1s")).expect("queue"));
    }

    #[test]
    fn take_is_idempotent() {
        let inbox = RequestInbox::ephemeral();
        inbox.queue("aim1s", message("msg_aa", "aim1s")).expect("queue");
        let first = inbox.take("aim1s").expect("take");
        assert_eq!(first.len(), 1);
        let second = inbox.take("aim1s").expect("take again");
        assert!(second.is_empty());
    }

    #[test]
    fn discard_is_idempotent() {
        let inbox = RequestInbox::ephemeral();
        inbox.queue("aim1s", message("msg_aa", "aim1s")).expect("queue");
        assert!(inbox.discard("aim1s").expect("discard"));
        assert!(!inbox.discard("aim1s").expect("re-discard"));
    }

    #[test]
    fn inbox_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let inbox = RequestInbox::open(dir.path(), "pw").expect("open");
            inbox.queue("aim1s", message("msg_aa", "aim1s")).expect("queue");
        }
        let inbox = RequestInbox::open(dir.path(), "pw").expect("reopen");
        assert_eq!(inbox.get("aim1s").expect("thread").messages.len(), 1);
    }
}
