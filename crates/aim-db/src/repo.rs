//! The message repository: the capability interface consumed by the
//! messaging service, with SQLite and in-memory implementations.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use aim_types::message::{ContentType, Message, MessageStatus, PendingMessage};

use crate::{queries, DbError, Result, MAX_LIST_LIMIT, MAX_LIST_OFFSET};

/// Durable mapping of messages plus the pending-retry queue. All methods
/// are safe for concurrent callers.
pub trait MessageRepository: Send + Sync {
    /// Persist a new message; refuses duplicate ids.
    fn save_message(&self, message: &Message) -> Result<()>;

    /// Fetch a message by id.
    fn get_message(&self, id: &str) -> Result<Message>;

    /// Advance the status if `status` ranks above the stored one. Returns
    /// the message after the call and whether it changed.
    fn update_status(&self, id: &str, status: MessageStatus) -> Result<(Message, bool)>;

    /// Overwrite content and content type. Returns the updated message and
    /// whether the message previously existed.
    fn update_content(
        &self,
        id: &str,
        content: &[u8],
        content_type: ContentType,
        edited: bool,
    ) -> Result<(Message, bool)>;

    /// Delete one message scoped by contact.
    fn delete_message(&self, contact_id: &str, id: &str) -> Result<bool>;

    /// Delete all of a contact's messages; returns the count removed.
    fn clear_messages(&self, contact_id: &str) -> Result<u64>;

    /// Page through a contact's messages ordered by timestamp.
    /// `limit ≤ 1000`, `offset ≤ 1_000_000`.
    fn list_messages(&self, contact_id: &str, limit: u32, offset: u32) -> Result<Vec<Message>>;

    /// Insert or update the pending entry for a message.
    fn add_or_update_pending(
        &self,
        message: &Message,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()>;

    /// Drop the pending entry.
    fn remove_pending(&self, id: &str) -> Result<bool>;

    /// All pending messages with `next_retry_at ≤ now`.
    fn due_pending(&self, now: DateTime<Utc>) -> Result<Vec<PendingMessage>>;
}

fn check_page(limit: u32, offset: u32) -> Result<()> {
    if limit > MAX_LIST_LIMIT {
        return Err(DbError::InvalidQuery(format!(
            "limit {limit} exceeds {MAX_LIST_LIMIT}"
        )));
    }
    if offset > MAX_LIST_OFFSET {
        return Err(DbError::InvalidQuery(format!(
            "offset {offset} exceeds {MAX_LIST_OFFSET}"
        )));
    }
    Ok(())
}

/// SQLite-backed repository.
pub struct SqliteMessageRepository {
    conn: Mutex<Connection>,
}

impl SqliteMessageRepository {
    /// Wrap an opened connection (see [`crate::open`]).
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl MessageRepository for SqliteMessageRepository {
    fn save_message(&self, message: &Message) -> Result<()> {
        queries::messages::insert(&self.lock(), message)
    }

    fn get_message(&self, id: &str) -> Result<Message> {
        queries::messages::get(&self.lock(), id)
    }

    fn update_status(&self, id: &str, status: MessageStatus) -> Result<(Message, bool)> {
        let conn = self.lock();
        let current = queries::messages::get(&conn, id)?;
        if !current.status.advances_to(status) {
            return Ok((current, false));
        }
        queries::messages::set_status(&conn, id, status)?;
        let updated = queries::messages::get(&conn, id)?;
        Ok((updated, true))
    }

    fn update_content(
        &self,
        id: &str,
        content: &[u8],
        content_type: ContentType,
        edited: bool,
    ) -> Result<(Message, bool)> {
        let conn = self.lock();
        queries::messages::get(&conn, id)?;
        queries::messages::set_content(&conn, id, content, content_type, edited)?;
        let updated = queries::messages::get(&conn, id)?;
        Ok((updated, true))
    }

    fn delete_message(&self, contact_id: &str, id: &str) -> Result<bool> {
        queries::messages::delete(&self.lock(), contact_id, id)
    }

    fn clear_messages(&self, contact_id: &str) -> Result<u64> {
        queries::messages::clear(&self.lock(), contact_id)
    }

    fn list_messages(&self, contact_id: &str, limit: u32, offset: u32) -> Result<Vec<Message>> {
        check_page(limit, offset)?;
        queries::messages::list(&self.lock(), contact_id, limit, offset)
    }

    fn add_or_update_pending(
        &self,
        message: &Message,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()> {
        queries::pending::upsert(&self.lock(), &message.id, retry_count, next_retry_at, last_error)
    }

    fn remove_pending(&self, id: &str) -> Result<bool> {
        queries::pending::remove(&self.lock(), id)
    }

    fn due_pending(&self, now: DateTime<Utc>) -> Result<Vec<PendingMessage>> {
        queries::pending::due(&self.lock(), now)
    }
}

#[derive(Clone)]
struct PendingRow {
    retry_count: u32,
    next_retry_at: DateTime<Utc>,
    last_error: String,
}

/// Volatile repository for tests and ephemeral daemons.
#[derive(Default)]
pub struct MemoryMessageRepository {
    messages: RwLock<HashMap<String, Message>>,
    pending: RwLock<HashMap<String, PendingRow>>,
}

impl MemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn messages_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Message>> {
        match self.messages.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn messages_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Message>> {
        match self.messages.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn pending_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, PendingRow>> {
        match self.pending.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl MessageRepository for MemoryMessageRepository {
    fn save_message(&self, message: &Message) -> Result<()> {
        let mut messages = self.messages_write();
        if messages.contains_key(&message.id) {
            return Err(DbError::MessageIdConflict(message.id.clone()));
        }
        messages.insert(message.id.clone(), message.clone());
        Ok(())
    }

    fn get_message(&self, id: &str) -> Result<Message> {
        self.messages_read()
            .get(id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("message {id}")))
    }

    fn update_status(&self, id: &str, status: MessageStatus) -> Result<(Message, bool)> {
        let mut messages = self.messages_write();
        let message = messages
            .get_mut(id)
            .ok_or_else(|| DbError::NotFound(format!("message {id}")))?;
        if !message.status.advances_to(status) {
            return Ok((message.clone(), false));
        }
        message.status = status;
        Ok((message.clone(), true))
    }

    fn update_content(
        &self,
        id: &str,
        content: &[u8],
        content_type: ContentType,
        edited: bool,
    ) -> Result<(Message, bool)> {
        let mut messages = self.messages_write();
        let message = messages
            .get_mut(id)
            .ok_or_else(|| DbError::NotFound(format!("message {id}")))?;
        message.content = content.to_vec();
        message.content_type = content_type;
        message.edited = edited;
        Ok((message.clone(), true))
    }

    fn delete_message(&self, contact_id: &str, id: &str) -> Result<bool> {
        let mut messages = self.messages_write();
        match messages.get(id) {
            Some(message) if message.contact_id == contact_id => {
                messages.remove(id);
                self.pending_write().remove(id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn clear_messages(&self, contact_id: &str) -> Result<u64> {
        let mut messages = self.messages_write();
        let ids: Vec<String> = messages
            .values()
            .filter(|m| m.contact_id == contact_id)
            .map(|m| m.id.clone())
            .collect();
        let mut pending = self.pending_write();
        for id in &ids {
            messages.remove(id);
            pending.remove(id);
        }
        Ok(ids.len() as u64)
    }

    fn list_messages(&self, contact_id: &str, limit: u32, offset: u32) -> Result<Vec<Message>> {
        check_page(limit, offset)?;
        let mut list: Vec<Message> = self
            .messages_read()
            .values()
            .filter(|m| m.contact_id == contact_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(list
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    fn add_or_update_pending(
        &self,
        message: &Message,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()> {
        self.pending_write().insert(
            message.id.clone(),
            PendingRow {
                retry_count,
                next_retry_at,
                last_error: last_error.to_string(),
            },
        );
        Ok(())
    }

    fn remove_pending(&self, id: &str) -> Result<bool> {
        Ok(self.pending_write().remove(id).is_some())
    }

    fn due_pending(&self, now: DateTime<Utc>) -> Result<Vec<PendingMessage>> {
        let messages = self.messages_read();
        let pending = match self.pending.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut due: Vec<PendingMessage> = pending
            .iter()
            .filter(|(_, row)| row.next_retry_at <= now)
            .filter_map(|(id, row)| {
                messages.get(id).map(|message| PendingMessage {
                    message: message.clone(),
                    retry_count: row.retry_count,
                    next_retry_at: row.next_retry_at,
                    last_error: row.last_error.clone(),
                })
            })
            .collect();
        due.sort_by(|a, b| {
            a.next_retry_at
                .cmp(&b.next_retry_at)
                .then(a.message.id.cmp(&b.message.id))
        });
        Ok(due)
    }
}
