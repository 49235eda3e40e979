//! Message table queries.

use rusqlite::{Connection, OptionalExtension};

use aim_types::message::{ContentType, Direction, Message, MessageStatus};

use super::{from_ns, to_ns};
use crate::{DbError, Result};

fn direction_str(direction: Direction) -> &'static str {
    match direction {
        Direction::In => "in",
        Direction::Out => "out",
    }
}

fn status_str(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Pending => "pending",
        MessageStatus::Sent => "sent",
        MessageStatus::Delivered => "delivered",
        MessageStatus::Read => "read",
    }
}

fn content_type_str(content_type: ContentType) -> &'static str {
    match content_type {
        ContentType::Text => "text",
        ContentType::E2ee => "e2ee",
        ContentType::E2eeUnreadable => "e2ee-unreadable",
    }
}

fn parse_direction(s: &str) -> Result<Direction> {
    match s {
        "in" => Ok(Direction::In),
        "out" => Ok(Direction::Out),
        other => Err(DbError::Serialization(format!("bad direction {other:?}"))),
    }
}

fn parse_status(s: &str) -> Result<MessageStatus> {
    match s {
        "pending" => Ok(MessageStatus::Pending),
        "sent" => Ok(MessageStatus::Sent),
        "delivered" => Ok(MessageStatus::Delivered),
        "read" => Ok(MessageStatus::Read),
        other => Err(DbError::Serialization(format!("bad status {other:?}"))),
    }
}

fn parse_content_type(s: &str) -> Result<ContentType> {
    match s {
        "text" => Ok(ContentType::Text),
        "e2ee" => Ok(ContentType::E2ee),
        "e2ee-unreadable" => Ok(ContentType::E2eeUnreadable),
        other => Err(DbError::Serialization(format!("bad content type {other:?}"))),
    }
}

pub(crate) struct MessageRow {
    id: String,
    contact_id: String,
    content: Vec<u8>,
    timestamp_ns: i64,
    direction: String,
    status: String,
    content_type: String,
    edited: bool,
}

impl MessageRow {
    pub(crate) fn into_message(self) -> Result<Message> {
        Ok(Message {
            id: self.id,
            contact_id: self.contact_id,
            content: self.content,
            timestamp: from_ns(self.timestamp_ns),
            direction: parse_direction(&self.direction)?,
            status: parse_status(&self.status)?,
            content_type: parse_content_type(&self.content_type)?,
            edited: self.edited,
        })
    }
}

pub(crate) fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        contact_id: row.get(1)?,
        content: row.get(2)?,
        timestamp_ns: row.get(3)?,
        direction: row.get(4)?,
        status: row.get(5)?,
        content_type: row.get(6)?,
        edited: row.get(7)?,
    })
}

const MESSAGE_COLUMNS: &str =
    "id, contact_id, content, timestamp_ns, direction, status, content_type, edited";

/// Insert a message, refusing duplicate ids.
pub fn insert(conn: &Connection, message: &Message) -> Result<()> {
    let result = conn.execute(
        "INSERT INTO messages (id, contact_id, content, timestamp_ns, direction, status, content_type, edited)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            message.id,
            message.contact_id,
            message.content,
            to_ns(message.timestamp),
            direction_str(message.direction),
            status_str(message.status),
            content_type_str(message.content_type),
            message.edited,
        ],
    );
    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(DbError::MessageIdConflict(message.id.clone()))
        }
        Err(e) => Err(DbError::Sqlite(e)),
    }
}

/// Fetch a message by id.
pub fn get(conn: &Connection, id: &str) -> Result<Message> {
    let row = conn
        .query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
            [id],
            row_to_message,
        )
        .optional()?;
    row.ok_or_else(|| DbError::NotFound(format!("message {id}")))?
        .into_message()
}

/// Overwrite status unconditionally (monotonicity is enforced above).
pub fn set_status(conn: &Connection, id: &str, status: MessageStatus) -> Result<()> {
    let changed = conn.execute(
        "UPDATE messages SET status = ?2 WHERE id = ?1",
        rusqlite::params![id, status_str(status)],
    )?;
    if changed == 0 {
        return Err(DbError::NotFound(format!("message {id}")));
    }
    Ok(())
}

/// Overwrite content, content type, and the edited flag.
pub fn set_content(
    conn: &Connection,
    id: &str,
    content: &[u8],
    content_type: ContentType,
    edited: bool,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE messages SET content = ?2, content_type = ?3, edited = ?4 WHERE id = ?1",
        rusqlite::params![id, content, content_type_str(content_type), edited],
    )?;
    if changed == 0 {
        return Err(DbError::NotFound(format!("message {id}")));
    }
    Ok(())
}

/// Delete a message scoped by contact. Returns true when a row went away.
pub fn delete(conn: &Connection, contact_id: &str, id: &str) -> Result<bool> {
    let changed = conn.execute(
        "DELETE FROM messages WHERE id = ?1 AND contact_id = ?2",
        rusqlite::params![id, contact_id],
    )?;
    Ok(changed > 0)
}

/// Delete every message for a contact. Returns the count removed.
pub fn clear(conn: &Connection, contact_id: &str) -> Result<u64> {
    let changed = conn.execute(
        "DELETE FROM messages WHERE contact_id = ?1",
        [contact_id],
    )?;
    Ok(changed as u64)
}

/// List a contact's messages ordered by timestamp (then id for stability).
pub fn list(
    conn: &Connection,
    contact_id: &str,
    limit: u32,
    offset: u32,
) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE contact_id = ?1
         ORDER BY timestamp_ns, id
         LIMIT ?2 OFFSET ?3"
    ))?;
    let rows = stmt
        .query_map(
            rusqlite::params![contact_id, limit, offset],
            row_to_message,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(MessageRow::into_message).collect()
}
