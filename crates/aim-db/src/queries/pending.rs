//! Pending-queue queries.

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use aim_types::message::PendingMessage;

use super::{from_ns, to_ns};
use crate::Result;

/// Insert or update the pending row for a message.
pub fn upsert(
    conn: &Connection,
    message_id: &str,
    retry_count: u32,
    next_retry_at: DateTime<Utc>,
    last_error: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO pending_messages (message_id, retry_count, next_retry_at_ns, last_error)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (message_id) DO UPDATE SET
             retry_count = excluded.retry_count,
             next_retry_at_ns = excluded.next_retry_at_ns,
             last_error = excluded.last_error",
        rusqlite::params![message_id, retry_count, to_ns(next_retry_at), last_error],
    )?;
    Ok(())
}

/// Remove the pending row. Returns true when a row went away.
pub fn remove(conn: &Connection, message_id: &str) -> Result<bool> {
    let changed = conn.execute(
        "DELETE FROM pending_messages WHERE message_id = ?1",
        [message_id],
    )?;
    Ok(changed > 0)
}

/// All pending messages due at or before `now`, oldest due first.
pub fn due(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<PendingMessage>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.contact_id, m.content, m.timestamp_ns, m.direction, m.status,
                m.content_type, m.edited,
                p.retry_count, p.next_retry_at_ns, p.last_error
         FROM pending_messages p
         JOIN messages m ON m.id = p.message_id
         WHERE p.next_retry_at_ns <= ?1
         ORDER BY p.next_retry_at_ns, m.id",
    )?;

    let rows = stmt
        .query_map([to_ns(now)], |row| {
            Ok((
                super::messages::row_to_message(row)?,
                row.get::<_, u32>(8)?,
                row.get::<_, i64>(9)?,
                row.get::<_, String>(10)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(base, retry_count, next_ns, last_error)| {
            Ok(PendingMessage {
                message: base.into_message()?,
                retry_count,
                next_retry_at: from_ns(next_ns),
                last_error,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aim_types::message::{ContentType, Direction, Message, MessageStatus};
    use chrono::Duration;

    fn seed_message(conn: &Connection, id: &str) {
        super::super::messages::insert(
            conn,
            &Message {
                id: id.to_string(),
                contact_id: "aim1bob".into(),
                content: b"body".to_vec(),
                timestamp: Utc::now(),
                direction: Direction::Out,
                status: MessageStatus::Pending,
                content_type: ContentType::Text,
                edited: false,
            },
        )
        .expect("insert message");
    }

    #[test]
    fn upsert_and_due() {
        let conn = crate::open_memory().expect("open");
        seed_message(&conn, "msg_aa");
        seed_message(&conn, "msg_bb");

        let now = Utc::now();
        upsert(&conn, "msg_aa", 1, now - Duration::seconds(1), "timeout").expect("upsert");
        upsert(&conn, "msg_bb", 2, now + Duration::seconds(60), "").expect("upsert");

        let due_now = due(&conn, now).expect("due");
        assert_eq!(due_now.len(), 1);
        assert_eq!(due_now[0].message.id, "msg_aa");
        assert_eq!(due_now[0].retry_count, 1);
        assert_eq!(due_now[0].last_error, "timeout");

        let due_later = due(&conn, now + Duration::seconds(120)).expect("due");
        assert_eq!(due_later.len(), 2);
    }

    #[test]
    fn upsert_overwrites() {
        let conn = crate::open_memory().expect("open");
        seed_message(&conn, "msg_aa");
        let now = Utc::now();
        upsert(&conn, "msg_aa", 1, now, "first").expect("upsert");
        upsert(&conn, "msg_aa", 2, now, "second").expect("upsert");

        let all = due(&conn, now).expect("due");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].retry_count, 2);
        assert_eq!(all[0].last_error, "second");
    }

    #[test]
    fn remove_clears_row() {
        let conn = crate::open_memory().expect("open");
        seed_message(&conn, "msg_aa");
        upsert(&conn, "msg_aa", 1, Utc::now(), "").expect("upsert");
        assert!(remove(&conn, "msg_aa").expect("remove"));
        assert!(!remove(&conn, "msg_aa").expect("second remove"));
    }

    #[test]
    fn message_delete_cascades() {
        let conn = crate::open_memory().expect("open");
        seed_message(&conn, "msg_aa");
        upsert(&conn, "msg_aa", 1, Utc::now() - Duration::seconds(1), "").expect("upsert");
        super::super::messages::delete(&conn, "aim1bob", "msg_aa").expect("delete");
        assert!(due(&conn, Utc::now()).expect("due").is_empty());
    }
}
