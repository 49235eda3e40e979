//! SQL schema definitions.

/// Initial schema.
pub const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id            TEXT PRIMARY KEY,
    contact_id    TEXT NOT NULL,
    content       BLOB NOT NULL,
    timestamp_ns  INTEGER NOT NULL,
    direction     TEXT NOT NULL CHECK (direction IN ('in', 'out')),
    status        TEXT NOT NULL CHECK (status IN ('pending', 'sent', 'delivered', 'read')),
    content_type  TEXT NOT NULL CHECK (content_type IN ('text', 'e2ee', 'e2ee-unreadable')),
    edited        INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_messages_contact_ts
    ON messages (contact_id, timestamp_ns);

CREATE TABLE IF NOT EXISTS pending_messages (
    message_id       TEXT PRIMARY KEY
        REFERENCES messages (id) ON DELETE CASCADE,
    retry_count      INTEGER NOT NULL,
    next_retry_at_ns INTEGER NOT NULL,
    last_error       TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_pending_due
    ON pending_messages (next_retry_at_ns);
";
