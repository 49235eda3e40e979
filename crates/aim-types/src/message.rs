//! Messages and their delivery state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

/// Delivery status. Transitions are monotone: a lower status arriving after
/// a higher one never regresses it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    /// Ordering rank for monotonicity checks.
    pub fn rank(&self) -> u8 {
        match self {
            MessageStatus::Pending => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered => 2,
            MessageStatus::Read => 3,
        }
    }

    /// True if moving from `self` to `next` advances the status.
    pub fn advances_to(&self, next: MessageStatus) -> bool {
        next.rank() > self.rank()
    }
}

/// Message direction relative to the local identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
}

/// How the content column is to be interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "e2ee")]
    E2ee,
    /// An end-to-end encrypted message that could not be decrypted; the
    /// raw envelope is retained.
    #[serde(rename = "e2ee-unreadable")]
    E2eeUnreadable,
}

/// A stored message.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub contact_id: String,
    #[serde_as(as = "serde_with::base64::Base64")]
    pub content: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub status: MessageStatus,
    pub content_type: ContentType,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub edited: bool,
}

/// A message awaiting (re)delivery, owned by the pending queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMessage {
    pub message: Message,
    pub retry_count: u32,
    pub next_retry_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ranks_are_monotone() {
        use MessageStatus::*;
        assert!(Pending.advances_to(Sent));
        assert!(Sent.advances_to(Delivered));
        assert!(Delivered.advances_to(Read));
        assert!(!Read.advances_to(Delivered));
        assert!(!Sent.advances_to(Sent));
        assert!(!Delivered.advances_to(Pending));
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&MessageStatus::Delivered).expect("serialize"),
            "\"delivered\""
        );
        assert_eq!(
            serde_json::to_string(&ContentType::E2eeUnreadable).expect("serialize"),
            "\"e2ee-unreadable\""
        );
        assert_eq!(
            serde_json::to_string(&Direction::Out).expect("serialize"),
            "\"out\""
        );
    }

    #[test]
    fn message_survives_json() {
        let msg = Message {
            id: "msg_00ff".into(),
            contact_id: "aim1abc".into(),
            content: b"hello".to_vec(),
            timestamp: Utc::now(),
            direction: Direction::Out,
            status: MessageStatus::Pending,
            content_type: ContentType::Text,
            edited: false,
        };
        let json = serde_json::to_string(&msg).expect("serialize");
        let restored: Message = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(msg, restored);
    }
}
