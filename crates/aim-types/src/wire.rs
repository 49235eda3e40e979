//! Signed wire payloads carried by the transport.
//!
//! A wire is a tagged payload (`plain`, `e2ee`, `receipt`, `device_revoke`)
//! plus the sending device and its signature over the canonical auth
//! payload. Decoding is strict: a payload whose optional fields do not
//! match its kind is rejected before any cryptography runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::identity::{ContactCard, Device, DeviceRevocation};
use crate::message::MessageStatus;

/// Wire format version.
pub const WIRE_VERSION: u32 = 1;

/// An end-to-end encrypted message envelope.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub version: u32,
    pub session_id: String,
    pub message_id: String,
    #[serde_as(as = "serde_with::hex::Hex")]
    pub ratchet_pub_key: [u8; 32],
    pub chain_index: u64,
    pub previous_count: u64,
    #[serde_as(as = "serde_with::hex::Hex")]
    pub nonce: [u8; 24],
    #[serde_as(as = "serde_with::base64::Base64")]
    pub ciphertext: Vec<u8>,
    pub sent_at: DateTime<Utc>,
}

impl MessageEnvelope {
    /// AEAD associated data:
    /// `session_id ‖ 0 ‖ message_id ‖ 0 ‖ be64(chain_index)`.
    pub fn aad(session_id: &str, message_id: &str, chain_index: u64) -> Vec<u8> {
        let mut aad = Vec::with_capacity(session_id.len() + message_id.len() + 10);
        aad.extend_from_slice(session_id.as_bytes());
        aad.push(0);
        aad.extend_from_slice(message_id.as_bytes());
        aad.push(0);
        aad.extend_from_slice(&chain_index.to_be_bytes());
        aad
    }
}

/// Wire payload kind tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireKind {
    Plain,
    E2ee,
    Receipt,
    DeviceRevoke,
}

/// A delivery receipt for a previously received message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub message_id: String,
    pub status: MessageStatus,
}

/// The tagged wire payload.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirePayload {
    pub kind: WireKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope: Option<MessageEnvelope>,
    #[serde_as(as = "Option<serde_with::base64::Base64>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plain: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<ContactCard>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<Receipt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
    #[serde_as(as = "Option<serde_with::hex::Hex>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_sig: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation: Option<DeviceRevocation>,
}

/// Why a wire payload failed the shape check.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireShapeError {
    #[error("kind {kind:?} requires field {field}")]
    MissingField { kind: WireKind, field: &'static str },
    #[error("kind {kind:?} forbids field {field}")]
    ForbiddenField { kind: WireKind, field: &'static str },
}

impl WirePayload {
    /// Strict shape validation: each kind must carry exactly its fields.
    pub fn validate_shape(&self) -> Result<(), WireShapeError> {
        let require = |present: bool, field: &'static str| {
            if present {
                Ok(())
            } else {
                Err(WireShapeError::MissingField {
                    kind: self.kind,
                    field,
                })
            }
        };
        let forbid = |present: bool, field: &'static str| {
            if present {
                Err(WireShapeError::ForbiddenField {
                    kind: self.kind,
                    field,
                })
            } else {
                Ok(())
            }
        };

        match self.kind {
            WireKind::Plain => {
                require(self.plain.is_some(), "plain")?;
                forbid(self.envelope.is_some(), "envelope")?;
                forbid(self.receipt.is_some(), "receipt")?;
                forbid(self.revocation.is_some(), "revocation")?;
            }
            WireKind::E2ee => {
                require(self.envelope.is_some(), "envelope")?;
                forbid(self.plain.is_some(), "plain")?;
                forbid(self.receipt.is_some(), "receipt")?;
                forbid(self.revocation.is_some(), "revocation")?;
            }
            WireKind::Receipt => {
                require(self.receipt.is_some(), "receipt")?;
                forbid(self.plain.is_some(), "plain")?;
                forbid(self.envelope.is_some(), "envelope")?;
                forbid(self.revocation.is_some(), "revocation")?;
            }
            WireKind::DeviceRevoke => {
                require(self.revocation.is_some(), "revocation")?;
                forbid(self.plain.is_some(), "plain")?;
                forbid(self.envelope.is_some(), "envelope")?;
                forbid(self.receipt.is_some(), "receipt")?;
            }
        }
        Ok(())
    }

    /// Canonical device-auth payload over this wire. Field order is fixed
    /// by the serializer struct; absent fields serialize as `null` so the
    /// byte string is the signed-message definition.
    pub fn auth_payload(
        &self,
        message_id: &str,
        sender_id: &str,
        recipient: &str,
    ) -> Vec<u8> {
        #[serde_as]
        #[derive(Serialize)]
        struct AuthPayload<'a> {
            message_id: &'a str,
            sender_id: &'a str,
            recipient: &'a str,
            kind: WireKind,
            envelope: Option<MessageEnvelope>,
            #[serde_as(as = "Option<serde_with::base64::Base64>")]
            plain: Option<Vec<u8>>,
            card: Option<ContactCard>,
            receipt: Option<Receipt>,
            revocation: Option<DeviceRevocation>,
        }

        let payload = AuthPayload {
            message_id,
            sender_id,
            recipient,
            kind: self.kind,
            envelope: self.envelope.clone(),
            plain: self.plain.clone(),
            card: self.card.clone(),
            receipt: self.receipt.clone(),
            revocation: self.revocation.clone(),
        };
        // Serializing a struct of plain fields cannot fail.
        serde_json::to_vec(&payload).unwrap_or_default()
    }
}

/// The transport-level unit: an addressed, serialized wire payload.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateMessage {
    pub id: String,
    pub sender_id: String,
    pub recipient: String,
    #[serde_as(as = "serde_with::base64::Base64")]
    pub payload: Vec<u8>,
    pub sent_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_wire() -> WirePayload {
        WirePayload {
            kind: WireKind::Plain,
            envelope: None,
            plain: Some(b"hello".to_vec()),
            card: None,
            receipt: None,
            device: None,
            device_sig: None,
            revocation: None,
        }
    }

    #[test]
    fn plain_shape_accepts_plain_only() {
        assert!(plain_wire().validate_shape().is_ok());
    }

    #[test]
    fn e2ee_without_envelope_rejected() {
        let wire = WirePayload {
            kind: WireKind::E2ee,
            plain: None,
            ..plain_wire()
        };
        assert_eq!(
            wire.validate_shape(),
            Err(WireShapeError::MissingField {
                kind: WireKind::E2ee,
                field: "envelope",
            })
        );
    }

    #[test]
    fn receipt_with_plain_rejected() {
        let wire = WirePayload {
            kind: WireKind::Receipt,
            receipt: Some(Receipt {
                message_id: "msg_aa".into(),
                status: MessageStatus::Delivered,
            }),
            ..plain_wire()
        };
        assert_eq!(
            wire.validate_shape(),
            Err(WireShapeError::ForbiddenField {
                kind: WireKind::Receipt,
                field: "plain",
            })
        );
    }

    #[test]
    fn auth_payload_is_stable_and_binding() {
        let wire = plain_wire();
        let a = wire.auth_payload("msg_01", "aim1alice", "aim1bob");
        let b = wire.auth_payload("msg_01", "aim1alice", "aim1bob");
        assert_eq!(a, b);
        assert_ne!(a, wire.auth_payload("msg_02", "aim1alice", "aim1bob"));
        assert_ne!(a, wire.auth_payload("msg_01", "aim1alice", "aim1carol"));
    }

    #[test]
    fn kind_tags_are_snake_case() {
        assert_eq!(
            serde_json::to_string(&WireKind::DeviceRevoke).expect("serialize"),
            "\"device_revoke\""
        );
    }

    #[test]
    fn aad_binds_chain_index() {
        let a = MessageEnvelope::aad("sess1_aa", "msg_01", 7);
        let b = MessageEnvelope::aad("sess1_aa", "msg_01", 8);
        assert_ne!(a, b);
    }
}
