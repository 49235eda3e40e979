//! Wire codec and device-auth binding.
//!
//! Outbound: pick `e2ee` when a session exists, else `plain` (optionally
//! carrying the self contact card), then bind the sending device with a
//! signature over the canonical auth payload and serialize into a
//! [`PrivateMessage`]. Inbound: strict decode and shape validation before
//! any cryptography runs.

use chrono::Utc;
use tracing::debug;

use aim_identity::manager::IdentityManager;
use aim_session::SessionManager;
use aim_types::identity::{ContactCard, DeviceRevocation};
use aim_types::message::{Message, MessageStatus};
use aim_types::wire::{PrivateMessage, Receipt, WireKind, WirePayload};

use crate::{MessagingError, Result};

fn empty_wire(kind: WireKind) -> WirePayload {
    WirePayload {
        kind,
        envelope: None,
        plain: None,
        card: None,
        receipt: None,
        device: None,
        device_sig: None,
        revocation: None,
    }
}

/// Build the outbound wire for a message: encrypted when a session exists,
/// plain otherwise. Returns the wire and whether it is encrypted.
pub fn build_wire_for_outbound(
    message: &Message,
    sessions: &SessionManager,
    ratchet_pub_key: [u8; 32],
    self_card: Option<ContactCard>,
) -> Result<(WirePayload, bool)> {
    if sessions.has_session(&message.contact_id)? {
        let envelope = sessions.encrypt(
            &message.contact_id,
            &message.id,
            ratchet_pub_key,
            &message.content,
        )?;
        let mut wire = empty_wire(WireKind::E2ee);
        wire.envelope = Some(envelope);
        return Ok((wire, true));
    }

    debug!(contact = %message.contact_id, "no session; sending plain wire");
    let mut wire = empty_wire(WireKind::Plain);
    wire.plain = Some(message.content.clone());
    wire.card = self_card;
    Ok((wire, false))
}

/// A receipt wire for a previously received message.
pub fn build_receipt_wire(message_id: &str, status: MessageStatus) -> WirePayload {
    let mut wire = empty_wire(WireKind::Receipt);
    wire.receipt = Some(Receipt {
        message_id: message_id.to_string(),
        status,
    });
    wire
}

/// A device-revocation wire.
pub fn build_revocation_wire(revocation: DeviceRevocation) -> WirePayload {
    let mut wire = empty_wire(WireKind::DeviceRevoke);
    wire.revocation = Some(revocation);
    wire
}

/// Bind the active device to the wire and serialize it for transport.
pub fn compose_signed_private_message(
    wire_id: &str,
    recipient: &str,
    mut wire: WirePayload,
    identity: &IdentityManager,
) -> Result<PrivateMessage> {
    let sender_id = identity.identity_id()?;
    let auth_payload = wire.auth_payload(wire_id, &sender_id, recipient);
    let (device, signature) = identity.active_device_auth(&auth_payload)?;
    wire.device = Some(device);
    wire.device_sig = Some(signature);

    let payload =
        serde_json::to_vec(&wire).map_err(|e| MessagingError::Crypto(e.to_string()))?;
    Ok(PrivateMessage {
        id: wire_id.to_string(),
        sender_id,
        recipient: recipient.to_string(),
        payload,
        sent_at: Utc::now(),
    })
}

/// Strictly decode an inbound wire payload and validate its shape.
pub fn decode_wire(payload: &[u8]) -> Result<WirePayload> {
    let wire: WirePayload = serde_json::from_slice(payload)
        .map_err(|e| MessagingError::Crypto(format!("malformed wire: {e}")))?;
    wire.validate_shape()
        .map_err(|e| MessagingError::Crypto(format!("wire shape: {e}")))?;
    Ok(wire)
}

/// Verify the device-auth binding of an inbound wire against the sender's
/// pinned trust state (known verified contacts).
pub fn verify_wire_device_auth(
    identity: &IdentityManager,
    message: &PrivateMessage,
    wire: &WirePayload,
) -> Result<()> {
    let device = wire
        .device
        .as_ref()
        .ok_or_else(|| MessagingError::Trust("wire carries no device".into()))?;
    let signature = wire
        .device_sig
        .as_ref()
        .ok_or_else(|| MessagingError::Trust("wire carries no device signature".into()))?;
    let auth_payload = wire.auth_payload(&message.id, &message.sender_id, &message.recipient);
    identity
        .verify_inbound_device(&message.sender_id, device, &auth_payload, signature)
        .map_err(|e| MessagingError::Trust(e.to_string()))
}

/// Verify the device-auth binding against a card key (unknown senders
/// admitted under `everyone` mode with a card attached).
pub fn verify_wire_device_auth_with_card(
    message: &PrivateMessage,
    wire: &WirePayload,
    card: &ContactCard,
) -> Result<()> {
    let device = wire
        .device
        .as_ref()
        .ok_or_else(|| MessagingError::Trust("wire carries no device".into()))?;
    let signature = wire
        .device_sig
        .as_ref()
        .ok_or_else(|| MessagingError::Trust("wire carries no device signature".into()))?;

    if device.id != aim_identity::manager::device_id(&device.pub_key) {
        return Err(MessagingError::Trust(
            "device id does not match public key".into(),
        ));
    }
    let identity_key = aim_crypto::ed25519::VerifyingKey::from_bytes(&card.public_key)
        .map_err(|e| MessagingError::Trust(e.to_string()))?;
    let cert_payload = aim_types::identity::device_cert_payload(
        &card.identity_id,
        &device.id,
        &device.pub_key,
    );
    identity_key
        .verify_raw(&cert_payload, &device.cert_sig)
        .map_err(|_| MessagingError::Trust("device certificate invalid".into()))?;

    let device_key = aim_crypto::ed25519::VerifyingKey::from_bytes(&device.pub_key)
        .map_err(|e| MessagingError::Trust(e.to_string()))?;
    let auth_payload = wire.auth_payload(&message.id, &message.sender_id, &message.recipient);
    device_key
        .verify_raw(&auth_payload, signature)
        .map_err(|_| MessagingError::Trust("wire signature invalid".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aim_session::{MemorySessionStore, SessionManager};
    use aim_types::message::{ContentType, Direction};
    use std::sync::Arc;

    fn message(contact: &str) -> Message {
        Message {
            id: "msg_0011".into(),
            contact_id: contact.to_string(),
            content: b"over the wire".to_vec(),
            timestamp: Utc::now(),
            direction: Direction::Out,
            status: MessageStatus::Pending,
            content_type: ContentType::Text,
            edited: false,
        }
    }

    #[test]
    fn plain_wire_without_session() {
        let sessions = SessionManager::new(Arc::new(MemorySessionStore::new()));
        let (wire, encrypted) =
            build_wire_for_outbound(&message("aim1bob"), &sessions, [0u8; 32], None)
                .expect("build");
        assert!(!encrypted);
        assert_eq!(wire.kind, WireKind::Plain);
        assert_eq!(wire.plain.as_deref(), Some(b"over the wire".as_slice()));
        assert!(wire.validate_shape().is_ok());
    }

    #[test]
    fn e2ee_wire_with_session() {
        let sessions = SessionManager::new(Arc::new(MemorySessionStore::new()));
        sessions
            .init_session("aim1alice", "aim1bob", [9u8; 32])
            .expect("init");
        let (wire, encrypted) =
            build_wire_for_outbound(&message("aim1bob"), &sessions, [0u8; 32], None)
                .expect("build");
        assert!(encrypted);
        assert_eq!(wire.kind, WireKind::E2ee);
        assert!(wire.envelope.is_some());
        assert!(wire.plain.is_none());
    }

    #[test]
    fn composed_wire_roundtrips_and_verifies() {
        let alice = aim_identity::manager::IdentityManager::ephemeral();
        alice.create_identity("pw").expect("identity");
        let bob = aim_identity::manager::IdentityManager::ephemeral();
        bob.create_identity("pw").expect("identity");
        bob.add_contact_card(&alice.self_contact_card("Alice").expect("card"))
            .expect("add contact");

        let mut wire = empty_wire(WireKind::Plain);
        wire.plain = Some(b"hello".to_vec());
        let pm = compose_signed_private_message(
            "msg_0011",
            &bob.identity_id().expect("id"),
            wire,
            &alice,
        )
        .expect("compose");

        let decoded = decode_wire(&pm.payload).expect("decode");
        verify_wire_device_auth(&bob, &pm, &decoded).expect("verify");
    }

    #[test]
    fn tampered_payload_fails_device_auth() {
        let alice = aim_identity::manager::IdentityManager::ephemeral();
        alice.create_identity("pw").expect("identity");
        let bob = aim_identity::manager::IdentityManager::ephemeral();
        bob.create_identity("pw").expect("identity");
        bob.add_contact_card(&alice.self_contact_card("Alice").expect("card"))
            .expect("add contact");

        let mut wire = empty_wire(WireKind::Plain);
        wire.plain = Some(b"hello".to_vec());
        let mut pm = compose_signed_private_message(
            "msg_0011",
            &bob.identity_id().expect("id"),
            wire,
            &alice,
        )
        .expect("compose");

        let mut decoded = decode_wire(&pm.payload).expect("decode");
        decoded.plain = Some(b"evil!".to_vec());
        pm.payload = serde_json::to_vec(&decoded).expect("serialize");
        assert!(verify_wire_device_auth(&bob, &pm, &decoded).is_err());
    }

    #[test]
    fn card_based_auth_for_unknown_sender() {
        let alice = aim_identity::manager::IdentityManager::ephemeral();
        alice.create_identity("pw").expect("identity");
        let card = alice.self_contact_card("Alice").expect("card");

        let mut wire = empty_wire(WireKind::Plain);
        wire.plain = Some(b"hello".to_vec());
        wire.card = Some(card.clone());
        let pm = compose_signed_private_message("msg_0011", "aim1anyone", wire, &alice)
            .expect("compose");

        let decoded = decode_wire(&pm.payload).expect("decode");
        verify_wire_device_auth_with_card(&pm, &decoded, &card).expect("verify");
    }

    #[test]
    fn malformed_wire_rejected() {
        assert!(decode_wire(b"not json").is_err());
        // e2ee without an envelope fails the shape check.
        let wire = empty_wire(WireKind::E2ee);
        let bytes = serde_json::to_vec(&wire).expect("serialize");
        assert!(decode_wire(&bytes).is_err());
    }
}
