//! Identity, device and contact records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

/// The local identity as exposed over RPC. The signing key itself never
/// leaves the identity manager.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// `aim1`-prefixed identity id bound to `sig_pub`.
    pub id: String,
    /// Ed25519 signing public key.
    #[serde_as(as = "serde_with::hex::Hex")]
    pub sig_pub: [u8; 32],
}

/// A device certified by the identity key.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// `dev1_`-prefixed device id derived from the device public key.
    pub id: String,
    pub name: String,
    /// Ed25519 device public key.
    #[serde_as(as = "serde_with::hex::Hex")]
    pub pub_key: [u8; 32],
    /// Identity-key signature over the device certificate payload.
    #[serde_as(as = "serde_with::hex::Hex")]
    pub cert_sig: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub is_revoked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Canonical device certificate payload:
/// `identity_id ‖ 0 ‖ device_id ‖ 0 ‖ pub`.
pub fn device_cert_payload(identity_id: &str, device_id: &str, pub_key: &[u8; 32]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(identity_id.len() + device_id.len() + 34);
    payload.extend_from_slice(identity_id.as_bytes());
    payload.push(0);
    payload.extend_from_slice(device_id.as_bytes());
    payload.push(0);
    payload.extend_from_slice(pub_key);
    payload
}

/// A signed, broadcastable device revocation.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRevocation {
    pub identity_id: String,
    pub device_id: String,
    /// Unix nanoseconds at revocation time.
    pub timestamp_ns: i64,
    /// Identity-key signature over [`DeviceRevocation::signing_payload`].
    #[serde_as(as = "serde_with::hex::Hex")]
    pub signature: Vec<u8>,
}

impl DeviceRevocation {
    /// Canonical signing payload: `"identity_id:device_id:unix_nano"`.
    pub fn signing_payload(identity_id: &str, device_id: &str, timestamp_ns: i64) -> Vec<u8> {
        format!("{identity_id}:{device_id}:{timestamp_ns}").into_bytes()
    }
}

/// A known peer. `public_key` is pinned when the contact was added from a
/// verified card and absent when added by raw id.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub display_name: String,
    #[serde_as(as = "Option<serde_with::hex::Hex>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<[u8; 32]>,
    pub added_at: DateTime<Utc>,
}

impl Contact {
    /// True when the contact carries a pinned public key.
    pub fn is_verified(&self) -> bool {
        self.public_key.is_some()
    }
}

/// A self-contained signed record binding a display name and public key to
/// an identity id.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactCard {
    pub identity_id: String,
    pub display_name: String,
    #[serde_as(as = "serde_with::hex::Hex")]
    pub public_key: [u8; 32],
    /// Identity-key signature over [`ContactCard::signing_payload`].
    #[serde_as(as = "serde_with::hex::Hex")]
    pub signature: Vec<u8>,
}

impl ContactCard {
    /// Canonical signing payload:
    /// `identity_id ‖ 0 ‖ display_name ‖ 0 ‖ public_key`.
    pub fn signing_payload(identity_id: &str, display_name: &str, public_key: &[u8; 32]) -> Vec<u8> {
        let mut payload =
            Vec::with_capacity(identity_id.len() + display_name.len() + 34);
        payload.extend_from_slice(identity_id.as_bytes());
        payload.push(0);
        payload.extend_from_slice(display_name.as_bytes());
        payload.push(0);
        payload.extend_from_slice(public_key);
        payload
    }

    /// The signing payload of this card.
    pub fn payload(&self) -> Vec<u8> {
        Self::signing_payload(&self.identity_id, &self.display_name, &self.public_key)
    }
}
