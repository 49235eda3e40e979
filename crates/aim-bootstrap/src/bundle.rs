//! Trust bundles and rotation.
//!
//! A bundle carries the root keys and the manifest signing keys. Updates
//! arrive as an envelope signed by a current root key and must preserve
//! chain continuity, advance the version, and overlap the active
//! manifest-key set with the current bundle so in-flight manifests stay
//! verifiable.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Result, TrustError};

/// A long-lived root key authorized to sign bundle updates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RootKey {
    pub key_id: String,
    /// Base64 Ed25519 public key.
    pub public_key: String,
}

/// A manifest signing key with its activity window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestKey {
    pub key_id: String,
    /// Only `ed25519` is accepted.
    pub algorithm: String,
    /// Base64 Ed25519 public key.
    pub public_key: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl ManifestKey {
    /// Active iff `not_before <= now < not_after` and the algorithm is
    /// ed25519.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.algorithm == "ed25519" && self.not_before <= now && now < self.not_after
    }

    pub(crate) fn decoded_public_key(&self) -> Result<[u8; 32]> {
        decode_key_b64(&self.public_key)
    }
}

fn decode_key_b64(encoded: &str) -> Result<[u8; 32]> {
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| TrustError::BundleInvalid("malformed public key".into()))
}

/// The signed collection of root and manifest keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustBundle {
    pub version: i32,
    pub bundle_id: String,
    pub generated_at: DateTime<Utc>,
    pub root_keys: Vec<RootKey>,
    pub manifest_keys: Vec<ManifestKey>,
}

impl TrustBundle {
    /// Key ids of manifest keys active at `now`.
    pub fn active_key_ids(&self, now: DateTime<Utc>) -> Vec<&str> {
        self.manifest_keys
            .iter()
            .filter(|k| k.is_active(now))
            .map(|k| k.key_id.as_str())
            .collect()
    }

    /// The canonical signed byte string of a bundle: its JSON encoding
    /// with fields in declaration order.
    pub fn canonical_payload(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// A bundle update envelope: the next bundle plus a root-key signature
/// over its canonical payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustBundleUpdate {
    pub root_key_id: String,
    /// Base64 Ed25519 signature over the new bundle's canonical payload.
    pub signature: String,
    pub bundle: TrustBundle,
}

/// Verify an update against the current bundle and return the new bundle.
pub fn verify_and_apply_update(
    current: &TrustBundle,
    update: &TrustBundleUpdate,
    at: DateTime<Utc>,
) -> Result<TrustBundle> {
    let root = current
        .root_keys
        .iter()
        .find(|k| k.key_id == update.root_key_id)
        .ok_or_else(|| {
            TrustError::BundleInvalid(format!("unknown root key {}", update.root_key_id))
        })?;

    let signature = base64::engine::general_purpose::STANDARD
        .decode(&update.signature)
        .map_err(|_| TrustError::BundleInvalid("malformed signature".into()))?;
    let public_key = decode_key_b64(&root.public_key)?;
    aim_crypto::ed25519::VerifyingKey::from_bytes(&public_key)
        .map_err(|_| TrustError::BundleInvalid("malformed root key".into()))?
        .verify_raw(&update.bundle.canonical_payload(), &signature)
        .map_err(|_| TrustError::BundleInvalid("bundle signature invalid".into()))?;

    // Chain continuity: at least one root key survives with an identical
    // public key.
    let survives = update.bundle.root_keys.iter().any(|next| {
        current
            .root_keys
            .iter()
            .any(|cur| cur.public_key == next.public_key)
    });
    if !survives {
        return Err(TrustError::BundleInvalid(
            "no root key carried over".into(),
        ));
    }

    if update.bundle.version <= current.version {
        return Err(TrustError::BundleInvalid(format!(
            "version {} does not advance past {}",
            update.bundle.version, current.version
        )));
    }

    let next_active = update.bundle.active_key_ids(at);
    if next_active.is_empty() {
        return Err(TrustError::BundleInvalid(
            "no active manifest key".into(),
        ));
    }

    // Rotation overlap: the current and next active sets must share a key
    // id so already-issued manifests stay verifiable.
    let current_active = current.active_key_ids(at);
    if !current_active.is_empty()
        && !next_active.iter().any(|id| current_active.contains(id))
    {
        return Err(TrustError::BundleInvalid(
            "manifest key rotation without overlap".into(),
        ));
    }

    Ok(update.bundle.clone())
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use chrono::Duration;

    #[test]
    fn valid_rotation_is_accepted() {
        let (current, keys) = test_bundle();
        let now = Utc::now();

        let mut next = current.clone();
        next.version = 2;
        next.bundle_id = "bundle-2026-02".to_string();
        // Rotate key b out, key 2027-a in; key a overlaps.
        next.manifest_keys = vec![
            manifest_key(
                "manifest-2026-a",
                &keys["manifest-2026-a"],
                now - Duration::days(1),
                now + Duration::days(30),
            ),
            manifest_key(
                "manifest-2027-a",
                &keys["manifest-2027-a"],
                now - Duration::hours(1),
                now + Duration::days(365),
            ),
        ];

        let update = signed_update(next, "root-1", &keys["root-1"]);
        let applied = verify_and_apply_update(&current, &update, now).expect("apply");
        assert_eq!(applied.version, 2);
    }

    #[test]
    fn rotation_without_overlap_is_rejected() {
        let (current, keys) = test_bundle();
        let now = Utc::now();

        let mut next = current.clone();
        next.version = 2;
        next.manifest_keys = vec![manifest_key(
            "manifest-2027-a",
            &keys["manifest-2027-a"],
            now - Duration::hours(1),
            now + Duration::days(365),
        )];

        let update = signed_update(next, "root-1", &keys["root-1"]);
        let err = verify_and_apply_update(&current, &update, now).expect_err("must reject");
        assert_eq!(err.code(), "TRUST_BUNDLE_INVALID");
    }

    #[test]
    fn version_must_advance() {
        let (current, keys) = test_bundle();
        let update = signed_update(current.clone(), "root-1", &keys["root-1"]);
        assert!(verify_and_apply_update(&current, &update, Utc::now()).is_err());
    }

    #[test]
    fn unknown_root_key_rejected() {
        let (current, keys) = test_bundle();
        let mut next = current.clone();
        next.version = 2;
        let update = signed_update(next, "root-9", &keys["root-1"]);
        assert!(verify_and_apply_update(&current, &update, Utc::now()).is_err());
    }

    #[test]
    fn wrong_signer_rejected() {
        let (current, keys) = test_bundle();
        let mut next = current.clone();
        next.version = 2;
        // Claims root-1 but signed by root-2.
        let update = signed_update(next, "root-1", &keys["root-2"]);
        assert!(verify_and_apply_update(&current, &update, Utc::now()).is_err());
    }

    #[test]
    fn dropping_all_roots_rejected() {
        let (current, keys) = test_bundle();
        let now = Utc::now();
        let fresh_root = aim_crypto::ed25519::SigningKey::from_seed(&[99u8; 32]);

        let mut next = current.clone();
        next.version = 2;
        next.root_keys = vec![RootKey {
            key_id: "root-x".to_string(),
            public_key: b64_public(&fresh_root),
        }];

        let update = signed_update(next, "root-1", &keys["root-1"]);
        assert!(verify_and_apply_update(&current, &update, now).is_err());
    }

    #[test]
    fn no_active_keys_rejected() {
        let (current, keys) = test_bundle();
        let now = Utc::now();
        let mut next = current.clone();
        next.version = 2;
        next.manifest_keys = vec![manifest_key(
            "manifest-2026-a",
            &keys["manifest-2026-a"],
            now + Duration::days(10),
            now + Duration::days(20),
        )];
        let update = signed_update(next, "root-1", &keys["root-1"]);
        assert!(verify_and_apply_update(&current, &update, now).is_err());
    }

    #[test]
    fn inactive_key_windows() {
        let (_, keys) = test_bundle();
        let now = Utc::now();
        let key = manifest_key(
            "manifest-2026-a",
            &keys["manifest-2026-a"],
            now - Duration::days(2),
            now - Duration::days(1),
        );
        assert!(!key.is_active(now));

        let mut future = key.clone();
        future.not_before = now + Duration::days(1);
        future.not_after = now + Duration::days(2);
        assert!(!future.is_active(now));

        let mut wrong_algo = key;
        wrong_algo.not_before = now - Duration::days(1);
        wrong_algo.not_after = now + Duration::days(1);
        wrong_algo.algorithm = "rsa".to_string();
        assert!(!wrong_algo.is_active(now));
    }
}
