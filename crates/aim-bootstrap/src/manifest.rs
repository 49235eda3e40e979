//! Network manifest parsing, validation and signature verification.

use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use aim_transport::{BootstrapSet, ReconnectPolicy};

use crate::bundle::TrustBundle;
use crate::{Result, TrustError};

/// Reconnect policy as carried in the manifest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectPolicySpec {
    pub base_ms: u32,
    pub max_ms: u32,
    pub jitter_ratio: f64,
}

/// A signed network manifest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkManifest {
    pub version: i32,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub bootstrap_nodes: Vec<String>,
    pub min_peers: u32,
    pub reconnect_policy: ReconnectPolicySpec,
    pub key_id: String,
    /// Base64 Ed25519 signature over [`canonical_payload`].
    pub signature: String,
}

/// Strict decode: unknown fields and trailing bytes are schema errors.
pub fn decode(bytes: &[u8]) -> Result<NetworkManifest> {
    let mut deserializer = serde_json::Deserializer::from_slice(bytes);
    let manifest = NetworkManifest::deserialize(&mut deserializer)
        .map_err(|e| TrustError::SchemaInvalid(e.to_string()))?;
    deserializer
        .end()
        .map_err(|_| TrustError::SchemaInvalid("trailing bytes".into()))?;
    Ok(manifest)
}

fn valid_key_id(key_id: &str) -> bool {
    !key_id.is_empty()
        && key_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'))
}

/// Semantic validation of field ranges.
pub fn validate(manifest: &NetworkManifest) -> Result<()> {
    if manifest.version < 1 {
        return Err(TrustError::SchemaInvalid("version must be >= 1".into()));
    }
    if manifest.expires_at <= manifest.generated_at {
        return Err(TrustError::SchemaInvalid(
            "expires_at must follow generated_at".into(),
        ));
    }
    let nodes = manifest.bootstrap_nodes.len();
    if nodes == 0 || nodes > 64 {
        return Err(TrustError::SchemaInvalid(format!(
            "bootstrap_nodes count {nodes} outside 1..=64"
        )));
    }
    if manifest.bootstrap_nodes.iter().any(|n| n.is_empty()) {
        return Err(TrustError::SchemaInvalid("empty bootstrap node".into()));
    }
    if manifest.min_peers == 0 || manifest.min_peers > 128 {
        return Err(TrustError::SchemaInvalid(format!(
            "min_peers {} outside 1..=128",
            manifest.min_peers
        )));
    }
    if !valid_key_id(&manifest.key_id) {
        return Err(TrustError::SchemaInvalid(format!(
            "key_id {:?} fails the id charset",
            manifest.key_id
        )));
    }

    let policy = &manifest.reconnect_policy;
    if !(500..=120_000).contains(&policy.base_ms) {
        return Err(TrustError::PolicyInvalid(format!(
            "base_ms {} outside 500..=120000",
            policy.base_ms
        )));
    }
    if !(500..=300_000).contains(&policy.max_ms) {
        return Err(TrustError::PolicyInvalid(format!(
            "max_ms {} outside 500..=300000",
            policy.max_ms
        )));
    }
    if policy.max_ms < policy.base_ms {
        return Err(TrustError::PolicyInvalid(
            "max_ms below base_ms".into(),
        ));
    }
    if !(0.0..=1.0).contains(&policy.jitter_ratio) {
        return Err(TrustError::PolicyInvalid(format!(
            "jitter_ratio {} outside 0..=1",
            policy.jitter_ratio
        )));
    }
    Ok(())
}

/// The canonical signed byte string: fields in fixed key order, timestamps
/// as RFC-3339 with nanoseconds, signature excluded.
pub fn canonical_payload(manifest: &NetworkManifest) -> Vec<u8> {
    #[derive(Serialize)]
    struct CanonicalPolicy {
        base_ms: u32,
        jitter_ratio: f64,
        max_ms: u32,
    }

    #[derive(Serialize)]
    struct CanonicalManifest<'a> {
        bootstrap_nodes: &'a [String],
        expires_at: String,
        generated_at: String,
        key_id: &'a str,
        min_peers: u32,
        reconnect_policy: CanonicalPolicy,
        version: i32,
    }

    let canonical = CanonicalManifest {
        bootstrap_nodes: &manifest.bootstrap_nodes,
        expires_at: manifest
            .expires_at
            .to_rfc3339_opts(SecondsFormat::Nanos, true),
        generated_at: manifest
            .generated_at
            .to_rfc3339_opts(SecondsFormat::Nanos, true),
        key_id: &manifest.key_id,
        min_peers: manifest.min_peers,
        reconnect_policy: CanonicalPolicy {
            base_ms: manifest.reconnect_policy.base_ms,
            jitter_ratio: manifest.reconnect_policy.jitter_ratio,
            max_ms: manifest.reconnect_policy.max_ms,
        },
        version: manifest.version,
    };
    // A struct of plain fields serializes infallibly.
    serde_json::to_vec(&canonical).unwrap_or_default()
}

/// Full verification: semantics, expiry, replay, signature against an
/// active manifest key in the bundle.
pub fn verify(
    manifest: &NetworkManifest,
    bundle: &TrustBundle,
    now: DateTime<Utc>,
    last_applied_version: Option<i32>,
) -> Result<()> {
    validate(manifest)?;

    if manifest.expires_at <= now {
        return Err(TrustError::Expired);
    }
    if let Some(last_applied) = last_applied_version {
        if manifest.version < last_applied {
            return Err(TrustError::ReplayDetected {
                version: manifest.version,
                last_applied,
            });
        }
    }

    let key = bundle
        .manifest_keys
        .iter()
        .find(|k| k.key_id == manifest.key_id)
        .filter(|k| k.is_active(now))
        .ok_or_else(|| TrustError::KeyUnknown(manifest.key_id.clone()))?;

    let signature = base64::engine::general_purpose::STANDARD
        .decode(&manifest.signature)
        .map_err(|_| TrustError::SignatureInvalid)?;
    let public_key = key.decoded_public_key()?;
    let verifying = aim_crypto::ed25519::VerifyingKey::from_bytes(&public_key)
        .map_err(|_| TrustError::SignatureInvalid)?;
    verifying
        .verify_raw(&canonical_payload(manifest), &signature)
        .map_err(|_| TrustError::SignatureInvalid)
}

/// The bootstrap set carried by the manifest.
pub fn bootstrap_set(manifest: &NetworkManifest) -> BootstrapSet {
    BootstrapSet {
        bootstrap_nodes: manifest.bootstrap_nodes.clone(),
        min_peers: manifest.min_peers,
        reconnect_policy: ReconnectPolicy {
            base_ms: manifest.reconnect_policy.base_ms,
            max_ms: manifest.reconnect_policy.max_ms,
            jitter_ratio: manifest.reconnect_policy.jitter_ratio,
        },
    }
}
