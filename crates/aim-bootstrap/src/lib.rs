//! # aim-bootstrap
//!
//! The bootstrap trust pipeline: signed network manifests verified against
//! a rotating trust bundle, a local cache of the last accepted set, a
//! baked-in fallback, and the refresh controller that schedules the next
//! fetch from freshness and failure state.
//!
//! Selection priority is always **manifest > cache > baked**.

pub mod bundle;
pub mod cache;
pub mod manager;
pub mod manifest;
pub mod refresh;

/// Error types for trust operations. Each carries a stable reject code.
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    /// Malformed JSON, unknown fields, trailing bytes, or field ranges.
    #[error("manifest schema invalid: {0}")]
    SchemaInvalid(String),

    /// Reconnect-policy constraints violated.
    #[error("manifest policy invalid: {0}")]
    PolicyInvalid(String),

    /// `expires_at` is not in the future.
    #[error("manifest expired")]
    Expired,

    /// Version is below the last applied manifest.
    #[error("manifest replay detected: version {version} < last applied {last_applied}")]
    ReplayDetected { version: i32, last_applied: i32 },

    /// `key_id` is not an active manifest key in the bundle.
    #[error("manifest key unknown: {0}")]
    KeyUnknown(String),

    /// Ed25519 verification failed.
    #[error("manifest signature invalid")]
    SignatureInvalid,

    /// Trust-bundle verification or rotation failed.
    #[error("trust bundle invalid: {0}")]
    BundleInvalid(String),

    /// No trust bundle installed.
    #[error("no trust bundle installed")]
    NoBundle,

    #[error("storage error: {0}")]
    Storage(String),
}

impl TrustError {
    /// The machine-readable reject code.
    pub fn code(&self) -> &'static str {
        match self {
            TrustError::SchemaInvalid(_) => "MANIFEST_SCHEMA_INVALID",
            TrustError::PolicyInvalid(_) => "MANIFEST_POLICY_INVALID",
            TrustError::Expired => "MANIFEST_EXPIRED",
            TrustError::ReplayDetected { .. } => "MANIFEST_REPLAY_DETECTED",
            TrustError::KeyUnknown(_) => "MANIFEST_KEY_UNKNOWN",
            TrustError::SignatureInvalid => "MANIFEST_SIGNATURE_INVALID",
            TrustError::BundleInvalid(_) | TrustError::NoBundle => "TRUST_BUNDLE_INVALID",
            TrustError::Storage(_) => "TRUST_STORAGE_ERROR",
        }
    }

    /// Storage failures are recoverable; verification rejects are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TrustError::Storage(_))
    }
}

pub type Result<T> = std::result::Result<T, TrustError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            TrustError::SchemaInvalid("x".into()).code(),
            "MANIFEST_SCHEMA_INVALID"
        );
        assert_eq!(
            TrustError::ReplayDetected {
                version: 1,
                last_applied: 2
            }
            .code(),
            "MANIFEST_REPLAY_DETECTED"
        );
        assert_eq!(
            TrustError::BundleInvalid("x".into()).code(),
            "TRUST_BUNDLE_INVALID"
        );
    }
}
