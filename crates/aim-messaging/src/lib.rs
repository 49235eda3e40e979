//! # aim-messaging
//!
//! The messaging state machine: wire codec and device-auth binding,
//! inbound policy, privacy/blocklist/request-inbox state, the notification
//! hub, and the [`service::MessagingService`] orchestrating outbound and
//! inbound flows with a background retry loop.

pub mod metrics;
pub mod notify;
pub mod policy;
pub mod privacy;
pub mod requests;
pub mod service;
pub mod wire;

use std::collections::BTreeMap;

/// Error category, counted per category in the metrics state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidParams,
    NotFound,
    Unauthorized,
    Conflict,
    Network,
    Crypto,
    Storage,
    Policy,
    Trust,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::InvalidParams => "invalid_params",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Unauthorized => "unauthorized",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::Network => "network",
            ErrorCategory::Crypto => "crypto",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Policy => "policy",
            ErrorCategory::Trust => "trust",
        }
    }
}

/// Aggregate result of a device-revocation fan-out that did not fully
/// succeed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceRevocationDeliveryError {
    pub attempted: usize,
    pub failed: usize,
    pub failures: BTreeMap<String, String>,
}

impl DeviceRevocationDeliveryError {
    /// True when every attempted delivery failed.
    pub fn is_full_failure(&self) -> bool {
        self.attempted > 0 && self.failed >= self.attempted
    }
}

impl std::fmt::Display for DeviceRevocationDeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "device revocation delivery failed for {}/{} contacts",
            self.failed, self.attempted
        )
    }
}

/// Error types for messaging operations.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("unknown contact {0}")]
    UnknownContact(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("rejected by inbound policy: {0}")]
    PolicyRejected(&'static str),

    #[error("trust error: {0}")]
    Trust(String),

    #[error("not permitted: {0}")]
    Unauthorized(String),

    #[error(transparent)]
    RevocationDelivery(#[from] DeviceRevocationDeliveryError),
}

impl std::error::Error for DeviceRevocationDeliveryError {}

impl MessagingError {
    /// The §-category this error counts against.
    pub fn category(&self) -> ErrorCategory {
        match self {
            MessagingError::InvalidParams(_) => ErrorCategory::InvalidParams,
            MessagingError::UnknownContact(_) | MessagingError::NotFound(_) => {
                ErrorCategory::NotFound
            }
            MessagingError::Conflict(_) => ErrorCategory::Conflict,
            MessagingError::Network(_) => ErrorCategory::Network,
            MessagingError::Crypto(_) => ErrorCategory::Crypto,
            MessagingError::Storage(_) => ErrorCategory::Storage,
            MessagingError::PolicyRejected(_) => ErrorCategory::Policy,
            MessagingError::Trust(_) => ErrorCategory::Trust,
            MessagingError::Unauthorized(_) => ErrorCategory::Unauthorized,
            MessagingError::RevocationDelivery(_) => ErrorCategory::Network,
        }
    }
}

impl From<aim_db::DbError> for MessagingError {
    fn from(e: aim_db::DbError) -> Self {
        match e {
            aim_db::DbError::NotFound(what) => MessagingError::NotFound(what),
            aim_db::DbError::MessageIdConflict(id) => {
                MessagingError::Conflict(format!("message id {id}"))
            }
            aim_db::DbError::InvalidQuery(what) => MessagingError::InvalidParams(what),
            other => MessagingError::Storage(other.to_string()),
        }
    }
}

impl From<aim_session::SessionError> for MessagingError {
    fn from(e: aim_session::SessionError) -> Self {
        match e {
            aim_session::SessionError::Storage(what) => MessagingError::Storage(what),
            other => MessagingError::Crypto(other.to_string()),
        }
    }
}

impl From<aim_identity::IdentityError> for MessagingError {
    fn from(e: aim_identity::IdentityError) -> Self {
        use aim_identity::IdentityError as IE;
        match e {
            IE::UnknownContact(id) => MessagingError::UnknownContact(id),
            IE::ContactKeyMismatch(id) => {
                MessagingError::Conflict(format!("pinned key mismatch for {id}"))
            }
            IE::InvalidPassword | IE::PasswordLocked { .. } | IE::PasswordRequired => {
                MessagingError::Unauthorized(e.to_string())
            }
            IE::Storage(what) => MessagingError::Storage(what),
            other => MessagingError::Crypto(other.to_string()),
        }
    }
}

impl From<aim_transport::TransportError> for MessagingError {
    fn from(e: aim_transport::TransportError) -> Self {
        match e {
            aim_transport::TransportError::InvalidInput(what) => {
                MessagingError::InvalidParams(what)
            }
            other => MessagingError::Network(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, MessagingError>;
