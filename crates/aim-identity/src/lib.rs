//! # aim-identity
//!
//! The identity and trust layer: the passphrase-encrypted seed vault
//! ([`seed::SeedStore`]) and the identity manager
//! ([`manager::IdentityManager`]) owning the keypair, devices, contacts and
//! peer device-revocation sets.

pub mod manager;
pub mod seed;

use chrono::{DateTime, Utc};

/// Error types for identity operations.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The mnemonic sentence is not valid BIP-39 English.
    #[error("invalid mnemonic")]
    InvalidMnemonic,

    /// Wrong passphrase for the vault.
    #[error("invalid password")]
    InvalidPassword,

    /// Too many failed passphrase attempts; locked until the given time.
    #[error("password locked until {until}")]
    PasswordLocked { until: DateTime<Utc> },

    /// No seed has been created or imported yet.
    #[error("seed not available")]
    SeedNotAvailable,

    /// The operation needs the vault passphrase and none is held.
    #[error("password required")]
    PasswordRequired,

    /// No identity installed.
    #[error("no identity")]
    NoIdentity,

    /// A card's key differs from the contact's pinned key.
    #[error("contact key mismatch for {0}")]
    ContactKeyMismatch(String),

    /// The referenced contact does not exist.
    #[error("unknown contact {0}")]
    UnknownContact(String),

    /// The sender is known but carries no pinned key.
    #[error("contact {0} is not verified")]
    UnverifiedContact(String),

    /// The referenced device does not exist.
    #[error("unknown device {0}")]
    UnknownDevice(String),

    /// The device certificate does not chain to the sender's identity key.
    #[error("device certificate invalid: {0}")]
    InvalidDeviceCert(String),

    /// The device appears in the sender's revoked set.
    #[error("device {0} is revoked")]
    RevokedDevice(String),

    /// Contact card signature or identity binding failed.
    #[error("invalid contact card: {0}")]
    InvalidCard(String),

    /// Device revocation signature failed.
    #[error("invalid device revocation: {0}")]
    InvalidRevocation(String),

    /// Underlying cryptographic failure.
    #[error(transparent)]
    Crypto(#[from] aim_crypto::CryptoError),

    /// Persistence failure; in-memory state was rolled back.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, IdentityError>;

/// Create a directory with `0o700` permissions, tightening it if it exists.
pub(crate) fn ensure_private_dir(path: &std::path::Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| IdentityError::Storage(e.to_string()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .map_err(|e| IdentityError::Storage(e.to_string()))?;
    }
    Ok(())
}

/// Write a file atomically (tmp + rename) with `0o600` permissions.
pub(crate) fn write_private_file(path: &std::path::Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes).map_err(|e| IdentityError::Storage(e.to_string()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| IdentityError::Storage(e.to_string()))?;
    }
    std::fs::rename(&tmp, path).map_err(|e| IdentityError::Storage(e.to_string()))
}
