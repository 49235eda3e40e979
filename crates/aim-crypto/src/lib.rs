//! # aim-crypto
//!
//! Cryptographic primitives for the AIM private-messaging daemon.
//!
//! The cryptographic suite is fixed — no algorithm negotiation:
//!
//! - [`ed25519`] — Ed25519 signing and verification (RFC 8032)
//! - [`x25519`] — X25519 key agreement (RFC 7748)
//! - [`xchacha`] — XChaCha20-Poly1305 AEAD with 24-byte nonces
//! - [`argon2id`] — Argon2id passphrase key derivation with a minimum policy
//! - [`hkdf`] — HKDF-SHA256 expansion over AIM info strings
//! - [`mnemonic`] — BIP-39 mnemonic handling and identity seed derivation
//! - [`identity_id`] — `aim1`-prefixed Base58 identity identifiers
//! - [`envelope`] — the passphrase-keyed authenticated envelope used for
//!   every persisted state file

pub mod argon2id;
pub mod ed25519;
pub mod envelope;
pub mod hkdf;
pub mod identity_id;
pub mod mnemonic;
pub mod x25519;
pub mod xchacha;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Ed25519 signature verification failed.
    #[error("signature verification failed")]
    SignatureVerification,

    /// AEAD operation failed (authentication tag mismatch).
    #[error("AEAD operation failed")]
    Aead,

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Argon2id hashing failed.
    #[error("argon2id error: {0}")]
    Argon2(String),

    /// The mnemonic sentence is not valid BIP-39 English.
    #[error("invalid mnemonic")]
    InvalidMnemonic,

    /// An encrypted envelope declares KDF parameters below the minimum
    /// policy and is refused outright.
    #[error("KDF parameter downgrade refused: {0}")]
    KdfDowngrade(String),

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
