//! X25519 key agreement (RFC 7748).
//!
//! The identity derives a long-lived X25519 encryption keypair alongside
//! its Ed25519 signing keypair. Its public half rides in message envelopes
//! as the ratchet public key.

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

/// A long-lived X25519 secret key.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct EncryptionSecret {
    inner: StaticSecret,
}

/// An X25519 public key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionPublic {
    bytes: [u8; 32],
}

/// A shared secret produced by key agreement. Zeroized on drop.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct SharedSecret {
    bytes: [u8; 32],
}

impl EncryptionSecret {
    /// Generate a fresh random secret.
    pub fn random() -> Self {
        Self {
            inner: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Build a secret from a 32-byte seed.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            inner: StaticSecret::from(bytes),
        }
    }

    /// The raw 32 bytes of this secret.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// The corresponding public key.
    pub fn public_key(&self) -> EncryptionPublic {
        EncryptionPublic {
            bytes: PublicKey::from(&self.inner).to_bytes(),
        }
    }

    /// Diffie-Hellman key agreement with a peer public key.
    pub fn diffie_hellman(&self, their_public: &EncryptionPublic) -> SharedSecret {
        let shared = self.inner.diffie_hellman(&PublicKey::from(their_public.bytes));
        SharedSecret {
            bytes: *shared.as_bytes(),
        }
    }
}

impl EncryptionPublic {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.bytes
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}
