//! Ed25519 signing and verification (RFC 8032).
//!
//! Ed25519 is the root signature algorithm for AIM. The identity signing
//! key certifies devices and contact cards; device keys authenticate every
//! outbound wire; manifest keys sign network manifests.

use ed25519_dalek::{Signer, Verifier};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{CryptoError, Result};

/// An Ed25519 signing key (private half). Zeroized on drop.
pub struct SigningKey {
    inner: ed25519_dalek::SigningKey,
}

impl Clone for SigningKey {
    fn clone(&self) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::from_bytes(&self.inner.to_bytes()),
        }
    }
}

impl Drop for SigningKey {
    fn drop(&mut self) {
        let mut bytes = self.inner.to_bytes();
        bytes.zeroize();
    }
}

/// An Ed25519 verification key (public half).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyingKey {
    inner: ed25519_dalek::VerifyingKey,
}

/// An Ed25519 signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    inner: ed25519_dalek::Signature,
}

impl SigningKey {
    /// Generate a fresh random signing key.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            inner: ed25519_dalek::SigningKey::generate(&mut csprng),
        }
    }

    /// Build a signing key from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::from_bytes(seed),
        }
    }

    /// The 32-byte seed of this signing key.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// The 64-byte expanded keypair encoding (seed ‖ public).
    pub fn to_keypair_bytes(&self) -> [u8; 64] {
        self.inner.to_keypair_bytes()
    }

    /// The corresponding verification key.
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey {
            inner: self.inner.verifying_key(),
        }
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature {
            inner: self.inner.sign(message),
        }
    }
}

impl VerifyingKey {
    /// Parse a verification key from its 32-byte encoding.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let inner = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|e| CryptoError::InvalidInput(e.to_string()))?;
        Ok(Self { inner })
    }

    /// The 32-byte encoding of this key.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// The 32-byte encoding as a borrowed array.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.inner.as_bytes()
    }

    /// Verify a signature over a message.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        self.inner
            .verify(message, &signature.inner)
            .map_err(|_| CryptoError::SignatureVerification)
    }

    /// Verify a signature supplied as a raw 64-byte slice.
    pub fn verify_raw(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let bytes: [u8; 64] = signature
            .try_into()
            .map_err(|_| CryptoError::InvalidInput("signature must be 64 bytes".into()))?;
        self.verify(message, &Signature::from_bytes(&bytes))
    }
}

impl Signature {
    /// Parse a signature from its 64-byte encoding.
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Self {
            inner: ed25519_dalek::Signature::from_bytes(bytes),
        }
    }

    /// The 64-byte encoding of this signature.
    pub fn to_bytes(&self) -> [u8; 64] {
        self.inner.to_bytes()
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("public", &self.verifying_key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let key = SigningKey::generate();
        let sig = key.sign(b"over the ratchet");
        assert!(key.verifying_key().verify(b"over the ratchet", &sig).is_ok());
    }

    #[test]
    fn wrong_message_fails() {
        let key = SigningKey::generate();
        let sig = key.sign(b"original");
        assert!(key.verifying_key().verify(b"tampered", &sig).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let a = SigningKey::generate();
        let b = SigningKey::generate();
        let sig = a.sign(b"msg");
        assert!(b.verifying_key().verify(b"msg", &sig).is_err());
    }

    #[test]
    fn seed_roundtrip_is_deterministic() {
        let seed = [7u8; 32];
        let a = SigningKey::from_seed(&seed);
        let b = SigningKey::from_seed(&seed);
        assert_eq!(
            a.verifying_key().to_bytes(),
            b.verifying_key().to_bytes()
        );
    }

    #[test]
    fn verify_raw_rejects_bad_length() {
        let key = SigningKey::generate();
        let result = key.verifying_key().verify_raw(b"msg", &[0u8; 63]);
        assert!(matches!(result, Err(CryptoError::InvalidInput(_))));
    }

    #[test]
    fn signature_bytes_roundtrip() {
        let key = SigningKey::generate();
        let sig = key.sign(b"encode me");
        let restored = Signature::from_bytes(&sig.to_bytes());
        assert_eq!(sig, restored);
    }
}
