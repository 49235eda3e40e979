//! HKDF-SHA256 expansion over AIM info strings.
//!
//! All key derivation below the BIP-39 layer goes through HKDF-SHA256 with
//! an empty salt and a domain-separating info string. The info strings are
//! part of the protocol and collected here.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::{CryptoError, Result};

/// Identity signing seed derivation.
pub const INFO_IDENTITY_SIGNING: &str = "aim/identity/signing/v1";
/// Identity encryption seed derivation.
pub const INFO_IDENTITY_ENCRYPTION: &str = "aim/identity/encryption/v1";
/// Per-device key derivation; the device index is appended by the caller.
pub const INFO_DEVICE_PREFIX: &str = "aim/device/";
/// Session root key derivation; the sorted id pair is appended.
pub const INFO_SESSION_ROOT_PREFIX: &str = "aim/session/root/v1|";
/// Directional chain keys.
pub const INFO_CHAIN_A2B: &str = "aim/ratchet/chain/a2b/v1";
pub const INFO_CHAIN_B2A: &str = "aim/ratchet/chain/b2a/v1";
/// Per-message key and chain advance.
pub const INFO_MESSAGE_KEY: &str = "aim/ratchet/message-key/v1";
pub const INFO_CHAIN_KEY: &str = "aim/ratchet/chain-key/v1";

/// Derive 32 bytes from `ikm` under the given info string.
pub fn derive(ikm: &[u8], info: &str) -> Result<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = [0u8; 32];
    hk.expand(info.as_bytes(), &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let a = derive(b"ikm", INFO_IDENTITY_SIGNING).expect("derive");
        let b = derive(b"ikm", INFO_IDENTITY_SIGNING).expect("derive");
        assert_eq!(a, b);
    }

    #[test]
    fn info_separates_domains() {
        let sig = derive(b"ikm", INFO_IDENTITY_SIGNING).expect("derive");
        let enc = derive(b"ikm", INFO_IDENTITY_ENCRYPTION).expect("derive");
        assert_ne!(sig, enc);
    }

    #[test]
    fn ikm_separates_outputs() {
        let a = derive(b"seed-a", INFO_CHAIN_A2B).expect("derive");
        let b = derive(b"seed-b", INFO_CHAIN_A2B).expect("derive");
        assert_ne!(a, b);
    }
}
