//! `aim1`-prefixed identity identifiers.
//!
//! `identity_id = "aim1" + Base58(Blake2b-256(signing_public_key))`. The
//! binding is verifiable by anyone holding the public key, which is what
//! makes contact cards self-contained.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

/// Identity id prefix.
pub const PREFIX: &str = "aim1";

/// Minimum plausible identity id length (prefix + hash encoding).
pub const MIN_LEN: usize = 12;

type Blake2b256 = Blake2b<U32>;

/// Build the identity id for a signing public key.
pub fn build(sig_pub: &[u8; 32]) -> String {
    let mut hasher = Blake2b256::new();
    hasher.update(sig_pub);
    let digest = hasher.finalize();
    format!("{}{}", PREFIX, bs58::encode(digest).into_string())
}

/// Check that `id` is the identity id of `sig_pub`.
pub fn verify(id: &str, sig_pub: &[u8; 32]) -> bool {
    build(sig_pub) == id
}

/// Shallow shape check for ids received from untrusted input: prefix and
/// minimum length only, no key binding.
pub fn is_plausible(id: &str) -> bool {
    id.starts_with(PREFIX) && id.len() >= MIN_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_verify_roundtrip() {
        let pub_key = [0xABu8; 32];
        let id = build(&pub_key);
        assert!(id.starts_with(PREFIX));
        assert!(verify(&id, &pub_key));
    }

    #[test]
    fn bit_flip_falsifies() {
        let pub_key = [0xABu8; 32];
        let id = build(&pub_key);
        for byte in 0..32 {
            let mut flipped = pub_key;
            flipped[byte] ^= 0x01;
            assert!(!verify(&id, &flipped), "flip at byte {byte} must falsify");
        }
    }

    #[test]
    fn plausibility_checks_shape_only() {
        let id = build(&[1u8; 32]);
        assert!(is_plausible(&id));
        assert!(!is_plausible("aim1short"));
        assert!(!is_plausible("bim1aaaaaaaaaaaaaaaa"));
    }
}
