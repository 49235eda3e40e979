//! BIP-39 mnemonic handling and identity seed derivation.
//!
//! The identity is backed by a 24-word English mnemonic over 256 bits of
//! CSPRNG entropy. The BIP-39 seed (PBKDF2-HMAC-SHA512, 2048 iterations,
//! empty passphrase) feeds HKDF-SHA256 to produce the Ed25519 signing seed
//! and the X25519 encryption seed.

use bip39::{Language, Mnemonic};
use zeroize::Zeroize;

use crate::{hkdf, CryptoError, Result};

/// The seeds derived from a mnemonic. Zeroized on drop.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct IdentitySeeds {
    /// 64-byte BIP-39 master seed, IKM for device key derivation.
    pub master: [u8; 64],
    /// 32-byte Ed25519 signing seed.
    pub signing: [u8; 32],
    /// 32-byte X25519 encryption seed.
    pub encryption: [u8; 32],
}

/// Generate a fresh 24-word mnemonic from 256 bits of CSPRNG entropy.
pub fn generate() -> Result<String> {
    let mut entropy = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut entropy);
    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
        .map_err(|_| CryptoError::InvalidMnemonic)?;
    entropy.zeroize();
    Ok(mnemonic.to_string())
}

/// Parse a phrase, tolerating case and whitespace variance. Returns the
/// normalized sentence.
pub fn normalize(phrase: &str) -> Result<String> {
    Ok(parse(phrase)?.to_string())
}

/// True if the phrase is a valid BIP-39 English mnemonic.
pub fn validate(phrase: &str) -> bool {
    parse(phrase).is_ok()
}

/// Derive the identity seeds from a mnemonic phrase.
pub fn derive_seeds(phrase: &str) -> Result<IdentitySeeds> {
    let mnemonic = parse(phrase)?;
    let master = mnemonic.to_seed("");
    let signing = hkdf::derive(&master, hkdf::INFO_IDENTITY_SIGNING)?;
    let encryption = hkdf::derive(&master, hkdf::INFO_IDENTITY_ENCRYPTION)?;
    Ok(IdentitySeeds {
        master,
        signing,
        encryption,
    })
}

fn parse(phrase: &str) -> Result<Mnemonic> {
    let normalized = phrase
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    Mnemonic::parse_in_normalized(Language::English, &normalized)
        .map_err(|_| CryptoError::InvalidMnemonic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_mnemonic_validates() {
        let phrase = generate().expect("generate");
        assert_eq!(phrase.split_whitespace().count(), 24);
        assert!(validate(&phrase));
    }

    #[test]
    fn generated_mnemonics_differ() {
        let a = generate().expect("generate");
        let b = generate().expect("generate");
        assert_ne!(a, b);
    }

    #[test]
    fn normalize_fixes_case_and_whitespace() {
        let phrase = generate().expect("generate");
        let messy = format!("  {}  ", phrase.to_uppercase().replace(' ', "   "));
        assert_eq!(normalize(&messy).expect("normalize"), phrase);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(!validate("not a mnemonic at all"));
        assert!(normalize("only three words").is_err());
    }

    #[test]
    fn seeds_are_deterministic_per_phrase() {
        let phrase = generate().expect("generate");
        let a = derive_seeds(&phrase).expect("derive");
        let b = derive_seeds(&phrase).expect("derive");
        assert_eq!(a.signing, b.signing);
        assert_eq!(a.encryption, b.encryption);
        assert_ne!(a.signing, a.encryption);
    }

    #[test]
    fn distinct_phrases_distinct_seeds() {
        let a = derive_seeds(&generate().expect("generate")).expect("derive");
        let b = derive_seeds(&generate().expect("generate")).expect("derive");
        assert_ne!(a.signing, b.signing);
    }
}
