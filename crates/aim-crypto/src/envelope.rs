//! The passphrase-keyed authenticated envelope.
//!
//! Every persisted state file (seed vault, identity vault, privacy
//! settings, blocklist, request inbox, session records) is stored as
//! `AEAD(Argon2id(passphrase, salt), json_bytes)` with the KDF parameters
//! recorded in the header. Opening refuses headers whose parameters fall
//! below [`KdfParams::MINIMUM`].

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use zeroize::Zeroize;

use crate::argon2id::{self, KdfParams};
use crate::{xchacha, CryptoError, Result};

/// Envelope format version.
pub const VERSION: u32 = 1;

/// KDF identifier recorded in envelope headers.
pub const KDF_NAME: &str = "argon2id";

/// A sealed envelope as persisted on disk.
#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SealedEnvelope {
    pub version: u32,
    pub kdf: String,
    pub kdf_time: u32,
    pub kdf_mem_kb: u32,
    pub kdf_threads: u32,
    #[serde_as(as = "serde_with::hex::Hex")]
    pub salt: [u8; argon2id::SALT_LEN],
    #[serde_as(as = "serde_with::hex::Hex")]
    pub nonce: [u8; xchacha::NONCE_SIZE],
    #[serde_as(as = "serde_with::hex::Hex")]
    pub ciphertext: Vec<u8>,
}

/// Seal `plaintext` under a passphrase with the default KDF parameters.
pub fn seal(passphrase: &str, plaintext: &[u8]) -> Result<SealedEnvelope> {
    seal_with_params(passphrase, plaintext, &KdfParams::default())
}

/// Seal with explicit KDF parameters (must meet the minimum policy).
pub fn seal_with_params(
    passphrase: &str,
    plaintext: &[u8],
    params: &KdfParams,
) -> Result<SealedEnvelope> {
    if !params.meets_minimum() {
        return Err(CryptoError::KdfDowngrade(format!(
            "t={} m={}KiB p={}",
            params.kdf_time, params.kdf_mem_kb, params.kdf_threads
        )));
    }

    let salt = argon2id::generate_salt();
    let nonce = xchacha::generate_nonce();
    let mut key = argon2id::derive_key(passphrase.as_bytes(), &salt, params)?;
    let ciphertext = xchacha::seal(&key, &nonce, plaintext, &[]);
    key.zeroize();

    Ok(SealedEnvelope {
        version: VERSION,
        kdf: KDF_NAME.to_string(),
        kdf_time: params.kdf_time,
        kdf_mem_kb: params.kdf_mem_kb,
        kdf_threads: params.kdf_threads,
        salt,
        nonce,
        ciphertext: ciphertext?,
    })
}

/// Open an envelope. Fails on version/KDF mismatch, on parameters below the
/// minimum policy, and on authentication failure (wrong passphrase or
/// tampered ciphertext).
pub fn open(passphrase: &str, envelope: &SealedEnvelope) -> Result<Vec<u8>> {
    if envelope.version != VERSION {
        return Err(CryptoError::InvalidInput(format!(
            "unsupported envelope version {}",
            envelope.version
        )));
    }
    if envelope.kdf != KDF_NAME {
        return Err(CryptoError::InvalidInput(format!(
            "unsupported KDF {:?}",
            envelope.kdf
        )));
    }

    let params = KdfParams {
        kdf_time: envelope.kdf_time,
        kdf_mem_kb: envelope.kdf_mem_kb,
        kdf_threads: envelope.kdf_threads,
    };
    if !params.meets_minimum() {
        return Err(CryptoError::KdfDowngrade(format!(
            "t={} m={}KiB p={}",
            params.kdf_time, params.kdf_mem_kb, params.kdf_threads
        )));
    }

    let mut key = argon2id::derive_key(passphrase.as_bytes(), &envelope.salt, &params)?;
    let plaintext = xchacha::open(&key, &envelope.nonce, &envelope.ciphertext, &[]);
    key.zeroize();
    plaintext
}
