//! Argon2id passphrase key derivation.
//!
//! Keys the seed vault and every encrypted state file. The daemon writes
//! envelopes with [`KdfParams::default`]; at decryption time persisted
//! parameters below [`KdfParams::MINIMUM`] are refused, so an attacker
//! cannot weaken an envelope by editing its header.

use argon2::{Algorithm, Argon2, Params, Version};

use crate::{CryptoError, Result};

/// Argon2id cost parameters carried in envelope headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KdfParams {
    /// Iteration count.
    pub kdf_time: u32,
    /// Memory cost in KiB.
    pub kdf_mem_kb: u32,
    /// Parallelism lanes.
    pub kdf_threads: u32,
}

impl KdfParams {
    /// The floor below which envelopes are rejected: t=2, m=64 MiB, p=1.
    pub const MINIMUM: KdfParams = KdfParams {
        kdf_time: 2,
        kdf_mem_kb: 64 * 1024,
        kdf_threads: 1,
    };

    /// True if every cost is at or above the minimum policy.
    pub fn meets_minimum(&self) -> bool {
        self.kdf_time >= Self::MINIMUM.kdf_time
            && self.kdf_mem_kb >= Self::MINIMUM.kdf_mem_kb
            && self.kdf_threads >= Self::MINIMUM.kdf_threads
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::MINIMUM
    }
}

/// Output length of the derived key.
pub const OUTPUT_LEN: usize = 32;

/// Salt length stored in envelope headers.
pub const SALT_LEN: usize = 16;

/// Derive a 32-byte key from a passphrase with the given parameters.
pub fn derive_key(
    passphrase: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<[u8; OUTPUT_LEN]> {
    let params = Params::new(
        params.kdf_mem_kb,
        params.kdf_time,
        params.kdf_threads,
        Some(OUTPUT_LEN),
    )
    .map_err(|e| CryptoError::Argon2(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut output = [0u8; OUTPUT_LEN];
    argon2
        .hash_password_into(passphrase, salt, &mut output)
        .map_err(|e| CryptoError::Argon2(e.to_string()))?;

    Ok(output)
}

/// Generate a random 16-byte salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut salt);
    salt
}
