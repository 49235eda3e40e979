//! The passphrase-encrypted mnemonic vault.
//!
//! The vault holds exactly one BIP-39 mnemonic, sealed in an
//! [`aim_crypto::envelope::SealedEnvelope`]. `export` and `change_password`
//! are guarded by a failed-attempt lockout of `min(2^(n−1), 32)` seconds; a
//! successful attempt resets the counter.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use aim_crypto::mnemonic::{self, IdentitySeeds};
use aim_crypto::{envelope, CryptoError};

use crate::{write_private_file, IdentityError, Result};

const SEED_FILE: &str = "seed.json";

/// Maximum lockout in seconds.
const LOCKOUT_CAP_SECS: i64 = 32;

struct SeedInner {
    envelope: Option<envelope::SealedEnvelope>,
    failed_attempts: u32,
    locked_until: Option<DateTime<Utc>>,
}

/// The seed vault. Internally synchronized; safe for concurrent callers.
pub struct SeedStore {
    path: Option<PathBuf>,
    inner: Mutex<SeedInner>,
}

impl SeedStore {
    /// Open the vault in `dir`, loading a persisted envelope if present.
    pub fn open(dir: &std::path::Path) -> Result<Self> {
        crate::ensure_private_dir(dir)?;
        let path = dir.join(SEED_FILE);
        let envelope = if path.exists() {
            let bytes =
                std::fs::read(&path).map_err(|e| IdentityError::Storage(e.to_string()))?;
            Some(
                serde_json::from_slice(&bytes)
                    .map_err(|e| IdentityError::Serialization(e.to_string()))?,
            )
        } else {
            None
        };
        Ok(Self {
            path: Some(path),
            inner: Mutex::new(SeedInner {
                envelope,
                failed_attempts: 0,
                locked_until: None,
            }),
        })
    }

    /// An ephemeral vault with no backing file (tests, mock daemons).
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            inner: Mutex::new(SeedInner {
                envelope: None,
                failed_attempts: 0,
                locked_until: None,
            }),
        }
    }

    /// True once a seed has been created or imported.
    pub fn has_seed(&self) -> bool {
        self.lock().envelope.is_some()
    }

    /// Generate a fresh mnemonic, seal it under `password`, and derive the
    /// identity seeds.
    pub fn create(&self, password: &str) -> Result<(String, IdentitySeeds)> {
        let phrase = mnemonic::generate()?;
        let seeds = mnemonic::derive_seeds(&phrase)?;
        let sealed = envelope::seal(password, phrase.as_bytes())?;
        self.install(sealed)?;
        info!("seed vault created");
        Ok((phrase, seeds))
    }

    /// Import an existing mnemonic, replacing any current seed.
    pub fn import(&self, phrase: &str, password: &str) -> Result<(String, IdentitySeeds)> {
        let normalized = mnemonic::normalize(phrase).map_err(|_| IdentityError::InvalidMnemonic)?;
        let seeds = mnemonic::derive_seeds(&normalized)?;
        let sealed = envelope::seal(password, normalized.as_bytes())?;
        self.install(sealed)?;
        info!("seed vault imported");
        Ok((normalized, seeds))
    }

    /// Decrypt and return the mnemonic. Subject to the attempt lockout.
    pub fn export(&self, password: &str) -> Result<String> {
        let sealed = self.guarded_envelope()?;
        match envelope::open(password, &sealed) {
            Ok(bytes) => {
                self.record_success();
                String::from_utf8(bytes).map_err(|_| IdentityError::InvalidMnemonic)
            }
            Err(CryptoError::Aead) => Err(self.record_failure()),
            Err(e) => Err(e.into()),
        }
    }

    /// Re-encrypt the seed under a new password. Subject to the lockout.
    pub fn change_password(&self, old: &str, new: &str) -> Result<()> {
        let sealed = self.guarded_envelope()?;
        let phrase = match envelope::open(old, &sealed) {
            Ok(bytes) => bytes,
            Err(CryptoError::Aead) => return Err(self.record_failure()),
            Err(e) => return Err(e.into()),
        };
        let resealed = envelope::seal(new, &phrase)?;
        self.install(resealed)?;
        self.record_success();
        info!("seed vault password changed");
        Ok(())
    }

    /// True if the phrase is a valid BIP-39 English mnemonic.
    pub fn validate_mnemonic(phrase: &str) -> bool {
        mnemonic::validate(phrase)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SeedInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn install(&self, sealed: envelope::SealedEnvelope) -> Result<()> {
        if let Some(path) = &self.path {
            let bytes = serde_json::to_vec_pretty(&sealed)
                .map_err(|e| IdentityError::Serialization(e.to_string()))?;
            write_private_file(path, &bytes)?;
        }
        let mut inner = self.lock();
        inner.envelope = Some(sealed);
        Ok(())
    }

    /// Fetch the envelope, enforcing the lockout window.
    fn guarded_envelope(&self) -> Result<envelope::SealedEnvelope> {
        let inner = self.lock();
        if let Some(until) = inner.locked_until {
            if Utc::now() < until {
                return Err(IdentityError::PasswordLocked { until });
            }
        }
        inner
            .envelope
            .clone()
            .ok_or(IdentityError::SeedNotAvailable)
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        inner.failed_attempts = 0;
        inner.locked_until = None;
    }

    fn record_failure(&self) -> IdentityError {
        let mut inner = self.lock();
        inner.failed_attempts += 1;
        let secs = (1i64 << (inner.failed_attempts.saturating_sub(1)).min(5)).min(LOCKOUT_CAP_SECS);
        let until = Utc::now() + Duration::seconds(secs);
        inner.locked_until = Some(until);
        warn!(
            failed_attempts = inner.failed_attempts,
            lockout_secs = secs,
            "seed vault passphrase attempt failed"
        );
        IdentityError::InvalidPassword
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_export_roundtrip() {
        let store = SeedStore::ephemeral();
        let (phrase, _) = store.create("pw").expect("create");
        assert!(store.has_seed());
        assert_eq!(store.export("pw").expect("export"), phrase);
    }

    #[test]
    fn export_without_seed_fails() {
        let store = SeedStore::ephemeral();
        assert!(matches!(
            store.export("pw"),
            Err(IdentityError::SeedNotAvailable)
        ));
    }

    #[test]
    fn wrong_password_locks_out() {
        let store = SeedStore::ephemeral();
        store.create("pw").expect("create");

        assert!(matches!(
            store.export("nope"),
            Err(IdentityError::InvalidPassword)
        ));
        // Second attempt lands inside the 1 s lockout window.
        assert!(matches!(
            store.export("pw"),
            Err(IdentityError::PasswordLocked { .. })
        ));
    }

    #[test]
    fn lockout_is_capped() {
        let store = SeedStore::ephemeral();
        store.create("pw").expect("create");
        {
            let mut inner = store.lock();
            inner.failed_attempts = 40;
        }
        let err = store.record_failure();
        assert!(matches!(err, IdentityError::InvalidPassword));
        let inner = store.lock();
        let until = inner.locked_until.expect("locked");
        let secs = (until - Utc::now()).num_seconds();
        assert!(secs <= LOCKOUT_CAP_SECS, "lockout {secs}s exceeds cap");
    }

    #[test]
    fn change_password_reseals() {
        let store = SeedStore::ephemeral();
        let (phrase, _) = store.create("old").expect("create");
        store.change_password("old", "new").expect("change");
        assert_eq!(store.export("new").expect("export"), phrase);
    }

    #[test]
    fn import_normalizes() {
        let store = SeedStore::ephemeral();
        let phrase = aim_crypto::mnemonic::generate().expect("generate");
        let messy = phrase.to_uppercase();
        let (normalized, _) = store.import(&messy, "pw").expect("import");
        assert_eq!(normalized, phrase);
    }

    #[test]
    fn import_rejects_garbage() {
        let store = SeedStore::ephemeral();
        assert!(matches!(
            store.import("twelve monkeys", "pw"),
            Err(IdentityError::InvalidMnemonic)
        ));
    }

    #[test]
    fn persisted_vault_reloads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (phrase, _) = {
            let store = SeedStore::open(dir.path()).expect("open");
            store.create("pw").expect("create")
        };
        let store = SeedStore::open(dir.path()).expect("reopen");
        assert!(store.has_seed());
        assert_eq!(store.export("pw").expect("export"), phrase);
    }
}
