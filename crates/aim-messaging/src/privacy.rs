//! Privacy-mode and blocklist state.
//!
//! Each lives behind its own reader/writer lock and persists as an
//! encrypted-envelope file. Writers persist first and only then swap the
//! in-memory value.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::info;

use aim_crypto::envelope;
use aim_types::IDENTITY_PREFIX;

use crate::policy::PrivacyMode;
use crate::{MessagingError, Result};

const PRIVACY_FILE: &str = "privacy.json";
const BLOCKLIST_FILE: &str = "blocklist.json";

/// Minimum length of a blocklist identity id.
const MIN_ID_LEN: usize = 12;

/// Privacy settings as exposed over RPC.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacySettings {
    pub message_privacy_mode: PrivacyMode,
}

#[derive(Serialize, Deserialize)]
struct PrivacyFile {
    version: u32,
    settings: PrivacySettings,
}

#[derive(Serialize, Deserialize)]
struct BlocklistFile {
    version: u32,
    blocked: Vec<String>,
}

fn write_sealed(path: &PathBuf, passphrase: &str, plain: &[u8]) -> Result<()> {
    let sealed = envelope::seal(passphrase, plain)
        .map_err(|e| MessagingError::Storage(e.to_string()))?;
    let bytes =
        serde_json::to_vec_pretty(&sealed).map_err(|e| MessagingError::Storage(e.to_string()))?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &bytes).map_err(|e| MessagingError::Storage(e.to_string()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| MessagingError::Storage(e.to_string()))?;
    }
    std::fs::rename(&tmp, path).map_err(|e| MessagingError::Storage(e.to_string()))
}

fn read_sealed(path: &PathBuf, passphrase: &str) -> Result<Option<Vec<u8>>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path).map_err(|e| MessagingError::Storage(e.to_string()))?;
    let sealed: envelope::SealedEnvelope =
        serde_json::from_slice(&bytes).map_err(|e| MessagingError::Storage(e.to_string()))?;
    let plain = envelope::open(passphrase, &sealed)
        .map_err(|e| MessagingError::Storage(e.to_string()))?;
    Ok(Some(plain))
}

/// The privacy-mode store.
pub struct PrivacyStore {
    file: Option<(PathBuf, String)>,
    mode: RwLock<PrivacyMode>,
}

impl PrivacyStore {
    /// Open over `dir`, loading a persisted mode if present.
    pub fn open(dir: &std::path::Path, passphrase: &str) -> Result<Self> {
        let path = dir.join(PRIVACY_FILE);
        let mode = match read_sealed(&path, passphrase)? {
            Some(plain) => {
                let file: PrivacyFile = serde_json::from_slice(&plain)
                    .map_err(|e| MessagingError::Storage(e.to_string()))?;
                file.settings.message_privacy_mode
            }
            None => PrivacyMode::default(),
        };
        Ok(Self {
            file: Some((path, passphrase.to_string())),
            mode: RwLock::new(mode),
        })
    }

    /// Ephemeral store starting at the default mode.
    pub fn ephemeral() -> Self {
        Self {
            file: None,
            mode: RwLock::new(PrivacyMode::default()),
        }
    }

    pub fn mode(&self) -> PrivacyMode {
        *self.read()
    }

    pub fn settings(&self) -> PrivacySettings {
        PrivacySettings {
            message_privacy_mode: self.mode(),
        }
    }

    /// Persist then swap the mode.
    pub fn set_mode(&self, mode: PrivacyMode) -> Result<PrivacySettings> {
        if let Some((path, passphrase)) = &self.file {
            let file = PrivacyFile {
                version: 1,
                settings: PrivacySettings {
                    message_privacy_mode: mode,
                },
            };
            let plain =
                serde_json::to_vec(&file).map_err(|e| MessagingError::Storage(e.to_string()))?;
            write_sealed(path, passphrase, &plain)?;
        }
        *self.write() = mode;
        info!(mode = mode.as_str(), "privacy mode changed");
        Ok(self.settings())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, PrivacyMode> {
        match self.mode.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, PrivacyMode> {
        match self.mode.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// The sender blocklist.
pub struct Blocklist {
    file: Option<(PathBuf, String)>,
    blocked: RwLock<BTreeSet<String>>,
}

impl Blocklist {
    pub fn open(dir: &std::path::Path, passphrase: &str) -> Result<Self> {
        let path = dir.join(BLOCKLIST_FILE);
        let blocked = match read_sealed(&path, passphrase)? {
            Some(plain) => {
                let file: BlocklistFile = serde_json::from_slice(&plain)
                    .map_err(|e| MessagingError::Storage(e.to_string()))?;
                file.blocked.into_iter().collect()
            }
            None => BTreeSet::new(),
        };
        Ok(Self {
            file: Some((path, passphrase.to_string())),
            blocked: RwLock::new(blocked),
        })
    }

    pub fn ephemeral() -> Self {
        Self {
            file: None,
            blocked: RwLock::new(BTreeSet::new()),
        }
    }

    /// Shape check shared with the RPC layer: `aim1` prefix, length ≥ 12.
    pub fn validate_id(id: &str) -> Result<()> {
        if !id.starts_with(IDENTITY_PREFIX) || id.len() < MIN_ID_LEN {
            return Err(MessagingError::InvalidParams(format!(
                "implausible identity id {id:?}"
            )));
        }
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains(id)
    }

    pub fn list(&self) -> Vec<String> {
        self.read().iter().cloned().collect()
    }

    /// Persist then swap. Idempotent.
    pub fn add(&self, id: &str) -> Result<bool> {
        Self::validate_id(id)?;
        let mut next = self.read().clone();
        let inserted = next.insert(id.to_string());
        if inserted {
            self.persist(&next)?;
            *self.write() = next;
            info!(id = %id, "sender blocked");
        }
        Ok(inserted)
    }

    /// Persist then swap. Idempotent.
    pub fn remove(&self, id: &str) -> Result<bool> {
        Self::validate_id(id)?;
        let mut next = self.read().clone();
        let removed = next.remove(id);
        if removed {
            self.persist(&next)?;
            *self.write() = next;
        }
        Ok(removed)
    }

    fn persist(&self, blocked: &BTreeSet<String>) -> Result<()> {
        if let Some((path, passphrase)) = &self.file {
            let file = BlocklistFile {
                version: 1,
                blocked: blocked.iter().cloned().collect(),
            };
            let plain =
                serde_json::to_vec(&file).map_err(|e| MessagingError::Storage(e.to_string()))?;
            write_sealed(path, passphrase, &plain)?;
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeSet<String>> {
        match self.blocked.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeSet<String>> {
        match self.blocked.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mode_is_contacts_only() {
        let store = PrivacyStore::ephemeral();
        assert_eq!(store.mode(), PrivacyMode::ContactsOnly);
    }

    #[test]
    fn privacy_mode_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = PrivacyStore::open(dir.path(), "pw").expect("open");
            store.set_mode(PrivacyMode::Requests).expect("set");
        }
        let store = PrivacyStore::open(dir.path(), "pw").expect("reopen");
        assert_eq!(store.mode(), PrivacyMode::Requests);
    }

    #[test]
    fn blocklist_add_remove_idempotent() {
        let blocklist = Blocklist::ephemeral();
        assert!(blocklist.add("aim1BlockedPeer").expect("add"));
        assert!(!blocklist.add("aim1BlockedPeer").expect("re-add"));
        assert!(blocklist.contains("aim1BlockedPeer"));
        assert!(blocklist.remove("aim1BlockedPeer").expect("remove"));
        assert!(!blocklist.remove("aim1BlockedPeer").expect("re-remove"));
    }

    #[test]
    fn blocklist_rejects_bad_ids() {
        let blocklist = Blocklist::ephemeral();
        assert!(blocklist.add("bim1NotAnAimId").is_err());
        assert!(blocklist.add("aim1short").is_err());
    }

    #[test]
    fn blocklist_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let blocklist = Blocklist::open(dir.path(), "pw").expect("open");
            blocklist.add("aim1BlockedPeer").expect("add");
        }
        let blocklist = Blocklist::open(dir.path(), "pw").expect("reopen");
        assert!(blocklist.contains("aim1BlockedPeer"));
    }
}
