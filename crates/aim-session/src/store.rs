//! Session persistence.
//!
//! The file store keeps one encrypted record per contact under the session
//! directory. The record cipher is keyed once at open time by
//! Argon2id(passphrase, store salt), so per-message persists stay cheap.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use tracing::debug;

use aim_crypto::argon2id::{self, KdfParams};
use aim_crypto::xchacha;

use crate::{Result, SessionError, SessionState};

/// Abstract session persistence. Implementations are internally
/// synchronized.
pub trait SessionStore: Send + Sync {
    fn get(&self, contact_id: &str) -> Result<Option<SessionState>>;
    fn put(&self, state: &SessionState) -> Result<()>;
    fn remove(&self, contact_id: &str) -> Result<bool>;
    fn list(&self) -> Result<Vec<SessionState>>;
}

/// Volatile store for tests and ephemeral daemons.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionState>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, SessionState>> {
        match self.sessions.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, SessionState>> {
        match self.sessions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, contact_id: &str) -> Result<Option<SessionState>> {
        Ok(self.lock_read().get(contact_id).cloned())
    }

    fn put(&self, state: &SessionState) -> Result<()> {
        self.lock_write()
            .insert(state.contact_id.clone(), state.clone());
        Ok(())
    }

    fn remove(&self, contact_id: &str) -> Result<bool> {
        Ok(self.lock_write().remove(contact_id).is_some())
    }

    fn list(&self) -> Result<Vec<SessionState>> {
        let mut sessions: Vec<_> = self.lock_read().values().cloned().collect();
        sessions.sort_by(|a, b| a.contact_id.cmp(&b.contact_id));
        Ok(sessions)
    }
}

/// One encrypted session record on disk.
#[serde_as]
#[derive(Serialize, Deserialize)]
struct SessionRecord {
    version: u32,
    #[serde_as(as = "serde_with::hex::Hex")]
    nonce: [u8; xchacha::NONCE_SIZE],
    #[serde_as(as = "serde_with::hex::Hex")]
    ciphertext: Vec<u8>,
}

const SALT_FILE: &str = "store.salt";

/// Durable store: one file per contact, AEAD-sealed with a key derived
/// once from the store passphrase.
pub struct FileSessionStore {
    dir: PathBuf,
    key: [u8; 32],
    cache: RwLock<HashMap<String, SessionState>>,
}

impl FileSessionStore {
    /// Open (or initialise) the store in `dir`.
    pub fn open(dir: &std::path::Path, passphrase: &str) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| SessionError::Storage(e.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
                .map_err(|e| SessionError::Storage(e.to_string()))?;
        }

        let salt_path = dir.join(SALT_FILE);
        let salt: [u8; argon2id::SALT_LEN] = if salt_path.exists() {
            let text = std::fs::read_to_string(&salt_path)
                .map_err(|e| SessionError::Storage(e.to_string()))?;
            hex::decode(text.trim())
                .ok()
                .and_then(|bytes| bytes.try_into().ok())
                .ok_or_else(|| SessionError::Storage("corrupt store salt".into()))?
        } else {
            let salt = argon2id::generate_salt();
            std::fs::write(&salt_path, hex::encode(salt))
                .map_err(|e| SessionError::Storage(e.to_string()))?;
            salt
        };

        let key = argon2id::derive_key(passphrase.as_bytes(), &salt, &KdfParams::default())?;
        let store = Self {
            dir: dir.to_path_buf(),
            key,
            cache: RwLock::new(HashMap::new()),
        };
        store.load_all()?;
        Ok(store)
    }

    fn load_all(&self) -> Result<()> {
        let entries =
            std::fs::read_dir(&self.dir).map_err(|e| SessionError::Storage(e.to_string()))?;
        let mut cache = self.lock_write();
        for entry in entries {
            let entry = entry.map_err(|e| SessionError::Storage(e.to_string()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with("session-") || !name.ends_with(".json") {
                continue;
            }
            let bytes =
                std::fs::read(entry.path()).map_err(|e| SessionError::Storage(e.to_string()))?;
            let record: SessionRecord = serde_json::from_slice(&bytes)
                .map_err(|e| SessionError::Serialization(e.to_string()))?;
            let plain = xchacha::open(&self.key, &record.nonce, &record.ciphertext, &[])?;
            let state: SessionState = serde_json::from_slice(&plain)
                .map_err(|e| SessionError::Serialization(e.to_string()))?;
            debug!(contact = %state.contact_id, "session loaded");
            cache.insert(state.contact_id.clone(), state);
        }
        Ok(())
    }

    fn path_for(&self, contact_id: &str) -> PathBuf {
        self.dir.join(format!("session-{contact_id}.json"))
    }

    fn write_record(&self, state: &SessionState) -> Result<()> {
        let plain = serde_json::to_vec(state)
            .map_err(|e| SessionError::Serialization(e.to_string()))?;
        let nonce = xchacha::generate_nonce();
        let record = SessionRecord {
            version: 1,
            nonce,
            ciphertext: xchacha::seal(&self.key, &nonce, &plain, &[])?,
        };
        let bytes = serde_json::to_vec(&record)
            .map_err(|e| SessionError::Serialization(e.to_string()))?;

        let path = self.path_for(&state.contact_id);
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &bytes).map_err(|e| SessionError::Storage(e.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| SessionError::Storage(e.to_string()))?;
        }
        std::fs::rename(&tmp, &path).map_err(|e| SessionError::Storage(e.to_string()))
    }

    fn lock_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, SessionState>> {
        match self.cache.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, SessionState>> {
        match self.cache.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, contact_id: &str) -> Result<Option<SessionState>> {
        Ok(self.lock_read().get(contact_id).cloned())
    }

    fn put(&self, state: &SessionState) -> Result<()> {
        // Disk first; the cache only reflects persisted state.
        self.write_record(state)?;
        self.lock_write()
            .insert(state.contact_id.clone(), state.clone());
        Ok(())
    }

    fn remove(&self, contact_id: &str) -> Result<bool> {
        let path = self.path_for(contact_id);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| SessionError::Storage(e.to_string()))?;
        }
        Ok(self.lock_write().remove(contact_id).is_some())
    }

    fn list(&self) -> Result<Vec<SessionState>> {
        let mut sessions: Vec<_> = self.lock_read().values().cloned().collect();
        sessions.sort_by(|a, b| a.contact_id.cmp(&b.contact_id));
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::{BTreeMap, VecDeque};

    fn state(contact: &str) -> SessionState {
        SessionState {
            session_id: format!("sess1_{contact}"),
            contact_id: contact.to_string(),
            peer_public_key: [1u8; 32],
            root_key: [2u8; 32],
            send_chain_key: [3u8; 32],
            recv_chain_key: [4u8; 32],
            send_chain_index: 5,
            recv_chain_index: 6,
            seen_message_ids: VecDeque::from(vec!["msg_aa".to_string()]),
            skipped_keys: BTreeMap::from([(3u64, [7u8; 32])]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemorySessionStore::new();
        store.put(&state("aim1bob")).expect("put");
        let loaded = store.get("aim1bob").expect("get").expect("present");
        assert_eq!(loaded.send_chain_index, 5);
        assert!(store.remove("aim1bob").expect("remove"));
        assert!(store.get("aim1bob").expect("get").is_none());
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = FileSessionStore::open(dir.path(), "pw").expect("open");
            store.put(&state("aim1bob")).expect("put");
        }
        let store = FileSessionStore::open(dir.path(), "pw").expect("reopen");
        let loaded = store.get("aim1bob").expect("get").expect("present");
        assert_eq!(loaded.skipped_keys.get(&3), Some(&[7u8; 32]));
    }

    #[test]
    fn file_store_wrong_passphrase_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = FileSessionStore::open(dir.path(), "pw").expect("open");
            store.put(&state("aim1bob")).expect("put");
        }
        assert!(FileSessionStore::open(dir.path(), "wrong").is_err());
    }

    #[test]
    fn file_store_lists_sorted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileSessionStore::open(dir.path(), "pw").expect("open");
        store.put(&state("aim1zeta")).expect("put");
        store.put(&state("aim1alpha")).expect("put");
        let listed = store.list().expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].contact_id, "aim1alpha");
    }
}
