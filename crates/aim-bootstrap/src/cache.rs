//! The bootstrap cache: the last accepted set, as plain JSON on disk.
//!
//! The cache is written only when a manifest is accepted; rejection paths
//! read it but never touch it.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use aim_transport::BootstrapSet;

use crate::{Result, TrustError};

/// Cache file layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedBootstrap {
    pub cached_at: DateTime<Utc>,
    /// Where the cached set originally came from (always `manifest`).
    pub source_origin: String,
    pub set: BootstrapSet,
}

/// File-backed cache.
pub struct BootstrapCache {
    path: PathBuf,
}

impl BootstrapCache {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load the cached set, if any. A corrupt cache reads as absent.
    pub fn load(&self) -> Option<CachedBootstrap> {
        let bytes = std::fs::read(&self.path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(cached) => Some(cached),
            Err(e) => {
                debug!(error = %e, "bootstrap cache unreadable; ignoring");
                None
            }
        }
    }

    /// Replace the cache atomically.
    pub fn store(&self, cached: &CachedBootstrap) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TrustError::Storage(e.to_string()))?;
        }
        let bytes = serde_json::to_vec_pretty(cached)
            .map_err(|e| TrustError::Storage(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &bytes).map_err(|e| TrustError::Storage(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| TrustError::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cached() -> CachedBootstrap {
        CachedBootstrap {
            cached_at: Utc::now(),
            source_origin: "manifest".to_string(),
            set: BootstrapSet {
                bootstrap_nodes: vec!["/dns4/boot-a.example/tcp/30303".into()],
                min_peers: 4,
                reconnect_policy: Default::default(),
            },
        }
    }

    #[test]
    fn store_load_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = BootstrapCache::new(dir.path().join("bootstrap.json"));
        assert!(cache.load().is_none());

        let entry = cached();
        cache.store(&entry).expect("store");
        assert_eq!(cache.load().expect("load"), entry);
    }

    #[test]
    fn corrupt_cache_reads_as_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bootstrap.json");
        std::fs::write(&path, b"{ not json").expect("write");
        let cache = BootstrapCache::new(path);
        assert!(cache.load().is_none());
    }
}
