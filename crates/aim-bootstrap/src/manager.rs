//! The bootstrap manager: source selection manifest > cache > baked.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use aim_transport::{AppliedBootstrap, BootstrapSet};

use crate::bundle::{self, TrustBundle, TrustBundleUpdate};
use crate::cache::{BootstrapCache, CachedBootstrap};
use crate::manifest;
use crate::{Result, TrustError};

/// Where the selected set came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapSource {
    Manifest,
    Cache,
    Baked,
    None,
}

impl BootstrapSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BootstrapSource::Manifest => "manifest",
            BootstrapSource::Cache => "cache",
            BootstrapSource::Baked => "baked",
            BootstrapSource::None => "none",
        }
    }
}

/// The set chosen for the transport plus its provenance.
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    pub source: BootstrapSource,
    pub set: BootstrapSet,
    pub manifest_version: Option<i32>,
    pub manifest_key_id: Option<String>,
}

impl Selection {
    /// The transport-facing form.
    pub fn applied(&self) -> AppliedBootstrap {
        AppliedBootstrap {
            source: self.source.as_str().to_string(),
            manifest_version: self.manifest_version,
            manifest_key_id: self.manifest_key_id.clone(),
            set: self.set.clone(),
        }
    }
}

#[derive(Default)]
struct State {
    bundle: Option<TrustBundle>,
    last_applied_version: Option<i32>,
    manifest_selection: Option<Selection>,
    manifest_expires_at: Option<DateTime<Utc>>,
}

/// Selects the [`BootstrapSet`] for the transport. Internally
/// synchronized.
pub struct Manager {
    baked: BootstrapSet,
    cache: Option<BootstrapCache>,
    state: Mutex<State>,
}

impl Manager {
    /// A manager with only the compile-time baked set.
    pub fn new(baked: BootstrapSet) -> Self {
        Self {
            baked,
            cache: None,
            state: Mutex::new(State::default()),
        }
    }

    /// Attach a cache file.
    pub fn with_cache(mut self, path: PathBuf) -> Self {
        self.cache = Some(BootstrapCache::new(path));
        self
    }

    /// Install the initial trust bundle (from disk or baked-in).
    pub fn install_bundle(&self, bundle: TrustBundle) {
        self.lock().bundle = Some(bundle);
    }

    pub fn bundle(&self) -> Option<TrustBundle> {
        self.lock().bundle.clone()
    }

    /// Verify and apply a bundle rotation.
    pub fn apply_bundle_update(&self, update: &TrustBundleUpdate, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.lock();
        let current = state.bundle.as_ref().ok_or(TrustError::NoBundle)?;
        let next = bundle::verify_and_apply_update(current, update, at)?;
        info!(version = next.version, bundle = %next.bundle_id, "trust bundle rotated");
        state.bundle = Some(next);
        Ok(())
    }

    /// Decode and verify a manifest; on acceptance the selection becomes
    /// `manifest` and the cache is rewritten. Rejection leaves every piece
    /// of state untouched.
    pub fn apply_manifest(&self, bytes: &[u8], now: DateTime<Utc>) -> Result<Selection> {
        let mut state = self.lock();
        let bundle = state.bundle.as_ref().ok_or(TrustError::NoBundle)?;

        let parsed = manifest::decode(bytes)?;
        manifest::verify(&parsed, bundle, now, state.last_applied_version)?;

        let selection = Selection {
            source: BootstrapSource::Manifest,
            set: manifest::bootstrap_set(&parsed),
            manifest_version: Some(parsed.version),
            manifest_key_id: Some(parsed.key_id.clone()),
        };
        state.last_applied_version = Some(parsed.version);
        state.manifest_expires_at = Some(parsed.expires_at);
        state.manifest_selection = Some(selection.clone());

        if let Some(cache) = &self.cache {
            let entry = CachedBootstrap {
                cached_at: now,
                source_origin: BootstrapSource::Manifest.as_str().to_string(),
                set: selection.set.clone(),
            };
            if let Err(e) = cache.store(&entry) {
                warn!(error = %e, "bootstrap cache write failed");
            }
        }

        info!(
            version = parsed.version,
            key_id = %parsed.key_id,
            "network manifest applied"
        );
        Ok(selection)
    }

    /// Current selection in priority order: the applied manifest, else
    /// the cache, else the baked set.
    pub fn select(&self) -> Selection {
        let state = self.lock();
        if let Some(selection) = &state.manifest_selection {
            return selection.clone();
        }
        drop(state);

        if let Some(cached) = self.cache.as_ref().and_then(|c| c.load()) {
            return Selection {
                source: BootstrapSource::Cache,
                set: cached.set,
                manifest_version: None,
                manifest_key_id: None,
            };
        }

        Selection {
            source: BootstrapSource::Baked,
            set: self.baked.clone(),
            manifest_version: None,
            manifest_key_id: None,
        }
    }

    /// The selection to run on after a manifest rejection: cache, else
    /// baked. Never writes the cache.
    pub fn fallback(&self) -> Selection {
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.load()) {
            return Selection {
                source: BootstrapSource::Cache,
                set: cached.set,
                manifest_version: None,
                manifest_key_id: None,
            };
        }
        Selection {
            source: BootstrapSource::Baked,
            set: self.baked.clone(),
            manifest_version: None,
            manifest_key_id: None,
        }
    }

    /// Drop the applied manifest (e.g. when it expires) so selection
    /// falls back.
    pub fn invalidate_manifest(&self) {
        let mut state = self.lock();
        state.manifest_selection = None;
        state.manifest_expires_at = None;
    }

    /// Expiry of the applied manifest, driving the freshness states.
    pub fn manifest_expires_at(&self) -> Option<DateTime<Utc>> {
        self.lock().manifest_expires_at
    }

    pub fn last_applied_version(&self) -> Option<i32> {
        self.lock().last_applied_version
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::test_support::{sign_manifest, test_bundle};
    use crate::manifest::{NetworkManifest, ReconnectPolicySpec};
    use chrono::Duration;

    fn baked() -> BootstrapSet {
        BootstrapSet {
            bootstrap_nodes: vec!["/dns4/baked.example/tcp/30303".into()],
            min_peers: 2,
            reconnect_policy: Default::default(),
        }
    }

    fn manifest(version: i32) -> NetworkManifest {
        NetworkManifest {
            version,
            generated_at: Utc::now(),
            expires_at: Utc::now() + Duration::hours(6),
            bootstrap_nodes: vec!["/dns4/live.example/tcp/30303".into()],
            min_peers: 8,
            reconnect_policy: ReconnectPolicySpec {
                base_ms: 1000,
                max_ms: 30_000,
                jitter_ratio: 0.1,
            },
            key_id: "manifest-2026-a".into(),
            signature: String::new(),
        }
    }

    #[test]
    fn selection_priority_baked_when_cold() {
        let manager = Manager::new(baked());
        let selection = manager.select();
        assert_eq!(selection.source, BootstrapSource::Baked);
        assert_eq!(selection.set.min_peers, 2);
    }

    #[test]
    fn manifest_acceptance_wins_and_caches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache_path = dir.path().join("bootstrap.json");
        let manager = Manager::new(baked()).with_cache(cache_path.clone());
        let (bundle, keys) = test_bundle();
        manager.install_bundle(bundle);

        let mut m = manifest(5);
        sign_manifest(&mut m, &keys["manifest-2026-a"]);
        let bytes = serde_json::to_vec(&m).expect("serialize");
        let selection = manager.apply_manifest(&bytes, Utc::now()).expect("apply");

        assert_eq!(selection.source, BootstrapSource::Manifest);
        assert_eq!(selection.manifest_version, Some(5));
        assert!(cache_path.exists());
        assert_eq!(manager.select().source, BootstrapSource::Manifest);
    }

    #[test]
    fn rejection_leaves_cache_untouched_and_falls_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache_path = dir.path().join("bootstrap.json");
        let manager = Manager::new(baked()).with_cache(cache_path.clone());
        let (bundle, keys) = test_bundle();
        manager.install_bundle(bundle);

        let mut m = manifest(5);
        sign_manifest(&mut m, &keys["manifest-2026-a"]);
        let bytes = serde_json::to_vec(&m).expect("serialize");
        manager.apply_manifest(&bytes, Utc::now()).expect("apply");
        let cached_before = std::fs::read(&cache_path).expect("cache bytes");

        // A corrupted manifest is rejected and the cache stays as-is.
        assert!(manager.apply_manifest(b"{ garbage", Utc::now()).is_err());
        let cached_after = std::fs::read(&cache_path).expect("cache bytes");
        assert_eq!(cached_before, cached_after);

        manager.invalidate_manifest();
        let fallback = manager.fallback();
        assert_eq!(fallback.source, BootstrapSource::Cache);
        assert_eq!(
            fallback.set.bootstrap_nodes,
            vec!["/dns4/live.example/tcp/30303".to_string()]
        );
    }

    #[test]
    fn replayed_version_rejected() {
        let manager = Manager::new(baked());
        let (bundle, keys) = test_bundle();
        manager.install_bundle(bundle);

        let mut m5 = manifest(5);
        sign_manifest(&mut m5, &keys["manifest-2026-a"]);
        manager
            .apply_manifest(&serde_json::to_vec(&m5).expect("serialize"), Utc::now())
            .expect("apply v5");

        let mut m4 = manifest(4);
        sign_manifest(&mut m4, &keys["manifest-2026-a"]);
        let err = manager
            .apply_manifest(&serde_json::to_vec(&m4).expect("serialize"), Utc::now())
            .expect_err("replay");
        assert_eq!(err.code(), "MANIFEST_REPLAY_DETECTED");
    }

    #[test]
    fn manifest_requires_bundle() {
        let manager = Manager::new(baked());
        let err = manager
            .apply_manifest(b"{}", Utc::now())
            .expect_err("no bundle");
        assert_eq!(err.code(), "TRUST_BUNDLE_INVALID");
    }

    #[test]
    fn applied_selection_surfaces_provenance() {
        let manager = Manager::new(baked());
        let (bundle, keys) = test_bundle();
        manager.install_bundle(bundle);

        let mut m = manifest(7);
        sign_manifest(&mut m, &keys["manifest-2026-a"]);
        let selection = manager
            .apply_manifest(&serde_json::to_vec(&m).expect("serialize"), Utc::now())
            .expect("apply");

        let applied = selection.applied();
        assert_eq!(applied.source, "manifest");
        assert_eq!(applied.manifest_version, Some(7));
        assert_eq!(applied.manifest_key_id.as_deref(), Some("manifest-2026-a"));
    }
}
