//! Manifest → cache fallback and restoration with the refresh
//! controller.

use base64::Engine;
use chrono::{Duration, Utc};

use aim_bootstrap::bundle::{ManifestKey, RootKey, TrustBundle};
use aim_bootstrap::manager::{BootstrapSource, Manager};
use aim_bootstrap::manifest::{self, NetworkManifest, ReconnectPolicySpec};
use aim_bootstrap::refresh::{freshness, RefreshConfig, RefreshController};
use aim_crypto::ed25519::SigningKey;
use aim_transport::BootstrapSet;

fn b64(bytes: impl AsRef<[u8]>) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn bundle_with(manifest_key: &SigningKey) -> TrustBundle {
    let root = SigningKey::from_seed(&[1u8; 32]);
    let now = Utc::now();
    TrustBundle {
        version: 1,
        bundle_id: "bundle-test".into(),
        generated_at: now,
        root_keys: vec![RootKey {
            key_id: "root-1".into(),
            public_key: b64(root.verifying_key().to_bytes()),
        }],
        manifest_keys: vec![ManifestKey {
            key_id: "manifest-a".into(),
            algorithm: "ed25519".into(),
            public_key: b64(manifest_key.verifying_key().to_bytes()),
            not_before: now - Duration::days(1),
            not_after: now + Duration::days(365),
        }],
    }
}

fn signed_manifest(version: i32, key: &SigningKey) -> Vec<u8> {
    let mut manifest = NetworkManifest {
        version,
        generated_at: Utc::now(),
        expires_at: Utc::now() + Duration::hours(6),
        bootstrap_nodes: vec![format!("/dns4/live-v{version}.example/tcp/30303")],
        min_peers: 4,
        reconnect_policy: ReconnectPolicySpec {
            base_ms: 1000,
            max_ms: 60_000,
            jitter_ratio: 0.2,
        },
        key_id: "manifest-a".into(),
        signature: String::new(),
    };
    let payload = manifest::canonical_payload(&manifest);
    manifest.signature = b64(key.sign(&payload).to_bytes());
    serde_json::to_vec(&manifest).expect("serialize manifest")
}

#[tokio::test]
async fn manifest_falls_back_to_cache_and_restores() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manifest_key = SigningKey::from_seed(&[2u8; 32]);

    let baked = BootstrapSet {
        bootstrap_nodes: vec!["/dns4/baked.example/tcp/30303".into()],
        min_peers: 1,
        reconnect_policy: Default::default(),
    };
    let manager = Manager::new(baked).with_cache(dir.path().join("bootstrap-cache.json"));
    manager.install_bundle(bundle_with(&manifest_key));

    let mut controller = RefreshController::new(RefreshConfig::default());

    // First refresh: a valid manifest is applied and cached.
    let selection = manager
        .apply_manifest(&signed_manifest(3, &manifest_key), Utc::now())
        .expect("apply v3");
    assert_eq!(selection.source, BootstrapSource::Manifest);
    let fresh = freshness(
        Utc::now(),
        manager.manifest_expires_at().expect("expiry"),
        std::time::Duration::from_secs(3600),
    );
    controller.on_manifest_accepted(fresh);

    // Second refresh: the fetched manifest is corrupt; selection falls
    // back to the cached set and the cache itself is untouched.
    let err = manager
        .apply_manifest(b"{ \"version\": \"corrupt\"", Utc::now())
        .expect_err("corrupt manifest");
    assert_eq!(err.code(), "MANIFEST_SCHEMA_INVALID");
    let decision = controller.on_recoverable_error();
    assert_eq!(decision.source, BootstrapSource::Cache);

    manager.invalidate_manifest();
    let fallback = manager.fallback();
    assert_eq!(fallback.source, BootstrapSource::Cache);
    assert_eq!(
        fallback.set.bootstrap_nodes,
        vec!["/dns4/live-v3.example/tcp/30303".to_string()]
    );

    // Third refresh: a higher-version valid manifest restores the
    // manifest source with the restored flag raised.
    let selection = manager
        .apply_manifest(&signed_manifest(4, &manifest_key), Utc::now())
        .expect("apply v4");
    assert_eq!(selection.source, BootstrapSource::Manifest);
    assert_eq!(selection.manifest_version, Some(4));

    let fresh = freshness(
        Utc::now(),
        manager.manifest_expires_at().expect("expiry"),
        std::time::Duration::from_secs(3600),
    );
    let decision = controller.on_manifest_accepted(fresh);
    assert!(decision.restored_manifest);
    assert_eq!(decision.source, BootstrapSource::Manifest);
}
