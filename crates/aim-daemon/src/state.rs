//! Daemon-wide shared state and service construction.
//!
//! The messaging service exists only once an identity is installed
//! (created, imported, or unlocked); until then identity-requiring
//! methods answer `IDENTITY_LOCKED`.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use aim_bootstrap::manager::Manager as BootstrapManager;
use aim_db::SqliteMessageRepository;
use aim_identity::manager::IdentityManager;
use aim_messaging::notify::NotificationHub;
use aim_messaging::privacy::{Blocklist, PrivacyStore};
use aim_messaging::requests::RequestInbox;
use aim_messaging::service::{MessagingService, ServiceConfig};
use aim_session::{FileSessionStore, SessionManager};
use aim_transport::mock::{MockBus, MockTransport};
use aim_transport::{BootstrapSet, TransportNode};
use aim_types::identity::Identity;

use crate::config::DaemonConfig;
use crate::rpc::RpcError;

const TRUST_BUNDLE_FILE: &str = "trust-bundle.json";
const BOOTSTRAP_CACHE_FILE: &str = "bootstrap-cache.json";

/// Daemon-wide shared state.
pub struct DaemonState {
    pub config: DaemonConfig,
    pub data_dir: PathBuf,
    pub bus: Arc<MockBus>,
    pub bootstrap: Arc<BootstrapManager>,
    service: RwLock<Option<Arc<MessagingService>>>,
}

impl DaemonState {
    pub fn new(config: DaemonConfig, data_dir: PathBuf) -> anyhow::Result<Arc<Self>> {
        std::fs::create_dir_all(&data_dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&data_dir, std::fs::Permissions::from_mode(0o700))?;
        }

        let baked = BootstrapSet {
            bootstrap_nodes: config.network.baked_bootstrap_nodes.clone(),
            min_peers: config.network.baked_min_peers,
            reconnect_policy: Default::default(),
        };
        let bootstrap = BootstrapManager::new(baked)
            .with_cache(data_dir.join(BOOTSTRAP_CACHE_FILE));

        // An operator-provisioned trust bundle on disk enables manifest
        // verification; without one the daemon runs on cache/baked sets.
        let bundle_path = data_dir.join(TRUST_BUNDLE_FILE);
        if bundle_path.exists() {
            match std::fs::read(&bundle_path)
                .map_err(anyhow::Error::from)
                .and_then(|bytes| Ok(serde_json::from_slice(&bytes)?))
            {
                Ok(bundle) => bootstrap.install_bundle(bundle),
                Err(e) => warn!(error = %e, "trust bundle unreadable; manifests disabled"),
            }
        }

        Ok(Arc::new(Self {
            config,
            data_dir,
            bus: MockBus::new(),
            bootstrap: Arc::new(bootstrap),
            service: RwLock::new(None),
        }))
    }

    /// The running service, or `IDENTITY_LOCKED`.
    pub async fn service(&self) -> Result<Arc<MessagingService>, RpcError> {
        self.service
            .read()
            .await
            .clone()
            .ok_or_else(RpcError::identity_locked)
    }

    /// The running service, if any.
    pub async fn try_service(&self) -> Option<Arc<MessagingService>> {
        self.service.read().await.clone()
    }

    /// Create a fresh identity and bring the service up.
    pub async fn create_identity(
        &self,
        password: &str,
    ) -> Result<(Identity, String), RpcError> {
        let manager = self.open_identity_manager()?;
        let (identity, mnemonic) = manager
            .create_identity(password)
            .map_err(|e| RpcError::internal_error(&e.to_string()))?;
        self.bring_up(manager, password).await?;
        Ok((identity, mnemonic))
    }

    /// Import an identity from a mnemonic and bring the service up.
    pub async fn import_identity(
        &self,
        mnemonic: &str,
        password: &str,
    ) -> Result<Identity, RpcError> {
        let manager = self.open_identity_manager()?;
        let identity = manager
            .import_identity(mnemonic, password)
            .map_err(|e| RpcError::invalid_params(&e.to_string()))?;
        self.bring_up(manager, password).await?;
        Ok(identity)
    }

    /// Unlock a persisted identity (used at startup with
    /// `AIM_PASSPHRASE`).
    pub async fn unlock_identity(&self, password: &str) -> Result<Identity, RpcError> {
        let manager = self.open_identity_manager()?;
        manager
            .unlock(password)
            .map_err(|_| RpcError::unauthorized("wrong passphrase or no identity"))?;
        let identity = manager
            .identity()
            .map_err(|e| RpcError::internal_error(&e.to_string()))?;
        self.bring_up(manager, password).await?;
        Ok(identity)
    }

    fn open_identity_manager(&self) -> Result<Arc<IdentityManager>, RpcError> {
        IdentityManager::open(&self.data_dir.join("identity"))
            .map(Arc::new)
            .map_err(|e| RpcError::internal_error(&e.to_string()))
    }

    /// Assemble the service around an installed identity and start
    /// networking.
    async fn bring_up(
        &self,
        identity: Arc<IdentityManager>,
        password: &str,
    ) -> Result<(), RpcError> {
        let sessions_dir = self.data_dir.join("sessions");
        let session_store = FileSessionStore::open(&sessions_dir, password)
            .map_err(|e| RpcError::internal_error(&e.to_string()))?;
        let sessions = Arc::new(SessionManager::new(Arc::new(session_store)));

        let db = aim_db::open(&self.data_dir.join("messages.db"))
            .map_err(|e| RpcError::internal_error(&e.to_string()))?;
        let repo = Arc::new(SqliteMessageRepository::new(db));

        let transport: Arc<dyn TransportNode> = Arc::new(MockTransport::new(self.bus.clone()));
        transport.apply_bootstrap(self.bootstrap.select().applied());

        let privacy = PrivacyStore::open(&self.data_dir, password)
            .map_err(|e| RpcError::internal_error(&e.to_string()))?;
        let blocklist = Blocklist::open(&self.data_dir, password)
            .map_err(|e| RpcError::internal_error(&e.to_string()))?;
        let requests = RequestInbox::open(&self.data_dir, password)
            .map_err(|e| RpcError::internal_error(&e.to_string()))?;

        let service = MessagingService::new(
            identity,
            sessions,
            repo,
            transport,
            Arc::new(NotificationHub::default()),
            privacy,
            blocklist,
            requests,
            ServiceConfig {
                display_name: self.config.identity.display_name.clone(),
                ..ServiceConfig::default()
            },
        );

        service
            .start_networking()
            .await
            .map_err(|e| RpcError::internal_error(&e.to_string()))?;

        *self.service.write().await = Some(service);
        info!("messaging service up");
        Ok(())
    }
}
