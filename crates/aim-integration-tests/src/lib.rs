//! Shared harness for the end-to-end scenarios.
//!
//! Builds messaging nodes over a shared in-process [`MockBus`], either
//! fully ephemeral or persisted into a directory for restart scenarios.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use aim_db::{MemoryMessageRepository, SqliteMessageRepository};
use aim_identity::manager::IdentityManager;
use aim_messaging::notify::NotificationHub;
use aim_messaging::privacy::{Blocklist, PrivacyStore};
use aim_messaging::requests::RequestInbox;
use aim_messaging::service::{MessagingService, ServiceConfig};
use aim_session::{FileSessionStore, MemorySessionStore, SessionManager};
use aim_transport::mock::{MockBus, MockTransport};
use aim_transport::TransportNode;
use aim_types::identity::ContactCard;

/// The shared vault passphrase used across scenario nodes.
pub const PASSWORD: &str = "test-passphrase";

/// The 32-byte session peer key used by the scenarios: byte `i` is
/// `i + 50`.
pub fn peer_pub() -> [u8; 32] {
    let mut key = [0u8; 32];
    for (i, byte) in key.iter_mut().enumerate() {
        *byte = (i + 50) as u8;
    }
    key
}

/// One daemon-equivalent under test.
pub struct TestNode {
    pub service: Arc<MessagingService>,
    pub id: String,
}

impl TestNode {
    pub fn identity(&self) -> &Arc<IdentityManager> {
        self.service.identity()
    }

    pub fn card(&self, name: &str) -> ContactCard {
        self.identity()
            .self_contact_card(name)
            .expect("self contact card")
    }
}

fn assemble(
    identity: Arc<IdentityManager>,
    sessions: Arc<SessionManager>,
    repo: Arc<dyn aim_db::MessageRepository>,
    bus: &Arc<MockBus>,
    display_name: &str,
) -> TestNode {
    let id = identity.identity_id().expect("identity id");
    let transport: Arc<dyn TransportNode> = Arc::new(MockTransport::new(bus.clone()));
    let service = MessagingService::new(
        identity,
        sessions,
        repo,
        transport,
        Arc::new(NotificationHub::default()),
        PrivacyStore::ephemeral(),
        Blocklist::ephemeral(),
        RequestInbox::ephemeral(),
        ServiceConfig {
            display_name: display_name.to_string(),
            ..ServiceConfig::default()
        },
    );
    TestNode { service, id }
}

/// A fully in-memory node. Networking is NOT started.
pub fn ephemeral_node(bus: &Arc<MockBus>, display_name: &str) -> TestNode {
    let identity = Arc::new(IdentityManager::ephemeral());
    identity.create_identity(PASSWORD).expect("create identity");
    let sessions = Arc::new(SessionManager::new(Arc::new(MemorySessionStore::new())));
    let repo = Arc::new(MemoryMessageRepository::new());
    assemble(identity, sessions, repo, bus, display_name)
}

/// A disk-backed node rooted at `dir`. Creates the identity on first use
/// and unlocks it on subsequent calls. Networking is NOT started.
pub fn disk_node(bus: &Arc<MockBus>, dir: &Path, display_name: &str) -> TestNode {
    let identity = Arc::new(IdentityManager::open(&dir.join("identity")).expect("open identity"));
    if identity.seed_store().has_seed() {
        identity.unlock(PASSWORD).expect("unlock identity");
    } else {
        identity.create_identity(PASSWORD).expect("create identity");
    }
    let sessions = Arc::new(SessionManager::new(Arc::new(
        FileSessionStore::open(&dir.join("sessions"), PASSWORD).expect("open sessions"),
    )));
    let db = aim_db::open(&dir.join("messages.db")).expect("open db");
    let repo = Arc::new(SqliteMessageRepository::new(db));
    assemble(identity, sessions, repo, bus, display_name)
}

/// Poll `check` every 50 ms until it returns true or `deadline` elapses.
pub async fn wait_until<F, Fut>(deadline: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    loop {
        if check().await {
            return true;
        }
        if start.elapsed() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
