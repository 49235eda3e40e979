//! # aim-session
//!
//! Double-Ratchet E2EE sessions, one per contact. A session holds a pair of
//! directional symmetric chains derived from the peer public key; every
//! message consumes one chain index. Out-of-order delivery is absorbed by a
//! bounded skipped-key cache and replays are suppressed by a bounded FIFO
//! of seen message ids.

pub mod manager;
pub mod state;
pub mod store;

pub use manager::SessionManager;
pub use state::SessionState;
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};

/// Upper bound on message keys pre-derived in a single forward jump.
pub const MAX_FORWARD_JUMP: u64 = 512;

/// Upper bound on retained skipped message keys (lowest index evicted).
pub const MAX_SKIPPED_KEYS: usize = 2048;

/// Upper bound on the replay-suppression FIFO.
pub const MAX_SEEN_IDS: usize = 1024;

/// Error types for session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No session exists for the contact.
    #[error("no session for contact {0}")]
    UnknownSession(String),

    /// The envelope names a different session than the contact's state.
    #[error("envelope session {got} does not match {want}")]
    SessionMismatch { want: String, got: String },

    /// The envelope's message id was already consumed.
    #[error("replay detected for message {0}")]
    ReplayDetected(String),

    /// The chain index is behind the receive chain or jumps too far ahead.
    #[error("invalid chain index {index} (receive chain at {at})")]
    InvalidChainIndex { index: u64, at: u64 },

    /// AEAD or key-derivation failure.
    #[error(transparent)]
    Crypto(#[from] aim_crypto::CryptoError),

    /// Persistence failure; in-memory state was not advanced.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
