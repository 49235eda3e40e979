//! Per-contact ratchet state.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use sha2::{Digest, Sha256};

use aim_types::SESSION_PREFIX;

use crate::{MAX_SEEN_IDS, MAX_SKIPPED_KEYS};

/// Derive the session id for a contact pair and peer key:
/// `"sess1_" + hex(sha256(idA:idB:peer_pub)[..16])` with the ids in
/// lexicographic order.
pub fn session_id(local_id: &str, contact_id: &str, peer_pub: &[u8; 32]) -> String {
    let (a, b) = sorted_pair(local_id, contact_id);
    let mut hasher = Sha256::new();
    hasher.update(a.as_bytes());
    hasher.update(b":");
    hasher.update(b.as_bytes());
    hasher.update(b":");
    hasher.update(peer_pub);
    let digest = hasher.finalize();
    format!("{}{}", SESSION_PREFIX, hex::encode(&digest[..16]))
}

/// The two ids in lexicographic order.
pub fn sorted_pair<'a>(local_id: &'a str, contact_id: &'a str) -> (&'a str, &'a str) {
    if local_id <= contact_id {
        (local_id, contact_id)
    } else {
        (contact_id, local_id)
    }
}

/// Ratchet state for one contact.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub contact_id: String,
    #[serde_as(as = "serde_with::hex::Hex")]
    pub peer_public_key: [u8; 32],
    #[serde_as(as = "serde_with::hex::Hex")]
    pub root_key: [u8; 32],
    #[serde_as(as = "serde_with::hex::Hex")]
    pub send_chain_key: [u8; 32],
    #[serde_as(as = "serde_with::hex::Hex")]
    pub recv_chain_key: [u8; 32],
    pub send_chain_index: u64,
    /// Monotone non-decreasing.
    pub recv_chain_index: u64,
    /// Replay-suppression FIFO, newest at the back.
    pub seen_message_ids: VecDeque<String>,
    /// Message keys derived for not-yet-seen chain indices.
    pub skipped_keys: BTreeMap<u64, [u8; 32]>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    /// Record a consumed message id, evicting FIFO-style past the cap.
    pub fn mark_seen(&mut self, message_id: &str) {
        self.seen_message_ids.push_back(message_id.to_string());
        while self.seen_message_ids.len() > MAX_SEEN_IDS {
            self.seen_message_ids.pop_front();
        }
    }

    /// True when the message id was already consumed.
    pub fn is_seen(&self, message_id: &str) -> bool {
        self.seen_message_ids.iter().any(|id| id == message_id)
    }

    /// Prune the skipped-key cache: expire indices more than the jump
    /// window behind the receive chain, then evict lowest indices down to
    /// the cap.
    pub fn prune_skipped(&mut self, jump_window: u64) {
        let recv = self.recv_chain_index;
        self.skipped_keys.retain(|&idx, _| idx + jump_window >= recv);
        while self.skipped_keys.len() > MAX_SKIPPED_KEYS {
            let lowest = match self.skipped_keys.keys().next().copied() {
                Some(k) => k,
                None => break,
            };
            self.skipped_keys.remove(&lowest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_state() -> SessionState {
        SessionState {
            session_id: "sess1_00".into(),
            contact_id: "aim1peer".into(),
            peer_public_key: [0u8; 32],
            root_key: [0u8; 32],
            send_chain_key: [0u8; 32],
            recv_chain_key: [0u8; 32],
            send_chain_index: 0,
            recv_chain_index: 0,
            seen_message_ids: VecDeque::new(),
            skipped_keys: BTreeMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn session_id_is_order_independent() {
        let pub_key = [5u8; 32];
        let a = session_id("aim1alice", "aim1bob", &pub_key);
        let b = session_id("aim1bob", "aim1alice", &pub_key);
        assert_eq!(a, b);
        assert!(a.starts_with("sess1_"));
        assert_eq!(a.len(), "sess1_".len() + 32);
    }

    #[test]
    fn session_id_binds_peer_key() {
        let a = session_id("aim1alice", "aim1bob", &[5u8; 32]);
        let b = session_id("aim1alice", "aim1bob", &[6u8; 32]);
        assert_ne!(a, b);
    }

    #[test]
    fn seen_fifo_evicts_oldest() {
        let mut state = blank_state();
        for i in 0..(MAX_SEEN_IDS + 10) {
            state.mark_seen(&format!("msg_{i:04}"));
        }
        assert_eq!(state.seen_message_ids.len(), MAX_SEEN_IDS);
        assert!(!state.is_seen("msg_0000"));
        assert!(state.is_seen(&format!("msg_{:04}", MAX_SEEN_IDS + 9)));
    }

    #[test]
    fn prune_drops_expired_and_caps_size() {
        let mut state = blank_state();
        state.recv_chain_index = 1000;
        for idx in 0..3000u64 {
            state.skipped_keys.insert(idx, [0u8; 32]);
        }
        state.prune_skipped(512);
        // Everything more than 512 behind the receive chain is expired.
        assert!(state.skipped_keys.keys().all(|&idx| idx + 512 >= 1000));
        assert!(state.skipped_keys.len() <= MAX_SKIPPED_KEYS);
    }
}
