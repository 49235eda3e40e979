//! The session manager: ratchet derivations and the encrypt/decrypt state
//! machine over a [`SessionStore`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, warn};

use aim_crypto::{hkdf, xchacha};
use aim_types::wire::{MessageEnvelope, WIRE_VERSION};

use crate::state::{session_id, sorted_pair};
use crate::store::SessionStore;
use crate::{Result, SessionError, SessionState, MAX_FORWARD_JUMP};

/// Derive the message key and the next chain key at `index`.
fn step_chain(chain_key: &[u8; 32], index: u64) -> Result<([u8; 32], [u8; 32])> {
    let mut ikm = [0u8; 40];
    ikm[..32].copy_from_slice(chain_key);
    ikm[32..].copy_from_slice(&index.to_be_bytes());
    let message_key = hkdf::derive(&ikm, hkdf::INFO_MESSAGE_KEY)?;
    let next_chain_key = hkdf::derive(&ikm, hkdf::INFO_CHAIN_KEY)?;
    Ok((message_key, next_chain_key))
}

/// The session manager. Serializes its read-modify-write cycles so state
/// advances atomically with persistence.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    ops: Mutex<()>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            ops: Mutex::new(()),
        }
    }

    /// Initialise (or re-derive) the session with a contact from the peer
    /// public key. Both peers derive identical chains; the directional
    /// assignment follows the sorted-id order.
    pub fn init_session(
        &self,
        local_id: &str,
        contact_id: &str,
        peer_pub: [u8; 32],
    ) -> Result<SessionState> {
        let _guard = self.lock_ops();

        let (first, second) = sorted_pair(local_id, contact_id);
        let root_key = hkdf::derive(
            &peer_pub,
            &format!("{}{first}:{second}", hkdf::INFO_SESSION_ROOT_PREFIX),
        )?;
        let a2b = hkdf::derive(&root_key, hkdf::INFO_CHAIN_A2B)?;
        let b2a = hkdf::derive(&root_key, hkdf::INFO_CHAIN_B2A)?;
        let (send_chain_key, recv_chain_key) = if local_id == first {
            (a2b, b2a)
        } else {
            (b2a, a2b)
        };

        let now = Utc::now();
        let state = SessionState {
            session_id: session_id(local_id, contact_id, &peer_pub),
            contact_id: contact_id.to_string(),
            peer_public_key: peer_pub,
            root_key,
            send_chain_key,
            recv_chain_key,
            send_chain_index: 0,
            recv_chain_index: 0,
            seen_message_ids: VecDeque::new(),
            skipped_keys: Default::default(),
            created_at: now,
            updated_at: now,
        };
        self.store.put(&state)?;
        debug!(contact = %contact_id, session = %state.session_id, "session initialised");
        Ok(state)
    }

    /// True when a session exists for the contact.
    pub fn has_session(&self, contact_id: &str) -> Result<bool> {
        Ok(self.store.get(contact_id)?.is_some())
    }

    /// The current state for a contact, if any.
    pub fn session(&self, contact_id: &str) -> Result<Option<SessionState>> {
        self.store.get(contact_id)
    }

    /// Encrypt one message on the send chain, advancing it atomically.
    pub fn encrypt(
        &self,
        contact_id: &str,
        message_id: &str,
        ratchet_pub_key: [u8; 32],
        plaintext: &[u8],
    ) -> Result<MessageEnvelope> {
        let _guard = self.lock_ops();
        let mut state = self
            .store
            .get(contact_id)?
            .ok_or_else(|| SessionError::UnknownSession(contact_id.to_string()))?;

        let index = state.send_chain_index;
        let (message_key, next_chain_key) = step_chain(&state.send_chain_key, index)?;
        let nonce = xchacha::generate_nonce();
        let aad = MessageEnvelope::aad(&state.session_id, message_id, index);
        let ciphertext = xchacha::seal(&message_key, &nonce, plaintext, &aad)?;

        let envelope = MessageEnvelope {
            version: WIRE_VERSION,
            session_id: state.session_id.clone(),
            message_id: message_id.to_string(),
            ratchet_pub_key,
            chain_index: index,
            previous_count: 0,
            nonce,
            ciphertext,
            sent_at: Utc::now(),
        };

        state.send_chain_key = next_chain_key;
        state.send_chain_index = index + 1;
        state.updated_at = Utc::now();
        self.store.put(&state)?;
        Ok(envelope)
    }

    /// Decrypt an inbound envelope, absorbing gaps into the skipped-key
    /// cache and suppressing replays. State advances only after the AEAD
    /// succeeds.
    pub fn decrypt(&self, contact_id: &str, envelope: &MessageEnvelope) -> Result<Vec<u8>> {
        let _guard = self.lock_ops();
        let mut state = self
            .store
            .get(contact_id)?
            .ok_or_else(|| SessionError::UnknownSession(contact_id.to_string()))?;

        if envelope.session_id != state.session_id {
            return Err(SessionError::SessionMismatch {
                want: state.session_id.clone(),
                got: envelope.session_id.clone(),
            });
        }
        if state.is_seen(&envelope.message_id) {
            warn!(message = %envelope.message_id, "replayed envelope dropped");
            return Err(SessionError::ReplayDetected(envelope.message_id.clone()));
        }

        let aad = MessageEnvelope::aad(
            &state.session_id,
            &envelope.message_id,
            envelope.chain_index,
        );

        // A key cached for this index: consume it.
        if let Some(key) = state.skipped_keys.get(&envelope.chain_index).copied() {
            let plaintext = xchacha::open(&key, &envelope.nonce, &envelope.ciphertext, &aad)?;
            state.skipped_keys.remove(&envelope.chain_index);
            state.mark_seen(&envelope.message_id);
            state.updated_at = Utc::now();
            self.store.put(&state)?;
            return Ok(plaintext);
        }

        if envelope.chain_index < state.recv_chain_index {
            return Err(SessionError::InvalidChainIndex {
                index: envelope.chain_index,
                at: state.recv_chain_index,
            });
        }
        if envelope.chain_index - state.recv_chain_index > MAX_FORWARD_JUMP {
            return Err(SessionError::InvalidChainIndex {
                index: envelope.chain_index,
                at: state.recv_chain_index,
            });
        }

        // Walk the chain to the envelope's index, caching the gap.
        let mut chain_key = state.recv_chain_key;
        let mut gap_keys = Vec::new();
        for index in state.recv_chain_index..envelope.chain_index {
            let (message_key, next) = step_chain(&chain_key, index)?;
            gap_keys.push((index, message_key));
            chain_key = next;
        }
        let (message_key, next_chain_key) = step_chain(&chain_key, envelope.chain_index)?;

        // AEAD before any state mutation.
        let plaintext = xchacha::open(&message_key, &envelope.nonce, &envelope.ciphertext, &aad)?;

        for (index, key) in gap_keys {
            state.skipped_keys.insert(index, key);
        }
        state.recv_chain_key = next_chain_key;
        state.recv_chain_index = envelope.chain_index + 1;
        state.prune_skipped(MAX_FORWARD_JUMP);
        state.mark_seen(&envelope.message_id);
        state.updated_at = Utc::now();
        self.store.put(&state)?;
        Ok(plaintext)
    }

    fn lock_ops(&self) -> std::sync::MutexGuard<'_, ()> {
        match self.ops.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySessionStore;

    const ALICE: &str = "aim1AAAAAlice";
    const BOB: &str = "aim1BBBBBob";

    fn peer_pub() -> [u8; 32] {
        let mut pub_key = [0u8; 32];
        for (i, byte) in pub_key.iter_mut().enumerate() {
            *byte = (i + 50) as u8;
        }
        pub_key
    }

    fn pair() -> (SessionManager, SessionManager) {
        let alice = SessionManager::new(Arc::new(MemorySessionStore::new()));
        let bob = SessionManager::new(Arc::new(MemorySessionStore::new()));
        alice.init_session(ALICE, BOB, peer_pub()).expect("init");
        bob.init_session(BOB, ALICE, peer_pub()).expect("init");
        (alice, bob)
    }

    #[test]
    fn peers_derive_matching_sessions() {
        let (alice, bob) = pair();
        let a = alice.session(BOB).expect("get").expect("state");
        let b = bob.session(ALICE).expect("get").expect("state");
        assert_eq!(a.session_id, b.session_id);
        assert_eq!(a.root_key, b.root_key);
        assert_eq!(a.send_chain_key, b.recv_chain_key);
        assert_eq!(a.recv_chain_key, b.send_chain_key);
    }

    #[test]
    fn encrypt_decrypt_in_order() {
        let (alice, bob) = pair();
        for i in 0..5 {
            let msg_id = format!("msg_{i:02}");
            let plaintext = format!("message {i}");
            let envelope = alice
                .encrypt(BOB, &msg_id, [0u8; 32], plaintext.as_bytes())
                .expect("encrypt");
            let decrypted = bob.decrypt(ALICE, &envelope).expect("decrypt");
            assert_eq!(decrypted, plaintext.as_bytes());
        }
    }

    #[test]
    fn any_permutation_decrypts() {
        let (alice, bob) = pair();
        let envelopes: Vec<_> = (0..8)
            .map(|i| {
                alice
                    .encrypt(BOB, &format!("msg_{i:02}"), [0u8; 32], format!("m{i}").as_bytes())
                    .expect("encrypt")
            })
            .collect();

        // A fixed shuffle touching the skipped-key path from both ends.
        for &i in &[3usize, 0, 7, 1, 6, 2, 5, 4] {
            let plaintext = bob.decrypt(ALICE, &envelopes[i]).expect("decrypt");
            assert_eq!(plaintext, format!("m{i}").as_bytes());
        }
    }

    #[test]
    fn replay_is_detected() {
        let (alice, bob) = pair();
        let envelope = alice
            .encrypt(BOB, "msg_00", [0u8; 32], b"once")
            .expect("encrypt");
        bob.decrypt(ALICE, &envelope).expect("first decrypt");
        assert!(matches!(
            bob.decrypt(ALICE, &envelope),
            Err(SessionError::ReplayDetected(_))
        ));
    }

    #[test]
    fn replay_of_skipped_index_is_detected() {
        let (alice, bob) = pair();
        let e0 = alice.encrypt(BOB, "msg_00", [0u8; 32], b"zero").expect("encrypt");
        let e1 = alice.encrypt(BOB, "msg_01", [0u8; 32], b"one").expect("encrypt");
        bob.decrypt(ALICE, &e1).expect("decrypt out of order");
        bob.decrypt(ALICE, &e0).expect("decrypt skipped");
        assert!(bob.decrypt(ALICE, &e0).is_err());
    }

    #[test]
    fn stale_chain_index_rejected() {
        let (alice, bob) = pair();
        let e0 = alice.encrypt(BOB, "msg_00", [0u8; 32], b"zero").expect("encrypt");
        bob.decrypt(ALICE, &e0).expect("decrypt");

        // A different message id at an already-consumed index.
        let mut forged = e0;
        forged.message_id = "msg_ff".to_string();
        assert!(matches!(
            bob.decrypt(ALICE, &forged),
            Err(SessionError::InvalidChainIndex { .. })
        ));
    }

    #[test]
    fn forward_jump_beyond_window_rejected() {
        let (alice, bob) = pair();
        let mut last = None;
        for i in 0..(MAX_FORWARD_JUMP + 2) {
            last = Some(
                alice
                    .encrypt(BOB, &format!("msg_{i:04}"), [0u8; 32], b"x")
                    .expect("encrypt"),
            );
        }
        let envelope = last.expect("envelope");
        assert_eq!(envelope.chain_index, MAX_FORWARD_JUMP + 1);
        assert!(matches!(
            bob.decrypt(ALICE, &envelope),
            Err(SessionError::InvalidChainIndex { .. })
        ));
    }

    #[test]
    fn tampered_ciphertext_leaves_state_intact() {
        let (alice, bob) = pair();
        let mut envelope = alice
            .encrypt(BOB, "msg_00", [0u8; 32], b"payload")
            .expect("encrypt");
        envelope.ciphertext[0] ^= 0xFF;
        assert!(bob.decrypt(ALICE, &envelope).is_err());

        let state = bob.session(ALICE).expect("get").expect("state");
        assert_eq!(state.recv_chain_index, 0);
        assert!(state.seen_message_ids.is_empty());
    }

    #[test]
    fn wrong_session_id_rejected() {
        let (alice, bob) = pair();
        let mut envelope = alice
            .encrypt(BOB, "msg_00", [0u8; 32], b"payload")
            .expect("encrypt");
        envelope.session_id = "sess1_ffffffffffffffffffffffffffffffff".into();
        assert!(matches!(
            bob.decrypt(ALICE, &envelope),
            Err(SessionError::SessionMismatch { .. })
        ));
    }

    #[test]
    fn unknown_contact_errors() {
        let manager = SessionManager::new(Arc::new(MemorySessionStore::new()));
        assert!(matches!(
            manager.encrypt("aim1nobody", "msg_00", [0u8; 32], b"x"),
            Err(SessionError::UnknownSession(_))
        ));
    }
}
