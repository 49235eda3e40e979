//! The identity manager: keypair lifecycle, devices, contacts and peer
//! revocation sets.
//!
//! All state lives behind one internal lock and persists as a single
//! encrypted-envelope vault file. Mutations persist before the in-memory
//! value is considered committed; a storage failure rolls the mutation
//! back.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use aim_crypto::ed25519::SigningKey;
use aim_crypto::x25519::EncryptionSecret;
use aim_crypto::{hkdf, identity_id};
use aim_types::identity::{
    device_cert_payload, Contact, ContactCard, Device, DeviceRevocation, Identity,
};
use aim_types::DEVICE_PREFIX;

use crate::seed::SeedStore;
use crate::{write_private_file, IdentityError, Result};

const VAULT_FILE: &str = "identity.json";

/// Derive the device id for a device public key:
/// `"dev1_" + hex(sha256(pub)[..8])`.
pub fn device_id(pub_key: &[u8; 32]) -> String {
    let digest = Sha256::digest(pub_key);
    format!("{}{}", DEVICE_PREFIX, hex::encode(&digest[..8]))
}

/// Verify a contact card: the signature must verify under the embedded key
/// and the identity id must be bound to that key.
pub fn verify_card(card: &ContactCard) -> Result<()> {
    if !identity_id::verify(&card.identity_id, &card.public_key) {
        return Err(IdentityError::InvalidCard(
            "identity id does not bind the public key".into(),
        ));
    }
    let key = aim_crypto::ed25519::VerifyingKey::from_bytes(&card.public_key)?;
    key.verify_raw(&card.payload(), &card.signature)
        .map_err(|_| IdentityError::InvalidCard("signature verification failed".into()))
}

#[serde_as]
#[derive(Clone, Serialize, Deserialize)]
struct StoredDevice {
    device: Device,
    #[serde_as(as = "serde_with::hex::Hex")]
    signing_seed: [u8; 32],
}

/// Vault payload, sealed as an encrypted envelope on disk.
#[serde_as]
#[derive(Clone, Serialize, Deserialize)]
struct VaultState {
    version: u32,
    #[serde_as(as = "serde_with::hex::Hex")]
    signing_private_key: [u8; 32],
    #[serde_as(as = "serde_with::hex::Hex")]
    master_seed: [u8; 64],
    devices: Vec<StoredDevice>,
    contacts: BTreeMap<String, Contact>,
    peer_revocations: BTreeMap<String, BTreeSet<String>>,
}

struct LocalIdentity {
    identity: Identity,
    signing_seed: [u8; 32],
    master_seed: [u8; 64],
}

#[derive(Default)]
struct Inner {
    passphrase: Option<String>,
    identity: Option<LocalIdentity>,
    devices: Vec<Device>,
    device_seeds: HashMap<String, [u8; 32]>,
    contacts: BTreeMap<String, Contact>,
    peer_revocations: BTreeMap<String, BTreeSet<String>>,
}

/// The identity manager. Internally synchronized; safe for concurrent
/// callers.
pub struct IdentityManager {
    vault_path: Option<PathBuf>,
    seed_store: SeedStore,
    inner: RwLock<Inner>,
}

impl IdentityManager {
    /// Open the manager over `dir`. The vault stays locked until
    /// [`unlock`](Self::unlock), [`create_identity`](Self::create_identity)
    /// or [`import_identity`](Self::import_identity).
    pub fn open(dir: &std::path::Path) -> Result<Self> {
        crate::ensure_private_dir(dir)?;
        Ok(Self {
            vault_path: Some(dir.join(VAULT_FILE)),
            seed_store: SeedStore::open(dir)?,
            inner: RwLock::new(Inner::default()),
        })
    }

    /// An ephemeral manager with no backing files.
    pub fn ephemeral() -> Self {
        Self {
            vault_path: None,
            seed_store: SeedStore::ephemeral(),
            inner: RwLock::new(Inner::default()),
        }
    }

    /// The seed vault.
    pub fn seed_store(&self) -> &SeedStore {
        &self.seed_store
    }

    /// Decrypt the persisted vault and hold the passphrase for later
    /// mutations.
    pub fn unlock(&self, password: &str) -> Result<()> {
        let path = match &self.vault_path {
            Some(path) if path.exists() => path.clone(),
            _ => return Err(IdentityError::NoIdentity),
        };
        let bytes = std::fs::read(&path).map_err(|e| IdentityError::Storage(e.to_string()))?;
        let sealed: aim_crypto::envelope::SealedEnvelope =
            serde_json::from_slice(&bytes)
                .map_err(|e| IdentityError::Serialization(e.to_string()))?;
        let plain = aim_crypto::envelope::open(password, &sealed)
            .map_err(|_| IdentityError::InvalidPassword)?;
        let state: VaultState = serde_json::from_slice(&plain)
            .map_err(|e| IdentityError::Serialization(e.to_string()))?;

        let mut inner = self.write();
        Self::install_state(&mut inner, state, password);
        info!("identity vault unlocked");
        Ok(())
    }

    /// Create a fresh identity: new mnemonic, new keypair, rebuilt primary
    /// device, peer revocation sets cleared.
    pub fn create_identity(&self, password: &str) -> Result<(Identity, String)> {
        let (phrase, seeds) = self.seed_store.create(password)?;
        let identity = self.install_identity(&seeds.signing, &seeds.master, password)?;
        Ok((identity, phrase))
    }

    /// Restore an identity from a mnemonic.
    pub fn import_identity(&self, phrase: &str, password: &str) -> Result<Identity> {
        let (_, seeds) = self.seed_store.import(phrase, password)?;
        self.install_identity(&seeds.signing, &seeds.master, password)
    }

    /// The local identity, if installed.
    pub fn identity(&self) -> Result<Identity> {
        self.read()
            .identity
            .as_ref()
            .map(|local| local.identity.clone())
            .ok_or(IdentityError::NoIdentity)
    }

    /// The local identity id, if installed.
    pub fn identity_id(&self) -> Result<String> {
        Ok(self.identity()?.id)
    }

    /// The X25519 encryption public key derived from the identity seed.
    pub fn encryption_public(&self) -> Result<[u8; 32]> {
        let inner = self.read();
        let local = inner.identity.as_ref().ok_or(IdentityError::NoIdentity)?;
        let seed = hkdf::derive(&local.master_seed, hkdf::INFO_IDENTITY_ENCRYPTION)?;
        Ok(EncryptionSecret::from_bytes(seed).public_key().to_bytes())
    }

    /// Re-encrypt both the seed vault and the identity vault under a new
    /// passphrase.
    pub fn change_password(&self, old: &str, new: &str) -> Result<()> {
        self.seed_store.change_password(old, new)?;
        let mut inner = self.write();
        let previous = inner.passphrase.replace(new.to_string());
        if let Err(e) = self.persist(&inner) {
            inner.passphrase = previous;
            return Err(e);
        }
        Ok(())
    }

    // ---- Contacts ----

    /// Add (or re-pin-check) a contact from a signed card.
    pub fn add_contact_card(&self, card: &ContactCard) -> Result<Contact> {
        verify_card(card)?;

        let mut inner = self.write();
        if let Some(existing) = inner.contacts.get(&card.identity_id) {
            if let Some(pinned) = existing.public_key {
                if pinned != card.public_key {
                    warn!(contact = %card.identity_id, "contact card key mismatch");
                    return Err(IdentityError::ContactKeyMismatch(card.identity_id.clone()));
                }
            }
        }

        let contact = Contact {
            id: card.identity_id.clone(),
            display_name: card.display_name.clone(),
            public_key: Some(card.public_key),
            added_at: inner
                .contacts
                .get(&card.identity_id)
                .map(|c| c.added_at)
                .unwrap_or_else(Utc::now),
        };
        let previous = inner
            .contacts
            .insert(contact.id.clone(), contact.clone());
        if let Err(e) = self.persist(&inner) {
            match previous {
                Some(prev) => inner.contacts.insert(prev.id.clone(), prev),
                None => inner.contacts.remove(&contact.id),
            };
            return Err(e);
        }
        debug!(contact = %contact.id, "contact added from card");
        Ok(contact)
    }

    /// Record an unverified contact by raw identity id (no pinned key).
    pub fn add_contact_by_id(&self, id: &str, display_name: &str) -> Result<Contact> {
        if !identity_id::is_plausible(id) {
            return Err(IdentityError::InvalidCard(format!(
                "implausible identity id {id:?}"
            )));
        }

        let mut inner = self.write();
        let contact = match inner.contacts.get(id) {
            // Never drop an existing pinned key.
            Some(existing) => Contact {
                display_name: display_name.to_string(),
                ..existing.clone()
            },
            None => Contact {
                id: id.to_string(),
                display_name: display_name.to_string(),
                public_key: None,
                added_at: Utc::now(),
            },
        };
        let previous = inner.contacts.insert(id.to_string(), contact.clone());
        if let Err(e) = self.persist(&inner) {
            match previous {
                Some(prev) => inner.contacts.insert(prev.id.clone(), prev),
                None => inner.contacts.remove(id),
            };
            return Err(e);
        }
        Ok(contact)
    }

    /// Remove a contact. Returns false when it did not exist.
    pub fn remove_contact(&self, id: &str) -> Result<bool> {
        let mut inner = self.write();
        let removed = inner.contacts.remove(id);
        let existed = removed.is_some();
        if existed {
            if let Err(e) = self.persist(&inner) {
                if let Some(prev) = removed {
                    inner.contacts.insert(prev.id.clone(), prev);
                }
                return Err(e);
            }
        }
        Ok(existed)
    }

    /// All contacts, ordered by id.
    pub fn list_contacts(&self) -> Vec<Contact> {
        self.read().contacts.values().cloned().collect()
    }

    /// Look up a single contact.
    pub fn contact(&self, id: &str) -> Option<Contact> {
        self.read().contacts.get(id).cloned()
    }

    /// True when the id names a known contact.
    pub fn is_known_contact(&self, id: &str) -> bool {
        self.read().contacts.contains_key(id)
    }

    /// Sign a contact card for the local identity.
    pub fn self_contact_card(&self, display_name: &str) -> Result<ContactCard> {
        let inner = self.read();
        let local = inner.identity.as_ref().ok_or(IdentityError::NoIdentity)?;
        let key = SigningKey::from_seed(&local.signing_seed);
        let payload = ContactCard::signing_payload(
            &local.identity.id,
            display_name,
            &local.identity.sig_pub,
        );
        let signature = key.sign(&payload).to_bytes().to_vec();
        Ok(ContactCard {
            identity_id: local.identity.id.clone(),
            display_name: display_name.to_string(),
            public_key: local.identity.sig_pub,
            signature,
        })
    }

    // ---- Devices ----

    /// All devices, primary first.
    pub fn list_devices(&self) -> Vec<Device> {
        self.read().devices.clone()
    }

    /// Certify a new secondary device with a fresh random keypair.
    pub fn add_device(&self, name: &str) -> Result<Device> {
        let mut inner = self.write();
        let local = inner.identity.as_ref().ok_or(IdentityError::NoIdentity)?;
        let identity_key = SigningKey::from_seed(&local.signing_seed);
        let identity_id = local.identity.id.clone();

        let device_key = SigningKey::generate();
        let device = Self::certify_device(&identity_key, &identity_id, name, &device_key);
        let seed = device_key.to_bytes();

        inner.devices.push(device.clone());
        inner.device_seeds.insert(device.id.clone(), seed);
        if let Err(e) = self.persist(&inner) {
            inner.devices.pop();
            inner.device_seeds.remove(&device.id);
            return Err(e);
        }
        info!(device = %device.id, "device added");
        Ok(device)
    }

    /// Sign `payload` with the active (first non-revoked) device key.
    pub fn active_device_auth(&self, payload: &[u8]) -> Result<(Device, Vec<u8>)> {
        let inner = self.read();
        let device = inner
            .devices
            .iter()
            .find(|d| !d.is_revoked)
            .cloned()
            .ok_or_else(|| IdentityError::UnknownDevice("no active device".into()))?;
        let seed = inner
            .device_seeds
            .get(&device.id)
            .ok_or_else(|| IdentityError::UnknownDevice(device.id.clone()))?;
        let signature = SigningKey::from_seed(seed).sign(payload).to_bytes().to_vec();
        Ok((device, signature))
    }

    /// Validate an inbound sender device against the sender's pinned key
    /// and revocation set, then the payload signature against the device
    /// key.
    pub fn verify_inbound_device(
        &self,
        contact_id: &str,
        device: &Device,
        payload: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        let inner = self.read();
        let contact = inner
            .contacts
            .get(contact_id)
            .ok_or_else(|| IdentityError::UnknownContact(contact_id.to_string()))?;
        let pinned = contact
            .public_key
            .ok_or_else(|| IdentityError::UnverifiedContact(contact_id.to_string()))?;

        if device.id != device_id(&device.pub_key) {
            return Err(IdentityError::InvalidDeviceCert(
                "device id does not match public key".into(),
            ));
        }

        let identity_key = aim_crypto::ed25519::VerifyingKey::from_bytes(&pinned)?;
        let cert_payload = device_cert_payload(contact_id, &device.id, &device.pub_key);
        identity_key
            .verify_raw(&cert_payload, &device.cert_sig)
            .map_err(|_| {
                IdentityError::InvalidDeviceCert("certificate signature invalid".into())
            })?;

        if let Some(revoked) = inner.peer_revocations.get(contact_id) {
            if revoked.contains(&device.id) {
                return Err(IdentityError::RevokedDevice(device.id.clone()));
            }
        }

        let device_key = aim_crypto::ed25519::VerifyingKey::from_bytes(&device.pub_key)?;
        device_key
            .verify_raw(payload, signature)
            .map_err(|_| IdentityError::Crypto(aim_crypto::CryptoError::SignatureVerification))
    }

    /// Mark one of our devices revoked and produce a signed revocation for
    /// broadcast. Idempotent: revoking an already-revoked device re-signs
    /// without changing state.
    pub fn revoke_device(&self, device_id_arg: &str) -> Result<DeviceRevocation> {
        let mut inner = self.write();
        let local = inner.identity.as_ref().ok_or(IdentityError::NoIdentity)?;
        let identity_key = SigningKey::from_seed(&local.signing_seed);
        let identity_id = local.identity.id.clone();

        let position = inner
            .devices
            .iter()
            .position(|d| d.id == device_id_arg)
            .ok_or_else(|| IdentityError::UnknownDevice(device_id_arg.to_string()))?;

        let timestamp_ns = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        let payload =
            DeviceRevocation::signing_payload(&identity_id, device_id_arg, timestamp_ns);
        let revocation = DeviceRevocation {
            identity_id,
            device_id: device_id_arg.to_string(),
            timestamp_ns,
            signature: identity_key.sign(&payload).to_bytes().to_vec(),
        };

        if !inner.devices[position].is_revoked {
            let snapshot = inner.devices[position].clone();
            inner.devices[position].is_revoked = true;
            inner.devices[position].revoked_at = Some(Utc::now());
            if let Err(e) = self.persist(&inner) {
                inner.devices[position] = snapshot;
                return Err(e);
            }
            info!(device = %device_id_arg, "device revoked");
        }
        Ok(revocation)
    }

    /// Append a verified peer revocation to the contact's revoked set.
    /// The set is append-only.
    pub fn apply_device_revocation(
        &self,
        contact_id: &str,
        revocation: &DeviceRevocation,
    ) -> Result<()> {
        if revocation.identity_id != contact_id {
            return Err(IdentityError::InvalidRevocation(
                "revocation issuer does not match sender".into(),
            ));
        }

        let mut inner = self.write();
        let contact = inner
            .contacts
            .get(contact_id)
            .ok_or_else(|| IdentityError::UnknownContact(contact_id.to_string()))?;
        let pinned = contact
            .public_key
            .ok_or_else(|| IdentityError::UnverifiedContact(contact_id.to_string()))?;

        let payload = DeviceRevocation::signing_payload(
            &revocation.identity_id,
            &revocation.device_id,
            revocation.timestamp_ns,
        );
        aim_crypto::ed25519::VerifyingKey::from_bytes(&pinned)?
            .verify_raw(&payload, &revocation.signature)
            .map_err(|_| {
                IdentityError::InvalidRevocation("signature verification failed".into())
            })?;

        let inserted = inner
            .peer_revocations
            .entry(contact_id.to_string())
            .or_default()
            .insert(revocation.device_id.clone());
        if inserted {
            if let Err(e) = self.persist(&inner) {
                if let Some(set) = inner.peer_revocations.get_mut(contact_id) {
                    set.remove(&revocation.device_id);
                }
                return Err(e);
            }
            info!(contact = %contact_id, device = %revocation.device_id, "peer device revoked");
        }
        Ok(())
    }

    // ---- internals ----

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn certify_device(
        identity_key: &SigningKey,
        identity_id: &str,
        name: &str,
        device_key: &SigningKey,
    ) -> Device {
        let pub_key = device_key.verifying_key().to_bytes();
        let id = device_id(&pub_key);
        let cert_sig = identity_key
            .sign(&device_cert_payload(identity_id, &id, &pub_key))
            .to_bytes()
            .to_vec();
        Device {
            id,
            name: name.to_string(),
            pub_key,
            cert_sig,
            created_at: Utc::now(),
            is_revoked: false,
            revoked_at: None,
        }
    }

    fn install_identity(
        &self,
        signing_seed: &[u8; 32],
        master_seed: &[u8; 64],
        password: &str,
    ) -> Result<Identity> {
        let signing_key = SigningKey::from_seed(signing_seed);
        let sig_pub = signing_key.verifying_key().to_bytes();
        let identity = Identity {
            id: identity_id::build(&sig_pub),
            sig_pub,
        };

        // Primary device key derives from the master seed.
        let device_seed = hkdf::derive(master_seed, &format!("{}1", hkdf::INFO_DEVICE_PREFIX))?;
        let device_key = SigningKey::from_seed(&device_seed);
        let primary = Self::certify_device(&signing_key, &identity.id, "primary", &device_key);

        let mut inner = self.write();
        inner.passphrase = Some(password.to_string());
        inner.identity = Some(LocalIdentity {
            identity: identity.clone(),
            signing_seed: *signing_seed,
            master_seed: *master_seed,
        });
        inner.device_seeds =
            HashMap::from([(primary.id.clone(), device_seed)]);
        inner.devices = vec![primary];
        inner.peer_revocations.clear();
        self.persist(&inner)?;
        info!(identity = %identity.id, "identity installed");
        Ok(identity)
    }

    fn install_state(inner: &mut Inner, state: VaultState, password: &str) {
        let signing_key = SigningKey::from_seed(&state.signing_private_key);
        let sig_pub = signing_key.verifying_key().to_bytes();
        inner.passphrase = Some(password.to_string());
        inner.identity = Some(LocalIdentity {
            identity: Identity {
                id: identity_id::build(&sig_pub),
                sig_pub,
            },
            signing_seed: state.signing_private_key,
            master_seed: state.master_seed,
        });
        inner.devices = state.devices.iter().map(|d| d.device.clone()).collect();
        inner.device_seeds = state
            .devices
            .into_iter()
            .map(|d| (d.device.id.clone(), d.signing_seed))
            .collect();
        inner.contacts = state.contacts;
        inner.peer_revocations = state.peer_revocations;
    }

    fn persist(&self, inner: &Inner) -> Result<()> {
        let path = match &self.vault_path {
            Some(path) => path.clone(),
            None => return Ok(()),
        };
        let local = match inner.identity.as_ref() {
            Some(local) => local,
            // Nothing installed yet; nothing to write.
            None => return Ok(()),
        };
        let passphrase = inner
            .passphrase
            .as_deref()
            .ok_or(IdentityError::PasswordRequired)?;

        let state = VaultState {
            version: 1,
            signing_private_key: local.signing_seed,
            master_seed: local.master_seed,
            devices: inner
                .devices
                .iter()
                .map(|device| StoredDevice {
                    device: device.clone(),
                    signing_seed: inner
                        .device_seeds
                        .get(&device.id)
                        .copied()
                        .unwrap_or([0u8; 32]),
                })
                .collect(),
            contacts: inner.contacts.clone(),
            peer_revocations: inner.peer_revocations.clone(),
        };
        let plain = serde_json::to_vec(&state)
            .map_err(|e| IdentityError::Serialization(e.to_string()))?;
        let sealed = aim_crypto::envelope::seal(passphrase, &plain)?;
        let bytes = serde_json::to_vec(&sealed)
            .map_err(|e| IdentityError::Serialization(e.to_string()))?;
        write_private_file(&path, &bytes)
    }
}
