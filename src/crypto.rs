// Copyright The Notary Project Authors. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Key stores and the crypto service.
//!
//! A [`KeyStore`] owns private keys, each tagged with the role it was created for.
//! [`CryptoService`] composes any number of stores behind a priority list (the first
//! store that answers for a key ID wins) and is the only signing interface the rest
//! of the crate uses.

use crate::error::{self, Result};
use crate::schema::decoded::{Decoded, Hex};
use crate::schema::key::Key;
use crate::schema::role::RoleName;
use crate::schema::Signature;
use crate::sign::{KeyAlgorithm, PrivateKey, Sign};
use log::debug;
use ring::rand::SystemRandom;
use snafu::ResultExt;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A source of private keys. Implementations may be backed by memory, files, a
/// database, or a hardware token; each private key belongs to exactly one store.
pub trait KeyStore: Debug + Send + Sync {
    /// Adds a key created for `role`, returning its key ID.
    fn add_key(&self, role: &RoleName, key: PrivateKey) -> Result<Decoded<Hex>>;

    /// The private key with this ID, along with the role it was created for.
    fn get_key(&self, keyid: &Decoded<Hex>) -> Option<(PrivateKey, RoleName)>;

    /// All (key ID, role) pairs this store holds.
    fn list_keys(&self) -> Vec<(Decoded<Hex>, RoleName)>;

    /// Removes the key with this ID, zeroizing its material. Returns whether a key was
    /// held.
    fn remove_key(&self, keyid: &Decoded<Hex>) -> bool;
}

/// An in-memory [`KeyStore`].
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<Decoded<Hex>, (PrivateKey, RoleName)>>,
}

impl MemoryKeyStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // The data under the lock is replaced wholesale, never left half-written, so a
    // poisoned lock is still consistent.

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Decoded<Hex>, (PrivateKey, RoleName)>> {
        self.keys.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Decoded<Hex>, (PrivateKey, RoleName)>> {
        self.keys.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyStore for MemoryKeyStore {
    fn add_key(&self, role: &RoleName, key: PrivateKey) -> Result<Decoded<Hex>> {
        let keyid = key.tuf_key().key_id().context(error::KeyId)?;
        self.write().insert(keyid.clone(), (key, role.clone()));
        Ok(keyid)
    }

    fn get_key(&self, keyid: &Decoded<Hex>) -> Option<(PrivateKey, RoleName)> {
        self.read().get(keyid).cloned()
    }

    fn list_keys(&self) -> Vec<(Decoded<Hex>, RoleName)> {
        self.read()
            .iter()
            .map(|(keyid, (_, role))| (keyid.clone(), role.clone()))
            .collect()
    }

    fn remove_key(&self, keyid: &Decoded<Hex>) -> bool {
        match self.write().remove(keyid) {
            Some((mut key, _)) => {
                key.zeroize();
                true
            }
            None => false,
        }
    }
}

/// A polymorphic collection of key stores, and the signing interface built on it.
pub struct CryptoService {
    stores: Vec<Box<dyn KeyStore>>,
    rng: SystemRandom,
}

impl Debug for CryptoService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoService")
            .field("stores", &self.stores)
            .finish()
    }
}

impl Default for CryptoService {
    /// A service over a single in-memory store.
    fn default() -> Self {
        Self::new(vec![Box::new(MemoryKeyStore::new())])
    }
}

impl CryptoService {
    /// Composes `stores` in priority order.
    pub fn new(stores: Vec<Box<dyn KeyStore>>) -> Self {
        Self {
            stores,
            rng: SystemRandom::new(),
        }
    }

    /// Generates a key for `role` in the highest-priority store and returns the
    /// public half.
    pub fn create(&self, role: &RoleName, algorithm: KeyAlgorithm) -> Result<Key> {
        let store = match self.stores.first() {
            Some(store) => store,
            None => {
                return error::NoKeys {
                    role: role.to_string(),
                }
                .fail();
            }
        };
        let key = PrivateKey::generate(algorithm, &self.rng)?;
        let public = key.tuf_key();
        let keyid = store.add_key(role, key)?;
        debug!("created {} key {} for role {}", algorithm, keyid, role);
        Ok(public)
    }

    /// The IDs of all keys created for `role`, across every store.
    pub fn list_keys(&self, role: &RoleName) -> Vec<Decoded<Hex>> {
        let mut keyids = Vec::new();
        for store in &self.stores {
            for (keyid, key_role) in store.list_keys() {
                if &key_role == role && !keyids.contains(&keyid) {
                    keyids.push(keyid);
                }
            }
        }
        keyids
    }

    /// The public key with this ID, if any store holds it.
    pub fn get_key(&self, keyid: &Decoded<Hex>) -> Option<Key> {
        self.get_private(keyid).map(|(key, _)| key.tuf_key())
    }

    /// The private key with this ID and the role it was created for. The first store
    /// that answers wins.
    pub fn get_private(&self, keyid: &Decoded<Hex>) -> Option<(PrivateKey, RoleName)> {
        self.stores.iter().find_map(|store| store.get_key(keyid))
    }

    /// Removes the key with this ID from every store that holds it. Removing an
    /// unknown ID is not an error.
    pub fn remove(&self, keyid: &Decoded<Hex>) {
        for store in &self.stores {
            if store.remove_key(keyid) {
                debug!("removed key {}", keyid);
            }
        }
    }

    /// Signs `msg` with every requested key this service holds, silently skipping key
    /// IDs it does not. Callers that require signatures treat an empty result as
    /// `NoKeys`.
    pub fn sign(&self, keyids: &[Decoded<Hex>], msg: &[u8]) -> Result<Vec<Signature>> {
        let mut signatures = Vec::new();
        for keyid in keyids {
            if signatures
                .iter()
                .any(|signature: &Signature| &signature.keyid == keyid)
            {
                continue;
            }
            let (key, _) = match self.get_private(keyid) {
                Some(found) => found,
                None => {
                    debug!("no private key held for {}, skipping", keyid);
                    continue;
                }
            };
            let sig = key.sign(msg, &self.rng)?;
            signatures.push(Signature {
                keyid: keyid.clone(),
                method: key.method(),
                sig: sig.into(),
            });
        }
        Ok(signatures)
    }

    /// Whether this service can sign for at least one of `keyids`.
    pub fn holds_any(&self, keyids: &[Decoded<Hex>]) -> bool {
        keyids.iter().any(|keyid| self.get_private(keyid).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RoleType;

    #[test]
    fn create_list_get_remove() {
        let service = CryptoService::default();
        let role = RoleName::from(RoleType::Targets);
        let public = service.create(&role, KeyAlgorithm::Ed25519).unwrap();
        let keyid = public.key_id().unwrap();

        assert_eq!(service.list_keys(&role), vec![keyid.clone()]);
        assert_eq!(service.get_key(&keyid).unwrap(), public);
        assert!(service.holds_any(&[keyid.clone()]));

        service.remove(&keyid);
        assert!(service.get_key(&keyid).is_none());
        assert!(service.list_keys(&role).is_empty());
    }

    #[test]
    fn sign_skips_unheld_ids() {
        let service = CryptoService::default();
        let role = RoleName::from(RoleType::Root);
        let public = service.create(&role, KeyAlgorithm::Ed25519).unwrap();
        let held = public.key_id().unwrap();
        let unheld: Decoded<Hex> = vec![0u8; 32].into();

        let msg = b"payload";
        let signatures = service.sign(&[unheld, held.clone()], msg).unwrap();
        assert_eq!(signatures.len(), 1);
        assert_eq!(signatures[0].keyid, held);
        assert!(public.verify(msg, &signatures[0].sig));
    }

    #[test]
    fn first_store_wins() {
        let first = MemoryKeyStore::new();
        let second = MemoryKeyStore::new();
        let role = RoleName::from(RoleType::Snapshot);
        let rng = ring::rand::SystemRandom::new();
        let key = PrivateKey::generate(KeyAlgorithm::Ed25519, &rng).unwrap();
        let keyid = second.add_key(&role, key).unwrap();

        let service = CryptoService::new(vec![Box::new(first), Box::new(second)]);
        let (_, found_role) = service.get_private(&keyid).unwrap();
        assert_eq!(found_role, role);
    }
}
