// Copyright The Notary Project Authors. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable storage of role envelopes, keyed by (collection, role).
//!
//! The store keeps the latest envelope per role plus every historical envelope
//! addressable by the hex SHA-256 of its bytes, and a key table pinning the public
//! half of the signing keys the server holds for a collection. Writers are version
//! gated: a new envelope is only accepted if its version strictly exceeds the stored
//! one, and batches apply all-or-nothing. Readers are linearizable with respect to
//! writers.

use crate::error::{self, Result};
use crate::schema::key::Key;
use crate::schema::role::RoleName;
use crate::schema::RoleType;
use log::debug;
use ring::digest::{digest, SHA256};
use snafu::ensure;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One role envelope offered for persistence.
#[derive(Debug, Clone)]
pub struct MetaUpdate {
    /// The role the envelope belongs to.
    pub role: RoleName,
    /// The version the envelope carries.
    pub version: u64,
    /// The canonical envelope bytes.
    pub data: Vec<u8>,
}

/// The storage interface the validator and server run against.
pub trait MetaStore: Debug + Send + Sync {
    /// Accepts `update` iff its version strictly exceeds the stored version for that
    /// (collection, role); fails with `OldVersion` otherwise.
    fn update_current(&self, gun: &str, update: MetaUpdate) -> Result<()>;

    /// Applies a batch all-or-nothing. On any version conflict the entire batch is
    /// discarded and `OldVersion` reported; no partial write is ever visible.
    fn update_many(&self, gun: &str, updates: Vec<MetaUpdate>) -> Result<()>;

    /// The latest envelope bytes for (collection, role), if any.
    fn get_current(&self, gun: &str, role: &RoleName) -> Result<Option<Vec<u8>>>;

    /// A historical envelope addressed by the hex SHA-256 of its bytes.
    fn get_checksum(&self, gun: &str, role: &RoleName, checksum: &str) -> Result<Vec<u8>>;

    /// The public half of the server-held signing key for (collection, role).
    fn get_key(&self, gun: &str, role: RoleType) -> Result<Key>;

    /// Pins the public half of a server-held signing key.
    fn set_key(&self, gun: &str, role: RoleType, key: Key) -> Result<()>;
}

/// Per-collection storage state.
#[derive(Debug, Default)]
struct Collection {
    current: HashMap<RoleName, (u64, Vec<u8>)>,
    checksums: HashMap<RoleName, HashMap<String, Vec<u8>>>,
    keys: HashMap<RoleType, Key>,
}

/// An in-memory [`MetaStore`] behind a single lock; writes take the lock for their
/// whole validate-then-apply cycle, which is what makes batches atomic and readers
/// linearizable.
#[derive(Debug, Default)]
pub struct MemStorage {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Collection>> {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Collection>> {
        self.collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Validates `update` against the versions in `current`, failing with `OldVersion`
/// unless it strictly advances.
fn check_version(current: &HashMap<RoleName, u64>, update: &MetaUpdate) -> Result<()> {
    if let Some(stored) = current.get(&update.role) {
        ensure!(
            update.version > *stored,
            error::OldVersion {
                role: update.role.to_string(),
                stored: *stored,
                given: update.version,
            }
        );
    }
    Ok(())
}

fn apply(collection: &mut Collection, gun: &str, update: MetaUpdate) {
    let checksum = hex::encode(digest(&SHA256, &update.data).as_ref());
    debug!(
        "storing {} v{} for '{}' ({})",
        update.role, update.version, gun, checksum
    );
    collection
        .checksums
        .entry(update.role.clone())
        .or_insert_with(HashMap::new)
        .insert(checksum, update.data.clone());
    collection
        .current
        .insert(update.role, (update.version, update.data));
}

impl MetaStore for MemStorage {
    fn update_current(&self, gun: &str, update: MetaUpdate) -> Result<()> {
        let mut collections = self.write();
        let collection = collections.entry(gun.to_owned()).or_default();
        let versions: HashMap<RoleName, u64> = collection
            .current
            .iter()
            .map(|(role, (version, _))| (role.clone(), *version))
            .collect();
        check_version(&versions, &update)?;
        apply(collection, gun, update);
        Ok(())
    }

    fn update_many(&self, gun: &str, updates: Vec<MetaUpdate>) -> Result<()> {
        let mut collections = self.write();
        let collection = collections.entry(gun.to_owned()).or_default();
        // Validate the whole batch before touching anything; a batch may advance the
        // same role more than once as long as each step advances the version.
        let mut versions: HashMap<RoleName, u64> = collection
            .current
            .iter()
            .map(|(role, (version, _))| (role.clone(), *version))
            .collect();
        for update in &updates {
            check_version(&versions, update)?;
            versions.insert(update.role.clone(), update.version);
        }
        for update in updates {
            apply(collection, gun, update);
        }
        Ok(())
    }

    fn get_current(&self, gun: &str, role: &RoleName) -> Result<Option<Vec<u8>>> {
        Ok(self
            .read()
            .get(gun)
            .and_then(|collection| collection.current.get(role))
            .map(|(_, data)| data.clone()))
    }

    fn get_checksum(&self, gun: &str, role: &RoleName, checksum: &str) -> Result<Vec<u8>> {
        let found = self
            .read()
            .get(gun)
            .and_then(|collection| collection.checksums.get(role))
            .and_then(|by_checksum| by_checksum.get(checksum))
            .cloned();
        match found {
            Some(data) => Ok(data),
            None => error::NotFound {
                gun,
                role: role.to_string(),
            }
            .fail(),
        }
    }

    fn get_key(&self, gun: &str, role: RoleType) -> Result<Key> {
        let found = self
            .read()
            .get(gun)
            .and_then(|collection| collection.keys.get(&role))
            .cloned();
        match found {
            Some(key) => Ok(key),
            None => error::NoKey {
                gun,
                role: role.to_string(),
            }
            .fail(),
        }
    }

    fn set_key(&self, gun: &str, role: RoleType, key: Key) -> Result<()> {
        let mut collections = self.write();
        let collection = collections.entry(gun.to_owned()).or_default();
        collection.keys.insert(role, key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(role: &str, version: u64, data: &[u8]) -> MetaUpdate {
        MetaUpdate {
            role: RoleName::new(role).unwrap(),
            version,
            data: data.to_vec(),
        }
    }

    #[test]
    fn update_current_is_strictly_monotone() {
        let store = MemStorage::new();
        let gun = "docker.com/notary";
        store.update_current(gun, update("targets", 1, b"one")).unwrap();
        store.update_current(gun, update("targets", 2, b"two")).unwrap();
        // Equal and lower versions are both rejected.
        assert!(store.update_current(gun, update("targets", 2, b"redo")).is_err());
        assert!(store.update_current(gun, update("targets", 1, b"old")).is_err());
        let current = store
            .get_current(gun, &RoleName::new("targets").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(current, b"two".to_vec());
    }

    #[test]
    fn update_many_is_atomic() {
        let store = MemStorage::new();
        let gun = "docker.com/notary";
        store.update_current(gun, update("snapshot", 5, b"five")).unwrap();

        let batch = vec![update("targets", 1, b"t1"), update("snapshot", 5, b"stale")];
        let err = store.update_many(gun, batch).unwrap_err();
        assert!(matches!(err, crate::error::Error::OldVersion { .. }));

        // The conflicting batch left no trace.
        assert!(store
            .get_current(gun, &RoleName::new("targets").unwrap())
            .unwrap()
            .is_none());
    }

    #[test]
    fn checksums_address_history() {
        let store = MemStorage::new();
        let gun = "docker.com/notary";
        let role = RoleName::new("timestamp").unwrap();
        store.update_current(gun, update("timestamp", 1, b"first")).unwrap();
        store.update_current(gun, update("timestamp", 2, b"second")).unwrap();

        let checksum = hex::encode(digest(&SHA256, b"first").as_ref());
        assert_eq!(store.get_checksum(gun, &role, &checksum).unwrap(), b"first");
        assert!(store.get_checksum(gun, &role, "ffff").is_err());
    }

    #[test]
    fn key_table() {
        let store = MemStorage::new();
        let gun = "docker.com/notary";
        assert!(store.get_key(gun, RoleType::Timestamp).is_err());
        let key = crate::schema::key::Key::Ed25519 {
            keyval: crate::schema::key::Ed25519Key {
                public: vec![9u8; 32].into(),
                _extra: HashMap::new(),
            },
            scheme: crate::schema::key::Ed25519Scheme::Ed25519,
            _extra: HashMap::new(),
        };
        store.set_key(gun, RoleType::Timestamp, key.clone()).unwrap();
        assert_eq!(store.get_key(gun, RoleType::Timestamp).unwrap(), key);
    }
}
