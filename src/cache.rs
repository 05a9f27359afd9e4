// Copyright The Notary Project Authors. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The client's local cache: the last validated envelope bytes per role, plus the
//! serialized trust pins for the collections this client follows.
//!
//! Every cache entry is keyed by role name; delegated roles land in subdirectories
//! mirroring their `/`-separated names.

use crate::error::{self, Result};
use crate::schema::role::RoleName;
use crate::schema::SnapshotMeta;
use crate::trustpin::TrustPinning;
use log::debug;
use ring::digest::{digest, SHA256};
use snafu::{ensure, ResultExt};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use tempfile::TempDir;

/// The file the serialized [`TrustPinning`] lives in.
const PINS_FILE: &str = "trust_pins.json";

/// `LocalCache` persists validated role metadata for one client.
#[derive(Debug, Clone)]
pub struct LocalCache {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    root: PathBuf,
    /// Keeps the directory alive for caches the caller did not give a home.
    _temp: Option<TempDir>,
    /// Readers of role files against whole-file rewrites.
    lock: RwLock<()>,
}

impl LocalCache {
    /// Opens a cache rooted at `path`, or at a temporary directory that lives as long
    /// as the cache when no path is given.
    pub fn new(path: Option<PathBuf>) -> Result<Self> {
        let (root, _temp) = match path {
            Some(path) => (path, None),
            None => {
                let temp = TempDir::new().context(error::CacheInit)?;
                (temp.path().to_path_buf(), Some(temp))
            }
        };
        fs::create_dir_all(&root).context(error::CacheInit)?;
        Ok(Self {
            inner: Arc::new(Inner {
                root,
                _temp,
                lock: RwLock::new(()),
            }),
        })
    }

    /// Where a role's envelope bytes live. Delegated names like `targets/level1`
    /// produce nested directories.
    fn role_path(&self, role: &RoleName) -> PathBuf {
        self.inner.root.join(format!("{}.json", role))
    }

    /// The last validated envelope bytes for a role, if cached.
    pub fn load(&self, role: &RoleName) -> Result<Option<Vec<u8>>> {
        let _guard = self.inner.lock.read().unwrap_or_else(PoisonError::into_inner);
        let path = self.role_path(role);
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).context(error::CacheOpen { path }),
        }
    }

    /// Stores validated envelope bytes for a role, replacing any prior version.
    pub fn store(&self, role: &RoleName, data: &[u8]) -> Result<()> {
        let _guard = self.inner.lock.write().unwrap_or_else(PoisonError::into_inner);
        let path = self.role_path(role);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context(error::CacheWrite { path: &path })?;
        }
        fs::write(&path, data).context(error::CacheWrite { path })
    }

    /// Forgets a role. Removing a role that was never cached is not an error.
    pub fn remove(&self, role: &RoleName) -> Result<()> {
        let _guard = self.inner.lock.write().unwrap_or_else(PoisonError::into_inner);
        let path = self.role_path(role);
        debug!("removing cached '{}'", role);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).context(error::CacheRemove { path }),
        }
    }

    /// The trust pins persisted by an earlier session, if any.
    pub fn load_pins(&self) -> Result<Option<TrustPinning>> {
        let _guard = self.inner.lock.read().unwrap_or_else(PoisonError::into_inner);
        let path = self.inner.root.join(PINS_FILE);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).context(error::CacheOpen { path }),
        };
        let pins = serde_json::from_slice(&data).context(error::CacheParse {
            what: PINS_FILE,
        })?;
        Ok(Some(pins))
    }

    /// Persists the trust pins so the next session starts from the same anchors.
    pub fn store_pins(&self, pins: &TrustPinning) -> Result<()> {
        let _guard = self.inner.lock.write().unwrap_or_else(PoisonError::into_inner);
        let path = self.inner.root.join(PINS_FILE);
        let data = serde_json::to_vec_pretty(pins).context(error::CacheSerialize {
            what: PINS_FILE,
        })?;
        fs::write(&path, data).context(error::CacheWrite { path })
    }
}

/// Guards fetched role bytes against a trusted snapshot or timestamp entry, before
/// anything is cached or parsed.
///
/// Bytes longer than the entry's declared length mean the server is feeding more data
/// than trusted metadata allows (`MaliciousServer`); bytes whose digest does not match
/// are `ChecksumMismatch`.
pub fn check_meta(role: &RoleName, meta: &SnapshotMeta, data: &[u8]) -> Result<()> {
    ensure!(
        data.len() as u64 <= meta.length,
        error::MaliciousServer {
            role: role.to_string(),
        }
    );
    let calculated = digest(&SHA256, data);
    ensure!(
        calculated.as_ref() == meta.hashes.sha256.as_ref(),
        error::ChecksumMismatch {
            role: role.to_string(),
            calculated: hex::encode(calculated.as_ref()),
            expected: meta.hashes.sha256.to_string(),
        }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_role_bytes() {
        let cache = LocalCache::new(None).unwrap();
        let role = RoleName::new("targets/level1").unwrap();
        assert!(cache.load(&role).unwrap().is_none());
        cache.store(&role, b"payload").unwrap();
        assert_eq!(cache.load(&role).unwrap().unwrap(), b"payload".to_vec());
        cache.store(&role, b"newer").unwrap();
        assert_eq!(cache.load(&role).unwrap().unwrap(), b"newer".to_vec());
    }

    #[test]
    fn remove_missing_is_ok() {
        let cache = LocalCache::new(None).unwrap();
        let role = RoleName::new("snapshot").unwrap();
        cache.remove(&role).unwrap();
        cache.store(&role, b"bytes").unwrap();
        cache.remove(&role).unwrap();
        assert!(cache.load(&role).unwrap().is_none());
    }

    #[test]
    fn pins_round_trip() {
        let cache = LocalCache::new(None).unwrap();
        assert!(cache.load_pins().unwrap().is_none());

        let mut pins = TrustPinning::new();
        pins.pin("docker.com/notary", vec![vec![7u8; 32].into()]);
        cache.store_pins(&pins).unwrap();

        let restored = cache.load_pins().unwrap().unwrap();
        assert_eq!(
            restored.pins("docker.com/notary"),
            pins.pins("docker.com/notary")
        );
    }

    #[test]
    fn check_meta_guards() {
        let role = RoleName::new("targets").unwrap();
        let data = b"envelope bytes";
        let meta = SnapshotMeta::describe(data, 1);
        assert!(check_meta(&role, &meta, data).is_ok());

        // Tampered content of the same length is a checksum mismatch.
        let tampered = b"envelope bytez";
        assert!(matches!(
            check_meta(&role, &meta, tampered).unwrap_err(),
            crate::error::Error::ChecksumMismatch { .. }
        ));

        // Overlong content is attributed to a malicious server.
        let overlong = b"envelope bytes and then some";
        assert!(matches!(
            check_meta(&role, &meta, overlong).unwrap_err(),
            crate::error::Error::MaliciousServer { .. }
        ));
    }
}
