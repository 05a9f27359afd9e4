// Copyright The Notary Project Authors. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0
#![allow(clippy::used_underscore_binding)]

//! The in-memory repository: the four canonical role documents plus a tree of
//! delegated targets documents, the mutations that preserve their invariants, and the
//! signing operations that turn them into envelopes.
//!
//! A repository is single-threaded: one instance per request or session, exclusive
//! ownership of its documents, synchronous signing through its crypto service.
//! Documents are created at version 0 and marked dirty; signing a dirty document bumps
//! its version first, so published envelopes always carry a version of at least 1.

use crate::crypto::CryptoService;
use crate::error::{self, Result};
use crate::schema::decoded::{Decoded, Hex};
use crate::schema::key::Key;
use crate::schema::role::{paths_restrict, paths_verify, BaseRole, DelegationRole, RoleName};
use crate::schema::{
    DelegatedRole, Role, RoleKeys, RoleType, Root, Signature, Signed, Snapshot, SnapshotMeta,
    Targets, Timestamp,
};
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use ring::digest::{digest, SHA256, SHA256_OUTPUT_LEN};
use serde::Serialize;
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::{HashMap, HashSet};
use std::num::NonZeroU64;

/// The metadata format specification version written into new documents.
pub const SPEC_VERSION: &str = "1.0.0";

/// The default lifetime of root metadata.
pub const DEFAULT_ROOT_EXPIRY_DAYS: i64 = 10 * 365;
/// The default lifetime of targets metadata.
pub const DEFAULT_TARGETS_EXPIRY_DAYS: i64 = 3 * 365;
/// The default lifetime of snapshot metadata.
pub const DEFAULT_SNAPSHOT_EXPIRY_DAYS: i64 = 3 * 365;
/// The default lifetime of timestamp metadata. Short, so clients notice staleness.
pub const DEFAULT_TIMESTAMP_EXPIRY_DAYS: i64 = 14;

/// The default expiry for newly signed metadata of the given role.
pub fn default_expires(role: RoleType) -> DateTime<Utc> {
    let days = match role {
        RoleType::Root => DEFAULT_ROOT_EXPIRY_DAYS,
        RoleType::Targets => DEFAULT_TARGETS_EXPIRY_DAYS,
        RoleType::Snapshot => DEFAULT_SNAPSHOT_EXPIRY_DAYS,
        RoleType::Timestamp => DEFAULT_TIMESTAMP_EXPIRY_DAYS,
    };
    Utc::now() + Duration::days(days)
}

/// A signed role, including its canonical serialized form (`buffer`). The `sha256` and
/// `length` are calculated from this buffer and recorded in snapshot and timestamp
/// entries, which makes it imperative that this buffer is what gets persisted.
#[derive(Debug, Clone)]
pub struct SignedRole<T> {
    /// The signed envelope.
    pub signed: Signed<T>,
    /// The canonical byte image of the envelope.
    pub buffer: Vec<u8>,
    /// SHA-256 digest of `buffer`.
    pub sha256: [u8; SHA256_OUTPUT_LEN],
    /// Length of `buffer` in bytes.
    pub length: u64,
}

impl<T> SignedRole<T>
where
    T: Role + Serialize,
{
    /// Serializes a signed envelope and captures its digest and length.
    pub fn from_signed(signed: Signed<T>) -> Result<Self> {
        let buffer = signed.canonical_bytes().context(error::CanonicalJson {
            role: T::TYPE.to_string(),
        })?;
        let length = buffer.len() as u64;
        let mut sha256 = [0; SHA256_OUTPUT_LEN];
        sha256.copy_from_slice(digest(&SHA256, &buffer).as_ref());
        Ok(SignedRole {
            signed,
            buffer,
            sha256,
            length,
        })
    }

    /// The version the envelope carries.
    pub fn version(&self) -> u64 {
        self.signed.signed.version()
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// An in-memory metadata repository for one collection.
#[derive(Debug)]
pub struct Repository {
    crypto: CryptoService,
    root: Option<Signed<Root>>,
    targets: HashMap<RoleName, Signed<Targets>>,
    snapshot: Option<Signed<Snapshot>>,
    timestamp: Option<Signed<Timestamp>>,
    dirty: HashSet<RoleName>,
    /// The root role (and keys) as of the last load or init. Signing root always also
    /// requests signatures from these keys so a rotated root stays verifiable by
    /// clients that trust the previous root.
    original_root_role: Option<(RoleKeys, HashMap<Decoded<Hex>, Key>)>,
}

impl Repository {
    /// Creates an empty repository over the given crypto service.
    pub fn new(crypto: CryptoService) -> Self {
        Self {
            crypto,
            root: None,
            targets: HashMap::new(),
            snapshot: None,
            timestamp: None,
            dirty: HashSet::new(),
            original_root_role: None,
        }
    }

    /// The crypto service backing this repository.
    pub fn crypto(&self) -> &CryptoService {
        &self.crypto
    }

    /// The root document, if initialized or loaded.
    pub fn root(&self) -> Option<&Signed<Root>> {
        self.root.as_ref()
    }

    /// The targets document for `name`, if present.
    pub fn targets(&self, name: &RoleName) -> Option<&Signed<Targets>> {
        self.targets.get(name)
    }

    /// The names of all loaded targets-family documents.
    pub fn targets_roles(&self) -> impl Iterator<Item = &RoleName> {
        self.targets.keys()
    }

    /// The snapshot document, if initialized or loaded.
    pub fn snapshot(&self) -> Option<&Signed<Snapshot>> {
        self.snapshot.as_ref()
    }

    /// The timestamp document, if initialized or loaded.
    pub fn timestamp(&self) -> Option<&Signed<Timestamp>> {
        self.timestamp.as_ref()
    }

    /// Whether the named document has unsigned changes.
    pub fn is_dirty(&self, name: &RoleName) -> bool {
        self.dirty.contains(name)
    }

    // =^..^=   =^..^=   =^..^=   loading previously validated metadata   =^..^=   =^..^=

    /// Adopts an existing root document. Does not mark anything dirty; the adopted
    /// root role becomes the continuity anchor for future root signing.
    pub fn load_root(&mut self, root: Signed<Root>) -> Result<()> {
        let role_keys = root
            .signed
            .role_keys(RoleType::Root)
            .context(error::VerifyMetadata {
                role: RoleType::Root.to_string(),
            })?
            .clone();
        self.original_root_role = Some((role_keys, root.signed.keys.clone()));
        self.root = Some(root);
        Ok(())
    }

    /// Adopts an existing targets document for `name`.
    pub fn load_targets(&mut self, name: &RoleName, targets: Signed<Targets>) -> Result<()> {
        ensure!(
            name.is_targets_role(),
            error::InvalidRole {
                role: name.to_string(),
                reason: "not a targets-family role",
            }
        );
        self.targets.insert(name.clone(), targets);
        Ok(())
    }

    /// Adopts an existing snapshot document.
    pub fn load_snapshot(&mut self, snapshot: Signed<Snapshot>) {
        self.snapshot = Some(snapshot);
    }

    /// Adopts an existing timestamp document.
    pub fn load_timestamp(&mut self, timestamp: Signed<Timestamp>) {
        self.timestamp = Some(timestamp);
    }

    // =^..^=   =^..^=   =^..^=   initialization   =^..^=   =^..^=   =^..^=   =^..^=

    /// Builds the initial root document from one [`BaseRole`] per canonical role and
    /// marks it dirty. Fails with `NoKeys` if the crypto service cannot sign for any
    /// of the root role's keys.
    pub fn init_root(
        &mut self,
        root: BaseRole,
        targets: BaseRole,
        snapshot: BaseRole,
        timestamp: BaseRole,
        consistent_snapshot: bool,
    ) -> Result<()> {
        let mut keys = HashMap::new();
        let mut roles = HashMap::new();
        for (role_type, base) in &[
            (RoleType::Root, &root),
            (RoleType::Targets, &targets),
            (RoleType::Snapshot, &snapshot),
            (RoleType::Timestamp, &timestamp),
        ] {
            let role_keys = base.to_role_keys().context(error::KeyId)?;
            ensure!(
                role_keys.threshold.get() <= role_keys.keyids.len() as u64,
                error::InvalidRole {
                    role: role_type.to_string(),
                    reason: "threshold exceeds the number of keys",
                }
            );
            for key in &base.keys {
                let keyid = key.key_id().context(error::KeyId)?;
                keys.insert(keyid, key.clone());
            }
            roles.insert(*role_type, role_keys);
        }

        let root_role = &roles[&RoleType::Root];
        ensure!(
            self.crypto.holds_any(&root_role.keyids),
            error::NoKeys {
                role: RoleType::Root.to_string(),
            }
        );

        self.original_root_role = Some((root_role.clone(), keys.clone()));
        self.root = Some(Signed {
            signed: Root {
                spec_version: SPEC_VERSION.to_string(),
                consistent_snapshot,
                version: 0,
                expires: default_expires(RoleType::Root),
                keys,
                roles,
                _extra: HashMap::new(),
            },
            signatures: Vec::new(),
        });
        self.mark_dirty(RoleName::from(RoleType::Root));
        Ok(())
    }

    /// Creates an empty targets document for `name` if one does not exist.
    pub fn init_targets(&mut self, name: &RoleName) -> Result<()> {
        ensure!(
            name.is_targets_role(),
            error::InvalidRole {
                role: name.to_string(),
                reason: "not a targets-family role",
            }
        );
        if !self.targets.contains_key(name) {
            self.targets.insert(
                name.clone(),
                Signed {
                    signed: Targets::new(
                        SPEC_VERSION.to_string(),
                        0,
                        default_expires(RoleType::Targets),
                    ),
                    signatures: Vec::new(),
                },
            );
            self.mark_dirty(name.clone());
        }
        Ok(())
    }

    /// Creates an empty snapshot document if one does not exist. Entries for loaded
    /// targets documents are filled in when the snapshot is signed.
    pub fn init_snapshot(&mut self) -> Result<()> {
        if self.snapshot.is_none() {
            self.snapshot = Some(Signed {
                signed: Snapshot::new(
                    SPEC_VERSION.to_string(),
                    0,
                    default_expires(RoleType::Snapshot),
                ),
                signatures: Vec::new(),
            });
            self.mark_dirty(RoleName::from(RoleType::Snapshot));
        }
        Ok(())
    }

    /// Creates an empty timestamp document if one does not exist.
    pub fn init_timestamp(&mut self) -> Result<()> {
        if self.timestamp.is_none() {
            self.timestamp = Some(Signed {
                signed: Timestamp::new(
                    SPEC_VERSION.to_string(),
                    0,
                    default_expires(RoleType::Timestamp),
                ),
                signatures: Vec::new(),
            });
            self.mark_dirty(RoleName::from(RoleType::Timestamp));
        }
        Ok(())
    }

    // =^..^=   =^..^=   =^..^=   canonical role key management   =^..^=   =^..^=

    /// Adds keys to a canonical role in root. Marks root dirty, and the affected role
    /// document too, so the next signing pass rebuilds snapshot and timestamp.
    pub fn add_base_keys(&mut self, role: RoleType, keys: &[Key]) -> Result<()> {
        let signed_root = self.root.as_mut().context(error::NotLoaded {
            role: RoleType::Root.to_string(),
        })?;
        let role_keys = signed_root
            .signed
            .roles
            .get_mut(&role)
            .context(error::InvalidRole {
                role: role.to_string(),
                reason: "root does not declare this role",
            })?;
        for key in keys {
            let keyid = key.key_id().context(error::KeyId)?;
            if !role_keys.keyids.contains(&keyid) {
                role_keys.keyids.push(keyid.clone());
            }
            signed_root.signed.keys.insert(keyid, key.clone());
        }
        self.mark_dirty(RoleName::from(RoleType::Root));
        self.mark_role_dirty(role);
        Ok(())
    }

    /// Removes key IDs from a canonical role in root, dropping each key object once no
    /// role references it.
    pub fn remove_base_keys(&mut self, role: RoleType, keyids: &[Decoded<Hex>]) -> Result<()> {
        let signed_root = self.root.as_mut().context(error::NotLoaded {
            role: RoleType::Root.to_string(),
        })?;
        let role_keys = signed_root
            .signed
            .roles
            .get_mut(&role)
            .context(error::InvalidRole {
                role: role.to_string(),
                reason: "root does not declare this role",
            })?;
        role_keys.keyids.retain(|keyid| !keyids.contains(keyid));
        let root_doc = &mut signed_root.signed;
        for keyid in keyids {
            let referenced = root_doc
                .roles
                .values()
                .any(|role_keys| role_keys.keyids.contains(keyid));
            if !referenced {
                root_doc.keys.remove(keyid);
            }
        }
        self.mark_dirty(RoleName::from(RoleType::Root));
        self.mark_role_dirty(role);
        Ok(())
    }

    // =^..^=   =^..^=   =^..^=   delegation management   =^..^=   =^..^=   =^..^=

    /// Adds or updates the delegation `name` in its parent document: new roles are
    /// appended at the end of the parent's role list, existing roles get their key set
    /// unioned and threshold overridden. Never creates a child document.
    pub fn update_delegation_keys(
        &mut self,
        name: &RoleName,
        add_keys: &[Key],
        remove_keyids: &[Decoded<Hex>],
        threshold: NonZeroU64,
    ) -> Result<()> {
        let parent = self.delegation_parent(name)?;
        self.ensure_signable(&parent)?;

        let mut added = Vec::new();
        for key in add_keys {
            let keyid = key.key_id().context(error::KeyId)?;
            added.push((keyid, key.clone()));
        }

        let parent_doc = self.targets.get_mut(&parent).context(error::NotLoaded {
            role: parent.to_string(),
        })?;
        let delegations = parent_doc.signed.delegations_mut();

        // Work out the resulting key set first; the mutation must not partially apply.
        let mut new_keyids: Vec<Decoded<Hex>> = delegations
            .role(name)
            .map(|role| role.keyids.clone())
            .unwrap_or_default();
        for (keyid, _) in &added {
            if !new_keyids.contains(keyid) {
                new_keyids.push(keyid.clone());
            }
        }
        new_keyids.retain(|keyid| !remove_keyids.contains(keyid));
        ensure!(
            threshold.get() <= new_keyids.len() as u64,
            error::InvalidRole {
                role: name.to_string(),
                reason: "threshold exceeds the number of keys",
            }
        );

        for (keyid, key) in added {
            delegations.keys.insert(keyid, key);
        }
        match delegations.roles.iter_mut().find(|role| &role.name == name) {
            Some(role) => {
                role.keyids = new_keyids;
                role.threshold = threshold;
            }
            None => delegations.roles.push(DelegatedRole {
                name: name.clone(),
                keyids: new_keyids,
                threshold,
                paths: Vec::new(),
                path_hash_prefixes: None,
                _extra: HashMap::new(),
            }),
        }
        delegations.prune_keys();
        self.mark_dirty(parent);
        Ok(())
    }

    /// Edits the path prefixes of the delegation `name` in its parent document. Fails
    /// with `InvalidRole` if any added path is not covered by the parent's effective
    /// paths, or if the role uses `path_hash_prefixes` instead.
    pub fn update_delegation_paths(
        &mut self,
        name: &RoleName,
        add_paths: &[String],
        remove_paths: &[String],
        clear_all: bool,
    ) -> Result<()> {
        let parent = self.delegation_parent(name)?;
        self.ensure_signable(&parent)?;

        // The parent's effective paths bound what the child may claim. The canonical
        // targets role is unrestricted.
        if parent.is_delegation() {
            let parent_role = self.get_delegation_role(&parent)?;
            if let Err(err) = paths_verify(&parent_role.paths, &parent, add_paths) {
                return error::InvalidRole {
                    role: name.to_string(),
                    reason: err.to_string(),
                }
                .fail();
            }
        }

        let parent_doc = self.targets.get_mut(&parent).context(error::NotLoaded {
            role: parent.to_string(),
        })?;
        let role = parent_doc
            .signed
            .delegated_role_mut(name)
            .context(error::InvalidRole {
                role: name.to_string(),
                reason: "role is not delegated by its parent",
            })?;
        ensure!(
            role.path_hash_prefixes.is_none() || add_paths.is_empty(),
            error::InvalidRole {
                role: name.to_string(),
                reason: "paths conflict with the role's path_hash_prefixes",
            }
        );

        if clear_all {
            role.paths.clear();
        }
        role.paths.retain(|path| !remove_paths.contains(path));
        for path in add_paths {
            if !role.paths.contains(path) {
                role.paths.push(path.clone());
            }
        }
        self.mark_dirty(parent);
        Ok(())
    }

    /// Removes the delegation `name` from its parent: the parent's role list keeps its
    /// remaining order, key objects no surviving sibling references are dropped, and
    /// the child document (and its snapshot entry, and any descendants) disappear.
    ///
    /// Deleting a sibling the parent never declared is a no-op, as is deleting when
    /// the parent document does not exist. Deleting under a parent role that is not
    /// itself delegated is `InvalidRole`.
    pub fn delete_delegation(&mut self, name: &RoleName) -> Result<()> {
        let parent = self.delegation_parent(name)?;
        if parent.is_delegation() {
            match self.get_delegation_role(&parent) {
                Ok(_) => {}
                Err(error::Error::NoSuchRole { .. }) => {
                    return error::InvalidRole {
                        role: name.to_string(),
                        reason: "parent role is not delegated",
                    }
                    .fail();
                }
                // An unbroken role chain whose documents are simply absent means there
                // is nothing to delete from.
                Err(_) => return Ok(()),
            }
        }

        let parent_doc = match self.targets.get_mut(&parent) {
            Some(doc) => doc,
            None => return Ok(()),
        };
        let delegations = match parent_doc.signed.delegations.as_mut() {
            Some(delegations) => delegations,
            None => return Ok(()),
        };
        let before = delegations.roles.len();
        delegations.roles.retain(|role| &role.name != name);
        if delegations.roles.len() == before {
            // Nothing was delegated under this name; the parent is untouched.
            return Ok(());
        }
        delegations.prune_keys();

        let removed: Vec<RoleName> = self
            .targets
            .keys()
            .filter(|role| *role == name || name.is_ancestor_of(role))
            .cloned()
            .collect();
        for role in &removed {
            self.targets.remove(role);
            self.dirty.remove(role);
            if let Some(snapshot) = self.snapshot.as_mut() {
                if snapshot.signed.meta.remove(role).is_some() {
                    self.dirty.insert(RoleName::from(RoleType::Snapshot));
                }
            }
        }
        debug!("deleted delegation {} ({} documents)", name, removed.len());
        self.mark_dirty(parent);
        Ok(())
    }

    /// Resolves a delegated role by walking the parent chain from the canonical
    /// targets document, copying key objects into the result and restricting paths at
    /// each hop so the caller sees the effective path set.
    pub fn get_delegation_role(&self, name: &RoleName) -> Result<DelegationRole> {
        ensure!(
            name.is_delegation(),
            error::InvalidRole {
                role: name.to_string(),
                reason: "not a delegated targets role",
            }
        );
        let mut chain = vec![name.clone()];
        let mut cursor = name.clone();
        while let Some(parent) = cursor.parent() {
            if !parent.is_delegation() {
                break;
            }
            chain.push(parent.clone());
            cursor = parent;
        }
        chain.reverse();

        let mut doc_name = RoleName::from(RoleType::Targets);
        let mut effective_paths: Option<Vec<String>> = None;
        for hop in chain {
            let doc = self.targets.get(&doc_name).context(error::NotLoaded {
                role: doc_name.to_string(),
            })?;
            let delegations =
                doc.signed
                    .delegations
                    .as_ref()
                    .with_context(|| error::NoSuchRole {
                        role: hop.to_string(),
                    })?;
            let entry = delegations.role(&hop).with_context(|| error::NoSuchRole {
                role: hop.to_string(),
            })?;
            let paths = match &effective_paths {
                None => entry.paths.clone(),
                Some(parent_paths) => paths_restrict(parent_paths, &entry.paths),
            };
            if hop == *name {
                let mut keys = HashMap::new();
                for keyid in &entry.keyids {
                    if let Some(key) = delegations.keys.get(keyid) {
                        keys.insert(keyid.clone(), key.clone());
                    }
                }
                return Ok(DelegationRole {
                    name: hop,
                    keys,
                    keyids: entry.keyids.clone(),
                    threshold: entry.threshold,
                    paths,
                });
            }
            effective_paths = Some(paths);
            doc_name = hop;
        }
        // The chain always contains `name`, so the loop returns before falling out.
        error::NoSuchRole {
            role: name.to_string(),
        }
        .fail()
    }

    // =^..^=   =^..^=   =^..^=   target management   =^..^=   =^..^=   =^..^=

    /// Adds target entries to the named targets role, lazily creating the document on
    /// first mutation. The role must exist and be signable, and for delegations every
    /// path must fall under the role's effective path prefixes.
    pub fn add_targets(
        &mut self,
        name: &RoleName,
        files: HashMap<String, crate::schema::Target>,
    ) -> Result<()> {
        self.check_targets_role(name, files.keys())?;
        self.init_targets(name)?;
        if files.is_empty() {
            return Ok(());
        }
        let doc = self.targets.get_mut(name).context(error::NotLoaded {
            role: name.to_string(),
        })?;
        for (path, target) in files {
            doc.signed.targets.insert(path, target);
        }
        self.mark_dirty(name.clone());
        Ok(())
    }

    /// Removes target entries from the named targets role. Paths that are not present
    /// are ignored; the document is only dirtied when something was actually removed.
    pub fn remove_targets(&mut self, name: &RoleName, paths: &[String]) -> Result<()> {
        self.check_targets_role(name, std::iter::empty::<&String>())?;
        let doc = match self.targets.get_mut(name) {
            Some(doc) => doc,
            None => return Ok(()),
        };
        let mut changed = false;
        for path in paths {
            if doc.signed.targets.remove(path).is_some() {
                changed = true;
            }
        }
        if changed {
            self.mark_dirty(name.clone());
        }
        Ok(())
    }

    // =^..^=   =^..^=   =^..^=   signing   =^..^=   =^..^=   =^..^=   =^..^=

    /// Signs the root document. A dirty root gets its version bumped first. Root is
    /// signed by the union of its current role keys and the role as loaded, so
    /// rotations stay verifiable against the previous key set.
    pub fn sign_root(&mut self, expires: DateTime<Utc>) -> Result<SignedRole<Root>> {
        let root_name = RoleName::from(RoleType::Root);
        let original = self.original_root_role.clone();
        let signed_root = self.root.as_mut().context(error::NotLoaded {
            role: root_name.to_string(),
        })?;
        let role_keys = signed_root
            .signed
            .role_keys(RoleType::Root)
            .context(error::VerifyMetadata {
                role: root_name.to_string(),
            })?;

        let mut keyids = role_keys.keyids.clone();
        let mut keys = signed_root.signed.keys.clone();
        if let Some((original_role, original_keys)) = original {
            for keyid in original_role.keyids {
                if !keyids.contains(&keyid) {
                    keyids.push(keyid);
                }
            }
            for (keyid, key) in original_keys {
                keys.entry(keyid).or_insert(key);
            }
        }

        if self.dirty.contains(&root_name) {
            signed_root.signed.version += 1;
        }
        signed_root.signed.expires = expires;
        let canonical = signed_root
            .signed
            .canonical_form()
            .context(error::CanonicalJson {
                role: root_name.to_string(),
            })?;
        signed_root.signatures = merge_signatures(
            &self.crypto,
            &root_name,
            &keyids,
            &keys,
            &signed_root.signatures,
            &canonical,
        )?;
        self.dirty.remove(&root_name);
        SignedRole::from_signed(signed_root.clone())
    }

    /// Signs a targets-family document. A dirty document gets its version bumped
    /// first. Signatures from keys the role no longer authorizes are dropped; other
    /// still-valid signatures are retained.
    pub fn sign_targets(
        &mut self,
        name: &RoleName,
        expires: DateTime<Utc>,
    ) -> Result<SignedRole<Targets>> {
        let (keyids, keys) = self.signing_role(name)?;
        let doc = self.targets.get_mut(name).context(error::NotLoaded {
            role: name.to_string(),
        })?;
        if self.dirty.contains(name) {
            doc.signed.version += 1;
        }
        doc.signed.expires = expires;
        let canonical = doc.signed.canonical_form().context(error::CanonicalJson {
            role: name.to_string(),
        })?;
        doc.signatures = merge_signatures(
            &self.crypto,
            name,
            &keyids,
            &keys,
            &doc.signatures,
            &canonical,
        )?;
        self.dirty.remove(name);
        SignedRole::from_signed(doc.clone())
    }

    /// Signs the snapshot document, first refreshing its entry for every loaded
    /// targets document from that document's current canonical envelope. The version
    /// bumps only when the snapshot changed.
    pub fn sign_snapshot(&mut self, expires: DateTime<Utc>) -> Result<SignedRole<Snapshot>> {
        let snapshot_name = RoleName::from(RoleType::Snapshot);
        for name in self.targets.keys() {
            if self.dirty.contains(name) {
                warn!(
                    "snapshotting {} with unsigned changes; sign it first",
                    name
                );
            }
        }
        let (keyids, keys) = self.canonical_role_keys(RoleType::Snapshot)?;
        let mut changed = false;
        {
            let targets = &self.targets;
            let snapshot = self.snapshot.as_mut().context(error::NotLoaded {
                role: snapshot_name.to_string(),
            })?;
            for (name, doc) in targets {
                let bytes = doc.canonical_bytes().context(error::CanonicalJson {
                    role: name.to_string(),
                })?;
                let meta = SnapshotMeta::describe(&bytes, doc.signed.version);
                if snapshot.signed.update_meta(name.clone(), meta) {
                    changed = true;
                }
            }
            let loaded: HashSet<&RoleName> = targets.keys().collect();
            let before = snapshot.signed.meta.len();
            snapshot.signed.meta.retain(|role, _| loaded.contains(role));
            if snapshot.signed.meta.len() != before {
                changed = true;
            }
        }
        if changed {
            self.mark_dirty(snapshot_name.clone());
        }

        let snapshot = self.snapshot.as_mut().context(error::NotLoaded {
            role: snapshot_name.to_string(),
        })?;
        if self.dirty.contains(&snapshot_name) {
            snapshot.signed.version += 1;
        }
        snapshot.signed.expires = expires;
        let canonical = snapshot
            .signed
            .canonical_form()
            .context(error::CanonicalJson {
                role: snapshot_name.to_string(),
            })?;
        snapshot.signatures = merge_signatures(
            &self.crypto,
            &snapshot_name,
            &keyids,
            &keys,
            &snapshot.signatures,
            &canonical,
        )?;
        self.dirty.remove(&snapshot_name);
        SignedRole::from_signed(snapshot.clone())
    }

    /// Signs the timestamp document, first refreshing its reference to the current
    /// snapshot envelope. The version bumps only when the reference (or a prior
    /// mutation) changed it.
    pub fn sign_timestamp(&mut self, expires: DateTime<Utc>) -> Result<SignedRole<Timestamp>> {
        let timestamp_name = RoleName::from(RoleType::Timestamp);
        let snapshot_name = RoleName::from(RoleType::Snapshot);
        let (keyids, keys) = self.canonical_role_keys(RoleType::Timestamp)?;
        let snapshot = self.snapshot.as_ref().context(error::NotLoaded {
            role: snapshot_name.to_string(),
        })?;
        let bytes = snapshot.canonical_bytes().context(error::CanonicalJson {
            role: snapshot_name.to_string(),
        })?;
        let meta = SnapshotMeta::describe(&bytes, snapshot.signed.version);

        let timestamp = self.timestamp.as_mut().context(error::NotLoaded {
            role: timestamp_name.to_string(),
        })?;
        if timestamp.signed.update_meta(meta) {
            self.dirty.insert(timestamp_name.clone());
        }
        if self.dirty.contains(&timestamp_name) {
            timestamp.signed.version += 1;
        }
        timestamp.signed.expires = expires;
        let canonical = timestamp
            .signed
            .canonical_form()
            .context(error::CanonicalJson {
                role: timestamp_name.to_string(),
            })?;
        timestamp.signatures = merge_signatures(
            &self.crypto,
            &timestamp_name,
            &keyids,
            &keys,
            &timestamp.signatures,
            &canonical,
        )?;
        self.dirty.remove(&timestamp_name);
        SignedRole::from_signed(timestamp.clone())
    }

    // =^..^=   =^..^=   =^..^=   helpers   =^..^=   =^..^=   =^..^=   =^..^=

    fn mark_dirty(&mut self, name: RoleName) {
        self.dirty.insert(name);
    }

    /// Marks the document belonging to a canonical role dirty, if it exists.
    fn mark_role_dirty(&mut self, role: RoleType) {
        let name = RoleName::from(role);
        let exists = match role {
            RoleType::Root => self.root.is_some(),
            RoleType::Targets => self.targets.contains_key(&name),
            RoleType::Snapshot => self.snapshot.is_some(),
            RoleType::Timestamp => self.timestamp.is_some(),
        };
        if exists {
            self.dirty.insert(name);
        }
    }

    /// The parent of a delegation, or `InvalidRole` for non-delegations.
    fn delegation_parent(&self, name: &RoleName) -> Result<RoleName> {
        ensure!(
            name.is_delegation(),
            error::InvalidRole {
                role: name.to_string(),
                reason: "not a delegated targets role",
            }
        );
        name.parent().context(error::InvalidRole {
            role: name.to_string(),
            reason: "role has no parent",
        })
    }

    /// The key IDs authorized to sign the named targets-family role.
    fn role_keyids(&self, name: &RoleName) -> Result<Vec<Decoded<Hex>>> {
        if name.is_delegation() {
            Ok(self.get_delegation_role(name)?.keyids)
        } else {
            let root = self.root.as_ref().context(error::NotLoaded {
                role: RoleType::Root.to_string(),
            })?;
            Ok(root
                .signed
                .role_keys(RoleType::Targets)
                .context(error::VerifyMetadata {
                    role: name.to_string(),
                })?
                .keyids
                .clone())
        }
    }

    /// Fails with `NoKeys` unless the crypto service can sign for the named role.
    fn ensure_signable(&self, name: &RoleName) -> Result<()> {
        let keyids = self.role_keyids(name)?;
        ensure!(
            self.crypto.holds_any(&keyids),
            error::NoKeys {
                role: name.to_string(),
            }
        );
        Ok(())
    }

    /// Validates that the named targets role exists, is signable, and (for
    /// delegations) covers every given path.
    fn check_targets_role<'a, I>(&self, name: &RoleName, paths: I) -> Result<()>
    where
        I: Iterator<Item = &'a String>,
    {
        ensure!(
            name.is_targets_role(),
            error::InvalidRole {
                role: name.to_string(),
                reason: "not a targets-family role",
            }
        );
        if name.is_delegation() {
            let role = self.get_delegation_role(name)?;
            ensure!(
                self.crypto.holds_any(&role.keyids),
                error::NoKeys {
                    role: name.to_string(),
                }
            );
            for path in paths {
                ensure!(
                    role.covers(path),
                    error::InvalidRole {
                        role: name.to_string(),
                        reason: format!("path '{}' is outside the role's paths", path),
                    }
                );
            }
        } else {
            self.ensure_signable(name)?;
        }
        Ok(())
    }

    /// The signing key IDs and key objects for a targets-family role.
    fn signing_role(
        &self,
        name: &RoleName,
    ) -> Result<(Vec<Decoded<Hex>>, HashMap<Decoded<Hex>, Key>)> {
        if name.is_delegation() {
            let role = self.get_delegation_role(name)?;
            Ok((role.keyids, role.keys))
        } else {
            self.canonical_role_keys(RoleType::Targets)
        }
    }

    /// The signing key IDs and key objects for a canonical role, out of root.
    fn canonical_role_keys(
        &self,
        role: RoleType,
    ) -> Result<(Vec<Decoded<Hex>>, HashMap<Decoded<Hex>, Key>)> {
        let root = self.root.as_ref().context(error::NotLoaded {
            role: RoleType::Root.to_string(),
        })?;
        let role_keys = root
            .signed
            .role_keys(role)
            .context(error::VerifyMetadata {
                role: role.to_string(),
            })?;
        Ok((role_keys.keyids.clone(), root.signed.keys.clone()))
    }
}

/// Produces the signature set for a document: fresh signatures from every authorized
/// key the crypto service holds, plus retained prior signatures that are still valid
/// over `canonical` and still authorized. Signatures from keys no longer authorized
/// are dropped. An empty result is `NoKeys`.
fn merge_signatures(
    crypto: &CryptoService,
    name: &RoleName,
    keyids: &[Decoded<Hex>],
    keys: &HashMap<Decoded<Hex>, Key>,
    existing: &[Signature],
    canonical: &[u8],
) -> Result<Vec<Signature>> {
    let mut signatures = crypto.sign(keyids, canonical)?;
    for signature in existing {
        if !keyids.contains(&signature.keyid) {
            continue;
        }
        if signatures.iter().any(|fresh| fresh.keyid == signature.keyid) {
            continue;
        }
        let valid = keys
            .get(&signature.keyid)
            .map(|key| key.verify(canonical, &signature.sig))
            .unwrap_or(false);
        if valid {
            signatures.push(signature.clone());
        }
    }
    ensure!(
        !signatures.is_empty(),
        error::NoKeys {
            role: name.to_string(),
        }
    );
    Ok(signatures)
}
