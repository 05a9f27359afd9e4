// Copyright The Notary Project Authors. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

mod test_utils;

use notary::error::Error;
use notary::repo::{default_expires, Repository};
use notary::schema::role::RoleName;
use notary::schema::{RoleType, Signed, Snapshot, Target, Timestamp};
use notary::storage::{MemStorage, MetaStore};
use notary::{validate_update, CryptoService, KeyAlgorithm};
use std::collections::HashMap;
use test_utils::{base_role, new_repository, sign_all, threshold, to_update};

const GUN: &str = "docker.com/notary";

fn role(name: &str) -> RoleName {
    RoleName::new(name).unwrap()
}

/// A freshly published repository plus a store pre-provisioned with the server-held
/// snapshot and timestamp public keys.
fn published() -> (Repository, MemStorage) {
    let (mut repo, keys) = new_repository();
    let store = MemStorage::new();
    store
        .set_key(GUN, RoleType::Timestamp, keys[&RoleType::Timestamp].clone())
        .unwrap();
    store
        .set_key(GUN, RoleType::Snapshot, keys[&RoleType::Snapshot].clone())
        .unwrap();

    let (root, targets, snapshot, _) = sign_all(&mut repo);
    let updates = vec![
        to_update("root", &root),
        to_update("targets", &targets),
        to_update("snapshot", &snapshot),
    ];
    let accepted = validate_update(repo.crypto(), &store, GUN, updates).unwrap();
    store.update_many(GUN, accepted).unwrap();
    (repo, store)
}

// Scenario: initial publish. Four updates come back at version 1 and persist; an
// identical resubmission is rejected by storage with OldVersion.
#[test]
fn initial_publish_and_resubmit() {
    let (mut repo, keys) = new_repository();
    let store = MemStorage::new();
    store
        .set_key(GUN, RoleType::Timestamp, keys[&RoleType::Timestamp].clone())
        .unwrap();
    store
        .set_key(GUN, RoleType::Snapshot, keys[&RoleType::Snapshot].clone())
        .unwrap();

    let (root, targets, snapshot, _) = sign_all(&mut repo);
    let updates = vec![
        to_update("root", &root),
        to_update("targets", &targets),
        to_update("snapshot", &snapshot),
    ];

    let accepted = validate_update(repo.crypto(), &store, GUN, updates.clone()).unwrap();
    let roles: Vec<String> = accepted.iter().map(|u| u.role.to_string()).collect();
    assert_eq!(roles, vec!["root", "targets", "snapshot", "timestamp"]);
    assert!(accepted.iter().all(|u| u.version == 1));
    store.update_many(GUN, accepted).unwrap();

    // Same set again: validation still passes (the trust chain is intact) but the
    // version gate rejects the batch wholesale.
    let accepted = validate_update(repo.crypto(), &store, GUN, updates).unwrap();
    let err = store.update_many(GUN, accepted).unwrap_err();
    assert!(matches!(err, Error::OldVersion { .. }));
    // The rejected batch left the stored timestamp where it was.
    let stored = store.get_current(GUN, &role("timestamp")).unwrap().unwrap();
    let timestamp: Signed<Timestamp> = serde_json::from_slice(&stored).unwrap();
    assert_eq!(timestamp.signed.version, 1);
}

// Bootstrapping a collection requires the pinned timestamp key to match.
#[test]
fn bootstrap_requires_pinned_timestamp_key() {
    let (mut repo, _) = new_repository();
    let store = MemStorage::new();
    let (root, targets, snapshot, _) = sign_all(&mut repo);
    let updates = vec![
        to_update("root", &root),
        to_update("targets", &targets),
        to_update("snapshot", &snapshot),
    ];

    // No key pinned at all.
    let err = validate_update(repo.crypto(), &store, GUN, updates.clone()).unwrap_err();
    assert!(matches!(err, Error::BadRoot { .. }));

    // A different key pinned.
    let stranger = CryptoService::default()
        .create(&role("timestamp"), KeyAlgorithm::Ed25519)
        .unwrap();
    store.set_key(GUN, RoleType::Timestamp, stranger).unwrap();
    let err = validate_update(repo.crypto(), &store, GUN, updates).unwrap_err();
    assert!(matches!(err, Error::BadRoot { .. }));
}

// Scenario: root rotation. A root co-signed by the old and new keys is accepted; a
// root signed only by the new key while storage still trusts the old one is BadRoot.
#[test]
fn root_rotation() {
    let (mut repo, store) = published();

    let old_id = repo.root().unwrap().signed.roles[&RoleType::Root].keyids[0].clone();
    let new_key = repo
        .crypto()
        .create(&role("root"), KeyAlgorithm::Ed25519)
        .unwrap();
    repo.remove_base_keys(RoleType::Root, &[old_id.clone()])
        .unwrap();
    repo.add_base_keys(RoleType::Root, &[new_key.clone()])
        .unwrap();

    let rotated = repo.sign_root(default_expires(RoleType::Root)).unwrap();
    assert_eq!(rotated.version(), 2);
    // Continuity: the envelope carries signatures from both generations.
    assert_eq!(rotated.signed.signatures.len(), 2);

    let accepted = validate_update(
        repo.crypto(),
        &store,
        GUN,
        vec![to_update("root", &rotated)],
    )
    .unwrap();
    store.update_many(GUN, accepted).unwrap();

    // Now the adversarial case: a root signed only by a new key offered while the
    // stored root still trusts only the old one. The orphan repository shares no
    // crypto with the published one.
    let (_, fresh_store) = published();
    let orphan_crypto = CryptoService::default();
    let (orphan_root_role, _) = base_role(&orphan_crypto, RoleType::Root);
    let (orphan_targets, _) = base_role(&orphan_crypto, RoleType::Targets);
    let (orphan_snapshot, _) = base_role(&orphan_crypto, RoleType::Snapshot);
    let (orphan_timestamp, _) = base_role(&orphan_crypto, RoleType::Timestamp);
    let mut orphan = Repository::new(orphan_crypto);
    orphan
        .init_root(
            orphan_root_role,
            orphan_targets,
            orphan_snapshot,
            orphan_timestamp,
            false,
        )
        .unwrap();
    let orphan_root = orphan.sign_root(default_expires(RoleType::Root)).unwrap();

    let err = validate_update(
        orphan.crypto(),
        &fresh_store,
        GUN,
        vec![to_update("root", &orphan_root)],
    )
    .unwrap_err();
    assert!(matches!(err, Error::BadRoot { .. }));
}

// Scenario: snapshot hash tamper. A validly signed snapshot whose targets entry lies
// about the digest is BadSnapshot and nothing persists.
#[test]
fn snapshot_hash_tamper() {
    let (mut repo, keys) = new_repository();
    let store = MemStorage::new();
    store
        .set_key(GUN, RoleType::Timestamp, keys[&RoleType::Timestamp].clone())
        .unwrap();
    store
        .set_key(GUN, RoleType::Snapshot, keys[&RoleType::Snapshot].clone())
        .unwrap();

    let (root, targets, snapshot, _) = sign_all(&mut repo);

    // Flip one byte of the targets digest inside the snapshot, then re-sign it so
    // only the entry check can catch the lie.
    let mut tampered: Signed<Snapshot> = serde_json::from_slice(&snapshot.buffer).unwrap();
    {
        let meta = tampered.signed.meta.get_mut(&role("targets")).unwrap();
        let mut digest = meta.hashes.sha256.to_vec();
        digest[0] ^= 0xff;
        meta.hashes.sha256 = digest.into();
    }
    let snapshot_keyid = keys[&RoleType::Snapshot].key_id().unwrap();
    let canonical = notary::cjson::to_canonical(&tampered.signed).unwrap();
    tampered.signatures = repo
        .crypto()
        .sign(&[snapshot_keyid], &canonical)
        .unwrap();
    let tampered_bytes = notary::cjson::to_canonical(&tampered).unwrap();

    let updates = vec![
        to_update("root", &root),
        to_update("targets", &targets),
        notary::storage::MetaUpdate {
            role: role("snapshot"),
            version: tampered.signed.version,
            data: tampered_bytes,
        },
    ];
    let err = validate_update(repo.crypto(), &store, GUN, updates).unwrap_err();
    assert!(matches!(err, Error::BadSnapshot { .. }));
    assert!(store.get_current(GUN, &role("root")).unwrap().is_none());
}

// Scenario: server-side snapshot synthesis. Submitting only root and targets makes
// the validator mint snapshot v2 and timestamp v2 referencing it.
#[test]
fn snapshot_synthesis() {
    let (mut repo, store) = published();

    // Rotate the targets key so both root and targets move to version 2.
    let old_id = repo.root().unwrap().signed.roles[&RoleType::Targets].keyids[0].clone();
    let new_key = repo
        .crypto()
        .create(&role("targets"), KeyAlgorithm::Ed25519)
        .unwrap();
    repo.remove_base_keys(RoleType::Targets, &[old_id]).unwrap();
    repo.add_base_keys(RoleType::Targets, &[new_key]).unwrap();
    let mut files = HashMap::new();
    files.insert("app/v2".to_owned(), Target::from_bytes(b"version two"));
    repo.add_targets(&role("targets"), files).unwrap();

    let root = repo.sign_root(default_expires(RoleType::Root)).unwrap();
    let targets = repo
        .sign_targets(&role("targets"), default_expires(RoleType::Targets))
        .unwrap();
    assert_eq!(root.version(), 2);
    assert_eq!(targets.version(), 2);

    let accepted = validate_update(
        repo.crypto(),
        &store,
        GUN,
        vec![to_update("root", &root), to_update("targets", &targets)],
    )
    .unwrap();
    let roles: Vec<String> = accepted.iter().map(|u| u.role.to_string()).collect();
    assert_eq!(roles, vec!["root", "targets", "snapshot", "timestamp"]);

    let snapshot_update = &accepted[2];
    assert_eq!(snapshot_update.version, 2);
    let synthesized: Signed<Snapshot> = serde_json::from_slice(&snapshot_update.data).unwrap();
    let entry = &synthesized.signed.meta[&role("targets")];
    assert_eq!(entry.version, 2);
    assert!(entry.matches(&targets.buffer));

    let timestamp_update = &accepted[3];
    assert_eq!(timestamp_update.version, 2);
    let timestamp: Signed<Timestamp> = serde_json::from_slice(&timestamp_update.data).unwrap();
    let reference = timestamp.signed.snapshot_meta().unwrap();
    assert_eq!(reference.version, 2);
    assert!(reference.matches(&snapshot_update.data));

    store.update_many(GUN, accepted).unwrap();
}

// A delegation update is verified against the parent supplied in the same batch,
// regardless of submission order.
#[test]
fn delegation_verified_against_parent_in_batch() {
    let (mut repo, store) = published();

    let level1 = role("targets/level1");
    let k1 = repo
        .crypto()
        .create(&level1, KeyAlgorithm::Ed25519)
        .unwrap();
    repo.update_delegation_keys(&level1, &[k1], &[], threshold(1))
        .unwrap();
    repo.update_delegation_paths(&level1, &[String::new()], &[], false)
        .unwrap();
    let mut files = HashMap::new();
    files.insert("level1/data".to_owned(), Target::from_bytes(b"delegated"));
    repo.add_targets(&level1, files).unwrap();

    let targets = repo
        .sign_targets(&role("targets"), default_expires(RoleType::Targets))
        .unwrap();
    let level1_signed = repo
        .sign_targets(&level1, default_expires(RoleType::Targets))
        .unwrap();
    let snapshot = repo
        .sign_snapshot(default_expires(RoleType::Snapshot))
        .unwrap();

    // Deliberately submit the delegation before its parent; the validator orders by
    // delegation depth.
    let accepted = validate_update(
        repo.crypto(),
        &store,
        GUN,
        vec![
            to_update("targets/level1", &level1_signed),
            to_update("targets", &targets),
            to_update("snapshot", &snapshot),
        ],
    )
    .unwrap();
    let roles: Vec<String> = accepted.iter().map(|u| u.role.to_string()).collect();
    assert_eq!(
        roles,
        vec!["targets", "targets/level1", "snapshot", "timestamp"]
    );
    store.update_many(GUN, accepted).unwrap();
}

// A delegation whose parent exists nowhere surfaces as plain NotFound from the
// storage taxonomy, not as a Bad* category.
#[test]
fn delegation_with_unknown_parent() {
    let (repo, store) = published();

    // Sign a document for a role whose parent was never delegated or stored.
    let mut orphan_repo = Repository::new(CryptoService::default());
    let orphan = role("targets/ghost/child");
    orphan_repo.init_targets(&orphan).unwrap();
    // Manually craft update bytes from an unsigned envelope; validation fails before
    // signature checking because the parent cannot be located.
    let doc = orphan_repo.targets(&orphan).unwrap().clone();
    let data = doc.canonical_bytes().unwrap();
    let err = validate_update(
        repo.crypto(),
        &store,
        GUN,
        vec![notary::storage::MetaUpdate {
            role: orphan,
            version: 1,
            data,
        }],
    )
    .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}
