// Copyright The Notary Project Authors. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

mod test_utils;

use notary::error::Error;
use notary::repo::default_expires;
use notary::schema::role::RoleName;
use notary::schema::verify;
use notary::schema::{RoleType, Target};
use notary::KeyAlgorithm;
use std::collections::HashMap;
use test_utils::{new_repository, sign_all, threshold};

fn role(name: &str) -> RoleName {
    RoleName::new(name).unwrap()
}

// An initial publish signs every canonical role at version 1, and each envelope
// verifies against the role root declares for it.
#[test]
fn initial_publish() {
    let (mut repo, _) = new_repository();
    let (root, targets, snapshot, timestamp) = sign_all(&mut repo);

    assert_eq!(root.version(), 1);
    assert_eq!(targets.version(), 1);
    assert_eq!(snapshot.version(), 1);
    assert_eq!(timestamp.version(), 1);

    let root_doc = &root.signed.signed;
    verify::verify_signed(
        &root.signed,
        &role("root"),
        root_doc.role_keys(RoleType::Root).unwrap(),
        &root_doc.keys,
        1,
    )
    .unwrap();
    verify::verify_signed(
        &targets.signed,
        &role("targets"),
        root_doc.role_keys(RoleType::Targets).unwrap(),
        &root_doc.keys,
        1,
    )
    .unwrap();
    verify::verify_signed(
        &snapshot.signed,
        &role("snapshot"),
        root_doc.role_keys(RoleType::Snapshot).unwrap(),
        &root_doc.keys,
        1,
    )
    .unwrap();
    verify::verify_signed(
        &timestamp.signed,
        &role("timestamp"),
        root_doc.role_keys(RoleType::Timestamp).unwrap(),
        &root_doc.keys,
        1,
    )
    .unwrap();

    // The snapshot fixes exactly the loaded targets documents.
    assert_eq!(snapshot.signed.signed.meta.len(), 1);
    let targets_meta = &snapshot.signed.signed.meta[&role("targets")];
    assert_eq!(targets_meta.version, 1);
    assert!(targets_meta.matches(&targets.buffer));

    // The timestamp fixes the snapshot.
    let snapshot_meta = timestamp.signed.signed.snapshot_meta().unwrap();
    assert_eq!(snapshot_meta.version, 1);
    assert!(snapshot_meta.matches(&snapshot.buffer));

    // Re-signing without changes keeps versions where they were.
    let root_again = repo.sign_root(default_expires(RoleType::Root)).unwrap();
    assert_eq!(root_again.version(), 1);
}

// Adding a delegation dirties only the parent; the delegation shows up in snapshot
// once (and only once) its own document exists.
#[test]
fn delegation_add() {
    let (mut repo, _) = new_repository();
    sign_all(&mut repo);

    let level1 = role("targets/level1");
    let k1 = repo
        .crypto()
        .create(&level1, KeyAlgorithm::Ed25519)
        .unwrap();
    repo.update_delegation_keys(&level1, &[k1], &[], threshold(1))
        .unwrap();
    repo.update_delegation_paths(&level1, &[String::new()], &[], false)
        .unwrap();

    let targets = repo
        .sign_targets(&role("targets"), default_expires(RoleType::Targets))
        .unwrap();
    assert_eq!(targets.version(), 2);
    let entry = targets
        .signed
        .signed
        .delegated_role(&level1)
        .unwrap()
        .clone();
    assert_eq!(entry.paths, vec![String::new()]);

    // No document was created for the delegation, so the snapshot still lists only
    // the canonical targets role.
    let snapshot = repo
        .sign_snapshot(default_expires(RoleType::Snapshot))
        .unwrap();
    assert_eq!(snapshot.version(), 2);
    assert_eq!(snapshot.signed.signed.meta.len(), 1);
    assert!(snapshot.signed.signed.meta.contains_key(&role("targets")));

    // First mutation lazily creates the document, and the next snapshot fixes it.
    let mut files = HashMap::new();
    files.insert("app/config".to_owned(), Target::from_bytes(b"content"));
    repo.add_targets(&level1, files).unwrap();
    let level1_signed = repo
        .sign_targets(&level1, default_expires(RoleType::Targets))
        .unwrap();
    assert_eq!(level1_signed.version(), 1);

    let snapshot = repo
        .sign_snapshot(default_expires(RoleType::Snapshot))
        .unwrap();
    assert_eq!(snapshot.version(), 3);
    assert!(snapshot.signed.signed.meta.contains_key(&level1));
}

// A path the parent does not cover is rejected and leaves no trace.
#[test]
fn invalid_path_is_rejected() {
    let (mut repo, _) = new_repository();
    sign_all(&mut repo);

    let parent = role("targets/a");
    let child = role("targets/a/b");
    let ka = repo
        .crypto()
        .create(&parent, KeyAlgorithm::Ed25519)
        .unwrap();
    repo.update_delegation_keys(&parent, &[ka], &[], threshold(1))
        .unwrap();
    repo.update_delegation_paths(&parent, &["p".to_owned()], &[], false)
        .unwrap();
    repo.init_targets(&parent).unwrap();

    let kb = repo.crypto().create(&child, KeyAlgorithm::Ed25519).unwrap();
    repo.update_delegation_keys(&child, &[kb], &[], threshold(1))
        .unwrap();

    // "q" is not under the parent's "p" prefix.
    let err = repo
        .update_delegation_paths(&child, &["q".to_owned()], &[], false)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRole { .. }));
    let entry = repo
        .targets(&parent)
        .unwrap()
        .signed
        .delegated_role(&child)
        .unwrap();
    assert!(entry.paths.is_empty());

    // A never-delegated sibling fails the same way without being created.
    let ghost = role("targets/a/c");
    let err = repo
        .update_delegation_paths(&ghost, &["q".to_owned()], &[], false)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRole { .. }));
    assert!(repo
        .targets(&parent)
        .unwrap()
        .signed
        .delegated_role(&ghost)
        .is_none());

    // A covered path is accepted.
    repo.update_delegation_paths(&child, &["p1".to_owned()], &[], false)
        .unwrap();
    let resolved = repo.get_delegation_role(&child).unwrap();
    assert_eq!(resolved.paths, vec!["p1".to_owned()]);
}

#[test]
fn delete_delegation_edge_cases() {
    let (mut repo, _) = new_repository();
    sign_all(&mut repo);

    let parent = role("targets/a");
    let ka = repo
        .crypto()
        .create(&parent, KeyAlgorithm::Ed25519)
        .unwrap();
    repo.update_delegation_keys(&parent, &[ka], &[], threshold(1))
        .unwrap();
    repo.init_targets(&parent).unwrap();
    repo.sign_targets(&parent, default_expires(RoleType::Targets))
        .unwrap();
    sign_all(&mut repo);

    // Deleting an absent sibling under an existing parent is a no-op that does not
    // dirty the parent.
    repo.delete_delegation(&role("targets/a/nothere")).unwrap();
    assert!(!repo.is_dirty(&parent));

    // Deleting under a parent role that was never delegated is InvalidRole.
    let err = repo
        .delete_delegation(&role("targets/zzz/child"))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRole { .. }));

    // A delegated parent whose document was never created makes deletion a no-op.
    let lazy = role("targets/lazy");
    let kl = repo.crypto().create(&lazy, KeyAlgorithm::Ed25519).unwrap();
    repo.update_delegation_keys(&lazy, &[kl], &[], threshold(1))
        .unwrap();
    repo.delete_delegation(&role("targets/lazy/child")).unwrap();

    // Deleting a real delegation removes its entry, its document, and its snapshot
    // entry.
    repo.delete_delegation(&parent).unwrap();
    assert!(repo.targets(&parent).is_none());
    assert!(repo
        .targets(&role("targets"))
        .unwrap()
        .signed
        .delegated_role(&parent)
        .is_none());
    let snapshot = repo
        .sign_snapshot(default_expires(RoleType::Snapshot))
        .unwrap();
    assert!(!snapshot.signed.signed.meta.contains_key(&parent));
}

// Rotating a role's keys drops signatures from ids that are no longer authorized.
#[test]
fn rotation_drops_unauthorized_signatures() {
    let (mut repo, keys) = new_repository();
    sign_all(&mut repo);

    let old_id = keys[&RoleType::Targets].key_id().unwrap();
    let new_key = repo
        .crypto()
        .create(&role("targets"), KeyAlgorithm::Ed25519)
        .unwrap();
    let new_id = new_key.key_id().unwrap();

    repo.remove_base_keys(RoleType::Targets, &[old_id.clone()])
        .unwrap();
    repo.add_base_keys(RoleType::Targets, &[new_key]).unwrap();

    let targets = repo
        .sign_targets(&role("targets"), default_expires(RoleType::Targets))
        .unwrap();
    assert_eq!(targets.version(), 2);
    assert_eq!(targets.signed.signatures.len(), 1);
    assert_eq!(targets.signed.signatures[0].keyid, new_id);
    assert_ne!(old_id, new_id);
}

// Resolution restricts each hop's paths to what every ancestor covers.
#[test]
fn delegation_resolution_restricts_paths() {
    let (mut repo, _) = new_repository();
    sign_all(&mut repo);

    let parent = role("targets/a");
    let child = role("targets/a/b");
    let ka = repo
        .crypto()
        .create(&parent, KeyAlgorithm::Ed25519)
        .unwrap();
    repo.update_delegation_keys(&parent, &[ka], &[], threshold(1))
        .unwrap();
    repo.update_delegation_paths(&parent, &["p/".to_owned(), "q/".to_owned()], &[], false)
        .unwrap();
    repo.init_targets(&parent).unwrap();

    let kb = repo.crypto().create(&child, KeyAlgorithm::Ed25519).unwrap();
    repo.update_delegation_keys(&child, &[kb], &[], threshold(1))
        .unwrap();
    repo.update_delegation_paths(&child, &["p/x".to_owned()], &[], false)
        .unwrap();

    let resolved = repo.get_delegation_role(&child).unwrap();
    assert_eq!(resolved.paths, vec!["p/x".to_owned()]);
    assert!(resolved.covers("p/x/inner"));
    assert!(!resolved.covers("q/y"));
    assert_eq!(resolved.keyids.len(), 1);
    // The resolved role carries copies of the keys, ready for verification.
    assert!(resolved.keys.contains_key(&resolved.keyids[0]));

    // Emptying the parent's paths propagates emptiness to the child.
    repo.update_delegation_paths(&parent, &[], &[], true).unwrap();
    let resolved = repo.get_delegation_role(&child).unwrap();
    assert!(resolved.paths.is_empty());
}

// Removing a target that is not present succeeds without dirtying the document.
#[test]
fn remove_absent_target_is_noop() {
    let (mut repo, _) = new_repository();
    sign_all(&mut repo);

    let targets = role("targets");
    repo.remove_targets(&targets, &["nope".to_owned()]).unwrap();
    assert!(!repo.is_dirty(&targets));

    let mut files = HashMap::new();
    files.insert("present".to_owned(), Target::from_bytes(b"data"));
    repo.add_targets(&targets, files).unwrap();
    assert!(repo.is_dirty(&targets));
    repo.remove_targets(&targets, &["present".to_owned()]).unwrap();
    assert!(repo
        .targets(&targets)
        .unwrap()
        .signed
        .targets
        .is_empty());
}
