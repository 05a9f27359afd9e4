// Copyright The Notary Project Authors. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

mod test_utils;

use notary::error::Error;
use notary::repo::default_expires;
use notary::schema::RoleType;
use notary::{KeyAlgorithm, TrustPinning};
use test_utils::{new_repository, sign_all};

const GUN: &str = "docker.com/notary";

// First contact pins the root keys; the same root keeps validating afterwards.
#[test]
fn trust_on_first_use() {
    let (mut repo, _) = new_repository();
    let (root, _, _, _) = sign_all(&mut repo);

    let mut pins = TrustPinning::new();
    assert!(!pins.is_pinned(GUN));
    let trusted = pins.validate_root(GUN, None, &root.buffer).unwrap();
    assert!(pins.is_pinned(GUN));
    assert_eq!(trusted.signed.version, 1);

    // Continuity with the same root.
    pins.validate_root(GUN, Some(&trusted), &root.buffer).unwrap();
}

// A rotated root validates through the previously trusted root and moves the pin.
#[test]
fn rotation_moves_the_pin() {
    let (mut repo, _) = new_repository();
    let (root_v1, _, _, _) = sign_all(&mut repo);

    let mut pins = TrustPinning::new();
    let trusted_v1 = pins.validate_root(GUN, None, &root_v1.buffer).unwrap();
    let pinned_before = pins.pins(GUN).unwrap().to_vec();

    let old_id = trusted_v1.signed.roles[&RoleType::Root].keyids[0].clone();
    let new_key = repo
        .crypto()
        .create(
            &notary::schema::role::RoleName::from(RoleType::Root),
            KeyAlgorithm::Ed25519,
        )
        .unwrap();
    repo.remove_base_keys(RoleType::Root, &[old_id]).unwrap();
    repo.add_base_keys(RoleType::Root, &[new_key.clone()]).unwrap();
    let root_v2 = repo.sign_root(default_expires(RoleType::Root)).unwrap();

    let trusted_v2 = pins
        .validate_root(GUN, Some(&trusted_v1), &root_v2.buffer)
        .unwrap();
    assert_eq!(trusted_v2.signed.version, 2);

    let pinned_after = pins.pins(GUN).unwrap().to_vec();
    assert_ne!(pinned_before, pinned_after);
    assert_eq!(pinned_after, vec![new_key.key_id().unwrap()]);
}

// A root unrelated to the pinned one fails with the canonical reason.
#[test]
fn unrelated_root_is_rejected() {
    let (mut repo, _) = new_repository();
    let (root, _, _, _) = sign_all(&mut repo);

    let mut pins = TrustPinning::new();
    let trusted = pins.validate_root(GUN, None, &root.buffer).unwrap();

    let (mut stranger, _) = new_repository();
    let (stranger_root, _, _, _) = sign_all(&mut stranger);

    let err = pins
        .validate_root(GUN, Some(&trusted), &stranger_root.buffer)
        .unwrap_err();
    match err {
        Error::ValidationFail { reason, .. } => {
            assert_eq!(
                reason,
                "failed to validate data with current trusted certificates"
            );
        }
        other => panic!("expected ValidationFail, got {:?}", other),
    }
    // The pin did not move.
    assert_eq!(
        pins.pins(GUN).unwrap(),
        trusted.signed.roles[&RoleType::Root].keyids.as_slice()
    );
}
