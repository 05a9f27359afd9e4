// Copyright The Notary Project Authors. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

#![allow(dead_code)]

use notary::crypto::CryptoService;
use notary::repo::{default_expires, Repository};
use notary::schema::key::Key;
use notary::schema::role::{BaseRole, RoleName};
use notary::schema::RoleType;
use notary::storage::MetaUpdate;
use notary::{KeyAlgorithm, SignedRole};
use std::collections::HashMap;
use std::num::NonZeroU64;

pub fn threshold(n: u64) -> NonZeroU64 {
    NonZeroU64::new(n).unwrap()
}

/// Creates one Ed25519 key for the canonical role and wraps it in a `BaseRole` with a
/// threshold of 1.
pub fn base_role(crypto: &CryptoService, role: RoleType) -> (BaseRole, Key) {
    let key = crypto
        .create(&RoleName::from(role), KeyAlgorithm::Ed25519)
        .unwrap();
    (
        BaseRole {
            keys: vec![key.clone()],
            threshold: threshold(1),
        },
        key,
    )
}

/// A repository initialized with one Ed25519 key per canonical role and empty
/// targets/snapshot/timestamp documents, plus the public key per role.
pub fn new_repository() -> (Repository, HashMap<RoleType, Key>) {
    let crypto = CryptoService::default();
    let (root_role, root_key) = base_role(&crypto, RoleType::Root);
    let (targets_role, targets_key) = base_role(&crypto, RoleType::Targets);
    let (snapshot_role, snapshot_key) = base_role(&crypto, RoleType::Snapshot);
    let (timestamp_role, timestamp_key) = base_role(&crypto, RoleType::Timestamp);

    let mut repo = Repository::new(crypto);
    repo.init_root(root_role, targets_role, snapshot_role, timestamp_role, false)
        .unwrap();
    repo.init_targets(&RoleName::from(RoleType::Targets)).unwrap();
    repo.init_snapshot().unwrap();
    repo.init_timestamp().unwrap();

    let mut keys = HashMap::new();
    keys.insert(RoleType::Root, root_key);
    keys.insert(RoleType::Targets, targets_key);
    keys.insert(RoleType::Snapshot, snapshot_key);
    keys.insert(RoleType::Timestamp, timestamp_key);
    (repo, keys)
}

/// Signs all four canonical roles with default expiries, in dependency order, and
/// returns the envelopes.
pub fn sign_all(
    repo: &mut Repository,
) -> (
    SignedRole<notary::schema::Root>,
    SignedRole<notary::schema::Targets>,
    SignedRole<notary::schema::Snapshot>,
    SignedRole<notary::schema::Timestamp>,
) {
    let root = repo.sign_root(default_expires(RoleType::Root)).unwrap();
    let targets = repo
        .sign_targets(
            &RoleName::from(RoleType::Targets),
            default_expires(RoleType::Targets),
        )
        .unwrap();
    let snapshot = repo
        .sign_snapshot(default_expires(RoleType::Snapshot))
        .unwrap();
    let timestamp = repo
        .sign_timestamp(default_expires(RoleType::Timestamp))
        .unwrap();
    (root, targets, snapshot, timestamp)
}

/// Turns a signed role into the update a client would submit.
pub fn to_update<T>(role: &str, signed: &SignedRole<T>) -> MetaUpdate
where
    T: notary::schema::Role + serde::Serialize,
{
    MetaUpdate {
        role: RoleName::new(role).unwrap(),
        version: signed.version(),
        data: signed.buffer.clone(),
    }
}
