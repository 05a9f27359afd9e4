// Copyright The Notary Project Authors. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Server-side validation of an update batch proposed by an untrusted client.
//!
//! The validator rebuilds the chain of trust for a collection from a previously
//! trusted root (or, on first contact, from the timestamp key pinned for the
//! collection), verifies every proposed envelope, and fills in whatever the client did
//! not send: a snapshot when the server manages the snapshot key, and always a fresh
//! timestamp. It never writes storage; the caller persists the returned batch
//! atomically.

use crate::crypto::CryptoService;
use crate::error::{self, Result};
use crate::repo::{default_expires, SignedRole, SPEC_VERSION};
use crate::schema::role::RoleName;
use crate::schema::verify;
use crate::schema::{
    Role, RoleType, Root, Signed, Snapshot, SnapshotMeta, Targets, Timestamp,
};
use crate::storage::{MetaStore, MetaUpdate};
use log::debug;
use serde::de::DeserializeOwned;
use serde_json::Value;
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::HashMap;

/// Validates a batch of proposed role updates for `gun` and returns the updates to
/// persist, in the order root, targets (ancestors before descendants), snapshot,
/// timestamp. Each returned update carries the version of its verified envelope.
///
/// `crypto` must hold the private halves of whatever snapshot/timestamp keys storage
/// pins for the collection; those are used to synthesize metadata the client did not
/// supply.
pub fn validate_update(
    crypto: &CryptoService,
    store: &dyn MetaStore,
    gun: &str,
    updates: Vec<MetaUpdate>,
) -> Result<Vec<MetaUpdate>> {
    let root_name = RoleName::from(RoleType::Root);
    let snapshot_name = RoleName::from(RoleType::Snapshot);

    let mut root_update = None;
    let mut snapshot_update = None;
    let mut targets_updates = Vec::new();
    for update in updates {
        if update.role == root_name {
            root_update = Some(update);
        } else if update.role == snapshot_name {
            snapshot_update = Some(update);
        } else if update.role.is_targets_role() {
            targets_updates.push(update);
        } else {
            // The server owns the timestamp role; a client-submitted copy is ignored
            // and regenerated below.
            debug!("ignoring client-supplied {} update for '{}'", update.role, gun);
        }
    }
    // Ancestors verify before the roles they delegate to.
    targets_updates.sort_by(|a, b| {
        a.role
            .depth()
            .cmp(&b.role.depth())
            .then_with(|| a.role.cmp(&b.role))
    });

    let signed_root = validate_root(store, gun, root_update.as_ref()).map_err(bad_root)?;
    let root = &signed_root.signed;

    let loaded = validate_targets(store, gun, root, &targets_updates)?;

    let (snapshot_out, snapshot_reference) = validate_or_generate_snapshot(
        crypto,
        store,
        gun,
        root,
        &loaded,
        snapshot_update,
    )?;

    let timestamp_out = generate_timestamp(crypto, store, gun, &snapshot_reference)?;

    let mut out = Vec::new();
    if let Some(update) = root_update {
        out.push(MetaUpdate {
            role: root_name,
            version: root.version(),
            data: update.data,
        });
    }
    for (name, signed, data) in loaded {
        out.push(MetaUpdate {
            role: name,
            version: signed.signed.version,
            data,
        });
    }
    if let Some(update) = snapshot_out {
        out.push(update);
    }
    out.push(timestamp_out);
    Ok(out)
}

/// Wraps any failure of the root stage as `BadRoot`.
fn bad_root(source: error::Error) -> error::Error {
    match source {
        err @ error::Error::BadRoot { .. } => err,
        source => error::Error::BadRoot {
            source: Box::new(source),
            backtrace: snafu::GenerateBacktrace::generate(),
        },
    }
}

/// Parses envelope bytes for a role, checking the `_type` discriminator first so a
/// mislabeled document surfaces as `WrongType`.
fn load_role<T>(name: &RoleName, role_type: RoleType, data: &[u8]) -> Result<Signed<T>>
where
    T: DeserializeOwned,
{
    let value: Value = serde_json::from_slice(data).context(error::ParseMetadata {
        role: name.to_string(),
    })?;
    verify::check_type(&value, role_type).context(error::VerifyMetadata {
        role: name.to_string(),
    })?;
    serde_json::from_value(value).context(error::ParseMetadata {
        role: name.to_string(),
    })
}

/// Step 1 and 2: establish the trusted root for this batch.
///
/// The candidate is the update's root if one was sent, the stored root otherwise. A
/// candidate that replaces a stored root must verify against both itself and the
/// stored root's role (the rotation proof). With no stored root, trust-on-first-use
/// applies: the candidate must carry a valid root signature and must declare exactly
/// the timestamp key the server pinned for the collection.
fn validate_root(
    store: &dyn MetaStore,
    gun: &str,
    root_update: Option<&MetaUpdate>,
) -> Result<Signed<Root>> {
    let root_name = RoleName::from(RoleType::Root);
    let stored_bytes = store.get_current(gun, &root_name)?;

    let candidate: Signed<Root> = match (root_update, &stored_bytes) {
        (Some(update), _) => load_role(&root_name, RoleType::Root, &update.data)?,
        (None, Some(bytes)) => load_role(&root_name, RoleType::Root, bytes)?,
        (None, None) => {
            return error::NotFound {
                gun,
                role: root_name.to_string(),
            }
            .fail();
        }
    };

    candidate
        .signed
        .validate()
        .context(error::VerifyMetadata {
            role: root_name.to_string(),
        })?;
    let candidate_role = candidate
        .signed
        .role_keys(RoleType::Root)
        .context(error::VerifyMetadata {
            role: root_name.to_string(),
        })?;

    match &stored_bytes {
        Some(bytes) => {
            // Full verification against the candidate's own role.
            verify::verify_signed(
                &candidate,
                &root_name,
                candidate_role,
                &candidate.signed.keys,
                1,
            )
            .context(error::VerifyMetadata {
                role: root_name.to_string(),
            })?;
            // A new root also needs the rotation proof: enough signatures from the
            // key set the stored root trusts.
            if root_update.is_some() {
                let stored: Signed<Root> = load_role(&root_name, RoleType::Root, bytes)?;
                let stored_role =
                    stored
                        .signed
                        .role_keys(RoleType::Root)
                        .context(error::VerifyMetadata {
                            role: root_name.to_string(),
                        })?;
                verify::verify_signed(
                    &candidate,
                    &root_name,
                    stored_role,
                    &stored.signed.keys,
                    1,
                )
                .context(error::VerifyMetadata {
                    role: root_name.to_string(),
                })?;
            }
        }
        None => {
            // Trust on first use. The root role's threshold is not enforced here;
            // one valid root signature plus the pinned timestamp key is the trust
            // decision.
            verify::verify_signed_lenient(
                &candidate,
                &root_name,
                candidate_role,
                &candidate.signed.keys,
            )
            .context(error::VerifyMetadata {
                role: root_name.to_string(),
            })?;

            let timestamp_role = candidate
                .signed
                .role_keys(RoleType::Timestamp)
                .context(error::VerifyMetadata {
                    role: root_name.to_string(),
                })?;
            ensure!(
                timestamp_role.keyids.len() == 1,
                error::BootstrapKeyMismatch { gun }
            );
            let pinned = store.get_key(gun, RoleType::Timestamp)?;
            let declared = candidate
                .signed
                .keys
                .get(&timestamp_role.keyids[0])
                .context(error::BootstrapKeyMismatch { gun })?;
            ensure!(
                declared.key_id().context(error::KeyId)?
                    == pinned.key_id().context(error::KeyId)?,
                error::BootstrapKeyMismatch { gun }
            );
        }
    }

    Ok(candidate)
}

/// Step 3: verify every proposed targets-family document against the role its parent
/// declares for it. Parents come from the update set when present, from storage
/// otherwise; a parent that exists in neither place is `NotFound`.
fn validate_targets(
    store: &dyn MetaStore,
    gun: &str,
    root: &Root,
    targets_updates: &[MetaUpdate],
) -> Result<Vec<(RoleName, Signed<Targets>, Vec<u8>)>> {
    let mut loaded: Vec<(RoleName, Signed<Targets>, Vec<u8>)> = Vec::new();
    let mut parents: HashMap<RoleName, Signed<Targets>> = HashMap::new();

    for update in targets_updates {
        let name = &update.role;
        let signed: Signed<Targets> =
            load_role(name, RoleType::Targets, &update.data).map_err(bad_targets)?;

        let (role_keys, keys) = if let Some(parent) = name.parent() {
            let parent_doc = match loaded.iter().find(|(loaded_name, _, _)| loaded_name == &parent)
            {
                Some((_, doc, _)) => doc,
                None => {
                    if !parents.contains_key(&parent) {
                        let bytes =
                            store
                                .get_current(gun, &parent)?
                                .with_context(|| error::NotFound {
                                    gun,
                                    role: parent.to_string(),
                                })?;
                        let doc = load_role(&parent, RoleType::Targets, &bytes)
                            .map_err(bad_targets)?;
                        parents.insert(parent.clone(), doc);
                    }
                    parents.get(&parent).with_context(|| error::NotFound {
                        gun,
                        role: parent.to_string(),
                    })?
                }
            };
            let delegations = parent_doc
                .signed
                .delegations
                .as_ref()
                .with_context(|| error::NoSuchRole {
                    role: name.to_string(),
                })
                .map_err(bad_targets)?;
            let entry = delegations
                .role(name)
                .with_context(|| error::NoSuchRole {
                    role: name.to_string(),
                })
                .map_err(bad_targets)?;
            (entry.role_keys(), delegations.keys.clone())
        } else {
            let role_keys = root
                .role_keys(RoleType::Targets)
                .context(error::VerifyMetadata {
                    role: name.to_string(),
                })
                .map_err(bad_targets)?;
            (role_keys.clone(), root.keys.clone())
        };

        verify::verify_signed(&signed, name, &role_keys, &keys, 1)
            .context(error::VerifyMetadata {
                role: name.to_string(),
            })
            .map_err(bad_targets)?;
        loaded.push((name.clone(), signed, update.data.clone()));
    }
    Ok(loaded)
}

fn bad_targets(source: error::Error) -> error::Error {
    error::Error::BadTargets {
        source: Box::new(source),
        backtrace: snafu::GenerateBacktrace::generate(),
    }
}

fn bad_snapshot(source: error::Error) -> error::Error {
    error::Error::BadSnapshot {
        source: Box::new(source),
        backtrace: snafu::GenerateBacktrace::generate(),
    }
}

fn bad_hierarchy(source: error::Error) -> error::Error {
    error::Error::BadHierarchy {
        source: Box::new(source),
        backtrace: snafu::GenerateBacktrace::generate(),
    }
}

/// Step 4: verify a supplied snapshot against the root's snapshot role and against
/// every targets document in the batch, or synthesize one server-side when targets
/// changed without a snapshot.
///
/// Returns the snapshot update to persist (if any) and the envelope bytes and version
/// the timestamp must reference.
fn validate_or_generate_snapshot(
    crypto: &CryptoService,
    store: &dyn MetaStore,
    gun: &str,
    root: &Root,
    loaded: &[(RoleName, Signed<Targets>, Vec<u8>)],
    snapshot_update: Option<MetaUpdate>,
) -> Result<(Option<MetaUpdate>, (Vec<u8>, u64))> {
    let snapshot_name = RoleName::from(RoleType::Snapshot);

    if let Some(update) = snapshot_update {
        let signed: Signed<Snapshot> =
            load_role(&snapshot_name, RoleType::Snapshot, &update.data).map_err(bad_snapshot)?;
        let role_keys = root
            .role_keys(RoleType::Snapshot)
            .context(error::VerifyMetadata {
                role: snapshot_name.to_string(),
            })
            .map_err(bad_snapshot)?;
        verify::verify_signed(&signed, &snapshot_name, role_keys, &root.keys, 1)
            .context(error::VerifyMetadata {
                role: snapshot_name.to_string(),
            })
            .map_err(bad_snapshot)?;

        // Every targets document in this batch must be exactly what the snapshot
        // fixes.
        for (name, _, bytes) in loaded {
            let meta = signed
                .signed
                .meta
                .get(name)
                .with_context(|| error::NotFound {
                    gun,
                    role: name.to_string(),
                })
                .map_err(bad_snapshot)?;
            if !meta.matches(bytes) {
                let calculated =
                    hex::encode(ring::digest::digest(&ring::digest::SHA256, bytes).as_ref());
                return Err(bad_snapshot(
                    error::Error::ChecksumMismatch {
                        role: name.to_string(),
                        calculated,
                        expected: meta.hashes.sha256.to_string(),
                        backtrace: snafu::GenerateBacktrace::generate(),
                    },
                ));
            }
        }

        let version = signed.signed.version;
        let reference = (update.data.clone(), version);
        return Ok((
            Some(MetaUpdate {
                role: snapshot_name,
                version,
                data: update.data,
            }),
            reference,
        ));
    }

    if loaded.is_empty() {
        // Nothing changed under snapshot; the timestamp references the stored one.
        let bytes = store
            .get_current(gun, &snapshot_name)?
            .with_context(|| error::NotFound {
                gun,
                role: snapshot_name.to_string(),
            })
            .map_err(bad_snapshot)?;
        let signed: Signed<Snapshot> =
            load_role(&snapshot_name, RoleType::Snapshot, &bytes).map_err(bad_snapshot)?;
        return Ok((None, (bytes, signed.signed.version)));
    }

    // Synthesize: carry the prior snapshot's entries forward, bump its version, and
    // refresh the entry for every targets document in the batch.
    let mut snapshot = match store.get_current(gun, &snapshot_name)? {
        Some(bytes) => {
            let signed: Signed<Snapshot> =
                load_role(&snapshot_name, RoleType::Snapshot, &bytes).map_err(bad_snapshot)?;
            signed.signed
        }
        None => Snapshot::new(SPEC_VERSION.to_string(), 0, default_expires(RoleType::Snapshot)),
    };
    snapshot.version += 1;
    snapshot.expires = default_expires(RoleType::Snapshot);
    for (name, signed_targets, bytes) in loaded {
        snapshot.update_meta(
            name.clone(),
            SnapshotMeta::describe(bytes, signed_targets.signed.version),
        );
    }

    let signed = sign_server_side(crypto, store, gun, RoleType::Snapshot, snapshot)
        .map_err(bad_hierarchy)?;
    let version = signed.version();
    debug!("synthesized snapshot v{} for '{}'", version, gun);
    let reference = (signed.buffer.clone(), version);
    Ok((
        Some(MetaUpdate {
            role: snapshot_name,
            version,
            data: signed.buffer,
        }),
        reference,
    ))
}

/// Step 5: the timestamp is always regenerated server-side, referencing the snapshot
/// this batch settles on.
fn generate_timestamp(
    crypto: &CryptoService,
    store: &dyn MetaStore,
    gun: &str,
    snapshot_reference: &(Vec<u8>, u64),
) -> Result<MetaUpdate> {
    let timestamp_name = RoleName::from(RoleType::Timestamp);
    let version = match store.get_current(gun, &timestamp_name)? {
        Some(bytes) => {
            let signed: Signed<Timestamp> =
                load_role(&timestamp_name, RoleType::Timestamp, &bytes)
                    .map_err(bad_hierarchy)?;
            signed.signed.version + 1
        }
        None => 1,
    };

    let mut timestamp = Timestamp::new(
        SPEC_VERSION.to_string(),
        version,
        default_expires(RoleType::Timestamp),
    );
    let (snapshot_bytes, snapshot_version) = snapshot_reference;
    timestamp.update_meta(SnapshotMeta::describe(snapshot_bytes, *snapshot_version));

    let signed = sign_server_side(crypto, store, gun, RoleType::Timestamp, timestamp)
        .map_err(bad_hierarchy)?;
    let version = signed.version();
    debug!("generated timestamp v{} for '{}'", version, gun);
    Ok(MetaUpdate {
        role: timestamp_name,
        version,
        data: signed.buffer,
    })
}

/// Signs a server-generated document with the key storage pins for (collection,
/// role). The crypto service must hold the private half.
fn sign_server_side<T>(
    crypto: &CryptoService,
    store: &dyn MetaStore,
    gun: &str,
    role: RoleType,
    document: T,
) -> Result<SignedRole<T>>
where
    T: Role + serde::Serialize,
{
    let public = store.get_key(gun, role)?;
    let keyid = public.key_id().context(error::KeyId)?;
    let mut signed = Signed {
        signed: document,
        signatures: Vec::new(),
    };
    let canonical = signed.signed.canonical_form().context(error::CanonicalJson {
        role: role.to_string(),
    })?;
    let signatures = crypto.sign(&[keyid], &canonical)?;
    ensure!(
        !signatures.is_empty(),
        error::NoKeys {
            role: role.to_string(),
        }
    );
    signed.signatures = signatures;
    SignedRole::from_signed(signed)
}
