// Copyright The Notary Project Authors. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client trust bootstrap: trust-on-first-use pinning of each collection's root keys.
//!
//! The first root observed for a collection is pinned by its root key IDs. Every
//! subsequent root must either carry a valid signature from a pinned key or satisfy
//! the previously trusted root's role in full (a rotation). On success the pin set
//! moves forward to the accepted root's keys.

use crate::error::{self, Result};
use crate::schema::decoded::{Decoded, Hex};
use crate::schema::role::RoleName;
use crate::schema::verify;
use crate::schema::{RoleType, Root, Signed};
use log::debug;
use serde::{Deserialize, Serialize};
use snafu::ensure;
use std::collections::HashMap;

/// The canonical reason string surfaced when an offered root does not descend from
/// the trust the client holds.
const TRUST_MISMATCH: &str = "failed to validate data with current trusted certificates";

/// Per-collection pinned root key IDs. Serializable so callers can persist it through
/// the local cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustPinning {
    pinned: HashMap<String, Vec<Decoded<Hex>>>,
}

impl TrustPinning {
    /// Creates an empty pin set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a pin exists for the collection.
    pub fn is_pinned(&self, gun: &str) -> bool {
        self.pinned.contains_key(gun)
    }

    /// The pinned key IDs for the collection, if any.
    pub fn pins(&self, gun: &str) -> Option<&[Decoded<Hex>]> {
        self.pinned.get(gun).map(Vec::as_slice)
    }

    /// Explicitly pins key IDs for a collection, replacing any prior pin.
    pub fn pin(&mut self, gun: &str, keyids: Vec<Decoded<Hex>>) {
        self.pinned.insert(gun.to_owned(), keyids);
    }

    /// Validates an offered root for `gun` against the client's trust anchors.
    ///
    /// `prev` is the previously trusted root, if the client holds one. The offered
    /// root must verify against itself; beyond that, the first root ever seen for the
    /// collection is pinned as-is, and later roots must be signed by a pinned key or
    /// satisfy `prev`'s root role. Every failure surfaces as `ValidationFail`.
    pub fn validate_root(
        &mut self,
        gun: &str,
        prev: Option<&Signed<Root>>,
        data: &[u8],
    ) -> Result<Signed<Root>> {
        let root_name = RoleName::from(RoleType::Root);
        let candidate: Signed<Root> = serde_json::from_slice(data).map_err(|err| {
            validation_fail(format!("unable to parse root metadata: {}", err))
        })?;
        let candidate_role = candidate
            .signed
            .role_keys(RoleType::Root)
            .map_err(|err| validation_fail(err.to_string()))?
            .clone();
        verify::verify_signed(
            &candidate,
            &root_name,
            &candidate_role,
            &candidate.signed.keys,
            1,
        )
        .map_err(|err| validation_fail(err.to_string()))?;

        let trusted = match self.pinned.get(gun) {
            None => {
                // First contact: trust on first use.
                debug!("pinning root keys for '{}' on first use", gun);
                prev.is_none() || self.verify_against_prev(&candidate, &root_name, prev)
            }
            Some(pinned) => {
                let mut pin_role = candidate_role.clone();
                pin_role.keyids = pinned.clone();
                let pin_signed = verify::valid_signature_count(
                    &candidate,
                    &pin_role,
                    &candidate.signed.keys,
                )
                .unwrap_or(0)
                    >= 1;
                pin_signed || self.verify_against_prev(&candidate, &root_name, prev)
            }
        };
        ensure!(
            trusted,
            error::ValidationFail {
                reason: TRUST_MISMATCH,
            }
        );

        self.pinned
            .insert(gun.to_owned(), candidate_role.keyids.clone());
        Ok(candidate)
    }

    /// Whether the candidate satisfies the previously trusted root's role in full:
    /// threshold signatures from the old key set and a version that does not go
    /// backwards.
    fn verify_against_prev(
        &self,
        candidate: &Signed<Root>,
        root_name: &RoleName,
        prev: Option<&Signed<Root>>,
    ) -> bool {
        let prev = match prev {
            Some(prev) => prev,
            None => return false,
        };
        let prev_role = match prev.signed.role_keys(RoleType::Root) {
            Ok(role) => role,
            Err(_) => return false,
        };
        verify::verify_signed(
            candidate,
            root_name,
            prev_role,
            &prev.signed.keys,
            prev.signed.version,
        )
        .is_ok()
    }
}

fn validation_fail(reason: String) -> error::Error {
    error::Error::ValidationFail {
        reason,
        backtrace: snafu::GenerateBacktrace::generate(),
    }
}
