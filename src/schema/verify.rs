//! The signed-envelope verifier: every trust decision in the crate funnels through
//! [`verify_signed`].

use crate::schema::decoded::{Decoded, Hex};
use crate::schema::error::{self, Result};
use crate::schema::key::Key;
use crate::schema::role::RoleName;
use crate::schema::{Role, RoleKeys, RoleType, Signed};
use chrono::Utc;
use serde_json::Value;
use snafu::ensure;
use std::collections::{HashMap, HashSet};

/// Verifies a signed envelope against a resolved role.
///
/// Succeeds iff, in order: at least one signature is present; the document type is the
/// canonical type for `name`; the version is at least `min_version`; the document has
/// not expired; and the distinct authorized key IDs with valid signatures over the
/// canonical form meet the role's threshold. Duplicate signatures from one key count
/// once.
pub fn verify_signed<T>(
    signed: &Signed<T>,
    name: &RoleName,
    role_keys: &RoleKeys,
    keys: &HashMap<Decoded<Hex>, Key>,
    min_version: u64,
) -> Result<()>
where
    T: Role,
{
    check_signatures_present(signed, name)?;
    check_role_type::<T>(name)?;
    check_version(&signed.signed, name, min_version)?;
    check_expired(&signed.signed, name)?;
    let have = valid_signature_count(signed, role_keys, keys)?;
    ensure!(
        have as u64 >= role_keys.threshold.get(),
        error::RoleThreshold {
            role: name.to_string(),
            have,
            need: role_keys.threshold.get(),
        }
    );
    Ok(())
}

/// Like [`verify_signed`], but satisfied by a single valid authorized signature
/// regardless of the role's declared threshold, and with no version floor. Used when
/// bootstrapping trust in a root candidate with nothing stored to compare against.
pub fn verify_signed_lenient<T>(
    signed: &Signed<T>,
    name: &RoleName,
    role_keys: &RoleKeys,
    keys: &HashMap<Decoded<Hex>, Key>,
) -> Result<()>
where
    T: Role,
{
    check_signatures_present(signed, name)?;
    check_role_type::<T>(name)?;
    check_expired(&signed.signed, name)?;
    let have = valid_signature_count(signed, role_keys, keys)?;
    ensure!(
        have >= 1,
        error::RoleThreshold {
            role: name.to_string(),
            have,
            need: 1u64,
        }
    );
    Ok(())
}

/// Fails with `NoSignatures` on an unsigned envelope.
pub fn check_signatures_present<T>(signed: &Signed<T>, name: &RoleName) -> Result<()> {
    ensure!(
        !signed.signatures.is_empty(),
        error::NoSignatures {
            role: name.to_string(),
        }
    );
    Ok(())
}

/// Fails with `WrongType` when `name` does not name a role of type `T`.
fn check_role_type<T: Role>(name: &RoleName) -> Result<()> {
    let expected = name.role_type().unwrap_or(RoleType::Targets);
    ensure!(
        expected == T::TYPE,
        error::WrongType {
            actual: T::TYPE.to_string(),
            expected: expected.to_string(),
        }
    );
    Ok(())
}

/// Fails with `LowVersion` when the document is older than `min_version`.
pub fn check_version<T: Role>(role: &T, name: &RoleName, min_version: u64) -> Result<()> {
    ensure!(
        role.version() >= min_version,
        error::LowVersion {
            role: name.to_string(),
            actual: role.version(),
            min: min_version,
        }
    );
    Ok(())
}

/// Fails with `Expired` when the document's expiry is not in the future.
pub fn check_expired<T: Role>(role: &T, name: &RoleName) -> Result<()> {
    ensure!(
        role.expires() > Utc::now(),
        error::Expired {
            role: name.to_string(),
            when: role.expires(),
        }
    );
    Ok(())
}

/// Counts the distinct key IDs that are authorized by `role_keys` and carry a valid
/// signature over the canonical form. An authorized key ID with no entry in `keys`
/// fails with `UnknownKey`.
pub fn valid_signature_count<T>(
    signed: &Signed<T>,
    role_keys: &RoleKeys,
    keys: &HashMap<Decoded<Hex>, Key>,
) -> Result<usize>
where
    T: Role,
{
    let canonical = signed.signed.canonical_form()?;
    let mut valid: HashSet<&Decoded<Hex>> = HashSet::new();
    for signature in &signed.signatures {
        if !role_keys.keyids.contains(&signature.keyid) {
            continue;
        }
        let key = match keys.get(&signature.keyid) {
            Some(key) => key,
            None => {
                return error::UnknownKey {
                    keyid: signature.keyid.to_string(),
                }
                .fail();
            }
        };
        if key.verify(&canonical, &signature.sig) {
            valid.insert(&signature.keyid);
        }
    }
    Ok(valid.len())
}

/// Checks the `_type` discriminator of untrusted envelope bytes before a full parse,
/// so a mislabeled document surfaces as `WrongType` rather than a parse error.
pub fn check_type(raw: &Value, expected: RoleType) -> Result<()> {
    let actual = raw
        .get("signed")
        .and_then(|signed| signed.get("_type"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    ensure!(
        actual == expected.to_string(),
        error::WrongType {
            actual,
            expected: expected.to_string(),
        }
    );
    Ok(())
}
