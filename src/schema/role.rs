//! Role names and the delegation path algebra.
//!
//! A role is either one of the four canonical roles (`root`, `targets`, `snapshot`,
//! `timestamp`) or a delegated targets role named `targets/<segment>[/<segment>...]`.
//! Delegated roles are only trusted for target paths that every ancestor's path set
//! covers; [`paths_restrict`] computes that intersection one hop at a time.

use crate::schema::decoded::{Decoded, Hex};
use crate::schema::error::{self, Result};
use crate::schema::key::Key;
use crate::schema::{RoleKeys, RoleType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::TryFrom;
use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;

/// Role names longer than this are rejected.
const MAX_ROLE_NAME_LEN: usize = 255;

/// A validated role name.
///
/// The grammar is enforced on construction, so holding a `RoleName` means the name is
/// well-formed: canonical, or `targets` followed by one or more `/`-separated segments of
/// `[a-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoleName(String);

impl RoleName {
    /// Parses and validates a role name.
    pub fn new<S: AsRef<str>>(name: S) -> Result<Self> {
        let name = name.as_ref();
        if let Ok(role) = name.parse::<RoleType>() {
            return Ok(Self(role.to_string()));
        }
        snafu::ensure!(
            name.len() <= MAX_ROLE_NAME_LEN,
            error::InvalidRoleName {
                name,
                reason: "name is too long",
            }
        );
        let mut segments = name.split('/');
        snafu::ensure!(
            segments.next() == Some("targets"),
            error::InvalidRoleName {
                name,
                reason: "delegated roles are rooted at 'targets/'",
            }
        );
        let mut count = 0;
        for segment in segments {
            snafu::ensure!(
                !segment.is_empty(),
                error::InvalidRoleName {
                    name,
                    reason: "empty path segment",
                }
            );
            snafu::ensure!(
                segment
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-'),
                error::InvalidRoleName {
                    name,
                    reason: "segments are limited to [a-z0-9_-]",
                }
            );
            count += 1;
        }
        snafu::ensure!(
            count > 0,
            error::InvalidRoleName {
                name,
                reason: "a delegated role needs at least one segment",
            }
        );
        Ok(Self(name.to_owned()))
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a delegated targets role (as opposed to a canonical role).
    pub fn is_delegation(&self) -> bool {
        self.0.contains('/')
    }

    /// Whether this role holds targets metadata: the canonical `targets` role or any
    /// delegation under it.
    pub fn is_targets_role(&self) -> bool {
        self.0 == "targets" || self.is_delegation()
    }

    /// The canonical role this name refers to, if it is not a delegation.
    pub fn role_type(&self) -> Option<RoleType> {
        if self.is_delegation() {
            None
        } else {
            self.0.parse().ok()
        }
    }

    /// The parent role of a delegation: `targets/a/b` → `targets/a`, `targets/a` →
    /// `targets`. Canonical roles have no parent.
    pub fn parent(&self) -> Option<RoleName> {
        let idx = self.0.rfind('/')?;
        Some(RoleName(self.0[..idx].to_owned()))
    }

    /// Delegation depth: 0 for canonical roles, 1 for `targets/a`, and so on.
    pub fn depth(&self) -> usize {
        self.0.matches('/').count()
    }

    /// True when `child` is delegated directly by this role.
    pub fn is_direct_parent_of(&self, child: &RoleName) -> bool {
        child.parent().as_ref() == Some(self)
    }

    /// True when `other` is this role or any descendant of it.
    pub fn is_ancestor_of(&self, other: &RoleName) -> bool {
        other.0.starts_with(&self.0) && other.0[self.0.len()..].starts_with('/')
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoleName {
    type Err = crate::schema::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for RoleName {
    type Error = crate::schema::error::Error;

    fn try_from(s: String) -> Result<Self> {
        Self::new(&s)
    }
}

impl From<RoleName> for String {
    fn from(name: RoleName) -> String {
        name.0
    }
}

impl From<RoleType> for RoleName {
    fn from(role: RoleType) -> RoleName {
        RoleName(role.to_string())
    }
}

impl PartialEq<str> for RoleName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The keys and threshold used to initialize one canonical role in root metadata.
#[derive(Debug, Clone)]
pub struct BaseRole {
    /// The public keys authorized to sign for the role.
    pub keys: Vec<Key>,
    /// How many distinct authorized signatures validate the role.
    pub threshold: NonZeroU64,
}

impl BaseRole {
    /// Builds the `RoleKeys` entry for root metadata, returning the key IDs in the
    /// order the keys were given.
    pub(crate) fn to_role_keys(&self) -> Result<RoleKeys> {
        let mut keyids = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            let keyid = key.key_id()?;
            if !keyids.contains(&keyid) {
                keyids.push(keyid);
            }
        }
        Ok(RoleKeys {
            keyids,
            threshold: self.threshold,
            _extra: HashMap::new(),
        })
    }
}

/// A delegated role resolved through its ancestor chain.
///
/// `keys` holds copies of the public keys the parent's delegations block declares for
/// this role, and `paths` is the effective path set after restricting by every ancestor.
#[derive(Debug, Clone)]
pub struct DelegationRole {
    /// The full name of the delegated role.
    pub name: RoleName,
    /// Public keys for `keyids`, copied out of the parent's delegations.
    pub keys: HashMap<Decoded<Hex>, Key>,
    /// The key IDs authorized to sign this role.
    pub keyids: Vec<Decoded<Hex>>,
    /// Signature threshold.
    pub threshold: NonZeroU64,
    /// Path prefixes this role is trusted for, after ancestor restriction.
    pub paths: Vec<String>,
}

impl DelegationRole {
    /// The `RoleKeys` view of this role, for envelope verification.
    pub fn to_role_keys(&self) -> RoleKeys {
        RoleKeys {
            keyids: self.keyids.clone(),
            threshold: self.threshold,
            _extra: HashMap::new(),
        }
    }

    /// Whether `path` falls under one of this role's effective path prefixes.
    pub fn covers(&self, path: &str) -> bool {
        path_covered(&self.paths, path)
    }
}

/// True when `path` starts with one of the prefixes in `paths`.
pub(crate) fn path_covered(paths: &[String], path: &str) -> bool {
    paths.iter().any(|prefix| path.starts_with(prefix.as_str()))
}

/// Restricts a child's declared paths to those its parent covers.
///
/// The result is always a subset of `child`; an empty parent set propagates emptiness.
pub fn paths_restrict(parent: &[String], child: &[String]) -> Vec<String> {
    child
        .iter()
        .filter(|path| path_covered(parent, path))
        .cloned()
        .collect()
}

/// Fails with `UnmatchedPath` unless every path in `child` is covered by `parent`.
pub(crate) fn paths_verify(parent: &[String], parent_name: &RoleName, child: &[String]) -> Result<()> {
    for path in child {
        snafu::ensure!(
            path_covered(parent, path),
            error::UnmatchedPath {
                path,
                parent: parent_name.to_string(),
            }
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_parse() {
        for name in &["root", "targets", "snapshot", "timestamp"] {
            let role = RoleName::new(name).unwrap();
            assert!(!role.is_delegation());
            assert!(role.role_type().is_some());
        }
    }

    #[test]
    fn delegation_grammar() {
        assert!(RoleName::new("targets/level1").unwrap().is_delegation());
        assert!(RoleName::new("targets/a/b-2_c").unwrap().is_delegation());
        assert!(RoleName::new("targets/").is_err());
        assert!(RoleName::new("targets//a").is_err());
        assert!(RoleName::new("targets/A").is_err());
        assert!(RoleName::new("targets/a b").is_err());
        assert!(RoleName::new("targets/..").is_err());
        assert!(RoleName::new("snapshot/a").is_err());
        assert!(RoleName::new("other").is_err());
        let long = format!("targets/{}", "a".repeat(300));
        assert!(RoleName::new(&long).is_err());
    }

    #[test]
    fn parent_chain() {
        let role = RoleName::new("targets/a/b").unwrap();
        let parent = role.parent().unwrap();
        assert_eq!(parent.as_str(), "targets/a");
        assert!(parent.is_direct_parent_of(&role));
        assert_eq!(parent.parent().unwrap().as_str(), "targets");
        assert_eq!(RoleName::new("root").unwrap().parent(), None);
        assert_eq!(role.depth(), 2);
        let targets = RoleName::new("targets").unwrap();
        assert!(targets.is_ancestor_of(&role));
        assert!(!targets.is_ancestor_of(&targets));
    }

    #[test]
    fn restrict_is_intersection() {
        let parent = vec!["p/".to_owned(), "q/".to_owned()];
        let child = vec!["p/inner".to_owned(), "r/outer".to_owned()];
        let restricted = paths_restrict(&parent, &child);
        assert_eq!(restricted, vec!["p/inner".to_owned()]);
        for path in &restricted {
            assert!(child.contains(path));
        }
    }

    #[test]
    fn empty_parent_restricts_to_empty() {
        let child = vec!["p".to_owned()];
        assert!(paths_restrict(&[], &child).is_empty());
    }

    #[test]
    fn verify_rejects_uncovered() {
        let parent_name = RoleName::new("targets/a").unwrap();
        let parent = vec!["p".to_owned()];
        assert!(paths_verify(&parent, &parent_name, &["p1".to_owned()]).is_ok());
        assert!(paths_verify(&parent, &parent_name, &["q".to_owned()]).is_err());
    }
}
