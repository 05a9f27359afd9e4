#![allow(clippy::used_underscore_binding)]

//! The metadata schema: the four canonical roles, delegated targets roles, and the
//! signed envelope that wraps them.
//!
//! Every struct preserves unrecognized fields in a flattened `_extra` map so that
//! re-serializing a parsed document reproduces the exact byte image its signatures
//! cover.

mod de;
pub mod decoded;
mod error;
mod iter;
pub mod key;
pub mod role;
pub mod verify;

pub use crate::schema::error::{Error, Result};

use crate::schema::decoded::{Decoded, Hex};
use crate::schema::iter::KeysIter;
use crate::schema::key::Key;
use crate::schema::role::RoleName;
use crate::sign::Sign;
use chrono::{DateTime, Utc};
use ring::digest::{digest, SHA256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_plain::{forward_display_to_serde, forward_from_str_to_serde};
use snafu::{OptionExt, ResultExt};
use std::collections::HashMap;
use std::num::NonZeroU64;

/// The type of metadata role.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RoleType {
    /// The root role delegates trust to specific keys trusted for all other canonical
    /// roles.
    Root,
    /// The snapshot role fixes the exact version, length, and hash of every targets
    /// document at a point in time.
    Snapshot,
    /// The targets role (and its delegations) indicates which content is trusted.
    Targets,
    /// The timestamp role fixes the snapshot at a point in time; short expiry, single
    /// key.
    Timestamp,
}

forward_display_to_serde!(RoleType);
forward_from_str_to_serde!(RoleType);

/// Common trait implemented by all roles.
pub trait Role: Serialize {
    /// The type of role this object represents.
    const TYPE: RoleType;

    /// When this metadata expires and is no longer trusted.
    fn expires(&self) -> DateTime<Utc>;

    /// The metadata version. Published envelopes always carry a version of at least 1;
    /// a freshly initialized document holds 0 until its first signing bumps it.
    fn version(&self) -> u64;

    /// The deterministic serialization whose bytes signatures and hashes cover.
    fn canonical_form(&self) -> Result<Vec<u8>> {
        crate::cjson::to_canonical(self).context(error::JsonSerialization { what: "role" })
    }
}

/// A signed metadata object.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Signed<T> {
    /// The role that is signed.
    pub signed: T,
    /// A list of signatures and their key IDs.
    pub signatures: Vec<Signature>,
}

impl<T: Serialize> Signed<T> {
    /// The canonical byte image of the whole envelope. This is what storage holds and
    /// what snapshot/timestamp entries describe.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        crate::cjson::to_canonical(self).context(error::JsonSerialization { what: "envelope" })
    }
}

/// A signature and the key ID that made it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Signature {
    /// The key ID (listed in the enclosing key map) that made this signature.
    pub keyid: Decoded<Hex>,
    /// The signing method the key used.
    pub method: SignatureMethod,
    /// A hex-encoded signature of the canonical form of the role.
    pub sig: Decoded<Hex>,
}

/// The method a signature was produced with.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum SignatureMethod {
    /// Ed25519.
    #[serde(rename = "ed25519")]
    Ed25519,
    /// ECDSA with an ASN.1 encoded signature.
    #[serde(rename = "ecdsa")]
    Ecdsa,
    /// RSASSA-PSS with SHA-256.
    #[serde(rename = "rsapss")]
    RsaPss,
}

forward_display_to_serde!(SignatureMethod);
forward_from_str_to_serde!(SignatureMethod);

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Root metadata: which keys are authorized for all canonical roles, including the
/// root role itself. Key revocation and replacement is done by publishing a new root.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "root")]
pub struct Root {
    /// The version of the metadata format specification this document follows.
    pub spec_version: String,

    /// Whether the collection supports consistent snapshots: every historical envelope
    /// stays addressable by the hash of its bytes.
    pub consistent_snapshot: bool,

    /// The version of this document.
    pub version: u64,

    /// When this metadata expires.
    pub expires: DateTime<Utc>,

    /// All keys the canonical roles reference, indexed by key ID. IDs are validated
    /// against key contents during deserialization.
    #[serde(deserialize_with = "de::deserialize_keys")]
    pub keys: HashMap<Decoded<Hex>, Key>,

    /// The key IDs and signature threshold for each canonical role.
    pub roles: HashMap<RoleType, RoleKeys>,

    /// Extra arguments found during deserialization, preserved for signature
    /// stability.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

/// The key IDs used for a role and the threshold of signatures required to validate
/// it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RoleKeys {
    /// The key IDs used for the role.
    pub keyids: Vec<Decoded<Hex>>,

    /// The threshold of signatures required to validate the role.
    pub threshold: NonZeroU64,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Root {
    /// An iterator over (key ID, key) for a given role.
    pub fn keys(&self, role: RoleType) -> impl Iterator<Item = (&Decoded<Hex>, &Key)> {
        KeysIter {
            keyids_iter: match self.roles.get(&role) {
                Some(role_keys) => role_keys.keyids.iter(),
                None => [].iter(),
            },
            keys: &self.keys,
        }
    }

    /// The key IDs and threshold for a canonical role, or `MissingRole`.
    pub fn role_keys(&self, role: RoleType) -> Result<&RoleKeys> {
        self.roles.get(&role).with_context(|| error::MissingRole {
            role: role.to_string(),
        })
    }

    /// Given an object that impls Sign, return the corresponding key ID from this
    /// root's key map.
    pub fn key_id(&self, key_pair: &dyn Sign) -> Option<Decoded<Hex>> {
        let tuf_key = key_pair.tuf_key();
        for (key_id, key) in &self.keys {
            if tuf_key == *key {
                return Some(key_id.clone());
            }
        }
        None
    }

    /// Checks the structural invariants the validator demands of a root document:
    /// all four canonical roles declared, every referenced key ID resolvable, and
    /// every threshold within the role's key count. The timestamp role must get by
    /// with a threshold of exactly one key.
    pub fn validate(&self) -> Result<()> {
        for role in &[
            RoleType::Root,
            RoleType::Targets,
            RoleType::Snapshot,
            RoleType::Timestamp,
        ] {
            let role_keys = self.role_keys(*role)?;
            for keyid in &role_keys.keyids {
                snafu::ensure!(
                    self.keys.contains_key(keyid),
                    error::UnknownKey {
                        keyid: keyid.to_string(),
                    }
                );
            }
            snafu::ensure!(
                role_keys.threshold.get() <= role_keys.keyids.len() as u64,
                error::ThresholdExceedsKeys {
                    role: role.to_string(),
                    threshold: role_keys.threshold.get(),
                    keys: role_keys.keyids.len(),
                }
            );
        }
        let timestamp = self.role_keys(RoleType::Timestamp)?;
        snafu::ensure!(
            timestamp.threshold.get() == 1,
            error::TimestampThreshold {
                threshold: timestamp.threshold.get(),
            }
        );
        Ok(())
    }
}

impl Role for Root {
    const TYPE: RoleType = RoleType::Root;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Targets metadata: the trusted content entries of one targets-family role, plus the
/// delegations it makes.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "targets")]
pub struct Targets {
    /// The version of the metadata format specification this document follows.
    pub spec_version: String,

    /// The version of this document.
    pub version: u64,

    /// When this metadata expires.
    pub expires: DateTime<Utc>,

    /// Each key is a target path; the value describes the content at that path.
    pub targets: HashMap<String, Target>,

    /// Subsets of the target paths for which responsibility is delegated to other
    /// roles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegations: Option<Delegations>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

/// Describes the content at one target path.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Target {
    /// The length of the content in bytes.
    pub length: u64,

    /// One or more digests of the content.
    pub hashes: Hashes,

    /// Opaque application data carried alongside the target.
    #[serde(default)]
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub custom: HashMap<String, Value>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Target {
    /// Describes a blob of content: its length and SHA-256 digest.
    pub fn from_bytes(data: &[u8]) -> Target {
        Target {
            length: data.len() as u64,
            hashes: Hashes {
                sha256: digest(&SHA256, data).as_ref().to_vec().into(),
                _extra: HashMap::new(),
            },
            custom: HashMap::new(),
            _extra: HashMap::new(),
        }
    }
}

/// Digests keyed by hash algorithm.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Hashes {
    /// The SHA-256 digest.
    pub sha256: Decoded<Hex>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Targets {
    /// Creates empty targets metadata.
    pub fn new(spec_version: String, version: u64, expires: DateTime<Utc>) -> Self {
        Targets {
            spec_version,
            version,
            expires,
            targets: HashMap::new(),
            delegations: Some(Delegations::new()),
            _extra: HashMap::new(),
        }
    }

    /// The delegations block, created on demand.
    pub fn delegations_mut(&mut self) -> &mut Delegations {
        self.delegations.get_or_insert_with(Delegations::new)
    }

    /// The entry this document declares for a directly delegated role.
    pub fn delegated_role(&self, name: &RoleName) -> Option<&DelegatedRole> {
        self.delegations
            .as_ref()
            .and_then(|delegations| delegations.role(name))
    }

    /// Mutable variant of [`Self::delegated_role`].
    pub fn delegated_role_mut(&mut self, name: &RoleName) -> Option<&mut DelegatedRole> {
        self.delegations
            .as_mut()
            .and_then(|delegations| delegations.roles.iter_mut().find(|role| &role.name == name))
    }
}

impl Role for Targets {
    const TYPE: RoleType = RoleType::Targets;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// The delegations block of a targets document.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Delegations {
    /// Public keys the delegated roles' signatures verify against, indexed by key ID.
    #[serde(deserialize_with = "de::deserialize_keys")]
    pub keys: HashMap<Decoded<Hex>, Key>,

    /// The delegated roles, in insertion order. A targets document for role R may only
    /// list delegations named `R/<segment>`.
    pub roles: Vec<DelegatedRole>,
}

/// One delegated role as declared by its parent.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DelegatedRole {
    /// The full name of the delegated role.
    pub name: RoleName,

    /// The key IDs authorized to sign this role.
    pub keyids: Vec<Decoded<Hex>>,

    /// The threshold of signatures required to validate the role.
    pub threshold: NonZeroU64,

    /// Path prefixes the role is trusted to provide targets under. Only meaningful up
    /// to what every ancestor also covers.
    #[serde(default)]
    pub paths: Vec<String>,

    /// Hashed-bin path prefixes; exclusive with `paths`.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_hash_prefixes: Option<Vec<String>>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl DelegatedRole {
    /// The `RoleKeys` view of this entry, for envelope verification.
    pub fn role_keys(&self) -> RoleKeys {
        RoleKeys {
            keyids: self.keyids.clone(),
            threshold: self.threshold,
            _extra: HashMap::new(),
        }
    }
}

impl Delegations {
    /// Creates an empty delegations block.
    pub fn new() -> Self {
        Delegations {
            keys: HashMap::new(),
            roles: Vec::new(),
        }
    }

    /// The entry for a directly delegated role.
    pub fn role(&self, name: &RoleName) -> Option<&DelegatedRole> {
        self.roles.iter().find(|role| &role.name == name)
    }

    /// Given an object that impls Sign, return the corresponding key ID from this
    /// delegations key map.
    pub fn key_id(&self, key_pair: &dyn Sign) -> Option<Decoded<Hex>> {
        let tuf_key = key_pair.tuf_key();
        for (key_id, key) in &self.keys {
            if tuf_key == *key {
                return Some(key_id.clone());
            }
        }
        None
    }

    /// Drops key map entries no longer referenced by any role in this block.
    pub fn prune_keys(&mut self) {
        let referenced: Vec<Decoded<Hex>> = self
            .roles
            .iter()
            .flat_map(|role| role.keyids.iter().cloned())
            .collect();
        self.keys.retain(|keyid, _| referenced.contains(keyid));
    }
}

impl Default for Delegations {
    fn default() -> Self {
        Self::new()
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Snapshot metadata: an entry per targets-family document currently in the
/// repository.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "snapshot")]
pub struct Snapshot {
    /// The version of the metadata format specification this document follows.
    pub spec_version: String,

    /// The version of this document.
    pub version: u64,

    /// When this metadata expires.
    pub expires: DateTime<Utc>,

    /// One entry per targets document, keyed by role name.
    pub meta: HashMap<RoleName, SnapshotMeta>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

/// Describes one metadata envelope within a snapshot.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SnapshotMeta {
    /// The length in bytes of the envelope.
    pub length: u64,

    /// Digests of the envelope bytes.
    pub hashes: Hashes,

    /// The version the envelope carries.
    pub version: u64,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl SnapshotMeta {
    /// Describes an envelope from its canonical bytes and version.
    pub fn describe(data: &[u8], version: u64) -> SnapshotMeta {
        SnapshotMeta {
            length: data.len() as u64,
            hashes: Hashes {
                sha256: digest(&SHA256, data).as_ref().to_vec().into(),
                _extra: HashMap::new(),
            },
            version,
            _extra: HashMap::new(),
        }
    }

    /// Whether `data` matches this entry's length and digest.
    pub fn matches(&self, data: &[u8]) -> bool {
        self.length == data.len() as u64
            && self.hashes.sha256.as_ref() == digest(&SHA256, data).as_ref()
    }
}

impl Snapshot {
    /// Creates snapshot metadata with no entries.
    pub fn new(spec_version: String, version: u64, expires: DateTime<Utc>) -> Self {
        Snapshot {
            spec_version,
            version,
            expires,
            meta: HashMap::new(),
            _extra: HashMap::new(),
        }
    }

    /// Inserts or replaces the entry for `role`, reporting whether anything changed.
    pub fn update_meta(&mut self, role: RoleName, meta: SnapshotMeta) -> bool {
        match self.meta.get(&role) {
            Some(existing) if *existing == meta => false,
            _ => {
                self.meta.insert(role, meta);
                true
            }
        }
    }
}

impl Role for Snapshot {
    const TYPE: RoleType = RoleType::Snapshot;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Timestamp metadata: a single entry fixing the current snapshot. Frequently resigned
/// so clients cannot be kept unaware of new snapshots for long.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "timestamp")]
pub struct Timestamp {
    /// The version of the metadata format specification this document follows.
    pub spec_version: String,

    /// The version of this document.
    pub version: u64,

    /// When this metadata expires.
    pub expires: DateTime<Utc>,

    /// Exactly one entry, keyed by the snapshot role name.
    pub meta: HashMap<RoleName, SnapshotMeta>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

impl Timestamp {
    /// Creates timestamp metadata with no entry; callers fill in the snapshot
    /// reference before signing.
    pub fn new(spec_version: String, version: u64, expires: DateTime<Utc>) -> Self {
        Timestamp {
            spec_version,
            version,
            expires,
            meta: HashMap::new(),
            _extra: HashMap::new(),
        }
    }

    /// Inserts or replaces the snapshot entry, reporting whether anything changed.
    pub fn update_meta(&mut self, meta: SnapshotMeta) -> bool {
        let role = RoleName::from(RoleType::Snapshot);
        match self.meta.get(&role) {
            Some(existing) if *existing == meta => false,
            _ => {
                self.meta.insert(role, meta);
                true
            }
        }
    }

    /// The snapshot entry, if one has been recorded.
    pub fn snapshot_meta(&self) -> Option<&SnapshotMeta> {
        self.meta.get(&RoleName::from(RoleType::Snapshot))
    }
}

impl Role for Timestamp {
    const TYPE: RoleType = RoleType::Timestamp;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> u64 {
        self.version
    }
}
