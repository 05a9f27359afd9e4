use chrono::{DateTime, Utc};
use snafu::{Backtrace, Snafu};

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the metadata schema layer: parsing, role grammar, key identity, and
/// signed-envelope verification.
#[derive(Debug, Snafu)]
#[snafu(visibility = "pub(crate)")]
#[non_exhaustive]
pub enum Error {
    /// An x.509 certificate could not be parsed.
    #[snafu(display("Unable to parse x.509 certificate: {}", source))]
    CertificateParse {
        source: x509_cert::der::Error,
        backtrace: Backtrace,
    },

    /// An x.509 certificate's SubjectPublicKeyInfo carries no key bits.
    #[snafu(display("x.509 certificate carries no public key bits"))]
    CertificateNoPublicKey { backtrace: Backtrace },

    /// The algorithm inside a wrapped certificate does not match the declared key
    /// type.
    #[snafu(display(
        "x.509 certificate public key algorithm {} does not match key type {}",
        oid,
        keytype
    ))]
    CertificateKeyType {
        oid: String,
        keytype: &'static str,
        backtrace: Backtrace,
    },

    /// A key map lists the same key ID twice.
    #[snafu(display("Duplicate key ID: {}", keyid))]
    DuplicateKeyId { keyid: String },

    /// Metadata is past its expiry and no longer trusted.
    #[snafu(display("Role {} expired at {}", role, when))]
    Expired {
        role: String,
        when: DateTime<Utc>,
        backtrace: Backtrace,
    },

    /// A string was not valid hexadecimal.
    #[snafu(display("Failed to decode hex string '{}': {}", hex, source))]
    HexDecode {
        hex: String,
        source: hex::FromHexError,
        backtrace: Backtrace,
    },

    /// A key map entry's ID does not match the key contents it names.
    #[snafu(display(
        "Invalid key ID {}: calculated {} from key contents",
        keyid,
        calculated
    ))]
    InvalidKeyId {
        keyid: String,
        calculated: String,
        backtrace: Backtrace,
    },

    /// A role name violates the naming grammar.
    #[snafu(display("Invalid role name '{}': {}", name, reason))]
    InvalidRoleName {
        name: String,
        reason: &'static str,
        backtrace: Backtrace,
    },

    /// JSON serialization failed.
    #[snafu(display("Failed to serialize {} to JSON: {}", what, source))]
    JsonSerialization {
        what: String,
        source: serde_json::Error,
        backtrace: Backtrace,
    },

    /// Metadata is older than the minimum trusted version; accepting it would be a
    /// rollback.
    #[snafu(display(
        "Version {} of role {} is lower than the minimum trusted version {}",
        actual,
        role,
        min
    ))]
    LowVersion {
        role: String,
        actual: u64,
        min: u64,
        backtrace: Backtrace,
    },

    /// Root metadata does not declare one of the canonical roles.
    #[snafu(display("Root metadata declares no '{}' role", role))]
    MissingRole {
        role: String,
        backtrace: Backtrace,
    },

    /// An envelope carries no signatures at all.
    #[snafu(display("Role {} carries no signatures", role))]
    NoSignatures {
        role: String,
        backtrace: Backtrace,
    },

    /// A named role could not be resolved.
    #[snafu(display("Role {} not found", role))]
    NoSuchRole {
        role: String,
        backtrace: Backtrace,
    },

    /// A delegated role declares both `paths` and `path_hash_prefixes`.
    #[snafu(display(
        "Role {} declares both paths and path_hash_prefixes; the attributes are exclusive",
        role
    ))]
    PathConflict {
        role: String,
        backtrace: Backtrace,
    },

    /// A PEM block could not be parsed.
    #[snafu(display("Failed to parse PEM block: {:?}", source))]
    PemDecode {
        source: pem::PemError,
        backtrace: Backtrace,
    },

    /// Fewer valid signatures than the role's threshold requires.
    #[snafu(display(
        "Role {} has {} valid signatures out of a threshold of {}",
        role,
        have,
        need
    ))]
    RoleThreshold {
        role: String,
        have: usize,
        need: u64,
        backtrace: Backtrace,
    },

    /// A role's threshold cannot be met by the number of keys it declares.
    #[snafu(display(
        "Threshold {} for role {} exceeds its {} key IDs",
        threshold,
        role,
        keys
    ))]
    ThresholdExceedsKeys {
        role: String,
        threshold: u64,
        keys: usize,
        backtrace: Backtrace,
    },

    /// The timestamp role must be validated by exactly one signature.
    #[snafu(display(
        "The timestamp role must use a threshold of 1, not {}",
        threshold
    ))]
    TimestampThreshold {
        threshold: u64,
        backtrace: Backtrace,
    },

    /// An authorized key ID has no corresponding entry in the enclosing key map.
    #[snafu(display("Signature references key ID {} which is not in the key map", keyid))]
    UnknownKey {
        keyid: String,
        backtrace: Backtrace,
    },

    /// A delegated path escapes what the parent role covers.
    #[snafu(display("Path '{}' is not covered by the paths of role {}", path, parent))]
    UnmatchedPath {
        path: String,
        parent: String,
        backtrace: Backtrace,
    },

    /// An ECDSA certificate uses a curve this library does not support.
    #[snafu(display("Unsupported elliptic curve with OID {}", oid))]
    UnsupportedCurve {
        oid: String,
        backtrace: Backtrace,
    },

    /// The `_type` discriminator names a different role than expected.
    #[snafu(display("Metadata is of type '{}' where '{}' was expected", actual, expected))]
    WrongType {
        actual: String,
        expected: String,
        backtrace: Backtrace,
    },
}
