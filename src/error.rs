// Copyright The Notary Project Authors. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contains the error type for this library.

#![allow(clippy::default_trait_access)]

use snafu::{Backtrace, Snafu};
use std::path::PathBuf;

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for this library.
#[derive(Debug, Snafu)]
#[snafu(visibility = "pub(crate)")]
#[non_exhaustive]
pub enum Error {
    /// A validator rejection caused by the chain of trust rooted in root metadata.
    #[snafu(display("Root validation failed: {}", source))]
    BadRoot {
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
        backtrace: Backtrace,
    },

    /// A validator rejection caused by a targets-family document.
    #[snafu(display("Targets validation failed: {}", source))]
    BadTargets {
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
        backtrace: Backtrace,
    },

    /// A validator rejection caused by snapshot metadata.
    #[snafu(display("Snapshot validation failed: {}", source))]
    BadSnapshot {
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
        backtrace: Backtrace,
    },

    /// The server cannot complete the metadata hierarchy, usually because it holds no
    /// usable snapshot or timestamp signing key.
    #[snafu(display("Unable to complete the signing hierarchy: {}", source))]
    BadHierarchy {
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
        backtrace: Backtrace,
    },

    /// The timestamp key declared by a first-contact root does not match the key
    /// pinned for the collection.
    #[snafu(display(
        "The timestamp key declared by the new root does not match the key pinned for '{}'",
        gun
    ))]
    BootstrapKeyMismatch { gun: String, backtrace: Backtrace },

    /// The local cache directory could not be created.
    #[snafu(display("Failed to initialize cache directory: {}", source))]
    CacheInit {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// A cache file could not be opened.
    #[snafu(display("Failed to open {}: {}", path.display(), source))]
    CacheOpen {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// A cached document could not be parsed.
    #[snafu(display("Failed to parse {} from the cache: {}", what, source))]
    CacheParse {
        what: String,
        source: serde_json::Error,
        backtrace: Backtrace,
    },

    /// A cache file could not be removed.
    #[snafu(display("Failed to remove {}: {}", path.display(), source))]
    CacheRemove {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// A document could not be serialized into the cache.
    #[snafu(display("Failed to serialize {} for the cache: {}", what, source))]
    CacheSerialize {
        what: String,
        source: serde_json::Error,
        backtrace: Backtrace,
    },

    /// A cache file could not be written.
    #[snafu(display("Failed to write {}: {}", path.display(), source))]
    CacheWrite {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// Downloaded or cached bytes do not match the digest trusted metadata declares.
    #[snafu(display(
        "Checksum mismatch for {}: calculated {}, expected {}",
        role,
        calculated,
        expected
    ))]
    ChecksumMismatch {
        role: String,
        calculated: String,
        expected: String,
        backtrace: Backtrace,
    },

    /// Canonical serialization failed.
    #[snafu(display("Failed to serialize {} as canonical JSON: {}", role, source))]
    CanonicalJson {
        role: String,
        source: crate::schema::Error,
        backtrace: Backtrace,
    },

    /// An operation named a role that cannot be used where it was given.
    #[snafu(display("Invalid role {}: {}", role, reason))]
    InvalidRole {
        role: String,
        reason: String,
        backtrace: Backtrace,
    },

    /// A key ID could not be calculated.
    #[snafu(display("Failed to calculate key ID: {}", source))]
    KeyId {
        source: crate::schema::Error,
        backtrace: Backtrace,
    },

    /// Private key material was rejected by the cryptography library.
    #[snafu(display("Key rejected: {}", source))]
    KeyRejected {
        source: ring::error::KeyRejected,
        backtrace: Backtrace,
    },

    /// A private key was in no recognized format.
    #[snafu(display("Unrecognized or unsupported private key format"))]
    KeyUnrecognized { backtrace: Backtrace },

    /// A role's declared length was exceeded while reading its bytes; the server is
    /// feeding more data than trusted metadata allows.
    #[snafu(display("Role {} exceeds the length its trusted metadata declares", role))]
    MaliciousServer { role: String, backtrace: Backtrace },

    /// The server holds no pinned public key for (collection, role).
    #[snafu(display("No signing key is pinned for role {} of '{}'", role, gun))]
    NoKey {
        gun: String,
        role: String,
        backtrace: Backtrace,
    },

    /// The signer cannot produce any signature authorized for the role.
    #[snafu(display("No usable signing keys for role {}", role))]
    NoKeys { role: String, backtrace: Backtrace },

    /// An operation requires a document that has not been initialized or stored.
    #[snafu(display("Metadata for role {} has not been loaded", role))]
    NotLoaded { role: String, backtrace: Backtrace },

    /// Stored metadata was requested that does not exist.
    #[snafu(display("No metadata found for role {} of '{}'", role, gun))]
    NotFound {
        gun: String,
        role: String,
        backtrace: Backtrace,
    },

    /// Resolution of a delegated role through its parent chain failed.
    #[snafu(display("Delegation role {} not found", role))]
    NoSuchRole { role: String, backtrace: Backtrace },

    /// A version that does not exceed the currently stored version was offered.
    #[snafu(display(
        "Rejected version {} for role {}: the stored version {} is not older",
        given,
        role,
        stored
    ))]
    OldVersion {
        role: String,
        stored: u64,
        given: u64,
        backtrace: Backtrace,
    },

    /// Stored or submitted metadata bytes failed to parse.
    #[snafu(display("Failed to parse metadata for role {}: {}", role, source))]
    ParseMetadata {
        role: String,
        source: serde_json::Error,
        backtrace: Backtrace,
    },

    /// The cryptography library failed to produce a signature.
    #[snafu(display("Failed to sign message"))]
    Sign {
        source: ring::error::Unspecified,
        backtrace: Backtrace,
    },

    /// The requested key algorithm cannot be used here.
    #[snafu(display("Unsupported key algorithm: {}", algorithm))]
    UnsupportedAlgorithm {
        algorithm: String,
        backtrace: Backtrace,
    },

    /// The client's trust anchors reject an offered root.
    #[snafu(display("Validation failed: {}", reason))]
    ValidationFail {
        reason: String,
        backtrace: Backtrace,
    },

    /// Envelope verification failed.
    #[snafu(display("Failed to verify metadata for role {}: {}", role, source))]
    VerifyMetadata {
        role: String,
        source: crate::schema::Error,
        backtrace: Backtrace,
    },
}
