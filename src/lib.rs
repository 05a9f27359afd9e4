// Copyright The Notary Project Authors. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! notary
//!
//! A client/server engine for publishing and retrieving signed collections of content
//! metadata, following The Update Framework (TUF).
//!
//! The crate centers on three pieces:
//!
//! * [`repo::Repository`]: the in-memory model of the four canonical roles (root,
//!   targets, snapshot, timestamp) plus an arbitrarily deep tree of delegated targets
//!   roles, with mutation operations that preserve the role/key/threshold invariants
//!   and signing operations that produce canonical envelopes.
//! * [`schema::verify`]: the signature verification kernel (threshold, type,
//!   version, and expiry checks against a resolved role) used everywhere a trust
//!   decision is made.
//! * [`validator::validate_update`]: the server-side validator that accepts a batch
//!   of proposed role updates for a collection, rebuilds the chain of trust from a
//!   previously trusted root, and either rejects with a typed error or completes the
//!   batch with server-signed snapshot/timestamp metadata.
//!
//! Metadata collections are identified by a GUN (globally unique name, e.g.
//! `docker.com/notary`). Everything that is signed or hashed travels as canonical
//! JSON produced by [`cjson`]; signing keys live behind [`crypto::CryptoService`],
//! a composition of [`crypto::KeyStore`] backends; durable role bytes live behind
//! [`storage::MetaStore`]. Clients bootstrap trust for a collection with
//! [`trustpin::TrustPinning`] and keep validated bytes in a [`cache::LocalCache`].

#![warn(missing_docs, rust_2018_idioms)]
#![allow(clippy::used_underscore_binding)]

pub mod cache;
pub mod cjson;
pub mod crypto;
pub mod error;
pub mod repo;
pub mod schema;
pub mod sign;
pub mod storage;
pub mod trustpin;
pub mod validator;

pub use crate::cache::LocalCache;
pub use crate::crypto::{CryptoService, KeyStore, MemoryKeyStore};
pub use crate::error::{Error, Result};
pub use crate::repo::{Repository, SignedRole};
pub use crate::sign::{KeyAlgorithm, PrivateKey, Sign};
pub use crate::storage::{MemStorage, MetaStore, MetaUpdate};
pub use crate::trustpin::TrustPinning;
pub use crate::validator::validate_update;
