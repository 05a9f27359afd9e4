//! Provides a wrapper around `Vec<u8>` that remembers the encoded string it was parsed from.
//! Key IDs, digests, and signatures travel as strings on the wire but are compared as bytes;
//! keeping both forms means re-serialization reproduces the exact signed image.

use crate::schema::error::{self, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snafu::ResultExt;
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Deref;

/// A string encoding scheme for byte data.
pub trait Encode {
    /// Encode bytes into their string form.
    fn encode(bytes: &[u8]) -> String;
}

/// The inverse of [`Encode`].
pub trait Decode {
    /// Decode a string into bytes.
    fn decode(s: &str) -> Result<Vec<u8>>;
}

/// Lowercase hexadecimal encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hex;

impl Encode for Hex {
    fn encode(bytes: &[u8]) -> String {
        hex::encode(bytes)
    }
}

impl Decode for Hex {
    fn decode(s: &str) -> Result<Vec<u8>> {
        hex::decode(s).context(error::HexDecode { hex: s })
    }
}

/// Decoded bytes alongside the original string representation they were decoded from.
///
/// Equality, ordering, and hashing consider only the decoded bytes, so `Decoded<Hex>` values
/// that differ in case still compare equal.
#[derive(Clone)]
pub struct Decoded<T> {
    bytes: Vec<u8>,
    original: String,
    spooky: PhantomData<T>,
}

impl<T> Decoded<T> {
    /// Consumes self and returns the decoded bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

impl<T: Decode> Decoded<T> {
    /// Parses a string in this encoding.
    pub fn parse(s: &str) -> Result<Self> {
        Ok(Self {
            bytes: T::decode(s)?,
            original: s.to_owned(),
            spooky: PhantomData,
        })
    }
}

impl<T: Encode> From<Vec<u8>> for Decoded<T> {
    fn from(bytes: Vec<u8>) -> Self {
        let original = T::encode(&bytes);
        Self {
            bytes,
            original,
            spooky: PhantomData,
        }
    }
}

impl<T> AsRef<[u8]> for Decoded<T> {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl<T> Borrow<[u8]> for Decoded<T> {
    fn borrow(&self) -> &[u8] {
        &self.bytes
    }
}

impl<T> Deref for Decoded<T> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl<T> fmt::Debug for Decoded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.original, f)
    }
}

impl<T> fmt::Display for Decoded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.original, f)
    }
}

impl<T> PartialEq for Decoded<T> {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl<T> Eq for Decoded<T> {}

impl<T> PartialEq<[u8]> for Decoded<T> {
    fn eq(&self, other: &[u8]) -> bool {
        self.bytes == other
    }
}

impl<T> PartialOrd for Decoded<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Decoded<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

// Matches the Eq impl: only the bytes participate.
impl<T> Hash for Decoded<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl<T> Serialize for Decoded<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.original)
    }
}

impl<'de, T: Decode> Deserialize<'de> for Decoded<T> {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let original = String::deserialize(deserializer)?;
        let bytes = T::decode(&original).map_err(serde::de::Error::custom)?;
        Ok(Self {
            bytes,
            original,
            spooky: PhantomData,
        })
    }
}
