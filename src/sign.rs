// Copyright The Notary Project Authors. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Signing key handles. A [`PrivateKey`] owns encoded private key material; the
//! [`Sign`] trait is the capability every signing backend exposes.

use crate::error::{self, Result};
use crate::schema::key::{EcdsaKey, EcdsaScheme, Ed25519Key, Key, RsaKey, RsaScheme};
use crate::schema::SignatureMethod;
use ring::rand::SecureRandom;
use ring::signature::{EcdsaKeyPair, Ed25519KeyPair, KeyPair, RsaKeyPair};
use serde::{Deserialize, Serialize};
use serde_plain::{forward_display_to_serde, forward_from_str_to_serde};
use snafu::{OptionExt, ResultExt};
use std::collections::HashMap;

/// This trait must be implemented for each type of key with which you will sign
/// things.
pub trait Sign: Sync + Send {
    /// Returns the public key along with its scheme and other metadata.
    fn tuf_key(&self) -> Key;

    /// The signing method, recorded next to each signature this key produces.
    fn method(&self) -> SignatureMethod;

    /// Signs the supplied message.
    fn sign(&self, msg: &[u8], rng: &dyn SecureRandom) -> Result<Vec<u8>>;
}

/// Implements the Sign trait for Ed25519 keypairs.
impl Sign for Ed25519KeyPair {
    fn tuf_key(&self) -> Key {
        Key::Ed25519 {
            keyval: Ed25519Key {
                public: self.public_key().as_ref().to_vec().into(),
                _extra: HashMap::new(),
            },
            scheme: crate::schema::key::Ed25519Scheme::Ed25519,
            _extra: HashMap::new(),
        }
    }

    fn method(&self) -> SignatureMethod {
        SignatureMethod::Ed25519
    }

    fn sign(&self, msg: &[u8], _rng: &dyn SecureRandom) -> Result<Vec<u8>> {
        Ok(self.sign(msg).as_ref().to_vec())
    }
}

/// An ECDSA keypair together with the curve it was generated over, which ring's own
/// keypair type does not expose.
pub struct EcdsaPair {
    scheme: EcdsaScheme,
    pair: EcdsaKeyPair,
}

impl Sign for EcdsaPair {
    fn tuf_key(&self) -> Key {
        Key::Ecdsa {
            keyval: EcdsaKey {
                public: self.pair.public_key().as_ref().to_vec().into(),
                _extra: HashMap::new(),
            },
            scheme: self.scheme,
            _extra: HashMap::new(),
        }
    }

    fn method(&self) -> SignatureMethod {
        SignatureMethod::Ecdsa
    }

    fn sign(&self, msg: &[u8], rng: &dyn SecureRandom) -> Result<Vec<u8>> {
        let signature = self.pair.sign(rng, msg).context(error::Sign)?;
        Ok(signature.as_ref().to_vec())
    }
}

/// Implements the Sign trait for RSA keypairs.
impl Sign for RsaKeyPair {
    fn tuf_key(&self) -> Key {
        Key::Rsa {
            keyval: RsaKey {
                public: self.public_key().as_ref().to_vec().into(),
                _extra: HashMap::new(),
            },
            scheme: RsaScheme::RsassaPssSha256,
            _extra: HashMap::new(),
        }
    }

    fn method(&self) -> SignatureMethod {
        SignatureMethod::RsaPss
    }

    fn sign(&self, msg: &[u8], rng: &dyn SecureRandom) -> Result<Vec<u8>> {
        let mut signature = vec![0; self.public_modulus_len()];
        self.sign(&ring::signature::RSA_PSS_SHA256, rng, msg, &mut signature)
            .context(error::Sign)?;
        Ok(signature)
    }
}

/// The algorithms a [`PrivateKey`] can hold.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// Ed25519.
    #[serde(rename = "ed25519")]
    Ed25519,
    /// ECDSA over NIST P-256 with SHA-256.
    #[serde(rename = "ecdsa")]
    EcdsaP256,
    /// ECDSA over NIST P-384 with SHA-384.
    #[serde(rename = "ecdsa-p384")]
    EcdsaP384,
    /// RSA with RSASSA-PSS signatures. Import only; generation is unsupported.
    #[serde(rename = "rsa")]
    Rsa,
}

forward_display_to_serde!(KeyAlgorithm);
forward_from_str_to_serde!(KeyAlgorithm);

/// An owned private key: the DER encoding of the key material plus its algorithm.
///
/// The corresponding public key is computed once at construction, so handing out
/// [`Key`] objects never touches the private material.
#[derive(Clone)]
pub struct PrivateKey {
    algorithm: KeyAlgorithm,
    der: Vec<u8>,
    public: Key,
}

// The Debug form must never leak key material.
impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

impl PrivateKey {
    /// Generates a fresh keypair. Ed25519 and ECDSA only; ring does not generate RSA
    /// keys, so RSA keys must be imported with [`PrivateKey::parse`].
    pub fn generate(algorithm: KeyAlgorithm, rng: &dyn SecureRandom) -> Result<Self> {
        let der = match algorithm {
            KeyAlgorithm::Ed25519 => Ed25519KeyPair::generate_pkcs8(rng)
                .context(error::Sign)?
                .as_ref()
                .to_vec(),
            KeyAlgorithm::EcdsaP256 => EcdsaKeyPair::generate_pkcs8(
                &ring::signature::ECDSA_P256_SHA256_ASN1_SIGNING,
                rng,
            )
            .context(error::Sign)?
            .as_ref()
            .to_vec(),
            KeyAlgorithm::EcdsaP384 => EcdsaKeyPair::generate_pkcs8(
                &ring::signature::ECDSA_P384_SHA384_ASN1_SIGNING,
                rng,
            )
            .context(error::Sign)?
            .as_ref()
            .to_vec(),
            KeyAlgorithm::Rsa => {
                return error::UnsupportedAlgorithm {
                    algorithm: algorithm.to_string(),
                }
                .fail();
            }
        };
        Self::from_der(algorithm, der)
    }

    /// Parses a PEM private key, trying each supported algorithm.
    pub fn parse(pem_data: &[u8]) -> Result<Self> {
        let block = pem::parse(pem_data).ok().context(error::KeyUnrecognized)?;
        match block.tag.as_str() {
            "PRIVATE KEY" => Self::from_any_pkcs8(block.contents),
            "RSA PRIVATE KEY" => Self::from_der(KeyAlgorithm::Rsa, block.contents),
            _ => error::KeyUnrecognized.fail(),
        }
    }

    /// Wraps already-decoded DER key material.
    pub fn from_der(algorithm: KeyAlgorithm, der: Vec<u8>) -> Result<Self> {
        let public = keypair(algorithm, &der)?.tuf_key();
        Ok(Self {
            algorithm,
            der,
            public,
        })
    }

    fn from_any_pkcs8(der: Vec<u8>) -> Result<Self> {
        for algorithm in &[
            KeyAlgorithm::Ed25519,
            KeyAlgorithm::EcdsaP256,
            KeyAlgorithm::EcdsaP384,
            KeyAlgorithm::Rsa,
        ] {
            if let Ok(key) = Self::from_der(*algorithm, der.clone()) {
                return Ok(key);
            }
        }
        error::KeyUnrecognized.fail()
    }

    /// The key's algorithm.
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// Overwrites the private key material. Called by key stores when a key is
    /// removed.
    pub fn zeroize(&mut self) {
        for byte in self.der.iter_mut() {
            *byte = 0;
        }
    }
}

impl Sign for PrivateKey {
    fn tuf_key(&self) -> Key {
        self.public.clone()
    }

    fn method(&self) -> SignatureMethod {
        match self.algorithm {
            KeyAlgorithm::Ed25519 => SignatureMethod::Ed25519,
            KeyAlgorithm::EcdsaP256 | KeyAlgorithm::EcdsaP384 => SignatureMethod::Ecdsa,
            KeyAlgorithm::Rsa => SignatureMethod::RsaPss,
        }
    }

    fn sign(&self, msg: &[u8], rng: &dyn SecureRandom) -> Result<Vec<u8>> {
        keypair(self.algorithm, &self.der)?.sign(msg, rng)
    }
}

/// Parses DER key material into a usable keypair.
fn keypair(algorithm: KeyAlgorithm, der: &[u8]) -> Result<Box<dyn Sign>> {
    match algorithm {
        KeyAlgorithm::Ed25519 => {
            let pair = Ed25519KeyPair::from_pkcs8(der).context(error::KeyRejected)?;
            Ok(Box::new(pair))
        }
        KeyAlgorithm::EcdsaP256 => {
            let pair =
                EcdsaKeyPair::from_pkcs8(&ring::signature::ECDSA_P256_SHA256_ASN1_SIGNING, der)
                    .context(error::KeyRejected)?;
            Ok(Box::new(EcdsaPair {
                scheme: EcdsaScheme::EcdsaSha2Nistp256,
                pair,
            }))
        }
        KeyAlgorithm::EcdsaP384 => {
            let pair =
                EcdsaKeyPair::from_pkcs8(&ring::signature::ECDSA_P384_SHA384_ASN1_SIGNING, der)
                    .context(error::KeyRejected)?;
            Ok(Box::new(EcdsaPair {
                scheme: EcdsaScheme::EcdsaSha2Nistp384,
                pair,
            }))
        }
        KeyAlgorithm::Rsa => {
            // Accept both PKCS#8 and the bare RSAPrivateKey encoding the legacy PEM
            // tag carries.
            let pair = RsaKeyPair::from_pkcs8(der)
                .or_else(|_| RsaKeyPair::from_der(der))
                .context(error::KeyRejected)?;
            Ok(Box::new(pair))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::rand::SystemRandom;

    #[test]
    fn generate_sign_verify_round_trip() {
        let rng = SystemRandom::new();
        for algorithm in &[
            KeyAlgorithm::Ed25519,
            KeyAlgorithm::EcdsaP256,
            KeyAlgorithm::EcdsaP384,
        ] {
            let key = PrivateKey::generate(*algorithm, &rng).unwrap();
            let msg = b"attack at dawn";
            let sig = key.sign(msg, &rng).unwrap();
            assert!(key.tuf_key().verify(msg, &sig));
            assert!(!key.tuf_key().verify(b"attack at noon", &sig));
        }
    }

    #[test]
    fn rsa_generation_is_unsupported() {
        let rng = SystemRandom::new();
        assert!(PrivateKey::generate(KeyAlgorithm::Rsa, &rng).is_err());
    }

    #[test]
    fn key_ids_differ_per_key() {
        let rng = SystemRandom::new();
        let a = PrivateKey::generate(KeyAlgorithm::Ed25519, &rng).unwrap();
        let b = PrivateKey::generate(KeyAlgorithm::Ed25519, &rng).unwrap();
        assert_ne!(
            a.tuf_key().key_id().unwrap(),
            b.tuf_key().key_id().unwrap()
        );
    }
}
