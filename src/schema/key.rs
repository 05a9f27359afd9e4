//! Public key objects as they appear in role metadata.
//!
//! A key's ID is the SHA-256 digest of its canonical JSON form. The x509-wrapped
//! variants carry a certificate, but their ID is computed from the raw public key
//! embedded in it, so reissuing a certificate for the same key keeps the same ID.

use crate::schema::decoded::{Decoded, Hex};
use crate::schema::error::{self, Result};
use ring::digest::{digest, SHA256};
use ring::signature::UnparsedPublicKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_plain::{forward_display_to_serde, forward_from_str_to_serde};
use snafu::{OptionExt, ResultExt};
use std::collections::HashMap;
use x509_cert::der::asn1::ObjectIdentifier;
use x509_cert::der::Decode;
use x509_cert::Certificate;

const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
const OID_NIST_P256: &str = "1.2.840.10045.3.1.7";
const OID_NIST_P384: &str = "1.3.132.0.34";

/// A public key.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "keytype")]
pub enum Key {
    /// An Ed25519 key.
    #[serde(rename = "ed25519")]
    Ed25519 {
        /// The Ed25519 key.
        keyval: Ed25519Key,
        /// Denotes the key's signature scheme.
        scheme: Ed25519Scheme,
        /// Extra arguments found during deserialization.
        #[serde(flatten)]
        _extra: HashMap<String, Value>,
    },
    /// An ECDSA key.
    #[serde(rename = "ecdsa")]
    Ecdsa {
        /// The ECDSA key.
        keyval: EcdsaKey,
        /// Denotes the key's signature scheme.
        scheme: EcdsaScheme,
        /// Extra arguments found during deserialization.
        #[serde(flatten)]
        _extra: HashMap<String, Value>,
    },
    /// An RSA key.
    #[serde(rename = "rsa")]
    Rsa {
        /// The RSA key.
        keyval: RsaKey,
        /// Denotes the key's signature scheme.
        scheme: RsaScheme,
        /// Extra arguments found during deserialization.
        #[serde(flatten)]
        _extra: HashMap<String, Value>,
    },
    /// An ECDSA key wrapped in an x.509 certificate.
    #[serde(rename = "ecdsa-x509")]
    EcdsaX509 {
        /// The certificate in PEM form.
        keyval: X509Key,
        /// Extra arguments found during deserialization.
        #[serde(flatten)]
        _extra: HashMap<String, Value>,
    },
    /// An RSA key wrapped in an x.509 certificate.
    #[serde(rename = "rsa-x509")]
    RsaX509 {
        /// The certificate in PEM form.
        keyval: X509Key,
        /// Extra arguments found during deserialization.
        #[serde(flatten)]
        _extra: HashMap<String, Value>,
    },
}

/// Used to identify the Ed25519 signature scheme.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum Ed25519Scheme {
    /// 'ed25519': Ed25519 signatures over SHA-512.
    #[serde(rename = "ed25519")]
    Ed25519,
}

forward_display_to_serde!(Ed25519Scheme);
forward_from_str_to_serde!(Ed25519Scheme);

/// Used to identify the ECDSA signature scheme in use.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum EcdsaScheme {
    /// 'ecdsa-sha2-nistp256': ECDSA over the NIST P-256 curve with SHA-256.
    #[serde(rename = "ecdsa-sha2-nistp256")]
    EcdsaSha2Nistp256,
    /// 'ecdsa-sha2-nistp384': ECDSA over the NIST P-384 curve with SHA-384.
    #[serde(rename = "ecdsa-sha2-nistp384")]
    EcdsaSha2Nistp384,
}

forward_display_to_serde!(EcdsaScheme);
forward_from_str_to_serde!(EcdsaScheme);

/// Used to identify the RSA signature scheme in use.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum RsaScheme {
    /// 'rsassa-pss-sha256': RSA Probabilistic signature scheme with appendix.
    #[serde(rename = "rsassa-pss-sha256")]
    RsassaPssSha256,
}

forward_display_to_serde!(RsaScheme);
forward_from_str_to_serde!(RsaScheme);

/// An Ed25519 public key value.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Ed25519Key {
    /// The raw public key bytes.
    pub public: Decoded<Hex>,
    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// An ECDSA public key value: the uncompressed curve point.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EcdsaKey {
    /// The raw public key bytes.
    pub public: Decoded<Hex>,
    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// An RSA public key value: the DER-encoded RSAPublicKey structure.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RsaKey {
    /// The raw public key bytes.
    pub public: Decoded<Hex>,
    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// An x.509 certificate wrapping a public key.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct X509Key {
    /// The certificate as a PEM stream.
    pub certificate: String,
    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Key {
    /// Calculates the key ID: the SHA-256 digest of the canonical form of the key the
    /// signatures actually come from. For x509-wrapped keys that is the embedded raw
    /// key, not the certificate bytes.
    pub fn key_id(&self) -> Result<Decoded<Hex>> {
        match self {
            Key::EcdsaX509 { .. } | Key::RsaX509 { .. } => self.raw_equivalent()?.key_id(),
            _ => {
                let canonical = crate::cjson::to_canonical(self)
                    .context(error::JsonSerialization { what: "key" })?;
                Ok(digest(&SHA256, &canonical).as_ref().to_vec().into())
            }
        }
    }

    /// The wire name of this key's type.
    pub fn keytype(&self) -> &'static str {
        match self {
            Key::Ed25519 { .. } => "ed25519",
            Key::Ecdsa { .. } => "ecdsa",
            Key::Rsa { .. } => "rsa",
            Key::EcdsaX509 { .. } => "ecdsa-x509",
            Key::RsaX509 { .. } => "rsa-x509",
        }
    }

    /// Checks `sig` over `msg` with this key. Malformed keys and certificates verify
    /// as false rather than erroring; a signature that cannot be checked is not valid.
    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        type Alg = &'static dyn ring::signature::VerificationAlgorithm;
        let (alg, public): (Alg, &Decoded<Hex>) = match self {
            Key::Ed25519 {
                keyval,
                scheme: Ed25519Scheme::Ed25519,
                ..
            } => (&ring::signature::ED25519, &keyval.public),
            Key::Ecdsa {
                keyval,
                scheme: EcdsaScheme::EcdsaSha2Nistp256,
                ..
            } => (&ring::signature::ECDSA_P256_SHA256_ASN1, &keyval.public),
            Key::Ecdsa {
                keyval,
                scheme: EcdsaScheme::EcdsaSha2Nistp384,
                ..
            } => (&ring::signature::ECDSA_P384_SHA384_ASN1, &keyval.public),
            Key::Rsa {
                keyval,
                scheme: RsaScheme::RsassaPssSha256,
                ..
            } => (&ring::signature::RSA_PSS_2048_8192_SHA256, &keyval.public),
            Key::EcdsaX509 { .. } | Key::RsaX509 { .. } => {
                return match self.raw_equivalent() {
                    Ok(key) => key.verify(msg, sig),
                    Err(_) => false,
                };
            }
        };
        UnparsedPublicKey::new(alg, public).verify(msg, sig).is_ok()
    }

    /// For x509-wrapped keys, the raw key extracted from the certificate's
    /// SubjectPublicKeyInfo; other keys are returned as-is.
    pub fn raw_equivalent(&self) -> Result<Key> {
        let (pem_data, want_ec) = match self {
            Key::EcdsaX509 { keyval, .. } => (&keyval.certificate, true),
            Key::RsaX509 { keyval, .. } => (&keyval.certificate, false),
            _ => return Ok(self.clone()),
        };
        let block = pem::parse(pem_data.as_bytes()).context(error::PemDecode)?;
        let cert = Certificate::from_der(&block.contents).context(error::CertificateParse)?;
        let spki = &cert.tbs_certificate.subject_public_key_info;
        let public: Vec<u8> = spki
            .subject_public_key
            .as_bytes()
            .context(error::CertificateNoPublicKey)?
            .to_vec();
        let alg_oid = spki.algorithm.oid.to_string();
        if want_ec {
            snafu::ensure!(
                alg_oid == OID_EC_PUBLIC_KEY,
                error::CertificateKeyType {
                    oid: alg_oid,
                    keytype: "ecdsa-x509",
                }
            );
            let curve = spki
                .algorithm
                .parameters
                .as_ref()
                .and_then(|params| params.decode_as::<ObjectIdentifier>().ok())
                .map(|oid| oid.to_string())
                .unwrap_or_default();
            let scheme = match curve.as_str() {
                OID_NIST_P256 => EcdsaScheme::EcdsaSha2Nistp256,
                OID_NIST_P384 => EcdsaScheme::EcdsaSha2Nistp384,
                _ => return error::UnsupportedCurve { oid: curve }.fail(),
            };
            Ok(Key::Ecdsa {
                keyval: EcdsaKey {
                    public: public.into(),
                    _extra: HashMap::new(),
                },
                scheme,
                _extra: HashMap::new(),
            })
        } else {
            snafu::ensure!(
                alg_oid == OID_RSA_ENCRYPTION,
                error::CertificateKeyType {
                    oid: alg_oid,
                    keytype: "rsa-x509",
                }
            );
            Ok(Key::Rsa {
                keyval: RsaKey {
                    public: public.into(),
                    _extra: HashMap::new(),
                },
                scheme: RsaScheme::RsassaPssSha256,
                _extra: HashMap::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ed25519_key(fill: u8) -> Key {
        Key::Ed25519 {
            keyval: Ed25519Key {
                public: vec![fill; 32].into(),
                _extra: HashMap::new(),
            },
            scheme: Ed25519Scheme::Ed25519,
            _extra: HashMap::new(),
        }
    }

    #[test]
    fn key_id_is_stable() {
        let key = ed25519_key(1);
        assert_eq!(key.key_id().unwrap(), key.key_id().unwrap());
        assert_ne!(key.key_id().unwrap(), ed25519_key(2).key_id().unwrap());
    }

    #[test]
    fn key_round_trips() {
        let key = ed25519_key(7);
        let json = serde_json::to_string(&key).unwrap();
        let parsed: Key = serde_json::from_str(&json).unwrap();
        assert_eq!(key, parsed);
        assert_eq!(key.key_id().unwrap(), parsed.key_id().unwrap());
    }

    #[test]
    fn keytype_names() {
        assert_eq!(ed25519_key(0).keytype(), "ed25519");
    }
}
