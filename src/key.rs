use std::fmt;
use std::str::FromStr;

use const_oid::ObjectIdentifier;
use ed25519_dalek::SigningKey as Ed25519SigningKey;
use p256::ecdsa::{SigningKey as P256SigningKey, VerifyingKey as P256VerifyingKey};
use p384::ecdsa::{SigningKey as P384SigningKey, VerifyingKey as P384VerifyingKey};
use pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer};
use rsa::{RsaPrivateKey, RsaPublicKey, pkcs1v15::SigningKey as RsaSigningKey};
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use crate::cert::SignatureAlgorithm;
use crate::error::{CertDepotError, Result};
use crate::pem_utils;

const RSA_ENCRYPTION: ObjectIdentifier = const_oid::db::rfc5912::RSA_ENCRYPTION;
const ID_EC_PUBLIC_KEY: ObjectIdentifier = const_oid::db::rfc5912::ID_EC_PUBLIC_KEY;
const SECP_256_R_1: ObjectIdentifier = const_oid::db::rfc5912::SECP_256_R_1;
const SECP_384_R_1: ObjectIdentifier = const_oid::db::rfc5912::SECP_384_R_1;
const ID_ED_25519: ObjectIdentifier = const_oid::db::rfc8410::ID_ED_25519;

/// Message digests accepted in CA configuration (`req_default_md`,
/// `cert_signing_md`) and in request attributes (`md_algo`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDigest {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl FromStr for MessageDigest {
    type Err = CertDepotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha1" => Ok(MessageDigest::Sha1),
            "sha256" => Ok(MessageDigest::Sha256),
            "sha384" => Ok(MessageDigest::Sha384),
            "sha512" => Ok(MessageDigest::Sha512),
            other => Err(CertDepotError::Config(format!(
                "unsupported message digest \"{other}\""
            ))),
        }
    }
}

impl fmt::Display for MessageDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageDigest::Sha1 => "sha1",
            MessageDigest::Sha256 => "sha256",
            MessageDigest::Sha384 => "sha384",
            MessageDigest::Sha512 => "sha512",
        };
        f.write_str(name)
    }
}

/// A key algorithm together with its size, resolved from the `algorithm` and
/// `bits` attributes of a key request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa { bits: usize },
    EcdsaP256,
    EcdsaP384,
    Ed25519,
}

impl KeyAlgorithm {
    /// Resolves an algorithm name and bit size.
    ///
    /// `rsa` takes any size the RSA implementation accepts; `ec`/`ecdsa` pick
    /// the curve from the size (256 or 384); `ed25519` ignores the size.
    pub fn from_attrs(algorithm: &str, bits: &str) -> Result<Self> {
        let parse_bits = || {
            bits.trim().parse::<usize>().map_err(|_| {
                CertDepotError::Config(format!("invalid key size \"{bits}\""))
            })
        };
        match algorithm.trim().to_ascii_lowercase().as_str() {
            "rsa" => Ok(KeyAlgorithm::Rsa { bits: parse_bits()? }),
            "ec" | "ecdsa" => match parse_bits()? {
                256 => Ok(KeyAlgorithm::EcdsaP256),
                384 => Ok(KeyAlgorithm::EcdsaP384),
                other => Err(CertDepotError::Config(format!(
                    "unsupported ECDSA key size {other}, expected 256 or 384"
                ))),
            },
            "ed25519" => Ok(KeyAlgorithm::Ed25519),
            other => Err(CertDepotError::Config(format!(
                "unsupported key algorithm \"{other}\""
            ))),
        }
    }
}

/// Supported key types for certificate operations.
#[derive(Clone)]
pub enum KeyPair {
    Rsa {
        private: Box<RsaPrivateKey>,
        public: RsaPublicKey,
    },
    EcdsaP256 {
        signing_key: P256SigningKey,
        verifying_key: P256VerifyingKey,
    },
    EcdsaP384 {
        signing_key: P384SigningKey,
        verifying_key: P384VerifyingKey,
    },
    Ed25519 {
        signing_key: Ed25519SigningKey,
    },
}

impl fmt::Debug for KeyPair {
    // Private material stays out of logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("algorithm", &self.algorithm_name())
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generate a key pair for the given algorithm.
    pub fn generate(algorithm: KeyAlgorithm) -> Result<Self> {
        match algorithm {
            KeyAlgorithm::Rsa { bits } => Self::generate_rsa(bits),
            KeyAlgorithm::EcdsaP256 => Ok(Self::generate_ecdsa_p256()),
            KeyAlgorithm::EcdsaP384 => Ok(Self::generate_ecdsa_p384()),
            KeyAlgorithm::Ed25519 => Ok(Self::generate_ed25519()),
        }
    }

    /// Generate an RSA key pair with the specified number of bits.
    pub fn generate_rsa(bits: usize) -> Result<Self> {
        let mut rng = rand_core::OsRng;
        let private = RsaPrivateKey::new(&mut rng, bits)?;
        let public = RsaPublicKey::from(&private);
        Ok(KeyPair::Rsa {
            private: Box::new(private),
            public,
        })
    }

    /// Generate an ECDSA P-256 key pair.
    pub fn generate_ecdsa_p256() -> Self {
        let mut rng = rand_core::OsRng;
        let signing_key = P256SigningKey::random(&mut rng);
        let verifying_key = signing_key.verifying_key().to_owned();
        KeyPair::EcdsaP256 {
            signing_key,
            verifying_key,
        }
    }

    /// Generate an ECDSA P-384 key pair.
    pub fn generate_ecdsa_p384() -> Self {
        let mut rng = rand_core::OsRng;
        let signing_key = P384SigningKey::random(&mut rng);
        let verifying_key = signing_key.verifying_key().to_owned();
        KeyPair::EcdsaP384 {
            signing_key,
            verifying_key,
        }
    }

    /// Generate an Ed25519 key pair.
    pub fn generate_ed25519() -> Self {
        let mut rng = rand_core::OsRng;
        let signing_key: Ed25519SigningKey = Ed25519SigningKey::generate(&mut rng);
        KeyPair::Ed25519 { signing_key }
    }

    pub fn algorithm_name(&self) -> &'static str {
        match self {
            KeyPair::Rsa { .. } => "rsa",
            KeyPair::EcdsaP256 { .. } => "ecdsa-p256",
            KeyPair::EcdsaP384 { .. } => "ecdsa-p384",
            KeyPair::Ed25519 { .. } => "ed25519",
        }
    }

    /// Encodes the private key as a PKCS#8 `PRIVATE KEY` PEM block.
    pub fn to_pkcs8_pem(&self) -> Result<String> {
        let pem = match self {
            KeyPair::Rsa { private, .. } => private.to_pkcs8_pem(LineEnding::LF)?,
            KeyPair::EcdsaP256 { signing_key, .. } => signing_key.to_pkcs8_pem(LineEnding::LF)?,
            KeyPair::EcdsaP384 { signing_key, .. } => signing_key.to_pkcs8_pem(LineEnding::LF)?,
            KeyPair::Ed25519 { signing_key } => signing_key.to_pkcs8_pem(LineEnding::LF)?,
        };
        Ok(pem.to_string())
    }

    /// Imports the first `PRIVATE KEY` block found in `text`.
    ///
    /// Other PEM blocks are skipped, so a combined certificate+key file loads
    /// the same way a bare key file does.
    pub fn import_from_pkcs8_pem(text: &str) -> Result<Self> {
        let block = pem_utils::find_block(text, pem_utils::PRIVATE_KEY_LABEL)?;
        Self::import_from_pkcs8_der(block.contents())
    }

    /// Imports a DER-encoded PKCS#8 private key, dispatching on its algorithm.
    pub fn import_from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let info = pkcs8::PrivateKeyInfo::try_from(der)?;
        match info.algorithm.oid {
            RSA_ENCRYPTION => {
                let private = RsaPrivateKey::from_pkcs8_der(der)?;
                let public = RsaPublicKey::from(&private);
                Ok(KeyPair::Rsa {
                    private: Box::new(private),
                    public,
                })
            }
            ID_EC_PUBLIC_KEY => match info.algorithm.parameters_oid()? {
                SECP_256_R_1 => {
                    let signing_key = P256SigningKey::from_pkcs8_der(der)?;
                    let verifying_key = signing_key.verifying_key().to_owned();
                    Ok(KeyPair::EcdsaP256 {
                        signing_key,
                        verifying_key,
                    })
                }
                SECP_384_R_1 => {
                    let signing_key = P384SigningKey::from_pkcs8_der(der)?;
                    let verifying_key = signing_key.verifying_key().to_owned();
                    Ok(KeyPair::EcdsaP384 {
                        signing_key,
                        verifying_key,
                    })
                }
                curve => Err(CertDepotError::Decoding(format!(
                    "unsupported elliptic curve {curve}"
                ))),
            },
            ID_ED_25519 => {
                let signing_key = Ed25519SigningKey::from_pkcs8_der(der)?;
                Ok(KeyPair::Ed25519 { signing_key })
            }
            oid => Err(CertDepotError::Decoding(format!(
                "unsupported private key algorithm {oid}"
            ))),
        }
    }

    /// Returns the SubjectPublicKeyInfo of the public half.
    pub fn as_spki(&self) -> Result<SubjectPublicKeyInfoOwned> {
        let spki = match self {
            KeyPair::Rsa { public, .. } => SubjectPublicKeyInfoOwned::from_key(public.clone())?,
            KeyPair::EcdsaP256 { verifying_key, .. } => {
                SubjectPublicKeyInfoOwned::from_key(*verifying_key)?
            }
            KeyPair::EcdsaP384 { verifying_key, .. } => {
                SubjectPublicKeyInfoOwned::from_key(*verifying_key)?
            }
            KeyPair::Ed25519 { signing_key } => {
                let pk_bytes = signing_key.verifying_key().to_bytes();
                SubjectPublicKeyInfoOwned {
                    algorithm: x509_cert::spki::AlgorithmIdentifierOwned {
                        oid: ID_ED_25519,
                        parameters: None,
                    },
                    subject_public_key: der::asn1::BitString::from_bytes(&pk_bytes)?,
                }
            }
        };
        Ok(spki)
    }

    /// The signature algorithm this key produces for the requested digest.
    ///
    /// Only RSA honours the digest. ECDSA keys are bound to their curve's
    /// digest and Ed25519 hashes internally.
    pub fn signature_algorithm(&self, digest: MessageDigest) -> SignatureAlgorithm {
        match self {
            KeyPair::Rsa { .. } => match digest {
                MessageDigest::Sha1 => SignatureAlgorithm::Sha1WithRSA,
                MessageDigest::Sha256 => SignatureAlgorithm::Sha256WithRSA,
                MessageDigest::Sha384 => SignatureAlgorithm::Sha384WithRSA,
                MessageDigest::Sha512 => SignatureAlgorithm::Sha512WithRSA,
            },
            KeyPair::EcdsaP256 { .. } => SignatureAlgorithm::Sha256WithECDSA,
            KeyPair::EcdsaP384 { .. } => SignatureAlgorithm::Sha384WithECDSA,
            KeyPair::Ed25519 { .. } => SignatureAlgorithm::Ed25519,
        }
    }

    /// Signs `data`, returning the signature in the encoding X.509 expects
    /// (PKCS#1 v1.5 for RSA, DER `Ecdsa-Sig-Value` for ECDSA, raw for Ed25519).
    pub fn sign_data(&self, data: &[u8], digest: MessageDigest) -> Result<Vec<u8>> {
        let crypto_err = |e: rsa::signature::Error| CertDepotError::Crypto(e.to_string());
        match self {
            KeyPair::Rsa { private, .. } => {
                let private = (**private).clone();
                let signature = match digest {
                    MessageDigest::Sha1 => RsaSigningKey::<sha1::Sha1>::new(private)
                        .try_sign(data)
                        .map_err(crypto_err)?
                        .to_vec(),
                    MessageDigest::Sha256 => RsaSigningKey::<sha2::Sha256>::new(private)
                        .try_sign(data)
                        .map_err(crypto_err)?
                        .to_vec(),
                    MessageDigest::Sha384 => RsaSigningKey::<sha2::Sha384>::new(private)
                        .try_sign(data)
                        .map_err(crypto_err)?
                        .to_vec(),
                    MessageDigest::Sha512 => RsaSigningKey::<sha2::Sha512>::new(private)
                        .try_sign(data)
                        .map_err(crypto_err)?
                        .to_vec(),
                };
                Ok(signature)
            }
            KeyPair::EcdsaP256 { signing_key, .. } => {
                let signature: p256::ecdsa::Signature =
                    signing_key.try_sign(data).map_err(crypto_err)?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
            KeyPair::EcdsaP384 { signing_key, .. } => {
                let signature: p384::ecdsa::Signature =
                    signing_key.try_sign(data).map_err(crypto_err)?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
            KeyPair::Ed25519 { signing_key } => {
                let signature = signing_key.try_sign(data).map_err(crypto_err)?;
                Ok(signature.to_bytes().to_vec())
            }
        }
    }
}
