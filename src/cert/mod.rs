pub mod ext_config;
pub mod extensions;
pub mod params;

use der::{Decode, Encode, EncodePem};
use extensions::{SubjectKeyIdentifier, ToAndFromX509Extension};
use params::{CertificationRequestInfo, DistinguishedName, ExtensionParam, Validity};
use x509_cert::certificate::CertificateInner;
use x509_cert::request::{CertReq, CertReqInfo};
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use crate::error::{CertDepotError, Result};
use crate::issuer::Issuer;
use crate::key::{KeyPair, MessageDigest};
use crate::pem_utils;

/// Represents the supported signature algorithms for certificates and
/// requests.
///
/// This enum provides a mapping to the corresponding OIDs for each algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    /// SHA-1 with RSA encryption. Only for CAs configured that way.
    Sha1WithRSA,
    /// SHA-256 with RSA encryption.
    Sha256WithRSA,
    /// SHA-384 with RSA encryption.
    Sha384WithRSA,
    /// SHA-512 with RSA encryption.
    Sha512WithRSA,
    /// SHA-256 with ECDSA.
    Sha256WithECDSA,
    /// SHA-384 with ECDSA.
    Sha384WithECDSA,
    /// Pure Ed25519.
    Ed25519,
}

impl From<SignatureAlgorithm> for x509_cert::spki::AlgorithmIdentifierOwned {
    /// Converts a `SignatureAlgorithm` into an `AlgorithmIdentifierOwned`.
    ///
    /// RSA identifiers carry an explicit NULL parameter, ECDSA and Ed25519
    /// identifiers carry none.
    fn from(value: SignatureAlgorithm) -> Self {
        use const_oid::db::{rfc5912, rfc8410};
        let rsa = |oid: const_oid::ObjectIdentifier| x509_cert::spki::AlgorithmIdentifierOwned {
            oid,
            parameters: Some(der::asn1::Any::from(der::asn1::AnyRef::NULL)),
        };
        let bare = |oid: const_oid::ObjectIdentifier| x509_cert::spki::AlgorithmIdentifierOwned {
            oid,
            parameters: None,
        };
        match value {
            SignatureAlgorithm::Sha1WithRSA => rsa(rfc5912::SHA_1_WITH_RSA_ENCRYPTION),
            SignatureAlgorithm::Sha256WithRSA => rsa(rfc5912::SHA_256_WITH_RSA_ENCRYPTION),
            SignatureAlgorithm::Sha384WithRSA => rsa(rfc5912::SHA_384_WITH_RSA_ENCRYPTION),
            SignatureAlgorithm::Sha512WithRSA => rsa(rfc5912::SHA_512_WITH_RSA_ENCRYPTION),
            SignatureAlgorithm::Sha256WithECDSA => bare(rfc5912::ECDSA_WITH_SHA_256),
            SignatureAlgorithm::Sha384WithECDSA => bare(rfc5912::ECDSA_WITH_SHA_384),
            SignatureAlgorithm::Ed25519 => bare(rfc8410::ID_ED_25519),
        }
    }
}

/// Represents an X.509 certificate.
///
/// This struct provides methods to encode the certificate into DER or PEM formats.
#[derive(Debug, Clone)]
pub struct Certificate {
    /// The inner representation of the certificate.
    pub inner: CertificateInner,
}

impl Certificate {
    /// Encodes the certificate into DER format.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.inner
            .to_der()
            .map_err(|e| CertDepotError::Encoding(e.to_string()))
    }

    /// Encodes the certificate into PEM format.
    pub fn to_pem(&self) -> Result<String> {
        self.inner
            .to_pem(pkcs8::LineEnding::LF)
            .map_err(|e| CertDepotError::Encoding(e.to_string()))
    }

    pub fn from_der(der: &[u8]) -> Result<Self> {
        Ok(Self {
            inner: CertificateInner::from_der(der)?,
        })
    }

    /// Decodes the first `CERTIFICATE` block in `text`.
    pub fn from_pem(text: &str) -> Result<Self> {
        let block = pem_utils::find_block(text, pem_utils::CERTIFICATE_LABEL)?;
        Self::from_der(block.contents())
    }

    pub fn subject(&self) -> &x509_cert::name::Name {
        &self.inner.tbs_certificate.subject
    }

    pub fn issuer(&self) -> &x509_cert::name::Name {
        &self.inner.tbs_certificate.issuer
    }

    pub fn subject_public_key_info(&self) -> &SubjectPublicKeyInfoOwned {
        &self.inner.tbs_certificate.subject_public_key_info
    }

    /// Raw serial number bytes, as encoded.
    pub fn serial_bytes(&self) -> &[u8] {
        self.inner.tbs_certificate.serial_number.as_bytes()
    }

    /// The serial number as an integer, when it fits in 64 bits.
    pub fn serial(&self) -> Option<u64> {
        let bytes = self.serial_bytes();
        let bytes = match bytes.first() {
            Some(0) => &bytes[1..],
            _ => bytes,
        };
        if bytes.len() > 8 {
            return None;
        }
        Some(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    /// All extensions in encoded order.
    pub fn extensions(&self) -> Vec<ExtensionParam> {
        self.inner
            .tbs_certificate
            .extensions
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|ext| ExtensionParam {
                oid: ext.extn_id,
                critical: ext.critical,
                value: ext.extn_value.as_bytes().to_vec(),
            })
            .collect()
    }

    /// The value of the subjectKeyIdentifier extension, if present.
    pub fn subject_key_id(&self) -> Option<Vec<u8>> {
        self.extensions()
            .iter()
            .find(|ext| ext.oid == SubjectKeyIdentifier::OID)
            .and_then(|ext| ext.to_extension::<SubjectKeyIdentifier>().ok())
            .map(|ski| ski.0)
    }

    /// Creates a new self-signed certificate, as used for a CA root.
    ///
    /// The request's extensions are encoded as given; `subject` and `issuer`
    /// are the same name and the serial number is 1.
    pub fn new_self_signed(
        cert_info: &CertificationRequestInfo,
        key: &KeyPair,
        days: i64,
        digest: MessageDigest,
    ) -> Result<Self> {
        let self_issuer = SelfIssuer {
            name: cert_info.subject.as_x509_name()?,
            key,
        };
        self_issuer.sign_tbs(
            crate::tbs_certificate::TbsCertificate {
                serial_number: 1,
                signature_algorithm: key.signature_algorithm(digest),
                issuer: self_issuer.name.clone(),
                validity: Validity::for_days(days)?,
                subject: self_issuer.name.clone(),
                subject_public_key: cert_info.subject_public_key.clone(),
                extensions: cert_info.extensions.clone(),
            },
            digest,
        )
    }
}

// Helper struct for self-signed certificates
struct SelfIssuer<'a> {
    name: x509_cert::name::Name,
    key: &'a KeyPair,
}

impl Issuer for SelfIssuer<'_> {
    fn issuer_name(&self) -> &x509_cert::name::Name {
        &self.name
    }

    fn issuer_certificate(&self) -> Option<&Certificate> {
        None
    }

    fn signing_key(&self) -> &KeyPair {
        self.key
    }
}

/// A CA certificate together with the key that signs on its behalf.
#[derive(Debug, Clone)]
pub struct CertificateWithPrivateKey {
    pub cert: Certificate,
    pub key: KeyPair,
}

impl Issuer for CertificateWithPrivateKey {
    fn issuer_name(&self) -> &x509_cert::name::Name {
        // The name of the issuer is the subject of the certificate
        self.cert.subject()
    }

    fn issuer_certificate(&self) -> Option<&Certificate> {
        Some(&self.cert)
    }

    fn signing_key(&self) -> &KeyPair {
        &self.key
    }
}

/// A PKCS#10 certification request.
#[derive(Debug, Clone)]
pub struct CertificateRequest {
    pub inner: CertReq,
}

impl CertificateRequest {
    /// Builds a request for `subject` over `key`'s public half and signs it
    /// with `key`.
    pub fn new(subject: &DistinguishedName, key: &KeyPair, digest: MessageDigest) -> Result<Self> {
        let info = CertReqInfo {
            version: x509_cert::request::Version::V1,
            subject: subject.as_x509_name()?,
            public_key: key.as_spki()?,
            attributes: Default::default(),
        };
        let signature = key.sign_data(&info.to_der()?, digest)?;
        Ok(Self {
            inner: CertReq {
                info,
                algorithm: key.signature_algorithm(digest).into(),
                signature: der::asn1::BitString::from_bytes(&signature)?,
            },
        })
    }

    pub fn to_pem(&self) -> Result<String> {
        Ok(pem_utils::der_to_pem(
            &self.inner.to_der()?,
            pem_utils::CERTIFICATE_REQUEST_LABEL,
        ))
    }

    pub fn from_pem(text: &str) -> Result<Self> {
        let block = pem_utils::find_block(text, pem_utils::CERTIFICATE_REQUEST_LABEL)?;
        Ok(Self {
            inner: CertReq::from_der(block.contents())?,
        })
    }

    pub fn subject(&self) -> &x509_cert::name::Name {
        &self.inner.info.subject
    }

    pub fn public_key(&self) -> &SubjectPublicKeyInfoOwned {
        &self.inner.info.public_key
    }
}
