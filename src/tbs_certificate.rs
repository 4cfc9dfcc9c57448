use der::Encode;
use der::asn1::{GeneralizedTime, OctetString, UtcTime};
use time::OffsetDateTime;
use x509_cert::Version;
use x509_cert::certificate::TbsCertificateInner;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use crate::cert::SignatureAlgorithm;
use crate::cert::extensions::{SubjectKeyIdentifier, ToAndFromX509Extension};
use crate::cert::params::{ExtensionParam, Validity};
use crate::error::Result;

/// Represents the "To Be Signed" (TBS) portion of an X.509 certificate.
///
/// Issuance fills this in step by step: extensions are appended one at a time
/// so that an extension resolved later can read what earlier ones put here.
///
/// # Fields
/// * `serial_number` - The CA-scoped serial of the certificate.
/// * `signature_algorithm` - The algorithm used to sign the certificate.
/// * `issuer` - The distinguished name of the certificate issuer.
/// * `validity` - The `notBefore`/`notAfter` window.
/// * `subject` - The distinguished name of the certificate subject.
/// * `subject_public_key` - The public key of the certificate subject.
/// * `extensions` - X.509 extensions in encoding order.
#[derive(Clone, Debug)]
pub struct TbsCertificate {
    pub serial_number: u64,
    pub signature_algorithm: SignatureAlgorithm,
    pub issuer: x509_cert::name::Name,
    pub validity: Validity,
    pub subject: x509_cert::name::Name,
    pub subject_public_key: SubjectPublicKeyInfoOwned,
    pub extensions: Vec<ExtensionParam>,
}

/// Encodes dates before 2050 as UTCTime and later ones as GeneralizedTime,
/// as RFC 5280 requires.
fn x509_time(at: OffsetDateTime) -> Result<x509_cert::time::Time> {
    if at.year() < 2050 {
        Ok(x509_cert::time::Time::UtcTime(UtcTime::from_system_time(
            at.into(),
        )?))
    } else {
        Ok(x509_cert::time::Time::GeneralTime(
            GeneralizedTime::from_system_time(at.into())?,
        ))
    }
}

/// Minimal two's-complement encoding of a positive serial.
pub(crate) fn serial_to_bytes(serial: u64) -> Vec<u8> {
    let bytes = serial.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    let mut out = Vec::with_capacity(9);
    if bytes[first] & 0x80 != 0 {
        out.push(0);
    }
    out.extend_from_slice(&bytes[first..]);
    out
}

impl TbsCertificate {
    pub fn serial_bytes(&self) -> Vec<u8> {
        serial_to_bytes(self.serial_number)
    }

    /// The subjectKeyIdentifier already placed on this certificate, if any.
    pub fn subject_key_id(&self) -> Option<Vec<u8>> {
        self.extensions
            .iter()
            .find(|ext| ext.oid == SubjectKeyIdentifier::OID)
            .and_then(|ext| ext.to_extension::<SubjectKeyIdentifier>().ok())
            .map(|ski| ski.0)
    }

    /// Converts the `TbsCertificate` into a `TbsCertificateInner` for DER encoding.
    pub fn to_tbs_certificate_inner(&self) -> Result<TbsCertificateInner> {
        let algorithm_id: x509_cert::spki::AlgorithmIdentifierOwned =
            self.signature_algorithm.into();

        let extensions = self
            .extensions
            .iter()
            .map(|ext| {
                Ok(x509_cert::ext::Extension {
                    extn_id: ext.oid,
                    critical: ext.critical,
                    extn_value: OctetString::new(ext.value.clone())?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let validity = x509_cert::time::Validity {
            not_before: x509_time(self.validity.not_before)?,
            not_after: x509_time(self.validity.not_after)?,
        };

        Ok(TbsCertificateInner {
            version: Version::V3,
            serial_number: SerialNumber::new(&self.serial_bytes())?,
            signature: algorithm_id,
            issuer: self.issuer.clone(),
            validity,
            subject: self.subject.clone(),
            subject_public_key_info: self.subject_public_key.clone(),
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: if extensions.is_empty() {
                None
            } else {
                Some(extensions)
            },
        })
    }

    /// Encodes the `TbsCertificate` into DER format.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.to_tbs_certificate_inner()?.to_der()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_encoding_is_positive_and_minimal() {
        assert_eq!(serial_to_bytes(0), vec![0]);
        assert_eq!(serial_to_bytes(1), vec![1]);
        assert_eq!(serial_to_bytes(0x7f), vec![0x7f]);
        assert_eq!(serial_to_bytes(0x80), vec![0, 0x80]);
        assert_eq!(serial_to_bytes(0x0102), vec![1, 2]);
    }
}
