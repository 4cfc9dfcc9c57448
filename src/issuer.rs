use der::Encode;
use x509_cert::certificate::CertificateInner;
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use crate::cert::Certificate;
use crate::cert::ext_config::{CertView, ExtensionContext, ExtensionSpec};
use crate::cert::params::Validity;
use crate::error::Result;
use crate::key::{KeyPair, MessageDigest};
use crate::tbs_certificate::TbsCertificate;

/// What the issuer needs to know about the certificate it is asked to sign.
#[derive(Debug, Clone)]
pub struct IssueParams<'a> {
    pub subject: &'a x509_cert::name::Name,
    pub subject_public_key: &'a SubjectPublicKeyInfoOwned,
    pub serial_number: u64,
    pub validity: Validity,
    /// Extension specs, resolved and encoded in this order.
    pub extensions: &'a [ExtensionSpec],
    pub digest: MessageDigest,
}

/// Represents an entity capable of issuing certificates.
///
/// This trait provides methods to retrieve issuer details and issue certificates.
pub trait Issuer {
    /// Returns the distinguished name of the issuer.
    fn issuer_name(&self) -> &x509_cert::name::Name;

    /// The issuer's own certificate; `None` while a certificate is being
    /// self-signed.
    fn issuer_certificate(&self) -> Option<&Certificate>;

    /// Returns the signing key of the issuer.
    fn signing_key(&self) -> &KeyPair;

    /// Issues a certificate.
    ///
    /// Extensions are resolved one after another against the partially built
    /// certificate, so an `authorityKeyIdentifier` bound to `cert` sees a
    /// `subjectKeyIdentifier` configured before it.
    fn issue(&self, params: IssueParams<'_>) -> Result<Certificate> {
        let mut tbs_cert = TbsCertificate {
            serial_number: params.serial_number,
            signature_algorithm: self.signing_key().signature_algorithm(params.digest),
            issuer: self.issuer_name().clone(),
            validity: params.validity,
            subject: params.subject.clone(),
            subject_public_key: params.subject_public_key.clone(),
            extensions: Vec::with_capacity(params.extensions.len()),
        };

        for spec in params.extensions {
            let extension = {
                let ctx = ExtensionContext {
                    cert: CertView::Building(&tbs_cert),
                    ca: match self.issuer_certificate() {
                        Some(ca) => CertView::Issued(ca),
                        None => CertView::Building(&tbs_cert),
                    },
                };
                spec.resolve(&ctx)?
            };
            tbs_cert.extensions.push(extension);
        }

        self.sign_tbs(tbs_cert, params.digest)
    }

    /// Encodes and signs a fully built TBS certificate.
    fn sign_tbs(&self, tbs_cert: TbsCertificate, digest: MessageDigest) -> Result<Certificate> {
        let tbs_cert_inner = tbs_cert.to_tbs_certificate_inner()?;
        let signature = self
            .signing_key()
            .sign_data(&tbs_cert_inner.to_der()?, digest)?;

        let cert_inner = CertificateInner {
            signature_algorithm: tbs_cert_inner.signature.clone(),
            tbs_certificate: tbs_cert_inner,
            signature: der::asn1::BitString::from_bytes(&signature)?,
        };

        Ok(Certificate { inner: cert_inner })
    }
}
