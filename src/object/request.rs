use tracing::{debug, error};

use super::{Attributes, CryptoHandle, SslKind, ensure_uuid, fill_defaults, flag};
use crate::authority::Session;
use crate::cert::CertificateRequest;
use crate::cert::params::DistinguishedName;
use crate::error::{CertDepotError, Result};
use crate::index::SslType;
use crate::key::MessageDigest;

/// A PKCS#10 certification request. Built while a certificate is generated
/// and never stored.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestKind;

/// Attributes of the key an object signs with.
///
/// The key is named by `key`, or by the object's own `name` when `append_key`
/// is set and no `key` is given. Key parameters given alongside are passed on
/// so a combined cert and key file can choose its key type.
pub(super) fn key_attrs(attrs: &Attributes, hostname: &str) -> Result<Attributes> {
    let name = match attrs.get("key") {
        Some(key) => key.clone(),
        None if flag(attrs, "append_key") => attrs.get("name").cloned().unwrap_or_default(),
        None => {
            return Err(CertDepotError::Config(format!(
                "{} for host {} names no key and does not set append_key",
                attrs.get("name").map(String::as_str).unwrap_or_default(),
                hostname
            )));
        }
    };
    let mut key = Attributes::from([
        ("type".to_string(), SslType::Key.to_string()),
        ("name".to_string(), name),
        ("host".to_string(), hostname.to_string()),
    ]);
    for param in ["algorithm", "bits"] {
        if let Some(value) = attrs.get(param) {
            key.insert(param.to_string(), value.clone());
        }
    }
    Ok(key)
}

impl SslKind for RequestKind {
    fn ssltype(&self) -> SslType {
        SslType::CertRequest
    }

    fn is_storable(&self) -> bool {
        false
    }

    fn dependency_depth(&self) -> usize {
        1
    }

    fn generate(&self, session: &mut Session<'_>, attrs: &mut Attributes) -> Result<String> {
        let config = session.config();
        let hostname = session.metadata().hostname.clone();

        // Lowest precedence first: DN defaults, then fixed defaults, then the
        // caller's attributes already in `attrs`.
        let mut defaults = config.dn_defaults.clone();
        defaults.extend([
            ("ca".to_string(), config.name.clone()),
            ("md_algo".to_string(), config.req_default_md.to_string()),
            ("owner".to_string(), "root".to_string()),
            ("group".to_string(), "root".to_string()),
            ("perms".to_string(), "0644".to_string()),
            ("cn".to_string(), hostname.clone()),
        ]);
        fill_defaults(attrs, defaults);
        ensure_uuid(attrs)?;

        let object = attrs.get("name").map(String::as_str).unwrap_or_default();
        let mut subject = DistinguishedName::new();
        for field in &config.dn_fields {
            let value = attrs.get(field.attr_name()).ok_or_else(|| {
                CertDepotError::Config(format!(
                    "DN field \"{field}\" of request {object} for host {hostname} has no value"
                ))
            })?;
            field.validate(value).inspect_err(|e| {
                error!(request = object, %hostname, error = %e, "invalid DN field");
            })?;
            subject.set(*field, value.clone());
        }
        let digest: MessageDigest = attrs
            .get("md_algo")
            .map(String::as_str)
            .unwrap_or_default()
            .parse()?;
        let key_attrs = key_attrs(attrs, &hostname)?;

        let key = session.nested(key_attrs)?.crypto()?.into_key()?;
        debug!(request = object, %digest, "signing certificate request");
        CertificateRequest::new(&subject, &key, digest)?.to_pem()
    }

    fn crypto_handle(&self, text: &str) -> Result<Option<CryptoHandle>> {
        Ok(Some(CryptoHandle::Request(CertificateRequest::from_pem(text)?)))
    }
}
