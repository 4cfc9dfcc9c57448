use tracing::{debug, info};

use super::request::key_attrs;
use super::{Attributes, CryptoHandle, SslKind, ensure_uuid, fill_defaults, flag};
use crate::authority::Session;
use crate::cert::params::Validity;
use crate::cert::Certificate;
use crate::error::{CertDepotError, Result};
use crate::index::SslType;
use crate::issuer::{IssueParams, Issuer};
use crate::pem_utils;

/// An X.509v3 certificate signed by the CA.
///
/// Attributes: `days`, `extensions` (the name of an extension set),
/// `ou_append_hostname`, `key`/`append_key`, and any DN field overriding the
/// CA's DN defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct CertificateKind;

impl SslKind for CertificateKind {
    fn ssltype(&self) -> SslType {
        SslType::Cert
    }

    fn dependency_depth(&self) -> usize {
        2
    }

    fn generate(&self, session: &mut Session<'_>, attrs: &mut Attributes) -> Result<String> {
        let config = session.config();
        let hostname = session.metadata().hostname.clone();

        let mut defaults = vec![
            ("ca", config.name.clone()),
            ("days", config.cert_default_days.to_string()),
            ("owner", "root".to_string()),
            ("group", "root".to_string()),
            ("perms", "0600".to_string()),
        ];
        if let Some(set) = &config.cert_default_extensions {
            defaults.push(("extensions", set.clone()));
        }
        fill_defaults(attrs, defaults);
        ensure_uuid(attrs)?;

        if flag(attrs, "ou_append_hostname") {
            let ou = attrs
                .get("ou")
                .or_else(|| config.dn_defaults.get("ou"))
                .cloned()
                .unwrap_or_default();
            attrs.insert("ou".to_string(), format!("{ou}{hostname}"));
        }

        let name = attrs.get("name").cloned().unwrap_or_default();
        let invalid_days = || {
            CertDepotError::Config(format!(
                "certificate {name} for host {hostname}: invalid days \"{}\"",
                attrs.get("days").map(String::as_str).unwrap_or_default()
            ))
        };
        let days: i64 = attrs
            .get("days")
            .and_then(|days| days.trim().parse().ok())
            .ok_or_else(invalid_days)?;
        let validity = Validity::for_days(days).map_err(|_| invalid_days())?;
        let extensions = match attrs.get("extensions") {
            Some(set) => config.extension_set(set)?,
            None => &[],
        };
        let combined = attrs.get("key") == Some(&name) || flag(attrs, "append_key");

        // Everything that can be checked is checked before the first nested
        // object is written.
        let issuer = session.issuer()?;

        let mut request_attrs = attrs.clone();
        request_attrs.insert("type".to_string(), SslType::CertRequest.to_string());
        request_attrs.remove("uuid");
        let request = session.nested(request_attrs)?.crypto()?.into_request()?;

        let serial = session.next_serial()?;
        info!(certificate = %name, serial, days, "issuing certificate");
        let cert = issuer.issue(IssueParams {
            subject: request.subject(),
            subject_public_key: request.public_key(),
            serial_number: serial,
            validity,
            extensions,
            digest: config.cert_signing_md,
        })?;
        let cert_pem = cert.to_pem()?;

        if !combined {
            return Ok(cert_pem);
        }
        debug!(certificate = %name, "combining certificate and key");
        let key = session.nested(key_attrs(attrs, &hostname)?)?;
        Ok(pem_utils::concat(&[cert_pem.as_str(), key.text()]))
    }

    fn crypto_handle(&self, text: &str) -> Result<Option<CryptoHandle>> {
        Ok(Some(CryptoHandle::Certificate(Certificate::from_pem(text)?)))
    }
}
