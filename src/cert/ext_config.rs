//! X.509v3 extensions described by configuration strings.
//!
//! An extension set in the CA configuration maps extension names to values
//! in a small language:
//!
//! ```text
//! value    := base (';' modifier)*
//! modifier := 'critical' | argname '=' ('cert' | 'ca')
//! ```
//!
//! `base` is the OpenSSL-style extension value (`CA:FALSE`,
//! `digitalSignature,keyEncipherment`, `keyid,issuer:always`, ...). A
//! modifier `argname=cert` binds the argument to the certificate being built,
//! `argname=ca` to the CA's certificate:
//!
//! ```text
//! subjectKeyIdentifier   = hash;subject=cert
//! authorityKeyIdentifier = keyid;issuer=ca
//! basicConstraints       = CA:FALSE;critical
//! ```
//!
//! [`parse`] interprets the whole value, so a set that loads cleanly can
//! always be issued. Extensions that do not depend on any certificate are
//! encoded right away; key identifiers are computed when the extension is
//! resolved against a partially built certificate ([`ExtensionSpec::resolve`]).

use std::net::IpAddr;

use sha1::{Digest, Sha1};
use tracing::warn;
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use super::Certificate;
use super::extensions::{
    AltName, AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, ExtendedKeyUsageOption,
    FlagSet, KeyUsage, KeyUsages, NsComment, SubjectAltName, SubjectKeyIdentifier,
};
use super::params::ExtensionParam;
use crate::error::{CertDepotError, Result};
use crate::tbs_certificate::TbsCertificate;

/// Which certificate a named extension argument refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// The certificate under construction.
    Cert,
    /// The CA's own certificate.
    Ca,
}

/// A parsed extension descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionSpec {
    pub name: String,
    pub value: String,
    /// Set by a `critical` modifier or a leading `critical` value item.
    pub critical: bool,
    /// Named arguments in the order they were written.
    pub args: Vec<(String, Binding)>,
    kind: ExtensionValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ExtensionValue {
    /// Already encoded; the same for every certificate.
    Fixed(ExtensionParam),
    SubjectKeyIdentifier {
        subject: Binding,
    },
    AuthorityKeyIdentifier {
        issuer: Binding,
        keyid: bool,
        /// `Some(always)` when `issuer` or `issuer:always` was given.
        issuer_name: Option<bool>,
    },
}

/// Parses one configured extension.
///
/// Fails with a configuration error for an unsupported extension name, a
/// value the extension does not accept, a missing `subject=`/`issuer=`
/// binding, or a modifier binding an argument to anything other than `cert`
/// or `ca`.
pub fn parse(name: &str, value: &str) -> Result<ExtensionSpec> {
    let mut parts = value.split(';');
    let base = parts.next().unwrap_or_default().trim().to_string();
    let mut critical = false;
    let mut args = Vec::new();

    for modifier in parts {
        let modifier = modifier.trim().to_ascii_lowercase();
        if modifier == "critical" {
            critical = true;
        } else if let Some((arg, target)) = modifier.split_once('=') {
            let binding = match target.trim() {
                "cert" => Binding::Cert,
                "ca" => Binding::Ca,
                other => {
                    return Err(CertDepotError::Config(format!(
                        "unknown argument in extension {name}: \"{}={other}\"",
                        arg.trim()
                    )));
                }
            };
            args.push((arg.trim().to_string(), binding));
        } else if !modifier.is_empty() {
            warn!(extension = name, modifier = %modifier, "ignoring unknown extension modifier");
        }
    }

    // OpenSSL also accepts "critical" as the first item of the value.
    let mut items: Vec<&str> = base
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .collect();
    if items.first() == Some(&"critical") {
        critical = true;
        items.remove(0);
    }

    let invalid =
        |detail: String| CertDepotError::Config(format!("extension {name}={base}: {detail}"));
    let binding = |arg: &str| {
        args.iter()
            .find(|(bound, _)| bound == arg)
            .map(|(_, binding)| *binding)
            .ok_or_else(|| {
                CertDepotError::Config(format!(
                    "extension {name} needs \"{arg}=cert\" or \"{arg}=ca\""
                ))
            })
    };
    let fixed = |param: Result<ExtensionParam>| {
        param
            .map(ExtensionValue::Fixed)
            .map_err(|e| invalid(e.to_string()))
    };

    let kind = match name {
        "basicConstraints" => {
            let mut bc = BasicConstraints::default();
            for item in items {
                match item.split_once(':') {
                    Some((key, flag)) if key.eq_ignore_ascii_case("CA") => {
                        bc.is_ca = match flag.to_ascii_uppercase().as_str() {
                            "TRUE" => true,
                            "FALSE" => false,
                            _ => return Err(invalid(format!("bad CA flag \"{flag}\""))),
                        };
                    }
                    Some((key, len)) if key.eq_ignore_ascii_case("pathlen") => {
                        let len = len
                            .parse::<u8>()
                            .map_err(|_| invalid(format!("bad pathlen \"{len}\"")))?;
                        bc.max_path_length = Some(u32::from(len));
                    }
                    _ => return Err(invalid(format!("unexpected \"{item}\""))),
                }
            }
            fixed(ExtensionParam::from_extension(bc, critical))?
        }
        "keyUsage" => {
            let mut flags: FlagSet<KeyUsages> = FlagSet::default();
            for item in items {
                flags |= KeyUsage::flag_from_name(item)?;
            }
            fixed(ExtensionParam::from_extension(KeyUsage(flags), critical))?
        }
        "extendedKeyUsage" => {
            let usage = items
                .into_iter()
                .map(|item| item.parse::<ExtendedKeyUsageOption>())
                .collect::<Result<Vec<_>>>()?;
            fixed(ExtensionParam::from_extension(ExtendedKeyUsage { usage }, critical))?
        }
        "subjectAltName" => {
            let names = items
                .into_iter()
                .map(|item| alt_name(item).map_err(&invalid))
                .collect::<Result<Vec<_>>>()?;
            fixed(ExtensionParam::from_extension(SubjectAltName { names }, critical))?
        }
        "nsComment" => {
            let comment = base.trim_matches('"').to_string();
            fixed(ExtensionParam::from_extension(NsComment(comment), critical))?
        }
        "subjectKeyIdentifier" => {
            if items != ["hash"] {
                return Err(invalid("only \"hash\" is supported".to_string()));
            }
            ExtensionValue::SubjectKeyIdentifier {
                subject: binding("subject")?,
            }
        }
        "authorityKeyIdentifier" => {
            let mut keyid = false;
            let mut issuer_name = None;
            for item in items {
                match item {
                    "keyid" | "keyid:always" => keyid = true,
                    "issuer" => issuer_name = Some(false),
                    "issuer:always" => issuer_name = Some(true),
                    other => return Err(invalid(format!("unexpected \"{other}\""))),
                }
            }
            if !keyid && issuer_name.is_none() {
                return Err(invalid("expected keyid and/or issuer".to_string()));
            }
            ExtensionValue::AuthorityKeyIdentifier {
                issuer: binding("issuer")?,
                keyid,
                issuer_name,
            }
        }
        other => {
            return Err(CertDepotError::Config(format!(
                "unsupported extension \"{other}\", expected one of {}",
                SUPPORTED_EXTENSIONS.join(", ")
            )));
        }
    };

    Ok(ExtensionSpec {
        name: name.to_string(),
        value: base,
        critical,
        args,
        kind,
    })
}

fn alt_name(item: &str) -> std::result::Result<AltName, String> {
    let (kind, value) = item
        .split_once(':')
        .ok_or_else(|| format!("\"{item}\" lacks a type prefix"))?;
    match kind.to_ascii_uppercase().as_str() {
        "DNS" => Ok(AltName::Dns(value.to_string())),
        "IP" => value
            .parse::<IpAddr>()
            .map(AltName::Ip)
            .map_err(|_| format!("bad IP address \"{value}\"")),
        "EMAIL" => Ok(AltName::Email(value.to_string())),
        "URI" => Ok(AltName::Uri(value.to_string())),
        _ => Err(format!("unsupported name type \"{kind}\"")),
    }
}

/// A certificate as seen by extension resolution: either the one being
/// built or one that is already signed.
#[derive(Debug, Clone, Copy)]
pub enum CertView<'a> {
    Building(&'a TbsCertificate),
    Issued(&'a Certificate),
}

impl CertView<'_> {
    pub fn subject_public_key_info(&self) -> &SubjectPublicKeyInfoOwned {
        match self {
            CertView::Building(tbs) => &tbs.subject_public_key,
            CertView::Issued(cert) => cert.subject_public_key_info(),
        }
    }

    pub fn issuer_name(&self) -> &x509_cert::name::Name {
        match self {
            CertView::Building(tbs) => &tbs.issuer,
            CertView::Issued(cert) => cert.issuer(),
        }
    }

    pub fn serial_bytes(&self) -> Vec<u8> {
        match self {
            CertView::Building(tbs) => tbs.serial_bytes(),
            CertView::Issued(cert) => cert.serial_bytes().to_vec(),
        }
    }

    pub fn subject_key_id(&self) -> Option<Vec<u8>> {
        match self {
            CertView::Building(tbs) => tbs.subject_key_id(),
            CertView::Issued(cert) => cert.subject_key_id(),
        }
    }

    /// SHA-1 over the subject public key bits (RFC 5280 method 1).
    pub fn public_key_hash(&self) -> Vec<u8> {
        Sha1::digest(self.subject_public_key_info().subject_public_key.raw_bytes()).to_vec()
    }
}

/// The certificates an extension argument can be bound to.
#[derive(Debug, Clone, Copy)]
pub struct ExtensionContext<'a> {
    pub cert: CertView<'a>,
    pub ca: CertView<'a>,
}

impl<'a> ExtensionContext<'a> {
    fn view(&self, binding: Binding) -> CertView<'a> {
        match binding {
            Binding::Cert => self.cert,
            Binding::Ca => self.ca,
        }
    }
}

/// Extension names [`parse`] accepts.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "basicConstraints",
    "keyUsage",
    "extendedKeyUsage",
    "subjectKeyIdentifier",
    "authorityKeyIdentifier",
    "subjectAltName",
    "nsComment",
];

impl ExtensionSpec {
    /// The binding of a named argument, if the configuration gave one.
    pub fn arg(&self, name: &str) -> Option<Binding> {
        self.args
            .iter()
            .find(|(arg, _)| arg == name)
            .map(|(_, binding)| *binding)
    }

    /// Encodes the extension against `ctx`.
    pub fn resolve(&self, ctx: &ExtensionContext<'_>) -> Result<ExtensionParam> {
        match &self.kind {
            ExtensionValue::Fixed(param) => Ok(param.clone()),
            ExtensionValue::SubjectKeyIdentifier { subject } => {
                let ski = SubjectKeyIdentifier(ctx.view(*subject).public_key_hash());
                ExtensionParam::from_extension(ski, self.critical)
            }
            ExtensionValue::AuthorityKeyIdentifier {
                issuer,
                keyid,
                issuer_name,
            } => {
                let issuer = ctx.view(*issuer);
                let key_identifier = keyid.then(|| {
                    issuer
                        .subject_key_id()
                        .unwrap_or_else(|| issuer.public_key_hash())
                });
                let with_issuer = match issuer_name {
                    Some(always) => *always || key_identifier.is_none(),
                    None => false,
                };
                let aki = AuthorityKeyIdentifier {
                    key_identifier,
                    authority_cert_issuer: with_issuer.then(|| issuer.issuer_name().clone()),
                    authority_cert_serial_number: with_issuer.then(|| issuer.serial_bytes()),
                };
                ExtensionParam::from_extension(aki, self.critical)
            }
        }
    }
}
