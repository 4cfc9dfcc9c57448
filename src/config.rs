//! Configuration sources and the typed per-CA configuration.
//!
//! Configuration is a set of named sections of ordered key/value pairs. For a
//! CA called `myca` the following sections are read:
//!
//! ```toml
//! [global]
//! cas = "myca"
//!
//! [myca]
//! key_default_algorithm = "ec"
//! key_default_bits = 256
//! cert_default_extensions = "server"
//!
//! [myca-dn-defaults]
//! C = "US"
//! O = "Example Corp"
//!
//! [myca-extensions-server]
//! basicConstraints = "CA:FALSE"
//! subjectKeyIdentifier = "hash;subject=cert"
//! authorityKeyIdentifier = "keyid;issuer=ca"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use tracing::{debug, info};

use crate::cert::ext_config::{self, ExtensionSpec};
use crate::cert::params::{DnField, Validity};
use crate::error::{CertDepotError, Result};
use crate::key::{KeyAlgorithm, MessageDigest};

/// A source of named configuration sections.
pub trait ConfigSource {
    /// The items of `section` in the order they were written, or `None` if
    /// the section does not exist.
    fn items(&self, section: &str) -> Option<Vec<(String, String)>>;

    /// Every section name, in order.
    fn section_names(&self) -> Vec<String>;
}

/// Configuration read from a TOML document; each top-level table is a section.
///
/// Scalar values are converted to strings and arrays are joined with `", "`,
/// so `dn_fields = ["C", "O", "CN"]` and `dn_fields = "C, O, CN"` are
/// equivalent.
#[derive(Debug, Clone, Default)]
pub struct TomlConfig {
    sections: Vec<(String, Vec<(String, String)>)>,
}

fn toml_scalar(section: &str, key: &str, value: &toml::Value) -> Result<String> {
    match value {
        toml::Value::String(s) => Ok(s.clone()),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Float(f) => Ok(f.to_string()),
        toml::Value::Boolean(b) => Ok(b.to_string()),
        toml::Value::Datetime(dt) => Ok(dt.to_string()),
        toml::Value::Array(items) => Ok(items
            .iter()
            .map(|item| toml_scalar(section, key, item))
            .collect::<Result<Vec<_>>>()?
            .join(", ")),
        toml::Value::Table(_) => Err(CertDepotError::Config(format!(
            "[{section}] {key}: nested tables are not supported"
        ))),
    }
}

impl FromStr for TomlConfig {
    type Err = CertDepotError;

    fn from_str(text: &str) -> Result<Self> {
        let document: toml::Table = text.parse()?;
        let mut sections = Vec::with_capacity(document.len());
        for (name, value) in &document {
            let toml::Value::Table(table) = value else {
                return Err(CertDepotError::Config(format!(
                    "top-level key \"{name}\" is not a section"
                )));
            };
            let items = table
                .iter()
                .map(|(key, value)| Ok((key.clone(), toml_scalar(name, key, value)?)))
                .collect::<Result<Vec<_>>>()?;
            sections.push((name.clone(), items));
        }
        Ok(Self { sections })
    }
}

impl TomlConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            CertDepotError::Config(format!("reading {}: {e}", path.display()))
        })?;
        text.parse()
    }
}

impl ConfigSource for TomlConfig {
    fn items(&self, section: &str) -> Option<Vec<(String, String)>> {
        self.sections
            .iter()
            .find(|(name, _)| name == section)
            .map(|(_, items)| items.clone())
    }

    fn section_names(&self) -> Vec<String> {
        self.sections.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// Configuration built in code.
///
/// ```
/// use certdepot::config::{ConfigSource, MemoryConfig};
///
/// let config = MemoryConfig::new()
///     .section("global", [("cas", "myca")])
///     .section("myca", [("cert_default_days", "30")]);
/// assert_eq!(config.section_names(), vec!["global", "myca"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryConfig {
    sections: Vec<(String, Vec<(String, String)>)>,
}

impl MemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a section, or appends to it if it already exists.
    pub fn section<K, V>(mut self, name: &str, items: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let items = items.into_iter().map(|(k, v)| (k.into(), v.into()));
        match self.sections.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => existing.extend(items),
            None => self.sections.push((name.to_string(), items.collect())),
        }
        self
    }
}

impl ConfigSource for MemoryConfig {
    fn items(&self, section: &str) -> Option<Vec<(String, String)>> {
        self.sections
            .iter()
            .find(|(name, _)| name == section)
            .map(|(_, items)| items.clone())
    }

    fn section_names(&self) -> Vec<String> {
        self.sections.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// Settings for one certificate authority.
#[derive(Debug, Clone)]
pub struct CaConfig {
    pub name: String,
    pub key_default_bits: u32,
    pub key_default_algorithm: String,
    pub req_default_md: MessageDigest,
    /// Digest the CA signs certificates with. Only RSA CA keys honour it;
    /// ECDSA keys always sign with their curve's digest.
    pub cert_signing_md: MessageDigest,
    pub cert_default_days: u32,
    pub cert_default_extensions: Option<String>,
    /// Validity of a self-signed root provisioned for this CA.
    pub ca_days: u32,
    pub dn_fields: Vec<DnField>,
    /// Default DN values keyed by lower-case attribute name.
    pub dn_defaults: BTreeMap<String, String>,
    /// Named extension sets, each in configured order.
    pub extensions: Vec<(String, Vec<ExtensionSpec>)>,
}

impl CaConfig {
    /// Defaults for a CA with no settings of its own.
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_default_bits: 2048,
            key_default_algorithm: "rsa".to_string(),
            req_default_md: MessageDigest::Sha512,
            cert_signing_md: MessageDigest::Sha256,
            cert_default_days: 365,
            cert_default_extensions: None,
            ca_days: 1096,
            dn_fields: vec![
                DnField::Country,
                DnField::State,
                DnField::Locality,
                DnField::Organization,
                DnField::OrganizationalUnit,
                DnField::CommonName,
            ],
            dn_defaults: BTreeMap::new(),
            extensions: Vec::new(),
        }
    }

    /// Reads the `[<name>]`, `[<name>-dn-defaults]` and every
    /// `[<name>-extensions-<set>]` section of `source`.
    pub fn load(name: &str, source: &dyn ConfigSource) -> Result<Self> {
        let mut config = Self::with_defaults(name);

        let basic = source
            .items(name)
            .ok_or_else(|| CertDepotError::Config(format!("missing section [{name}]")))?;
        for (key, value) in basic {
            config.apply(&key, &value)?;
        }

        let dn_section = format!("{name}-dn-defaults");
        let dn_defaults = source
            .items(&dn_section)
            .ok_or_else(|| CertDepotError::Config(format!("missing section [{dn_section}]")))?;
        config.dn_defaults = dn_defaults
            .into_iter()
            .map(|(key, value)| (key.to_ascii_lowercase(), value))
            .collect();

        let prefix = format!("{name}-extensions-");
        for section in source.section_names() {
            let Some(set) = section.strip_prefix(&prefix) else {
                continue;
            };
            let specs = source
                .items(&section)
                .unwrap_or_default()
                .iter()
                .map(|(ext, value)| {
                    ext_config::parse(ext, value).map_err(|e| match e {
                        CertDepotError::Config(msg) => {
                            CertDepotError::Config(format!("[{section}] {msg}"))
                        }
                        other => other,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            config.extensions.push((set.to_string(), specs));
        }

        config.validate()?;
        if config.cert_signing_md != config.req_default_md {
            info!(
                ca = name,
                req_default_md = %config.req_default_md,
                cert_signing_md = %config.cert_signing_md,
                "certificates are signed with a different digest than requests"
            );
        }
        debug!(ca = name, sets = config.extensions.len(), "loaded CA configuration");
        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let ca = self.name.clone();
        let invalid = || CertDepotError::Config(format!("[{ca}] {key}: invalid value \"{value}\""));
        match key {
            "key_default_bits" => self.key_default_bits = value.trim().parse().map_err(|_| invalid())?,
            "key_default_algorithm" => self.key_default_algorithm = value.trim().to_ascii_lowercase(),
            "req_default_md" => self.req_default_md = value.parse()?,
            "cert_signing_md" => self.cert_signing_md = value.parse()?,
            "cert_default_days" => {
                self.cert_default_days = value.trim().parse().map_err(|_| invalid())?
            }
            "cert_default_extensions" => {
                let value = value.trim();
                self.cert_default_extensions = (!value.is_empty()).then(|| value.to_string());
            }
            "ca_days" => self.ca_days = value.trim().parse().map_err(|_| invalid())?,
            "dn_fields" => {
                self.dn_fields = value
                    .split(',')
                    .map(str::trim)
                    .filter(|field| !field.is_empty())
                    .map(DnField::from_str)
                    .collect::<Result<Vec<_>>>()?;
            }
            other => {
                return Err(CertDepotError::Config(format!(
                    "[{ca}]: unknown setting \"{other}\""
                )));
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        KeyAlgorithm::from_attrs(&self.key_default_algorithm, &self.key_default_bits.to_string())?;
        if self.dn_fields.is_empty() {
            return Err(CertDepotError::Config(format!(
                "[{}]: dn_fields is empty",
                self.name
            )));
        }
        if let Some(set) = &self.cert_default_extensions {
            self.extension_set(set)?;
        }
        for (key, days) in [("cert_default_days", self.cert_default_days), ("ca_days", self.ca_days)] {
            if Validity::for_days(i64::from(days)).is_err() {
                return Err(CertDepotError::Config(format!(
                    "[{}] {key}: {days} days is out of range",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// The extension set called `set`.
    pub fn extension_set(&self, set: &str) -> Result<&[ExtensionSpec]> {
        self.extensions
            .iter()
            .find(|(name, _)| name == set)
            .map(|(_, specs)| specs.as_slice())
            .ok_or_else(|| {
                CertDepotError::Config(format!(
                    "CA {} has no extension set \"{set}\"",
                    self.name
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[global]
cas = ["test", "other"]

[test]
key_default_algorithm = "ec"
key_default_bits = 256
cert_default_days = 30
cert_default_extensions = "server"
dn_fields = "C, O, CN"

[test-dn-defaults]
C = "US"
O = "Example Corp"

[test-extensions-server]
basicConstraints = "CA:FALSE"
subjectKeyIdentifier = "hash;subject=cert"
authorityKeyIdentifier = "keyid;issuer=ca"

[test-extensions-client]
extendedKeyUsage = "clientAuth"
"#;

    #[test]
    fn test_toml_sections_keep_order() {
        let config: TomlConfig = CONFIG.parse().unwrap();
        assert_eq!(
            config.section_names(),
            vec![
                "global",
                "test",
                "test-dn-defaults",
                "test-extensions-server",
                "test-extensions-client"
            ]
        );
        assert_eq!(
            config.items("global").unwrap(),
            vec![("cas".to_string(), "test, other".to_string())]
        );
        assert!(config.items("missing").is_none());
    }

    #[test]
    fn test_load_ca_config() {
        let source: TomlConfig = CONFIG.parse().unwrap();
        let config = CaConfig::load("test", &source).unwrap();

        assert_eq!(config.key_default_algorithm, "ec");
        assert_eq!(config.key_default_bits, 256);
        assert_eq!(config.cert_default_days, 30);
        assert_eq!(config.req_default_md, MessageDigest::Sha512);
        assert_eq!(config.cert_signing_md, MessageDigest::Sha256);
        assert_eq!(config.ca_days, 1096);
        assert_eq!(
            config.dn_fields,
            vec![DnField::Country, DnField::Organization, DnField::CommonName]
        );
        assert_eq!(config.dn_defaults.get("c").map(String::as_str), Some("US"));

        let server = config.extension_set("server").unwrap();
        let names: Vec<_> = server.iter().map(|spec| spec.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["basicConstraints", "subjectKeyIdentifier", "authorityKeyIdentifier"]
        );
        assert_eq!(config.extension_set("client").unwrap().len(), 1);
        assert!(config.extension_set("nope").unwrap_err().is_config());
    }

    #[test]
    fn test_missing_sections_are_config_errors() {
        let source = MemoryConfig::new().section("test", [("ca_days", "10")]);
        assert!(CaConfig::load("test", &source).unwrap_err().is_config());
        assert!(CaConfig::load("absent", &source).unwrap_err().is_config());
    }

    #[test]
    fn test_bad_settings_are_config_errors() {
        let with_basic = |key: &str, value: &str| {
            MemoryConfig::new()
                .section("test", [(key, value)])
                .section("test-dn-defaults", Vec::<(String, String)>::new())
        };
        for (key, value) in [
            ("key_default_bits", "many"),
            ("key_default_algorithm", "dsa"),
            ("req_default_md", "md5"),
            ("dn_fields", "C, XX"),
            ("cert_default_extensions", "missing"),
            ("cert_default_days", "0"),
            ("cert_default_days", "4000000"),
            ("ca_days", "4000000"),
            ("no_such_setting", "1"),
        ] {
            let err = CaConfig::load("test", &with_basic(key, value)).unwrap_err();
            assert!(err.is_config(), "{key}={value} gave {err:?}");
        }
    }

    #[test]
    fn test_unsupported_extension_rejected_at_load() {
        let source = MemoryConfig::new()
            .section("test", Vec::<(String, String)>::new())
            .section("test-dn-defaults", Vec::<(String, String)>::new())
            .section("test-extensions-x", [("policyConstraints", "requireExplicitPolicy:0")]);
        assert!(CaConfig::load("test", &source).unwrap_err().is_config());
    }

    #[test]
    fn test_bad_extension_value_rejected_at_load() {
        let source = MemoryConfig::new()
            .section("test", Vec::<(String, String)>::new())
            .section("test-dn-defaults", Vec::<(String, String)>::new())
            .section("test-extensions-x", [("keyUsage", "digitalSignatur")]);
        let err = CaConfig::load("test", &source).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("[test-extensions-x]"), "{err}");
    }
}
