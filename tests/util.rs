#![allow(dead_code)]

use std::path::Path;

use certdepot::authority::Registry;
use certdepot::cert::extensions::{BasicConstraints, SubjectKeyIdentifier};
use certdepot::cert::params::{CertificationRequestInfo, DistinguishedName, DnField, ExtensionParam};
use certdepot::cert::{Certificate, CertificateWithPrivateKey};
use certdepot::config::TomlConfig;
use certdepot::error::CertDepotError;
use certdepot::key::{KeyPair, MessageDigest};
use certdepot::object::Attributes;
use sha1::{Digest, Sha1};
use tempfile::TempDir;

/// Two EC CAs: `test` signs server certificates, `other` exists for routing.
pub const CONFIG: &str = r#"
[global]
cas = "test, other"

[test]
key_default_algorithm = "ec"
key_default_bits = 256
cert_default_days = 30
cert_default_extensions = "server"
dn_fields = ["C", "O", "OU", "CN"]

[test-dn-defaults]
C = "US"
O = "Example Corp"
OU = "ops-"

[test-extensions-server]
basicConstraints = "CA:FALSE;critical"
keyUsage = "digitalSignature,keyEncipherment"
extendedKeyUsage = "serverAuth,clientAuth"
subjectKeyIdentifier = "hash;subject=cert"
authorityKeyIdentifier = "keyid;issuer=ca"

[test-extensions-comment]
nsComment = "\"issued by certdepot\""

[other]
key_default_algorithm = "ed25519"
dn_fields = "CN"

[other-dn-defaults]
"#;

/// A CA left at the RSA key default that signs with SHA-384. Small keys keep
/// generation fast.
pub const RSA_CONFIG: &str = r#"
[global]
cas = "rsaca"

[rsaca]
key_default_bits = 1024
cert_signing_md = "sha384"
cert_default_extensions = "server"
dn_fields = "O, CN"

[rsaca-dn-defaults]
O = "Example Corp"

[rsaca-extensions-server]
basicConstraints = "CA:FALSE"
authorityKeyIdentifier = "keyid;issuer=ca"
"#;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Generates a self-signed P-256 root and writes it to `<base>/<ca>/CARoot`.
pub fn provision_ca_root(base: &Path, ca: &str) -> CertificateWithPrivateKey {
    provision_ca_root_with_key(base, ca, KeyPair::generate_ecdsa_p256())
}

pub fn provision_ca_root_with_key(base: &Path, ca: &str, key: KeyPair) -> CertificateWithPrivateKey {
    let spki = key.as_spki().unwrap();

    let mut subject = DistinguishedName::new();
    subject.set(DnField::Country, "US");
    subject.set(DnField::Organization, "Example Corp");
    subject.set(DnField::CommonName, format!("{ca} root"));

    let ski = Sha1::digest(spki.subject_public_key.raw_bytes()).to_vec();
    let info = CertificationRequestInfo::builder()
        .subject(subject)
        .subject_public_key(spki)
        .extensions(vec![
            ExtensionParam::from_extension(
                BasicConstraints {
                    is_ca: true,
                    max_path_length: None,
                },
                true,
            )
            .unwrap(),
            ExtensionParam::from_extension(SubjectKeyIdentifier(ski), false).unwrap(),
        ])
        .build();
    let cert = Certificate::new_self_signed(&info, &key, 1096, MessageDigest::Sha256).unwrap();

    let root = base.join(ca).join("CARoot");
    std::fs::create_dir_all(&root).unwrap();
    let cert_pem = cert.to_pem().unwrap();
    std::fs::write(root.join("CACert.pem"), &cert_pem).unwrap();
    std::fs::write(root.join("CAKey.pem"), key.to_pkcs8_pem().unwrap()).unwrap();
    std::fs::write(root.join("CAChain.pem"), &cert_pem).unwrap();

    CertificateWithPrivateKey { cert, key }
}

/// A depot in a fresh temporary directory with both CA roots provisioned.
pub struct Depot {
    pub dir: TempDir,
    pub registry: Registry,
    pub test_root: CertificateWithPrivateKey,
}

impl Depot {
    pub fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let test_root = provision_ca_root(dir.path(), "test");
        provision_ca_root(dir.path(), "other");
        let registry = open_registry(dir.path());
        Depot {
            dir,
            registry,
            test_root,
        }
    }

    /// Drops the registry and loads it again from disk.
    pub fn reopen(self) -> Self {
        let Depot { dir, test_root, .. } = self;
        let registry = open_registry(dir.path());
        Depot {
            dir,
            registry,
            test_root,
        }
    }

    pub fn ca_dir(&self, ca: &str) -> std::path::PathBuf {
        self.dir.path().join(ca)
    }

    /// Number of PEM files stored under `<ca>/<Key|Cert>`.
    pub fn stored_files(&self, ca: &str, ssltype: &str) -> usize {
        std::fs::read_dir(self.ca_dir(ca).join(ssltype))
            .map(|dir| dir.count())
            .unwrap_or(0)
    }
}

pub fn open_registry(base: &Path) -> Registry {
    open_registry_with(base, CONFIG).unwrap()
}

pub fn open_registry_with(base: &Path, config: &str) -> Result<Registry, CertDepotError> {
    let config: TomlConfig = config.parse()?;
    Registry::load(&config, base)
}

pub fn attrs(pairs: &[(&str, &str)]) -> Attributes {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
