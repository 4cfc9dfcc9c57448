//! The objects a CA hands out: keys, requests, certificates and the CA's own
//! root material.
//!
//! Every kind implements [`SslKind`]. A request for an object is a flat map of
//! string attributes; the kind fills in its defaults under the caller's values
//! and produces PEM text. Keys and certificates are then written to a file and
//! indexed by the CA. Requests exist only while a certificate is being built,
//! and CA root material is provisioned by an operator and only ever read.

mod ca_root;
mod certificate;
mod key;
mod request;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::authority::Session;
use crate::cert::{Certificate, CertificateRequest};
use crate::error::{CertDepotError, Result};
use crate::index::{IndexEntry, SslType};
use crate::key::KeyPair;

pub use ca_root::CaRootKind;
pub use certificate::CertificateKind;
pub use key::KeyKind;
pub use request::RequestKind;

/// Attributes describing an object, keyed by lower-case attribute name.
pub type Attributes = BTreeMap<String, String>;

/// Where an object came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// Read back from storage.
    Loaded,
    /// Freshly generated and not written anywhere.
    Generated,
    /// Generated, written to its file and recorded in the index.
    Persisted,
}

/// Parsed cryptographic material behind an object's PEM text.
#[derive(Debug, Clone)]
pub enum CryptoHandle {
    Key(KeyPair),
    Request(CertificateRequest),
    Certificate(Certificate),
}

impl CryptoHandle {
    pub fn into_key(self) -> Result<KeyPair> {
        match self {
            CryptoHandle::Key(key) => Ok(key),
            other => Err(other.mismatch("key")),
        }
    }

    pub fn into_request(self) -> Result<CertificateRequest> {
        match self {
            CryptoHandle::Request(request) => Ok(request),
            other => Err(other.mismatch("certificate request")),
        }
    }

    pub fn into_certificate(self) -> Result<Certificate> {
        match self {
            CryptoHandle::Certificate(cert) => Ok(cert),
            other => Err(other.mismatch("certificate")),
        }
    }

    fn mismatch(&self, wanted: &str) -> CertDepotError {
        let found = match self {
            CryptoHandle::Key(_) => "key",
            CryptoHandle::Request(_) => "certificate request",
            CryptoHandle::Certificate(_) => "certificate",
        };
        CertDepotError::Crypto(format!("expected a {wanted}, found a {found}"))
    }
}

/// Behaviour shared by every kind of object.
pub trait SslKind: Send + Sync {
    fn ssltype(&self) -> SslType;

    /// Whether generated objects are written to a file and indexed.
    fn is_storable(&self) -> bool {
        self.ssltype().is_storable()
    }

    /// Whether the material is provisioned out of band and only read.
    fn is_provisioned(&self) -> bool {
        false
    }

    /// How many levels of nested objects generating this kind may create.
    fn dependency_depth(&self) -> usize;

    /// Where the PEM text of the object with `uuid` lives, below the CA's
    /// directory.
    fn filename(&self, ca_dir: &Path, uuid: &str) -> PathBuf {
        ca_dir
            .join(self.ssltype().as_str())
            .join(format!("{uuid}.pem"))
    }

    /// Fills in defaults under `attrs` and produces the object's PEM text.
    /// Nested objects are requested through `session`.
    fn generate(&self, session: &mut Session<'_>, attrs: &mut Attributes) -> Result<String>;

    /// Parses `text`; `None` for kinds with no crypto handle.
    fn crypto_handle(&self, text: &str) -> Result<Option<CryptoHandle>>;
}

/// The kind implementing `ssltype`.
pub fn kind(ssltype: SslType) -> &'static dyn SslKind {
    static KEY: KeyKind = KeyKind;
    static REQUEST: RequestKind = RequestKind;
    static CERTIFICATE: CertificateKind = CertificateKind;
    static CA_CERT: CaRootKind = CaRootKind(SslType::CACert);
    static CA_KEY: CaRootKind = CaRootKind(SslType::CAKey);
    static CA_CHAIN: CaRootKind = CaRootKind(SslType::CAChain);
    match ssltype {
        SslType::Key => &KEY,
        SslType::CertRequest => &REQUEST,
        SslType::Cert => &CERTIFICATE,
        SslType::CACert => &CA_CERT,
        SslType::CAKey => &CA_KEY,
        SslType::CAChain => &CA_CHAIN,
    }
}

/// Inserts each default whose key `attrs` does not already have.
pub(crate) fn fill_defaults<K, V>(attrs: &mut Attributes, defaults: impl IntoIterator<Item = (K, V)>)
where
    K: Into<String>,
    V: Into<String>,
{
    for (key, value) in defaults {
        attrs.entry(key.into()).or_insert_with(|| value.into());
    }
}

/// Caller-supplied uuids become file names, so they must be real uuids.
pub(crate) fn ensure_uuid(attrs: &mut Attributes) -> Result<()> {
    match attrs.get("uuid") {
        Some(value) => {
            Uuid::parse_str(value)
                .map_err(|_| CertDepotError::Config(format!("invalid uuid \"{value}\"")))?;
        }
        None => {
            attrs.insert("uuid".to_string(), Uuid::new_v4().to_string());
        }
    }
    Ok(())
}

/// Whether a boolean-ish attribute is set to `true`.
pub(crate) fn flag(attrs: &Attributes, name: &str) -> bool {
    attrs
        .get(name)
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
}

/// One object owned by a CA.
#[derive(Clone)]
pub struct SslObject {
    ssltype: SslType,
    attrs: Attributes,
    text: String,
    state: ObjectState,
    path: Option<PathBuf>,
}

impl fmt::Debug for SslObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The text may hold a private key.
        f.debug_struct("SslObject")
            .field("ssltype", &self.ssltype)
            .field("attrs", &self.attrs)
            .field("state", &self.state)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SslObject {
    pub(crate) fn new(ssltype: SslType, attrs: Attributes, text: String, state: ObjectState) -> Self {
        Self {
            ssltype,
            attrs,
            text,
            state,
            path: None,
        }
    }

    /// Rebuilds an indexed object, reading its PEM text from `path`.
    pub(crate) fn load(entry: &IndexEntry, path: PathBuf) -> Result<Self> {
        let text = fs::read_to_string(&path).map_err(|e| {
            CertDepotError::Storage(format!("reading {}: {e}", path.display()))
        })?;
        let mut attrs = entry.attributes.clone();
        attrs.insert("type".to_string(), entry.ssltype.to_string());
        attrs.insert("name".to_string(), entry.name.clone());
        attrs.insert("host".to_string(), entry.host.clone());
        attrs.insert("uuid".to_string(), entry.uuid.clone());
        Ok(Self {
            ssltype: entry.ssltype,
            attrs,
            text,
            state: ObjectState::Loaded,
            path: Some(path),
        })
    }

    /// The index entry recording this object.
    pub(crate) fn index_entry(&self) -> Result<IndexEntry> {
        let mut attributes = self.attrs.clone();
        let mut take = |key: &str| {
            attributes.remove(key).ok_or_else(|| {
                CertDepotError::Config(format!("{} has no {key}", self.ssltype))
            })
        };
        let name = take("name")?;
        let host = take("host")?;
        let uuid = take("uuid")?;
        attributes.remove("type");
        Ok(IndexEntry {
            ssltype: self.ssltype,
            name,
            host,
            uuid,
            attributes,
        })
    }

    pub(crate) fn mark_persisted(&mut self, path: PathBuf) {
        self.state = ObjectState::Persisted;
        self.path = Some(path);
    }

    pub(crate) fn set_path(&mut self, path: PathBuf) {
        self.path = Some(path);
    }

    pub fn ssltype(&self) -> SslType {
        self.ssltype
    }

    pub fn state(&self) -> ObjectState {
        self.state
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attrs
    }

    pub fn name(&self) -> Option<&str> {
        self.attr("name")
    }

    pub fn host(&self) -> Option<&str> {
        self.attr("host")
    }

    pub fn uuid(&self) -> Option<&str> {
        self.attr("uuid")
    }

    pub fn owner(&self) -> Option<&str> {
        self.attr("owner")
    }

    pub fn group(&self) -> Option<&str> {
        self.attr("group")
    }

    pub fn perms(&self) -> Option<&str> {
        self.attr("perms")
    }

    /// The PEM text to place in the host's file.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The file holding the PEM text, once the object has one.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Parses the PEM text into its key, request or certificate.
    pub fn crypto(&self) -> Result<CryptoHandle> {
        kind(self.ssltype)
            .crypto_handle(&self.text)?
            .ok_or_else(|| {
                CertDepotError::Crypto(format!("{} has no crypto handle", self.ssltype))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_defaults_keeps_caller_values() {
        let mut attrs = Attributes::from([("perms".to_string(), "0640".to_string())]);
        fill_defaults(&mut attrs, [("perms", "0600"), ("owner", "root")]);
        assert_eq!(attrs["perms"], "0640");
        assert_eq!(attrs["owner"], "root");
    }

    #[test]
    fn test_caller_uuid_must_parse() {
        let mut attrs = Attributes::from([("uuid".to_string(), "../../etc/passwd".to_string())]);
        assert!(ensure_uuid(&mut attrs).unwrap_err().is_config());

        let mut attrs = Attributes::new();
        ensure_uuid(&mut attrs).unwrap();
        assert!(Uuid::parse_str(&attrs["uuid"]).is_ok());
    }

    #[test]
    fn test_index_entry_splits_identity() {
        let attrs = Attributes::from([
            ("type".to_string(), "Key".to_string()),
            ("name".to_string(), "/etc/a.key".to_string()),
            ("host".to_string(), "h1".to_string()),
            ("uuid".to_string(), Uuid::new_v4().to_string()),
            ("bits".to_string(), "2048".to_string()),
        ]);
        let object = SslObject::new(SslType::Key, attrs, String::new(), ObjectState::Generated);
        let entry = object.index_entry().unwrap();
        assert_eq!(entry.name, "/etc/a.key");
        assert_eq!(entry.host, "h1");
        assert_eq!(
            entry.attributes,
            Attributes::from([("bits".to_string(), "2048".to_string())])
        );
    }

    #[test]
    fn test_storable_kinds() {
        assert!(kind(SslType::Key).is_storable());
        assert!(kind(SslType::Cert).is_storable());
        assert!(!kind(SslType::CertRequest).is_storable());
        assert!(!kind(SslType::CAChain).is_storable());
        assert!(kind(SslType::CACert).is_provisioned());
    }
}
