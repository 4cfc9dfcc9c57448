//! The per-CA object index.
//!
//! The index is a JSON document with one container per storable object type
//! and a container of CA state variables:
//!
//! ```json
//! {
//!   "version": 1,
//!   "keys":  [ { "ssltype": "Key",  "name": "...", "host": "...", "uuid": "...", "attributes": { ... } } ],
//!   "certs": [ { "ssltype": "Cert", "name": "...", "host": "...", "uuid": "...", "attributes": { ... } } ],
//!   "ca_state": [ { "name": "serial", "value": "3" } ]
//! }
//! ```
//!
//! Changes stay in memory until [`IndexStore::persist`] succeeds.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::atomic_io::atomic_write;
use crate::error::{CertDepotError, Result};

/// Schema version written to new documents.
pub const INDEX_VERSION: u32 = 1;

/// Object types a request can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SslType {
    Key,
    Cert,
    CertRequest,
    CACert,
    CAKey,
    CAChain,
}

impl SslType {
    /// Only keys and certificates are written to files and indexed.
    pub fn is_storable(&self) -> bool {
        matches!(self, SslType::Key | SslType::Cert)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SslType::Key => "Key",
            SslType::Cert => "Cert",
            SslType::CertRequest => "CertRequest",
            SslType::CACert => "CACert",
            SslType::CAKey => "CAKey",
            SslType::CAChain => "CAChain",
        }
    }
}

impl FromStr for SslType {
    type Err = CertDepotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Key" => Ok(SslType::Key),
            "Cert" => Ok(SslType::Cert),
            "CertRequest" => Ok(SslType::CertRequest),
            "CACert" => Ok(SslType::CACert),
            "CAKey" => Ok(SslType::CAKey),
            "CAChain" => Ok(SslType::CAChain),
            other => Err(CertDepotError::Config(format!("unknown object type \"{other}\""))),
        }
    }
}

impl fmt::Display for SslType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One generated object as recorded in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub ssltype: SslType,
    pub name: String,
    pub host: String,
    pub uuid: String,
    /// Every other resolved attribute (owner, group, perms, bits, days, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StateVar {
    name: String,
    value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexDocument {
    version: u32,
    #[serde(default)]
    keys: Vec<IndexEntry>,
    #[serde(default)]
    certs: Vec<IndexEntry>,
    #[serde(default)]
    ca_state: Vec<StateVar>,
}

impl Default for IndexDocument {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            keys: Vec::new(),
            certs: Vec::new(),
            ca_state: Vec::new(),
        }
    }
}

/// The index of one CA, loaded in memory.
#[derive(Debug)]
pub struct IndexStore {
    path: PathBuf,
    doc: IndexDocument,
}

impl IndexStore {
    /// Loads the index at `path`, or starts an empty one if the file does not
    /// exist yet. The empty index is not written until [`persist`](Self::persist).
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = if path.exists() {
            let text = fs::read_to_string(&path).map_err(|e| {
                CertDepotError::Storage(format!("reading {}: {e}", path.display()))
            })?;
            let doc: IndexDocument = serde_json::from_str(&text).map_err(|e| {
                CertDepotError::Storage(format!("parsing {}: {e}", path.display()))
            })?;
            if doc.version != INDEX_VERSION {
                return Err(CertDepotError::Storage(format!(
                    "{}: unsupported index version {}",
                    path.display(),
                    doc.version
                )));
            }
            debug!(
                path = %path.display(),
                keys = doc.keys.len(),
                certs = doc.certs.len(),
                "loaded object index"
            );
            doc
        } else {
            debug!(path = %path.display(), "starting empty object index");
            IndexDocument::default()
        };
        Ok(Self { path, doc })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn container(&self, ssltype: SslType) -> Option<&Vec<IndexEntry>> {
        match ssltype {
            SslType::Key => Some(&self.doc.keys),
            SslType::Cert => Some(&self.doc.certs),
            _ => None,
        }
    }

    fn container_mut(&mut self, ssltype: SslType) -> Option<&mut Vec<IndexEntry>> {
        match ssltype {
            SslType::Key => Some(&mut self.doc.keys),
            SslType::Cert => Some(&mut self.doc.certs),
            _ => None,
        }
    }

    /// Finds the entry for exactly (`ssltype`, `name`, `host`).
    ///
    /// More than one match means the uniqueness invariant was already broken
    /// and is reported as a conflict rather than picking one.
    pub fn search(&self, ssltype: SslType, name: &str, host: &str) -> Result<Option<&IndexEntry>> {
        let Some(entries) = self.container(ssltype) else {
            return Ok(None);
        };
        let mut matches = entries
            .iter()
            .filter(|entry| entry.name == name && entry.host == host);
        let first = matches.next();
        if matches.next().is_some() {
            error!(%ssltype, name, host, "found multiple index entries");
            return Err(CertDepotError::Conflict(format!(
                "multiple entries for type {ssltype}, name {name}, host {host}"
            )));
        }
        Ok(first)
    }

    /// Appends `entry` to its container. Callers check for an existing entry
    /// first; nothing is deduplicated here.
    pub fn store(&mut self, entry: IndexEntry) -> Result<()> {
        let ssltype = entry.ssltype;
        let entries = self.container_mut(ssltype).ok_or_else(|| {
            CertDepotError::Storage(format!("objects of type {ssltype} are not indexed"))
        })?;
        entries.push(entry);
        Ok(())
    }

    /// Drops the entry with `uuid`, undoing a [`store`](Self::store) that
    /// could not be persisted.
    pub(crate) fn remove(&mut self, ssltype: SslType, uuid: &str) {
        if let Some(entries) = self.container_mut(ssltype) {
            entries.retain(|entry| entry.uuid != uuid);
        }
    }

    /// All entries of one type, in insertion order.
    pub fn entries(&self, ssltype: SslType) -> &[IndexEntry] {
        self.container(ssltype).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn get_state_raw(&self, key: &str) -> Option<&str> {
        self.doc
            .ca_state
            .iter()
            .find(|var| var.name == key)
            .map(|var| var.value.as_str())
    }

    /// Reads a state variable, returning `default` when it is unset.
    ///
    /// A value that does not parse as `T` means the index was edited into an
    /// inconsistent state and is reported as a storage error.
    pub fn get_state<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.get_state_raw(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|_| {
                CertDepotError::Storage(format!("CA state \"{key}\" has invalid value \"{raw}\""))
            }),
        }
    }

    /// Creates or updates a state variable.
    pub fn set_state(&mut self, key: &str, value: impl ToString) {
        let value = value.to_string();
        match self.doc.ca_state.iter_mut().find(|var| var.name == key) {
            Some(var) => var.value = value,
            None => self.doc.ca_state.push(StateVar {
                name: key.to_string(),
                value,
            }),
        }
    }

    /// Writes the whole index to disk atomically.
    #[tracing::instrument(skip(self), fields(path = %self.path.display()))]
    pub fn persist(&self) -> Result<()> {
        let mut text = serde_json::to_string_pretty(&self.doc)?;
        text.push('\n');
        atomic_write(&self.path, text.as_bytes(), 0o600).map_err(|e| {
            CertDepotError::Storage(format!("writing {}: {e}", self.path.display()))
        })?;
        debug!("persisted object index");
        Ok(())
    }
}
