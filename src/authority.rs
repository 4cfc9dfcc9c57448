//! Certificate authorities and the registry of all configured CAs.
//!
//! A [`CertificateAuthority`] owns one directory:
//!
//! ```text
//! <base>/<ca>/index.json
//! <base>/<ca>/Key/<uuid>.pem
//! <base>/<ca>/Cert/<uuid>.pem
//! <base>/<ca>/CARoot/{CACert,CAKey,CAChain}.pem
//! ```
//!
//! [`CertificateAuthority::get_or_create`] returns the indexed object for a
//! request if there is one and otherwise generates, writes and indexes it.
//! The PEM file is written before the index entry, so a failure leaves at
//! worst an orphaned file and never an entry without its file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

use tracing::{debug, info, warn};

use crate::atomic_io::atomic_write;
use crate::cert::CertificateWithPrivateKey;
use crate::config::{CaConfig, ConfigSource};
use crate::error::{CertDepotError, Result};
use crate::index::{IndexEntry, IndexStore, SslType};
use crate::object::{self, Attributes, ObjectState, SslObject};

const SERIAL_STATE: &str = "serial";

/// What the caller knows about the host an object is requested for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub hostname: String,
}

impl Metadata {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
        }
    }
}

/// One certificate authority: its configuration, directory and index.
#[derive(Debug)]
pub struct CertificateAuthority {
    config: CaConfig,
    basepath: PathBuf,
    index: Mutex<IndexStore>,
    /// Parsed root certificate and key, read on the first issuance.
    issuer: OnceLock<CertificateWithPrivateKey>,
}

impl CertificateAuthority {
    /// Opens the CA's directory below `base`, creating it and its object
    /// directories if needed.
    pub fn open(config: CaConfig, base: impl AsRef<Path>) -> Result<Self> {
        let basepath = base.as_ref().join(&config.name);
        for ssltype in [SslType::Key, SslType::Cert] {
            let dir = basepath.join(ssltype.as_str());
            fs::create_dir_all(&dir).map_err(|e| {
                CertDepotError::Storage(format!("creating {}: {e}", dir.display()))
            })?;
        }
        let index = IndexStore::open(basepath.join("index.json"))?;
        debug!(ca = %config.name, path = %basepath.display(), "opened certificate authority");
        Ok(Self {
            config,
            basepath,
            index: Mutex::new(index),
            issuer: OnceLock::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &CaConfig {
        &self.config
    }

    pub fn basepath(&self) -> &Path {
        &self.basepath
    }

    fn lock(&self) -> Result<MutexGuard<'_, IndexStore>> {
        self.index.lock().map_err(|_| {
            CertDepotError::Storage(format!("index of CA {} is poisoned", self.config.name))
        })
    }

    /// Returns the object described by `attrs`, generating it first if it
    /// is not indexed yet.
    ///
    /// `attrs` needs at least `type`, `name` and `host`. Nested objects (the
    /// request and key behind a certificate) are resolved under the same
    /// lock, so concurrent callers on one CA never generate an object twice.
    #[tracing::instrument(
        skip_all,
        fields(
            ca = %self.config.name,
            ssltype = attrs.get("type").map(String::as_str),
            name = attrs.get("name").map(String::as_str),
            host = attrs.get("host").map(String::as_str),
        )
    )]
    pub fn get_or_create(&self, attrs: Attributes, metadata: &Metadata) -> Result<SslObject> {
        let mut index = self.lock()?;
        let ssltype = required_type(&attrs)?;
        let mut session = Session {
            ca: self,
            index: &mut *index,
            metadata,
            budget: object::kind(ssltype).dependency_depth(),
        };
        session.get_or_create(attrs)
    }

    /// Reserves and returns the next certificate serial number.
    #[tracing::instrument(skip(self), fields(ca = %self.config.name))]
    pub fn next_serial(&self) -> Result<u64> {
        let mut index = self.lock()?;
        next_serial_locked(&mut index)
    }

    /// The last serial handed out, 0 if none.
    pub fn current_serial(&self) -> Result<u64> {
        self.lock()?.get_state(SERIAL_STATE, 0)
    }

    /// Looks up an indexed object without generating anything.
    pub fn search(&self, ssltype: SslType, name: &str, host: &str) -> Result<Option<IndexEntry>> {
        Ok(self.lock()?.search(ssltype, name, host)?.cloned())
    }
}

fn required_type(attrs: &Attributes) -> Result<SslType> {
    attrs
        .get("type")
        .ok_or_else(|| CertDepotError::Config("request has no type".to_string()))?
        .parse()
}

fn required<'a>(attrs: &'a Attributes, key: &str) -> Result<&'a str> {
    attrs
        .get(key)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| CertDepotError::Config(format!("request has no {key}")))
}

fn next_serial_locked(index: &mut IndexStore) -> Result<u64> {
    let serial = index.get_state::<u64>(SERIAL_STATE, 0)? + 1;
    index.set_state(SERIAL_STATE, serial);
    // Persisted right away: a crash before the certificate is stored leaves a
    // gap in the serials instead of a reused one.
    index.persist()?;
    debug!(serial, "reserved serial");
    Ok(serial)
}

/// One `get_or_create` call in progress on a CA, holding its index lock.
///
/// Objects generate their dependencies through [`Session::nested`], which
/// reuses the held lock and counts down the remaining nesting depth.
pub struct Session<'a> {
    ca: &'a CertificateAuthority,
    index: &'a mut IndexStore,
    metadata: &'a Metadata,
    budget: usize,
}

impl<'a> Session<'a> {
    pub fn config(&self) -> &'a CaConfig {
        &self.ca.config
    }

    pub fn metadata(&self) -> &'a Metadata {
        self.metadata
    }

    pub fn ca_dir(&self) -> &'a Path {
        &self.ca.basepath
    }

    /// Resolves an object another object depends on.
    pub fn nested(&mut self, attrs: Attributes) -> Result<SslObject> {
        let ssltype = required_type(&attrs)?;
        if self.budget == 0 {
            return Err(CertDepotError::Config(format!(
                "{ssltype} {} is nested deeper than allowed",
                attrs.get("name").map(String::as_str).unwrap_or_default()
            )));
        }
        let outer = self.budget;
        self.budget = (outer - 1).min(object::kind(ssltype).dependency_depth());
        let result = self.get_or_create(attrs);
        self.budget = outer;
        result
    }

    /// Reserves the next serial under the held lock.
    pub fn next_serial(&mut self) -> Result<u64> {
        next_serial_locked(self.index)
    }

    /// Loads one piece of the CA's root material.
    pub fn ca_root(&mut self, ssltype: SslType) -> Result<SslObject> {
        let attrs = Attributes::from([
            ("type".to_string(), ssltype.to_string()),
            ("name".to_string(), ssltype.to_string()),
            ("host".to_string(), self.metadata.hostname.clone()),
        ]);
        self.load_ca_root(ssltype, attrs)
    }

    /// The CA's certificate and signing key. Read from `CARoot` once per CA
    /// and kept for the life of the process.
    pub fn issuer(&mut self) -> Result<&'a CertificateWithPrivateKey> {
        let ca = self.ca;
        if let Some(issuer) = ca.issuer.get() {
            return Ok(issuer);
        }
        let issuer = CertificateWithPrivateKey {
            cert: self.ca_root(SslType::CACert)?.crypto()?.into_certificate()?,
            key: self.ca_root(SslType::CAKey)?.crypto()?.into_key()?,
        };
        debug!(ca = %ca.config.name, "loaded CA root material");
        Ok(ca.issuer.get_or_init(|| issuer))
    }

    fn load_ca_root(&mut self, ssltype: SslType, mut attrs: Attributes) -> Result<SslObject> {
        let kind = object::kind(ssltype);
        if !kind.is_provisioned() {
            return Err(CertDepotError::Config(format!(
                "{ssltype} is not CA root material"
            )));
        }
        let text = kind.generate(self, &mut attrs)?;
        let mut object = SslObject::new(ssltype, attrs, text, ObjectState::Loaded);
        object.set_path(kind.filename(self.ca_dir(), object.uuid().unwrap_or_default()));
        Ok(object)
    }

    fn get_or_create(&mut self, mut attrs: Attributes) -> Result<SslObject> {
        let ssltype = required_type(&attrs)?;
        let name = required(&attrs, "name")?.to_string();
        let host = required(&attrs, "host")?.to_string();
        let kind = object::kind(ssltype);

        if let Some(entry) = self.index.search(ssltype, &name, &host)? {
            let path = kind.filename(self.ca_dir(), &entry.uuid);
            debug!(%ssltype, %name, %host, uuid = %entry.uuid, "found indexed object");
            return SslObject::load(entry, path);
        }
        if kind.is_provisioned() {
            return self.load_ca_root(ssltype, attrs);
        }

        let text = kind.generate(self, &mut attrs)?;
        let mut object = SslObject::new(ssltype, attrs, text, ObjectState::Generated);
        if kind.is_storable() {
            let entry = object.index_entry()?;
            let path = kind.filename(self.ca_dir(), &entry.uuid);
            self.persist_object(entry, object.text(), &path)?;
            object.mark_persisted(path);
            info!(%ssltype, %name, %host, "generated and stored object");
        }
        Ok(object)
    }

    /// Writes the object's file, then its index entry. The in-memory entry
    /// is rolled back if the index cannot be persisted.
    fn persist_object(&mut self, entry: IndexEntry, text: &str, path: &Path) -> Result<()> {
        atomic_write(path, text.as_bytes(), 0o600).map_err(|e| {
            CertDepotError::Storage(format!("writing {}: {e}", path.display()))
        })?;
        let (ssltype, uuid) = (entry.ssltype, entry.uuid.clone());
        self.index.store(entry)?;
        if let Err(err) = self.index.persist() {
            self.index.remove(ssltype, &uuid);
            if let Err(cleanup) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %cleanup, "leaving orphaned object file");
            }
            return Err(err);
        }
        Ok(())
    }
}

/// All configured CAs, keyed by name.
#[derive(Debug)]
pub struct Registry {
    cas: BTreeMap<String, CertificateAuthority>,
    default_ca: String,
}

impl Registry {
    /// Opens every CA listed in `[global] cas`, each below `base`.
    ///
    /// Without `default_ca` the first listed CA is the default.
    pub fn load(source: &dyn ConfigSource, base: impl AsRef<Path>) -> Result<Self> {
        let global: BTreeMap<String, String> = source
            .items("global")
            .ok_or_else(|| CertDepotError::Config("missing section [global]".to_string()))?
            .into_iter()
            .collect();
        let names: Vec<String> = global
            .get("cas")
            .map(|cas| {
                cas.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let Some(first) = names.first() else {
            return Err(CertDepotError::Config(
                "[global] cas lists no certificate authorities".to_string(),
            ));
        };

        let default_ca = match global.get("default_ca").map(|name| name.trim()) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                warn!(default_ca = %first, "no default_ca configured, using the first CA");
                first.clone()
            }
        };
        if !names.contains(&default_ca) {
            return Err(CertDepotError::Config(format!(
                "default_ca \"{default_ca}\" is not listed in cas"
            )));
        }

        // Every CA's configuration is checked before any directory is created.
        let configs = names
            .iter()
            .map(|name| CaConfig::load(name, source))
            .collect::<Result<Vec<_>>>()?;
        let mut cas = BTreeMap::new();
        for config in configs {
            let name = config.name.clone();
            cas.insert(name, CertificateAuthority::open(config, base.as_ref())?);
        }
        info!(cas = ?names, %default_ca, "loaded certificate authorities");
        Ok(Self { cas, default_ca })
    }

    pub fn get(&self, name: &str) -> Option<&CertificateAuthority> {
        self.cas.get(name)
    }

    pub fn default_ca(&self) -> &str {
        &self.default_ca
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.cas.keys().map(String::as_str)
    }

    /// Routes a request to the CA named by `attrs["ca"]`, or the default CA.
    /// `host` defaults to the metadata's hostname.
    pub fn get_or_create(&self, mut attrs: Attributes, metadata: &Metadata) -> Result<SslObject> {
        let ca_name = attrs
            .get("ca")
            .cloned()
            .unwrap_or_else(|| self.default_ca.clone());
        let ca = self
            .get(&ca_name)
            .ok_or_else(|| CertDepotError::Config(format!("unknown CA \"{ca_name}\"")))?;
        attrs
            .entry("host".to_string())
            .or_insert_with(|| metadata.hostname.clone());
        ca.get_or_create(attrs, metadata)
    }
}
