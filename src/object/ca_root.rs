use std::path::{Path, PathBuf};

use super::{Attributes, CryptoHandle, SslKind, ensure_uuid, fill_defaults};
use crate::authority::Session;
use crate::cert::Certificate;
use crate::error::{CertDepotError, Result};
use crate::index::SslType;
use crate::key::KeyPair;

/// Directory below the CA's directory holding its root material.
pub const CA_ROOT_DIR: &str = "CARoot";

/// The CA's own certificate, key or chain, provisioned by an operator as
/// `CARoot/<Type>.pem`. Never generated and never indexed.
#[derive(Debug, Clone, Copy)]
pub struct CaRootKind(pub SslType);

impl CaRootKind {
    fn default_perms(&self) -> &'static str {
        match self.0 {
            SslType::CAKey => "0600",
            _ => "0644",
        }
    }
}

impl SslKind for CaRootKind {
    fn ssltype(&self) -> SslType {
        self.0
    }

    fn is_storable(&self) -> bool {
        false
    }

    fn is_provisioned(&self) -> bool {
        true
    }

    fn dependency_depth(&self) -> usize {
        0
    }

    fn filename(&self, ca_dir: &Path, _uuid: &str) -> PathBuf {
        ca_dir
            .join(CA_ROOT_DIR)
            .join(format!("{}.pem", self.0.as_str()))
    }

    fn generate(&self, session: &mut Session<'_>, attrs: &mut Attributes) -> Result<String> {
        fill_defaults(
            attrs,
            [
                ("ca", session.config().name.as_str()),
                ("owner", "root"),
                ("group", "root"),
                ("perms", self.default_perms()),
            ],
        );
        ensure_uuid(attrs)?;

        let path = self.filename(session.ca_dir(), "");
        std::fs::read_to_string(&path).map_err(|e| {
            CertDepotError::Storage(format!("reading CA material {}: {e}", path.display()))
        })
    }

    fn crypto_handle(&self, text: &str) -> Result<Option<CryptoHandle>> {
        match self.0 {
            SslType::CACert => Ok(Some(CryptoHandle::Certificate(Certificate::from_pem(text)?))),
            SslType::CAKey => Ok(Some(CryptoHandle::Key(KeyPair::import_from_pkcs8_pem(text)?))),
            _ => Ok(None),
        }
    }
}
