use tracing::{error, info};

use super::{Attributes, CryptoHandle, SslKind, ensure_uuid, fill_defaults};
use crate::authority::Session;
use crate::error::Result;
use crate::index::SslType;
use crate::key::{KeyAlgorithm, KeyPair};

/// A private key, stored as PKCS#8 PEM.
///
/// Attributes: `algorithm` (`rsa`, `ec`/`ecdsa`, `ed25519`) and `bits`,
/// defaulting to the CA's `key_default_algorithm` and `key_default_bits`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyKind;

impl SslKind for KeyKind {
    fn ssltype(&self) -> SslType {
        SslType::Key
    }

    fn dependency_depth(&self) -> usize {
        0
    }

    fn generate(&self, session: &mut Session<'_>, attrs: &mut Attributes) -> Result<String> {
        let config = session.config();
        fill_defaults(
            attrs,
            [
                ("ca", config.name.clone()),
                ("bits", config.key_default_bits.to_string()),
                ("algorithm", config.key_default_algorithm.clone()),
                ("owner", "root".to_string()),
                ("group", "root".to_string()),
                ("perms", "0600".to_string()),
            ],
        );
        ensure_uuid(attrs)?;

        let algorithm = attrs.get("algorithm").map(String::as_str).unwrap_or_default();
        let bits = attrs.get("bits").map(String::as_str).unwrap_or_default();
        let algorithm = KeyAlgorithm::from_attrs(algorithm, bits).inspect_err(|e| {
            error!(
                name = attrs.get("name").map(String::as_str),
                host = attrs.get("host").map(String::as_str),
                error = %e,
                "cannot generate key"
            );
        })?;

        info!(?algorithm, name = attrs.get("name").map(String::as_str), "generating key");
        KeyPair::generate(algorithm)?.to_pkcs8_pem()
    }

    fn crypto_handle(&self, text: &str) -> Result<Option<CryptoHandle>> {
        Ok(Some(CryptoHandle::Key(KeyPair::import_from_pkcs8_pem(text)?)))
    }
}
