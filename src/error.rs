//! use certdepot::error::CertDepotError;

use thiserror::Error;

/// Represents errors that can occur while looking up or generating objects.
///
/// Every variant aborts the current `get_or_create` call. Nothing partial is
/// committed to the index when one of these is returned.
#[derive(Debug, Error, Clone)]
pub enum CertDepotError {
    /// Missing or invalid CA configuration, unsupported algorithm, or an
    /// unresolvable extension modifier.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The index holds more than one entry for the same (type, name, host).
    #[error("Index conflict: {0}")]
    Conflict(String),

    /// The index or a PEM file could not be read or written.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Key, request or signature generation failed.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Error during data encoding.
    #[error("Failed to encode data: {0}")]
    Encoding(String),

    /// Error during data decoding.
    #[error("Failed to decode data: {0}")]
    Decoding(String),
}

impl CertDepotError {
    /// True when the error signals a violated uniqueness invariant in the
    /// index, as opposed to an ordinary configuration mistake.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CertDepotError::Conflict(_))
    }

    /// True for configuration errors.
    pub fn is_config(&self) -> bool {
        matches!(self, CertDepotError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, CertDepotError>;

impl From<der::Error> for CertDepotError {
    /// Converts a `der::Error` into a `CertDepotError`.
    fn from(err: der::Error) -> Self {
        CertDepotError::Decoding(err.to_string())
    }
}

impl From<rsa::Error> for CertDepotError {
    fn from(err: rsa::Error) -> Self {
        CertDepotError::Crypto(err.to_string())
    }
}

impl From<pkcs8::Error> for CertDepotError {
    fn from(err: pkcs8::Error) -> Self {
        CertDepotError::Decoding(err.to_string())
    }
}

impl From<x509_cert::spki::Error> for CertDepotError {
    fn from(err: x509_cert::spki::Error) -> Self {
        CertDepotError::Encoding(err.to_string())
    }
}

impl From<pem::PemError> for CertDepotError {
    fn from(err: pem::PemError) -> Self {
        CertDepotError::Decoding(err.to_string())
    }
}

impl From<std::io::Error> for CertDepotError {
    fn from(err: std::io::Error) -> Self {
        CertDepotError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for CertDepotError {
    fn from(err: serde_json::Error) -> Self {
        CertDepotError::Storage(format!("index document: {err}"))
    }
}

impl From<toml::de::Error> for CertDepotError {
    fn from(err: toml::de::Error) -> Self {
        CertDepotError::Config(err.to_string())
    }
}
