//! # certdepot - An On-Demand Certificate Authority Object Store
//!
//! certdepot hands out keys and certificates to a configuration-management
//! host. Each request names an object by type, name and host. The first time
//! an object is requested it is generated, written to a PEM file and recorded
//! in the CA's index; every later request returns the same PEM text unchanged.
//! All cryptography is done with the RustCrypto libraries.
//!
//! ## Object Types
//!
//! - **Key**: a private key (RSA, ECDSA P-256/P-384 or Ed25519), stored as PKCS#8 PEM
//! - **Cert**: an X.509v3 certificate signed by the CA, optionally combined
//!   with its key in one file
//! - **CertRequest**: a PKCS#10 request, built while a certificate is generated
//!   and never stored
//! - **CACert**, **CAKey**, **CAChain**: the CA's own root material, provisioned
//!   by an operator and only ever read
//!
//! ## Guarantees
//!
//! - **One object per (type, name, host)**: a duplicate in the index is reported
//!   as [`CertDepotError::Conflict`](error::CertDepotError::Conflict)
//! - **Monotonic serials**: a serial is persisted before it is used, so serials
//!   may skip after a crash but are never reused
//! - **File before index**: a PEM file is written before its index entry, and
//!   the index is replaced atomically
//! - **Per-CA locking**: requests to one CA are serialized; different CAs never
//!   wait on each other
//!
//! ## Quick Start
//!
//! ### Serving a Certificate
//!
//! ```rust,no_run
//! use certdepot::{
//!     authority::{Metadata, Registry},
//!     config::TomlConfig,
//!     object::Attributes,
//! };
//!
//! # fn main() -> Result<(), certdepot::error::CertDepotError> {
//! let config = TomlConfig::from_path("/etc/certdepot/certdepot.toml")?;
//! let registry = Registry::load(&config, "/var/lib/certdepot")?;
//!
//! let attrs = Attributes::from([
//!     ("type".to_string(), "Cert".to_string()),
//!     ("name".to_string(), "/etc/pki/tls/certs/web.pem".to_string()),
//!     ("key".to_string(), "/etc/pki/tls/private/web.key".to_string()),
//! ]);
//! let cert = registry.get_or_create(attrs, &Metadata::new("web1.example.com"))?;
//!
//! println!("{} {} {}", cert.owner().unwrap_or("root"), cert.group().unwrap_or("root"), cert.perms().unwrap_or("0600"));
//! println!("{}", cert.text());
//! # Ok(())
//! # }
//! ```
//!
//! ### Provisioning a CA Root
//!
//! ```rust,no_run
//! use certdepot::{
//!     cert::{Certificate, params::{CertificationRequestInfo, DistinguishedName, DnField}},
//!     key::{KeyPair, MessageDigest},
//! };
//!
//! # fn main() -> Result<(), certdepot::error::CertDepotError> {
//! let ca_key = KeyPair::generate_ecdsa_p256();
//!
//! let mut subject = DistinguishedName::new();
//! subject.set(DnField::Country, "US");
//! subject.set(DnField::Organization, "Example Corp");
//! subject.set(DnField::CommonName, "Example Root CA");
//!
//! let info = CertificationRequestInfo::builder()
//!     .subject(subject)
//!     .subject_public_key(ca_key.as_spki()?)
//!     .build();
//! let ca_cert = Certificate::new_self_signed(&info, &ca_key, 1096, MessageDigest::Sha256)?;
//!
//! std::fs::write("/var/lib/certdepot/myca/CARoot/CACert.pem", ca_cert.to_pem()?)?;
//! std::fs::write("/var/lib/certdepot/myca/CARoot/CAKey.pem", ca_key.to_pkcs8_pem()?)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! See [`config`] for the sections a CA reads and [`cert::ext_config`] for the
//! extension language.

mod atomic_io;
pub mod authority;
pub mod cert;
pub mod config;
pub mod error;
pub mod index;
pub mod issuer;
pub mod key;
pub mod object;
pub mod pem_utils;
pub mod tbs_certificate;
