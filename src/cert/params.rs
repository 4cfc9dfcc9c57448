use std::fmt;
use std::str::FromStr;

use bon::Builder;
use const_oid::ObjectIdentifier;
use der::asn1::{Any, Ia5StringRef, PrintableStringRef, SetOfVec, Utf8StringRef};
use time::Duration;
use time::OffsetDateTime;
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::name::{RdnSequence, RelativeDistinguishedName};
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use super::extensions::ToAndFromX509Extension;
use crate::error::{CertDepotError, Result};

const EMAIL_ADDRESS: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.1");

/// Keeps `notAfter` representable: roughly the days left before year 10000.
const MAX_VALIDITY_DAYS: i64 = 2_914_000;

/// Parameters for building an X.509 certificate or certification request.
///
/// # Fields
/// * `subject` - The distinguished name of the certificate subject.
/// * `subject_public_key` - The public key of the certificate subject.
/// * `extensions` - X.509 extensions, in the order they are encoded.
#[derive(Clone, Debug, Builder)]
pub struct CertificationRequestInfo {
    pub subject: DistinguishedName,
    pub subject_public_key: SubjectPublicKeyInfoOwned,
    #[builder(default)]
    pub extensions: Vec<ExtensionParam>,
}

/// A distinguished-name attribute that can appear in a CA's `dn_fields`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DnField {
    Country,
    State,
    Locality,
    Organization,
    OrganizationalUnit,
    CommonName,
    EmailAddress,
}

impl DnField {
    /// The lower-case attribute name used in configuration and request
    /// attributes (`c`, `st`, `l`, `o`, `ou`, `cn`, `emailaddress`).
    pub fn attr_name(&self) -> &'static str {
        match self {
            DnField::Country => "c",
            DnField::State => "st",
            DnField::Locality => "l",
            DnField::Organization => "o",
            DnField::OrganizationalUnit => "ou",
            DnField::CommonName => "cn",
            DnField::EmailAddress => "emailaddress",
        }
    }

    pub fn oid(&self) -> ObjectIdentifier {
        use const_oid::db::rfc4519;
        match self {
            DnField::Country => rfc4519::C,
            DnField::State => rfc4519::ST,
            DnField::Locality => rfc4519::L,
            DnField::Organization => rfc4519::O,
            DnField::OrganizationalUnit => rfc4519::OU,
            DnField::CommonName => rfc4519::CN,
            DnField::EmailAddress => EMAIL_ADDRESS,
        }
    }

    fn from_oid(oid: ObjectIdentifier) -> Option<Self> {
        [
            DnField::Country,
            DnField::State,
            DnField::Locality,
            DnField::Organization,
            DnField::OrganizationalUnit,
            DnField::CommonName,
            DnField::EmailAddress,
        ]
        .into_iter()
        .find(|field| field.oid() == oid)
    }

    /// Checks a value against the field's syntax before it reaches a request.
    pub fn validate(&self, value: &str) -> Result<()> {
        if value.is_empty() {
            return Err(CertDepotError::Config(format!(
                "DN field \"{}\" is empty",
                self.attr_name()
            )));
        }
        if *self == DnField::Country
            && (value.len() != 2 || !value.chars().all(|c| c.is_ascii_alphabetic()))
        {
            return Err(CertDepotError::Config(format!(
                "DN field \"c\" must be a two-letter country code, got \"{value}\""
            )));
        }
        if *self == DnField::EmailAddress && !value.is_ascii() {
            return Err(CertDepotError::Config(format!(
                "DN field \"emailaddress\" must be ASCII, got \"{value}\""
            )));
        }
        Ok(())
    }
}

impl FromStr for DnField {
    type Err = CertDepotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "c" => Ok(DnField::Country),
            "st" => Ok(DnField::State),
            "l" => Ok(DnField::Locality),
            "o" => Ok(DnField::Organization),
            "ou" => Ok(DnField::OrganizationalUnit),
            "cn" => Ok(DnField::CommonName),
            "emailaddress" => Ok(DnField::EmailAddress),
            other => Err(CertDepotError::Config(format!("unknown DN field \"{other}\""))),
        }
    }
}

impl fmt::Display for DnField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.attr_name())
    }
}

/// Distinguished name of a certificate subject or issuer.
///
/// Attributes keep their insertion order, which is the order they are encoded
/// in (first attribute outermost), matching the CA's `dn_fields` list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DistinguishedName {
    attributes: Vec<(DnField, String)>,
}

impl DistinguishedName {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `field`, replacing an earlier value in place.
    pub fn set(&mut self, field: DnField, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(f, _)| *f == field) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((field, value)),
        }
    }

    pub fn get(&self, field: DnField) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, v)| v.as_str())
    }

    pub fn common_name(&self) -> Option<&str> {
        self.get(DnField::CommonName)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(DnField, String)> {
        self.attributes.iter()
    }

    /// Converts the distinguished name to an X.509-compatible format.
    ///
    /// Countries are encoded as PrintableString, email addresses as
    /// IA5String, everything else as UTF8String.
    pub fn as_x509_name(&self) -> Result<x509_cert::name::DistinguishedName> {
        let mut rdns = Vec::with_capacity(self.attributes.len());
        for (field, value) in &self.attributes {
            let encoded = match field {
                DnField::Country => Any::encode_from(&PrintableStringRef::new(value)?)?,
                DnField::EmailAddress => Any::encode_from(&Ia5StringRef::new(value)?)?,
                _ => Any::encode_from(&Utf8StringRef::new(value)?)?,
            };
            let atv = AttributeTypeAndValue {
                oid: field.oid(),
                value: encoded,
            };
            rdns.push(RelativeDistinguishedName(SetOfVec::try_from(vec![atv])?));
        }
        Ok(RdnSequence(rdns))
    }

    /// Creates a `DistinguishedName` from an X.509-compatible format.
    ///
    /// Attributes outside [`DnField`] are skipped.
    pub fn from_x509_name(x509dn: &x509_cert::name::DistinguishedName) -> Self {
        let mut dn = DistinguishedName::new();
        for rdn in x509dn.0.iter() {
            for attr in rdn.0.iter() {
                let Some(field) = DnField::from_oid(attr.oid) else {
                    continue;
                };
                if let Ok(value) = std::str::from_utf8(attr.value.value()) {
                    dn.set(field, value);
                }
            }
        }
        dn
    }
}

/// Certificate validity period.
///
/// This struct represents the `notBefore` and `notAfter` fields in a certificate.
///
/// # Fields
/// * `not_before` - The start of the validity period.
/// * `not_after` - The end of the validity period.
#[derive(Clone, Debug)]
pub struct Validity {
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl Validity {
    /// Creates a validity period starting now for the given number of days.
    ///
    /// Fails with a configuration error unless `days` is positive and the
    /// end date falls no later than the year 9999.
    pub fn for_days(days: i64) -> Result<Self> {
        let now = OffsetDateTime::now_utc();
        let not_after = (1..=MAX_VALIDITY_DAYS)
            .contains(&days)
            .then(|| now.checked_add(Duration::days(days)))
            .flatten()
            .filter(|end| end.year() <= 9999)
            .ok_or_else(|| {
                CertDepotError::Config(format!("validity of {days} days is out of range"))
            })?;
        Ok(Self {
            not_before: now,
            not_after,
        })
    }
}

/// Represents an X.509 extension.
///
/// # Fields
/// * `oid` - The object identifier of the extension.
/// * `critical` - Indicates if the extension is critical.
/// * `value` - The DER-encoded value of the extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionParam {
    pub oid: ObjectIdentifier,
    pub critical: bool,
    /// DER-encoded extension value
    pub value: Vec<u8>,
}

impl ExtensionParam {
    /// Creates an `ExtensionParam` from a specific extension.
    pub fn from_extension<E: ToAndFromX509Extension>(extension: E, critical: bool) -> Result<Self> {
        Ok(Self {
            oid: E::OID,
            critical,
            value: extension.to_x509_extension_value()?,
        })
    }

    /// Decodes an `ExtensionParam` into a specific extension.
    pub fn to_extension<E: ToAndFromX509Extension>(&self) -> Result<E> {
        E::from_x509_extension_value(&self.value)
    }
}
