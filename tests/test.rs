mod util;

use certdepot::authority::Metadata;
use certdepot::cert::Certificate;
use certdepot::cert::extensions::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, NsComment,
    SubjectKeyIdentifier, ToAndFromX509Extension,
};
use certdepot::cert::params::{DistinguishedName, DnField};
use certdepot::error::CertDepotError;
use certdepot::index::SslType;
use certdepot::key::KeyPair;
use certdepot::object::ObjectState;
use certdepot::pem_utils;
use p256::ecdsa::signature::Verifier;
use rsa::pkcs8::DecodePublicKey;
use x509_cert::der::{Encode, Tag, Tagged};

pub type Result<T> = std::result::Result<T, CertDepotError>;

fn web1() -> Metadata {
    Metadata::new("web1.example.com")
}

/// Verifies `cert` against the P-256 key of the CA that issued it.
fn verify_signed_by(cert: &Certificate, ca: &Certificate) {
    let ca_key = p256::ecdsa::VerifyingKey::from_sec1_bytes(
        ca.subject_public_key_info().subject_public_key.raw_bytes(),
    )
    .unwrap();
    let signature = p256::ecdsa::Signature::from_der(cert.inner.signature.raw_bytes()).unwrap();
    let tbs = cert.inner.tbs_certificate.to_der().unwrap();
    ca_key.verify(&tbs, &signature).unwrap();
}

#[test]
fn get_or_create_is_idempotent() -> Result<()> {
    let depot = util::Depot::new();
    let request = util::attrs(&[
        ("type", "Cert"),
        ("name", "/etc/pki/tls/certs/web.crt"),
        ("key", "/etc/pki/tls/private/web.key"),
    ]);

    let first = depot.registry.get_or_create(request.clone(), &web1())?;
    let second = depot.registry.get_or_create(request, &web1())?;

    assert_eq!(first.state(), ObjectState::Persisted);
    assert_eq!(second.state(), ObjectState::Loaded);
    assert_eq!(first.text(), second.text());
    assert_eq!(first.uuid(), second.uuid());

    let ca = depot.registry.get("test").unwrap();
    assert_eq!(ca.current_serial()?, 1);
    assert_eq!(depot.stored_files("test", "Cert"), 1);
    assert_eq!(depot.stored_files("test", "Key"), 1);
    Ok(())
}

#[test]
fn serials_increase_per_certificate() -> Result<()> {
    let depot = util::Depot::new();
    let mut serials = Vec::new();
    for name in ["a.crt", "b.crt", "c.crt"] {
        let cert = depot.registry.get_or_create(
            util::attrs(&[("type", "Cert"), ("name", name), ("key", "shared.key")]),
            &web1(),
        )?;
        serials.push(Certificate::from_pem(cert.text())?.serial().unwrap());
    }
    assert_eq!(serials, vec![1, 2, 3]);

    // The shared key was generated once.
    assert_eq!(depot.stored_files("test", "Key"), 1);

    let ca = depot.registry.get("test").unwrap();
    assert_eq!(ca.next_serial()?, 4);
    Ok(())
}

#[test]
fn index_survives_reopen() -> Result<()> {
    let depot = util::Depot::new();
    let request = util::attrs(&[("type", "Cert"), ("name", "web.crt"), ("key", "web.key")]);
    let before = depot.registry.get_or_create(request.clone(), &web1())?;

    let depot = depot.reopen();
    let after = depot.registry.get_or_create(request, &web1())?;
    assert_eq!(after.state(), ObjectState::Loaded);
    assert_eq!(before.text(), after.text());
    assert_eq!(depot.registry.get("test").unwrap().current_serial()?, 1);
    Ok(())
}

#[test]
fn combined_file_holds_certificate_then_key() -> Result<()> {
    let depot = util::Depot::new();
    let cert = depot.registry.get_or_create(
        util::attrs(&[("type", "Cert"), ("name", "/etc/pki/web.pem"), ("append_key", "true")]),
        &web1(),
    )?;

    let blocks = pem_utils::split_blocks(cert.text())?;
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].tag(), pem_utils::CERTIFICATE_LABEL);
    assert_eq!(blocks[1].tag(), pem_utils::PRIVATE_KEY_LABEL);

    let key = depot.registry.get_or_create(
        util::attrs(&[("type", "Key"), ("name", "/etc/pki/web.pem")]),
        &web1(),
    )?;
    assert_eq!(key.state(), ObjectState::Loaded);
    let key_block = pem_utils::find_block(key.text(), pem_utils::PRIVATE_KEY_LABEL)?;
    assert_eq!(key_block.contents(), blocks[1].contents());

    let key_pair = KeyPair::import_from_pkcs8_pem(key.text())?;
    let certificate = Certificate::from_pem(cert.text())?;
    assert_eq!(&key_pair.as_spki()?, certificate.subject_public_key_info());
    Ok(())
}

#[test]
fn key_named_like_certificate_is_combined() -> Result<()> {
    let depot = util::Depot::new();
    let cert = depot.registry.get_or_create(
        util::attrs(&[("type", "Cert"), ("name", "web.pem"), ("key", "web.pem")]),
        &web1(),
    )?;
    assert_eq!(pem_utils::split_blocks(cert.text())?.len(), 2);
    Ok(())
}

#[test]
fn unsupported_algorithm_writes_nothing() {
    let depot = util::Depot::new();
    let err = depot
        .registry
        .get_or_create(
            util::attrs(&[("type", "Key"), ("name", "bad.key"), ("algorithm", "unsupported-algo")]),
            &web1(),
        )
        .unwrap_err();
    assert!(err.is_config(), "{err:?}");

    let ca = depot.registry.get("test").unwrap();
    assert!(ca.search(SslType::Key, "bad.key", "web1.example.com").unwrap().is_none());
    assert_eq!(depot.stored_files("test", "Key"), 0);
}

#[test]
fn certificate_without_key_is_config_error() {
    let depot = util::Depot::new();
    let err = depot
        .registry
        .get_or_create(util::attrs(&[("type", "Cert"), ("name", "nokey.crt")]), &web1())
        .unwrap_err();
    assert!(err.is_config());

    let ca = depot.registry.get("test").unwrap();
    assert_eq!(ca.current_serial().unwrap(), 0);
    assert_eq!(depot.stored_files("test", "Cert"), 0);
}

#[test]
fn invalid_dn_field_aborts_before_any_write() {
    let depot = util::Depot::new();
    let err = depot
        .registry
        .get_or_create(
            util::attrs(&[("type", "Cert"), ("name", "x.crt"), ("key", "x.key"), ("c", "USA")]),
            &web1(),
        )
        .unwrap_err();
    assert!(err.is_config());
    assert_eq!(depot.stored_files("test", "Key"), 0);
    assert_eq!(depot.stored_files("test", "Cert"), 0);
    assert_eq!(depot.registry.get("test").unwrap().current_serial().unwrap(), 0);
}

#[test]
fn out_of_range_days_abort_and_leave_ca_usable() -> Result<()> {
    let depot = util::Depot::new();
    for days in ["100000000", "0", "-5", "soon"] {
        let err = depot
            .registry
            .get_or_create(
                util::attrs(&[("type", "Cert"), ("name", "x.crt"), ("key", "x.key"), ("days", days)]),
                &web1(),
            )
            .unwrap_err();
        assert!(err.is_config(), "days={days} gave {err:?}");
    }
    assert_eq!(depot.stored_files("test", "Key"), 0);
    assert_eq!(depot.stored_files("test", "Cert"), 0);
    assert_eq!(depot.registry.get("test").unwrap().current_serial()?, 0);

    let key = depot
        .registry
        .get_or_create(util::attrs(&[("type", "Key"), ("name", "other.key")]), &web1())?;
    assert_eq!(key.state(), ObjectState::Persisted);
    Ok(())
}

#[test]
fn bad_extension_values_fail_at_load_before_any_write() {
    util::init_tracing();
    for (valid, broken) in [
        (
            r#"keyUsage = "digitalSignature,keyEncipherment""#,
            r#"keyUsage = "digitalSignatur""#,
        ),
        (
            r#"subjectKeyIdentifier = "hash;subject=cert""#,
            r#"subjectKeyIdentifier = "hash""#,
        ),
        (
            r#"basicConstraints = "CA:FALSE;critical""#,
            r#"basicConstraints = "CA:sometimes;critical""#,
        ),
    ] {
        let dir = tempfile::tempdir().unwrap();
        util::provision_ca_root(dir.path(), "test");
        util::provision_ca_root(dir.path(), "other");
        assert!(util::CONFIG.contains(valid));

        let config = util::CONFIG.replace(valid, broken);
        let err = util::open_registry_with(dir.path(), &config).unwrap_err();
        assert!(err.is_config(), "{broken} gave {err:?}");
        for ca in ["test", "other"] {
            assert!(!dir.path().join(ca).join("index.json").exists());
            assert!(!dir.path().join(ca).join("Key").exists());
        }
    }
}

#[test]
fn ca_root_is_read_once_per_ca() -> Result<()> {
    let depot = util::Depot::new();
    depot.registry.get_or_create(
        util::attrs(&[("type", "Cert"), ("name", "a.crt"), ("key", "a.key")]),
        &web1(),
    )?;

    let root = depot.ca_dir("test").join("CARoot");
    std::fs::remove_file(root.join("CACert.pem")).unwrap();
    std::fs::remove_file(root.join("CAKey.pem")).unwrap();

    let second = depot.registry.get_or_create(
        util::attrs(&[("type", "Cert"), ("name", "b.crt"), ("key", "b.key")]),
        &web1(),
    )?;
    let cert = Certificate::from_pem(second.text())?;
    verify_signed_by(&cert, &depot.test_root.cert);
    Ok(())
}

#[test]
fn rsa_ca_signs_with_configured_digest() -> Result<()> {
    util::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let root = util::provision_ca_root_with_key(dir.path(), "rsaca", KeyPair::generate_rsa(1024)?);
    let registry = util::open_registry_with(dir.path(), util::RSA_CONFIG)?;

    let issued = registry.get_or_create(
        util::attrs(&[("type", "Cert"), ("name", "rsa.crt"), ("key", "rsa.key")]),
        &web1(),
    )?;
    let cert = Certificate::from_pem(issued.text())?;

    let algorithm = &cert.inner.signature_algorithm;
    assert_eq!(algorithm.oid, const_oid::db::rfc5912::SHA_384_WITH_RSA_ENCRYPTION);
    assert_eq!(algorithm.parameters.as_ref().map(|p| p.tag()), Some(Tag::Null));
    assert_eq!(&cert.inner.tbs_certificate.signature, algorithm);

    let ca_spki = root.cert.subject_public_key_info().to_der().unwrap();
    let ca_key = rsa::RsaPublicKey::from_public_key_der(&ca_spki).unwrap();
    let verifier = rsa::pkcs1v15::VerifyingKey::<sha2::Sha384>::new(ca_key);
    let signature =
        rsa::pkcs1v15::Signature::try_from(cert.inner.signature.raw_bytes()).unwrap();
    let tbs = cert.inner.tbs_certificate.to_der().unwrap();
    verifier.verify(&tbs, &signature).unwrap();

    let key = registry.get_or_create(
        util::attrs(&[("type", "Key"), ("name", "rsa.key")]),
        &web1(),
    )?;
    let key = KeyPair::import_from_pkcs8_pem(key.text())?;
    assert!(matches!(key, KeyPair::Rsa { .. }));
    assert_eq!(key.as_spki()?, *cert.subject_public_key_info());
    Ok(())
}

#[test]
fn unknown_extension_set_is_config_error() {
    let depot = util::Depot::new();
    let err = depot
        .registry
        .get_or_create(
            util::attrs(&[("type", "Cert"), ("name", "x.crt"), ("key", "x.key"), ("extensions", "nope")]),
            &web1(),
        )
        .unwrap_err();
    assert!(err.is_config());
    assert_eq!(depot.stored_files("test", "Key"), 0);
}

#[test]
fn duplicate_index_entries_conflict() {
    util::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    util::provision_ca_root(dir.path(), "test");
    util::provision_ca_root(dir.path(), "other");

    let entry = |uuid: &str| {
        serde_json::json!({
            "ssltype": "Key",
            "name": "dup.key",
            "host": "web1.example.com",
            "uuid": uuid,
        })
    };
    let index = serde_json::json!({
        "version": 1,
        "keys": [
            entry("6f1c1a8e-3a43-4d59-9c1e-1d1f5d0e8a01"),
            entry("6f1c1a8e-3a43-4d59-9c1e-1d1f5d0e8a02"),
        ],
        "certs": [],
        "ca_state": [],
    });
    std::fs::create_dir_all(dir.path().join("test")).unwrap();
    std::fs::write(
        dir.path().join("test").join("index.json"),
        serde_json::to_string_pretty(&index).unwrap(),
    )
    .unwrap();

    let registry = util::open_registry(dir.path());
    let err = registry
        .get_or_create(util::attrs(&[("type", "Key"), ("name", "dup.key")]), &web1())
        .unwrap_err();
    assert!(err.is_conflict(), "{err:?}");
    assert!(!err.is_config());
}

#[test]
fn certificate_carries_extensions_in_order_and_verifies() -> Result<()> {
    let depot = util::Depot::new();
    let object = depot.registry.get_or_create(
        util::attrs(&[("type", "Cert"), ("name", "web.crt"), ("key", "web.key")]),
        &web1(),
    )?;
    let cert = Certificate::from_pem(object.text())?;
    let ca = &depot.test_root.cert;

    assert_eq!(cert.issuer(), ca.subject());
    let subject = DistinguishedName::from_x509_name(cert.subject());
    assert_eq!(subject.get(DnField::Country), Some("US"));
    assert_eq!(subject.get(DnField::OrganizationalUnit), Some("ops-"));
    assert_eq!(subject.common_name(), Some("web1.example.com"));

    let extensions = cert.extensions();
    let oids: Vec<_> = extensions.iter().map(|ext| ext.oid).collect();
    assert_eq!(
        oids,
        vec![
            BasicConstraints::OID,
            KeyUsage::OID,
            ExtendedKeyUsage::OID,
            SubjectKeyIdentifier::OID,
            AuthorityKeyIdentifier::OID,
        ]
    );
    assert!(extensions[0].critical);
    assert!(!extensions[0].to_extension::<BasicConstraints>()?.is_ca);
    assert_eq!(extensions[2].to_extension::<ExtendedKeyUsage>()?.usage.len(), 2);

    let aki = extensions[4].to_extension::<AuthorityKeyIdentifier>()?;
    assert_eq!(aki.key_identifier, ca.subject_key_id());
    assert!(aki.authority_cert_issuer.is_none());
    assert_ne!(cert.subject_key_id(), ca.subject_key_id());

    verify_signed_by(&cert, ca);
    Ok(())
}

#[test]
fn certificate_can_use_named_extension_set() -> Result<()> {
    let depot = util::Depot::new();
    let object = depot.registry.get_or_create(
        util::attrs(&[
            ("type", "Cert"),
            ("name", "note.crt"),
            ("key", "note.key"),
            ("extensions", "comment"),
            ("days", "7"),
        ]),
        &web1(),
    )?;
    let cert = Certificate::from_pem(object.text())?;
    let extensions = cert.extensions();
    assert_eq!(extensions.len(), 1);
    assert_eq!(
        extensions[0].to_extension::<NsComment>()?.0,
        "issued by certdepot"
    );
    assert_eq!(object.attr("days"), Some("7"));
    Ok(())
}

#[test]
fn ou_append_hostname_extends_ou() -> Result<()> {
    let depot = util::Depot::new();
    let object = depot.registry.get_or_create(
        util::attrs(&[
            ("type", "Cert"),
            ("name", "client.crt"),
            ("key", "client.key"),
            ("ou_append_hostname", "true"),
        ]),
        &web1(),
    )?;
    let cert = Certificate::from_pem(object.text())?;
    let subject = DistinguishedName::from_x509_name(cert.subject());
    assert_eq!(
        subject.get(DnField::OrganizationalUnit),
        Some("ops-web1.example.com")
    );
    assert_eq!(object.attr("ou"), Some("ops-web1.example.com"));
    Ok(())
}

#[test]
fn objects_expose_binding_attributes() -> Result<()> {
    let depot = util::Depot::new();
    let key = depot.registry.get_or_create(
        util::attrs(&[("type", "Key"), ("name", "web.key"), ("owner", "apache"), ("perms", "0640")]),
        &web1(),
    )?;
    assert_eq!(key.owner(), Some("apache"));
    assert_eq!(key.group(), Some("root"));
    assert_eq!(key.perms(), Some("0640"));
    assert_eq!(key.attr("algorithm"), Some("ec"));
    assert_eq!(key.attr("bits"), Some("256"));
    assert_eq!(key.attr("host"), Some("web1.example.com"));

    let entry = depot
        .registry
        .get("test")
        .unwrap()
        .search(SslType::Key, "web.key", "web1.example.com")?
        .unwrap();
    assert_eq!(entry.attributes.get("owner").map(String::as_str), Some("apache"));
    assert_eq!(Some(entry.uuid.as_str()), key.uuid());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(key.path().unwrap()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
    Ok(())
}

#[test]
fn ca_material_is_served_read_only() -> Result<()> {
    let depot = util::Depot::new();
    let ca_cert = depot
        .registry
        .get_or_create(util::attrs(&[("type", "CACert"), ("name", "/etc/pki/ca.crt")]), &web1())?;

    assert_eq!(ca_cert.state(), ObjectState::Loaded);
    assert_eq!(ca_cert.perms(), Some("0644"));
    assert_eq!(ca_cert.text(), depot.test_root.cert.to_pem()?);

    let ca_key = depot
        .registry
        .get_or_create(util::attrs(&[("type", "CAKey"), ("name", "/etc/pki/ca.key")]), &web1())?;
    assert_eq!(ca_key.perms(), Some("0600"));

    let chain = depot
        .registry
        .get_or_create(util::attrs(&[("type", "CAChain"), ("name", "/etc/pki/chain.pem")]), &web1())?;
    assert!(chain.crypto().is_err());

    assert_eq!(depot.stored_files("test", "Cert"), 0);
    assert_eq!(depot.stored_files("test", "Key"), 0);
    Ok(())
}

#[test]
fn registry_routes_by_ca_attribute() -> Result<()> {
    let depot = util::Depot::new();
    assert_eq!(depot.registry.default_ca(), "test");

    let key = depot.registry.get_or_create(
        util::attrs(&[("type", "Key"), ("name", "edge.key"), ("ca", "other")]),
        &web1(),
    )?;
    assert_eq!(key.attr("ca"), Some("other"));
    assert_eq!(key.attr("algorithm"), Some("ed25519"));
    assert_eq!(depot.stored_files("other", "Key"), 1);
    assert_eq!(depot.stored_files("test", "Key"), 0);

    let err = depot
        .registry
        .get_or_create(util::attrs(&[("type", "Key"), ("name", "k"), ("ca", "nope")]), &web1())
        .unwrap_err();
    assert!(err.is_config());
    Ok(())
}

#[test]
fn explicit_host_overrides_metadata() -> Result<()> {
    let depot = util::Depot::new();
    let request = |host: &str| util::attrs(&[("type", "Key"), ("name", "k.key"), ("host", host)]);
    let a = depot.registry.get_or_create(request("a.example.com"), &web1())?;
    let b = depot.registry.get_or_create(request("b.example.com"), &web1())?;
    assert_ne!(a.text(), b.text());
    assert_eq!(depot.stored_files("test", "Key"), 2);
    Ok(())
}

#[test]
fn concurrent_requests_generate_once() -> Result<()> {
    let depot = util::Depot::new();
    let request = util::attrs(&[("type", "Cert"), ("name", "busy.crt"), ("key", "busy.key")]);

    let texts: Vec<String> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let request = request.clone();
                let registry = &depot.registry;
                scope.spawn(move || {
                    registry
                        .get_or_create(request, &web1())
                        .map(|object| object.text().to_string())
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Result<_>>()
    })?;

    assert!(texts.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(depot.registry.get("test").unwrap().current_serial()?, 1);
    assert_eq!(depot.stored_files("test", "Cert"), 1);
    Ok(())
}
