/*
 * SPDX-FileCopyrightText: 2026 aifw contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use assert_matches::assert_matches;
use rsa::{RsaPrivateKey, traits::PublicKeyParts};

use aifw::crypto::{self, Error, RsaPublicKeyExt};

const LEGACY_KEY: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/keys/TEST_KEY_DO_NOT_USE_legacy.key",
));
const PKCS8_KEY: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/keys/TEST_KEY_DO_NOT_USE_pkcs8.key",
));
const PUBLIC_KEY: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/keys/TEST_KEY_DO_NOT_USE.pub",
));
const PASSPHRASE: &str = "TEST_PASSPHRASE";

const FACTORY: &[u8] = include_bytes!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/data/factory.bin",
));

fn get_test_key() -> RsaPrivateKey {
    crypto::read_pem_private_key(LEGACY_KEY, PASSPHRASE).unwrap()
}

#[test]
fn key_formats_agree() {
    let legacy = get_test_key();
    let pkcs8 = crypto::read_pem_private_key(PKCS8_KEY, PASSPHRASE).unwrap();
    let public = crypto::read_pem_public_key(PUBLIC_KEY).unwrap();

    assert_eq!(legacy, pkcs8);
    assert_eq!(legacy.to_public_key(), public);
    assert_eq!(public.size(), crypto::SIGNATURE_SIZE);
}

#[test]
fn wrong_passphrase() {
    assert!(crypto::read_pem_private_key(LEGACY_KEY, "wrong").is_err());
    assert_matches!(
        crypto::read_pem_private_key(PKCS8_KEY, "wrong"),
        Err(Error::LoadKeyEncrypted(_))
    );
}

#[test]
fn not_a_key() {
    assert_matches!(
        crypto::read_pem_private_key(PUBLIC_KEY, PASSPHRASE),
        Err(Error::UnsupportedPemType(t)) if t == "PUBLIC KEY"
    );
    assert_matches!(
        crypto::read_pem_public_key("no pem here"),
        Err(Error::InvalidPem(_))
    );
}

#[test]
fn signature_matches_openssl() {
    let key = get_test_key();

    // The outer signature of the fixture covers everything before it.
    let (data, signature) = FACTORY.split_at(FACTORY.len() - crypto::SIGNATURE_SIZE);
    assert_eq!(crypto::sign(&key, data).unwrap(), signature);
    assert!(crypto::verify(&key.to_public_key(), data, signature));
}

#[test]
fn verify_rejects_modified_data() {
    let key = get_test_key();
    let public = key.to_public_key();
    let signature = crypto::sign(&key, b"firmware").unwrap();

    assert!(crypto::verify(&public, b"firmware", &signature));
    assert!(!crypto::verify(&public, b"firmwarf", &signature));
    assert!(!crypto::verify(&public, b"firmware", &signature[..255]));

    let mut bad = signature.clone();
    bad[0] ^= 0x01;
    assert!(!crypto::verify(&public, b"firmware", &bad));

    assert_matches!(
        public.verify_sig(b"firmware", &signature[..255]),
        Err(Error::InvalidSignatureLength(255))
    );
}
