// Copyright 2024, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use hwkeystore::attestation::{parse_chain, OID_ATTESTATION_EXTENSION};
use hwkeystore::certs::ProvisionedCerts;
use hwkeystore::error::Error;
use hwkeystore::key_node::KeyNodeRegistry;
use hwkeystore::key_parameter::{BlockMode, Digest, PaddingMode};
use hwkeystore::keystore::{KeyStore, KeyStoreService};
use hwkeystore::openssl_engine::OpenSslEngine;
use hwkeystore::param_set::ParamSet;
use hwkeystore_test_utils::authorizations::ParamSetBuilder;
use hwkeystore_test_utils::device_certs::{DeviceChain, DeviceKeyType};
use hwkeystore_test_utils::key_generations::{self, map_ks_error};
use hwkeystore_test_utils::{init_logger, test_config, test_process};
use openssl::nid::Nid;
use openssl::x509::X509;
use std::sync::Arc;

const CHALLENGE: &[u8] = b"a sixteen+ byte challenge";
const KEY_ID: &[u8] = b"attested key alias";

fn key_store(chain: &DeviceChain) -> KeyStore {
    init_logger();
    KeyStore::with_config(
        Box::new(OpenSslEngine::with_random_main_key().unwrap()),
        Box::new(chain.provisioned_certs().unwrap()),
        test_config(),
        Arc::new(KeyNodeRegistry::new()),
    )
}

fn attest_request() -> ParamSetBuilder {
    ParamSetBuilder::new().attestation_challenge(CHALLENGE).attestation_id_alias(KEY_ID)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Attests a key and checks every link of the returned chain.
fn attest_and_check(ks: &KeyStore, chain: &DeviceChain, blob: &[u8], request: &ParamSet) -> X509 {
    let formatted = ks.attest_key(blob, &test_process(), request).unwrap();
    let certs = parse_chain(&formatted, ks.config().cert_alignment).unwrap();
    assert_eq!(certs.certs().len(), 4);
    assert_eq!(certs.certs()[1], chain.device.to_der().unwrap());
    assert_eq!(certs.certs()[2], chain.ca.to_der().unwrap());
    assert_eq!(certs.certs()[3], chain.root.to_der().unwrap());

    let attestation = X509::from_der(&certs.certs()[0]).unwrap();
    assert!(attestation.verify(&chain.device.public_key().unwrap()).unwrap());
    assert!(chain.device.verify(&chain.ca.public_key().unwrap()).unwrap());
    assert!(chain.ca.verify(&chain.root.public_key().unwrap()).unwrap());

    assert_eq!(
        attestation.issuer_name().to_der().unwrap(),
        chain.device.subject_name().to_der().unwrap()
    );
    let cn = attestation.subject_name().entries_by_nid(Nid::COMMONNAME).next().unwrap();
    assert_eq!(cn.data().as_slice(), b"A Keymaster Key");

    let der = &certs.certs()[0];
    assert!(contains(der, OID_ATTESTATION_EXTENSION));
    assert!(contains(der, CHALLENGE));
    assert!(contains(der, KEY_ID));
    attestation
}

/// Attest an EC signing key with an EC device key. The certificate carries the attested
/// public key.
#[test]
fn hwkeystore_attest_ec_key_with_ec_device_key() {
    let chain = DeviceChain::generate(DeviceKeyType::Ec).unwrap();
    let ks = key_store(&chain);
    let process = test_process();
    let blob = key_generations::generate_ec_p256_signing_key(&ks, &process).unwrap();

    let attestation = attest_and_check(&ks, &chain, &blob, &attest_request().build());
    let public_key = ks.export_public_key(&blob, &process).unwrap();
    assert_eq!(attestation.public_key().unwrap().public_key_to_der().unwrap(), public_key);
}

/// Attest RSA and X25519 keys with an RSA device key.
#[test]
fn hwkeystore_attest_with_rsa_device_key() {
    let chain = DeviceChain::generate(DeviceKeyType::Rsa).unwrap();
    let ks = key_store(&chain);
    let process = test_process();

    let rsa = key_generations::generate_rsa_signing_key(
        &ks,
        &process,
        1024,
        PaddingMode::PSS,
        Digest::SHA256,
    )
    .unwrap();
    attest_and_check(&ks, &chain, &rsa, &attest_request().build());

    let x25519 = key_generations::generate_x25519_key(&ks, &process).unwrap();
    let attestation = attest_and_check(&ks, &chain, &x25519, &attest_request().build());
    let public_key = ks.export_public_key(&x25519, &process).unwrap();
    assert_eq!(attestation.public_key().unwrap().public_key_to_der().unwrap(), public_key);
}

/// Device identifiers from the request end up in the certificate.
#[test]
fn hwkeystore_attest_device_ids() {
    let chain = DeviceChain::generate(DeviceKeyType::Ec).unwrap();
    let ks = key_store(&chain);
    let blob = key_generations::generate_ec_p256_signing_key(&ks, &test_process()).unwrap();
    let request = attest_request()
        .attestation_app_id(b"com.example.attested")
        .attestation_device_brand(b"hwkeystore-brand")
        .attestation_device_model(b"hwkeystore-model")
        .attestation_device_serial(b"0123456789")
        .build();

    let attestation = attest_and_check(&ks, &chain, &blob, &request);
    let der = attestation.to_der().unwrap();
    let ids: [&[u8]; 4] =
        [b"com.example.attested", b"hwkeystore-brand", b"hwkeystore-model", b"0123456789"];
    for id in ids {
        assert!(contains(&der, id), "{}", String::from_utf8_lossy(id));
    }
}

/// Requests without a usable challenge or key id. Test should fail with `InvalidArgument`.
#[test]
fn hwkeystore_attest_invalid_request_fail() {
    let chain = DeviceChain::generate(DeviceKeyType::Ec).unwrap();
    let ks = key_store(&chain);
    let process = test_process();
    let blob = key_generations::generate_ec_p256_signing_key(&ks, &process).unwrap();

    let requests = [
        ParamSetBuilder::new().attestation_id_alias(KEY_ID),
        ParamSetBuilder::new().attestation_challenge(CHALLENGE),
        ParamSetBuilder::new().attestation_challenge(&[1; 15]).attestation_id_alias(KEY_ID),
        ParamSetBuilder::new().attestation_challenge(&[1; 129]).attestation_id_alias(KEY_ID),
    ];
    for request in requests {
        let result = map_ks_error(ks.attest_key(&blob, &process, &request.clone().build()));
        assert_eq!(Err(Error::InvalidArgument), result, "{request:?}");
    }

    for len in [16, 128] {
        let challenge = vec![1u8; len];
        let request =
            ParamSetBuilder::new().attestation_challenge(&challenge).attestation_id_alias(KEY_ID);
        ks.attest_key(&blob, &process, &request.build()).unwrap();
    }
}

/// Keys that cannot be attested. Test should fail with `InvalidArgument`.
#[test]
fn hwkeystore_attest_unsupported_key_fail() {
    let chain = DeviceChain::generate(DeviceKeyType::Ec).unwrap();
    let ks = key_store(&chain);
    let process = test_process();
    let request = attest_request().build();

    let aes =
        key_generations::generate_aes_key(&ks, &process, 128, BlockMode::GCM, PaddingMode::NONE)
            .unwrap();
    let result = map_ks_error(ks.attest_key(&aes, &process, &request));
    assert_eq!(Err(Error::InvalidArgument), result);

    let rsa = key_generations::generate_rsa_signing_key(
        &ks,
        &process,
        1024,
        PaddingMode::PKCS1_V1_5,
        Digest::SHA256,
    )
    .unwrap();
    let result = map_ks_error(ks.attest_key(&rsa, &process, &request));
    assert_eq!(Err(Error::InvalidArgument), result);
}

/// Writing the chain into a caller buffer.
#[test]
fn hwkeystore_attest_key_into_buffer() {
    let chain = DeviceChain::generate(DeviceKeyType::Ec).unwrap();
    let ks = key_store(&chain);
    let process = test_process();
    let blob = key_generations::generate_ec_p256_signing_key(&ks, &process).unwrap();
    let request = attest_request().build();

    let mut small = [0xaau8; 64];
    let result = map_ks_error(ks.attest_key_into(&blob, &process, &request, &mut small));
    assert_eq!(Err(Error::BufferTooSmall), result);
    assert!(small.iter().all(|b| *b == 0xaa));

    let mut out = vec![0u8; 8192];
    let len = ks.attest_key_into(&blob, &process, &request, &mut out).unwrap();
    assert_eq!(len % ks.config().cert_alignment, 0);
    let certs = parse_chain(&out[..len], ks.config().cert_alignment).unwrap();
    assert_eq!(certs.certs().len(), 4);
    assert_eq!(certs.certs()[3], chain.root.to_der().unwrap());
}

/// A key store whose device certificates were provisioned as PEM files.
#[test]
fn hwkeystore_attest_with_certs_from_dir() {
    init_logger();
    let chain = DeviceChain::generate(DeviceKeyType::Rsa).unwrap();
    let dir = tempfile::tempdir().unwrap();
    chain.write_pem(dir.path()).unwrap();

    let ks = KeyStore::with_config(
        Box::new(OpenSslEngine::with_random_main_key().unwrap()),
        Box::new(ProvisionedCerts::load_from_dir(dir.path()).unwrap()),
        test_config(),
        Arc::new(KeyNodeRegistry::new()),
    );
    let blob = key_generations::generate_ec_p256_signing_key(&ks, &test_process()).unwrap();
    attest_and_check(&ks, &chain, &blob, &attest_request().build());
}
