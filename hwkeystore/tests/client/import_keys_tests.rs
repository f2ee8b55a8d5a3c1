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

use hwkeystore::error::Error;
use hwkeystore::key_material::ecc_material_from_sec1_der;
use hwkeystore::key_parameter::{Algorithm, BlockMode, Digest, KeyPurpose, PaddingMode};
use hwkeystore::keystore::KeyStoreService;
use hwkeystore_test_utils::authorizations::ParamSetBuilder;
use hwkeystore_test_utils::key_generations::map_ks_error;
use hwkeystore_test_utils::{setup, test_process};
use openssl::ec::{EcGroup, EcKey};
use openssl::ecdsa::EcdsaSig;
use openssl::hash::{hash, MessageDigest};
use openssl::nid::Nid;
use openssl::pkey::PKey;
use openssl::sign::Signer;
use openssl::symm::{encrypt_aead, Cipher};

use crate::test_utils::{SAMPLE_MESSAGE, SAMPLE_NONCE, SAMPLE_PLAIN_TEXT};

fn aes_gcm_params(key_size: u32) -> ParamSetBuilder {
    ParamSetBuilder::new()
        .algorithm(Algorithm::AES)
        .key_size(key_size)
        .purpose(KeyPurpose::ENCRYPT)
        .purpose(KeyPurpose::DECRYPT)
        .block_mode(BlockMode::GCM)
        .padding_mode(PaddingMode::NONE)
}

/// Import a known AES key and compare the cipher text with the one openssl computes.
#[test]
fn hwkeystore_import_aes_key() {
    let ks = setup();
    let process = test_process();
    let key = [0x11u8; 32];
    let blob = ks.import_key(&aes_gcm_params(256).build(), &key, &process).unwrap();

    let request = ParamSetBuilder::new().nonce(SAMPLE_NONCE).associated_data(b"aad").build();
    let cipher_text = ks.encrypt(&blob, &process, &request, SAMPLE_PLAIN_TEXT).unwrap();

    let mut tag = [0u8; 16];
    let mut expected = encrypt_aead(
        Cipher::aes_256_gcm(),
        &key,
        Some(SAMPLE_NONCE),
        b"aad",
        SAMPLE_PLAIN_TEXT,
        &mut tag,
    )
    .unwrap();
    expected.extend_from_slice(&tag);
    assert_eq!(cipher_text, expected);
}

/// Try to import AES keys whose length does not match. Test should fail with
/// `InvalidArgument`.
#[test]
fn hwkeystore_import_aes_key_size_mismatch_fail() {
    let ks = setup();
    let process = test_process();

    let result = map_ks_error(ks.import_key(&aes_gcm_params(256).build(), &[1u8; 16], &process));
    assert_eq!(Err(Error::InvalidArgument), result);

    let result = map_ks_error(ks.import_key(&aes_gcm_params(160).build(), &[1u8; 20], &process));
    assert_eq!(Err(Error::InvalidArgument), result);
}

/// Import a known HMAC key and compare the MAC with the one openssl computes.
#[test]
fn hwkeystore_import_hmac_key() {
    let ks = setup();
    let process = test_process();
    let key = b"an imported hmac key";
    let params = ParamSetBuilder::new()
        .algorithm(Algorithm::HMAC)
        .purpose(KeyPurpose::MAC)
        .digest(Digest::SHA256)
        .build();
    let blob = ks.import_key(&params, key, &process).unwrap();
    let mac = ks.mac(&blob, &process, &ParamSetBuilder::new().build(), SAMPLE_MESSAGE).unwrap();

    let pkey = PKey::hmac(key).unwrap();
    let mut signer = Signer::new(MessageDigest::sha256(), &pkey).unwrap();
    signer.update(SAMPLE_MESSAGE).unwrap();
    assert_eq!(mac, signer.sign_to_vec().unwrap());
}

/// Import an EC key from its SEC1 encoding and verify a signature made by openssl.
#[test]
fn hwkeystore_import_ec_key() {
    let ks = setup();
    let process = test_process();
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let ec = EcKey::generate(&group).unwrap();
    let material = ecc_material_from_sec1_der(&ec.private_key_to_der().unwrap()).unwrap();

    let params = ParamSetBuilder::new()
        .algorithm(Algorithm::ECC)
        .key_size(256)
        .purpose(KeyPurpose::SIGN)
        .purpose(KeyPurpose::VERIFY)
        .digest(Digest::SHA256)
        .build();
    let blob = ks.import_key(&params, &material, &process).unwrap();

    let digest = hash(MessageDigest::sha256(), SAMPLE_MESSAGE).unwrap();
    let signature = EcdsaSig::sign(&digest, &ec).unwrap().to_der().unwrap();
    ks.verify(&blob, &process, &ParamSetBuilder::new().build(), SAMPLE_MESSAGE, &signature)
        .unwrap();

    // The exported public key is the one that was imported.
    let public_key = ks.export_public_key(&blob, &process).unwrap();
    let expected = PKey::from_ec_key(ec).unwrap().public_key_to_der().unwrap();
    assert_eq!(public_key, expected);
}

/// Try to import key material that is cut short. Test should fail with `InvalidKeyInfo`.
#[test]
fn hwkeystore_import_truncated_material_fail() {
    let ks = setup();
    let process = test_process();
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let ec = EcKey::generate(&group).unwrap();
    let material = ecc_material_from_sec1_der(&ec.private_key_to_der().unwrap()).unwrap();

    let params = ParamSetBuilder::new().algorithm(Algorithm::ECC).purpose(KeyPurpose::SIGN);
    let result = map_ks_error(ks.import_key(&params.build(), &material[..40], &process));
    assert_eq!(Err(Error::InvalidKeyInfo), result);
}

/// Try to import key material without the private part. Test should fail with
/// `InvalidArgument`.
#[test]
fn hwkeystore_import_public_only_fail() {
    let ks = setup();
    let process = test_process();
    let params = ParamSetBuilder::new()
        .algorithm(Algorithm::ED25519)
        .purpose(KeyPurpose::SIGN)
        .build();
    let mut material = Vec::new();
    for v in [Algorithm::ED25519.0, 256, 32, 0, 0] {
        material.extend_from_slice(&v.to_le_bytes());
    }
    material.extend_from_slice(&[0x33; 32]);
    let result = map_ks_error(ks.import_key(&params, &material, &process));
    assert_eq!(Err(Error::InvalidArgument), result);
}
