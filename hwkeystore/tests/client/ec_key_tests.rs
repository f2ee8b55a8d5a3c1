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
use hwkeystore::key_parameter::{Algorithm, BlockMode, Digest, KeyPurpose, PaddingMode};
use hwkeystore::keystore::KeyStoreService;
use hwkeystore_test_utils::authorizations::ParamSetBuilder;
use hwkeystore_test_utils::key_generations::{self, map_ks_error};
use hwkeystore_test_utils::{setup, test_process};
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::sign::Verifier;

use crate::test_utils::SAMPLE_MESSAGE;

/// Generate an EC P-256 key, sign a message and verify the signature both through the key store
/// and with openssl over the exported public key.
#[test]
fn hwkeystore_ec_p256_sign_verify() {
    let ks = setup();
    let process = test_process();
    let blob = key_generations::generate_ec_p256_signing_key(&ks, &process).unwrap();
    let request = ParamSetBuilder::new().build();

    let signature = ks.sign(&blob, &process, &request, SAMPLE_MESSAGE).unwrap();
    ks.verify(&blob, &process, &request, SAMPLE_MESSAGE, &signature).unwrap();

    let public_key = ks.export_public_key(&blob, &process).unwrap();
    let pkey = PKey::public_key_from_der(&public_key).unwrap();
    let mut verifier = Verifier::new(MessageDigest::sha256(), &pkey).unwrap();
    verifier.update(SAMPLE_MESSAGE).unwrap();
    assert!(verifier.verify(&signature).unwrap());
}

/// Signing with every supported curve works.
#[test]
fn hwkeystore_ec_curves_sign_verify() {
    let ks = setup();
    let process = test_process();
    for key_size in [256, 384, 521] {
        let gen_params = ParamSetBuilder::new()
            .algorithm(Algorithm::ECC)
            .key_size(key_size)
            .purpose(KeyPurpose::SIGN)
            .purpose(KeyPurpose::VERIFY)
            .digest(Digest::SHA512)
            .build();
        let blob = ks.generate_key(&gen_params, &process).unwrap();
        let request = ParamSetBuilder::new().build();
        let signature = ks.sign(&blob, &process, &request, SAMPLE_MESSAGE).unwrap();
        ks.verify(&blob, &process, &request, SAMPLE_MESSAGE, &signature).unwrap();
    }
}

/// A signature over a different message does not verify. Test should fail with
/// `CryptoEngineError`.
#[test]
fn hwkeystore_ec_verify_wrong_message_fail() {
    let ks = setup();
    let process = test_process();
    let blob = key_generations::generate_ec_p256_signing_key(&ks, &process).unwrap();
    let request = ParamSetBuilder::new().build();
    let signature = ks.sign(&blob, &process, &request, SAMPLE_MESSAGE).unwrap();

    let result =
        map_ks_error(ks.verify(&blob, &process, &request, b"another message", &signature));
    assert_eq!(Err(Error::CryptoEngineError), result);
}

/// Try to sign with a digest the key was not created with. Test should fail with
/// `InvalidArgument`.
#[test]
fn hwkeystore_ec_sign_unauthorized_digest_fail() {
    let ks = setup();
    let process = test_process();
    let blob = key_generations::generate_ec_p256_signing_key(&ks, &process).unwrap();
    let request = ParamSetBuilder::new().digest(Digest::SHA512).build();
    let result = map_ks_error(ks.sign(&blob, &process, &request, SAMPLE_MESSAGE));
    assert_eq!(Err(Error::InvalidArgument), result);
}

/// Try to sign with a key whose only purpose is key agreement. Test should fail with
/// `InvalidArgument`.
#[test]
fn hwkeystore_ec_sign_with_agree_key_fail() {
    let ks = setup();
    let process = test_process();
    let blob = key_generations::generate_ec_agree_key(&ks, &process, 256).unwrap();
    let result =
        map_ks_error(ks.sign(&blob, &process, &ParamSetBuilder::new().build(), SAMPLE_MESSAGE));
    assert_eq!(Err(Error::InvalidArgument), result);
}

/// Ed25519 signs the message itself; openssl verifies it with the exported key.
#[test]
fn hwkeystore_ed25519_sign_verify() {
    let ks = setup();
    let process = test_process();
    let blob = key_generations::generate_ed25519_key(&ks, &process).unwrap();
    let request = ParamSetBuilder::new().build();

    let signature = ks.sign(&blob, &process, &request, SAMPLE_MESSAGE).unwrap();
    assert_eq!(signature.len(), 64);
    ks.verify(&blob, &process, &request, SAMPLE_MESSAGE, &signature).unwrap();

    let public_key = ks.export_public_key(&blob, &process).unwrap();
    let pkey = PKey::public_key_from_der(&public_key).unwrap();
    let mut verifier = Verifier::new_without_digest(&pkey).unwrap();
    assert!(verifier.verify_oneshot(&signature, SAMPLE_MESSAGE).unwrap());
}

/// Symmetric keys have no public part. Test should fail with `InvalidArgument`.
#[test]
fn hwkeystore_export_symmetric_key_fail() {
    let ks = setup();
    let process = test_process();
    let blob =
        key_generations::generate_aes_key(&ks, &process, 128, BlockMode::ECB, PaddingMode::NONE)
            .unwrap();
    let result = map_ks_error(ks.export_public_key(&blob, &process));
    assert_eq!(Err(Error::InvalidArgument), result);
}
