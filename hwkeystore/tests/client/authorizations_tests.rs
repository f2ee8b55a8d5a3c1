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

use crate::test_utils::{SAMPLE_IV, SAMPLE_MESSAGE, SAMPLE_NONCE, SAMPLE_PLAIN_TEXT};

/// A key created for encryption only cannot decrypt. Test should fail with `InvalidArgument`.
#[test]
fn hwkeystore_purpose_not_authorized_fail() {
    let ks = setup();
    let process = test_process();
    let params = ParamSetBuilder::new()
        .algorithm(Algorithm::AES)
        .key_size(128)
        .purpose(KeyPurpose::ENCRYPT)
        .block_mode(BlockMode::GCM)
        .padding_mode(PaddingMode::NONE)
        .build();
    let blob = ks.generate_key(&params, &process).unwrap();
    let request = ParamSetBuilder::new().nonce(SAMPLE_NONCE).build();
    let cipher_text = ks.encrypt(&blob, &process, &request, SAMPLE_PLAIN_TEXT).unwrap();

    let result = map_ks_error(ks.decrypt(&blob, &process, &request, &cipher_text));
    assert_eq!(Err(Error::InvalidArgument), result.map(|_| ()));
}

/// Block mode, padding and digest of a request must be the ones the key was created with.
#[test]
fn hwkeystore_parameters_must_match_key() {
    let ks = setup();
    let process = test_process();
    let aes =
        key_generations::generate_aes_key(&ks, &process, 128, BlockMode::GCM, PaddingMode::NONE)
            .unwrap();
    let request = ParamSetBuilder::new().block_mode(BlockMode::CBC).iv(SAMPLE_IV).build();
    let result = map_ks_error(ks.encrypt(&aes, &process, &request, SAMPLE_PLAIN_TEXT));
    assert_eq!(Err(Error::InvalidArgument), result);

    let request =
        ParamSetBuilder::new().padding_mode(PaddingMode::PKCS7).nonce(SAMPLE_NONCE).build();
    let result = map_ks_error(ks.encrypt(&aes, &process, &request, SAMPLE_PLAIN_TEXT));
    assert_eq!(Err(Error::InvalidArgument), result);

    let rsa = key_generations::generate_rsa_encryption_key(
        &ks,
        &process,
        1024,
        PaddingMode::OAEP,
        Digest::SHA256,
    )
    .unwrap();
    let request = ParamSetBuilder::new().digest(Digest::SHA1).build();
    let result = map_ks_error(ks.encrypt(&rsa, &process, &request, SAMPLE_PLAIN_TEXT));
    assert_eq!(Err(Error::InvalidArgument), result);
}

/// A key whose parameters do not cover every tag the policy compares cannot be used. Test
/// should fail with `InvalidArgument`.
#[test]
fn hwkeystore_key_without_policy_tag_fail() {
    let ks = setup();
    let process = test_process();
    let params = ParamSetBuilder::new()
        .algorithm(Algorithm::ECC)
        .key_size(256)
        .purpose(KeyPurpose::SIGN)
        .build();
    let blob = ks.generate_key(&params, &process).unwrap();

    let request = ParamSetBuilder::new().digest(Digest::SHA256).build();
    let result = map_ks_error(ks.sign(&blob, &process, &request, SAMPLE_MESSAGE));
    assert_eq!(Err(Error::InvalidArgument), result);
}

/// An algorithm without a policy for the purpose is refused. Test should fail with
/// `InvalidArgument`.
#[test]
fn hwkeystore_no_policy_for_purpose_fail() {
    let ks = setup();
    let process = test_process();
    let blob = key_generations::generate_hmac_key(&ks, &process, 256, Digest::SHA256).unwrap();
    let result =
        map_ks_error(ks.sign(&blob, &process, &ParamSetBuilder::new().build(), SAMPLE_MESSAGE));
    assert_eq!(Err(Error::InvalidArgument), result);
}

/// A key with several purposes serves each of them.
#[test]
fn hwkeystore_multi_purpose_key() {
    let ks = setup();
    let process = test_process();
    let blob = key_generations::generate_ed25519_key(&ks, &process).unwrap();
    let request = ParamSetBuilder::new().build();
    let signature = ks.sign(&blob, &process, &request, SAMPLE_MESSAGE).unwrap();
    ks.verify(&blob, &process, &request, SAMPLE_MESSAGE, &signature).unwrap();

    // Only one of the two.
    let params = ParamSetBuilder::new()
        .algorithm(Algorithm::ED25519)
        .key_size(256)
        .purpose(KeyPurpose::VERIFY)
        .build();
    let verify_only = ks.generate_key(&params, &process).unwrap();
    let result = map_ks_error(ks.sign(&verify_only, &process, &request, SAMPLE_MESSAGE));
    assert_eq!(Err(Error::InvalidArgument), result);
}
