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
use hwkeystore::key_parameter::{BlockMode, KeyPurpose, PaddingMode};
use hwkeystore::keystore::KeyStoreService;
use hwkeystore_test_utils::authorizations::ParamSetBuilder;
use hwkeystore_test_utils::key_generations::{self, map_ks_error};
use hwkeystore_test_utils::{setup, test_process};

use crate::test_utils::{begin_on_blob, run_operation, SAMPLE_IV, SAMPLE_NONCE, SAMPLE_PLAIN_TEXT};

/// Generate AES keys of every size in GCM mode and round trip a message through one-shot
/// encrypt and decrypt.
#[test]
fn hwkeystore_aes_gcm_key_sizes() {
    let ks = setup();
    let process = test_process();
    for key_size in [128, 192, 256] {
        let blob = key_generations::generate_aes_key(
            &ks,
            &process,
            key_size,
            BlockMode::GCM,
            PaddingMode::NONE,
        )
        .unwrap();
        let request =
            ParamSetBuilder::new().nonce(SAMPLE_NONCE).associated_data(b"header").build();

        let cipher_text = ks.encrypt(&blob, &process, &request, SAMPLE_PLAIN_TEXT).unwrap();
        assert_eq!(cipher_text.len(), SAMPLE_PLAIN_TEXT.len() + 16);
        assert_ne!(&cipher_text[..SAMPLE_PLAIN_TEXT.len()], SAMPLE_PLAIN_TEXT);

        let plain_text = ks.decrypt(&blob, &process, &request, &cipher_text).unwrap();
        assert_eq!(&plain_text[..], SAMPLE_PLAIN_TEXT);
    }
}

/// Try to generate AES keys of unsupported sizes. Test should fail with `InvalidArgument`.
#[test]
fn hwkeystore_aes_invalid_key_size_fail() {
    let ks = setup();
    let process = test_process();
    for key_size in [0, 64, 129, 512] {
        let result = map_ks_error(key_generations::generate_aes_key(
            &ks,
            &process,
            key_size,
            BlockMode::GCM,
            PaddingMode::NONE,
        ));
        assert_eq!(Err(Error::InvalidArgument), result);
    }
}

/// A GCM cipher text that was modified in transit must not decrypt.
#[test]
fn hwkeystore_aes_gcm_tampered_cipher_text_fail() {
    let ks = setup();
    let process = test_process();
    let blob =
        key_generations::generate_aes_key(&ks, &process, 256, BlockMode::GCM, PaddingMode::NONE)
            .unwrap();
    let request = ParamSetBuilder::new().nonce(SAMPLE_NONCE).build();
    let mut cipher_text = ks.encrypt(&blob, &process, &request, SAMPLE_PLAIN_TEXT).unwrap();
    cipher_text[0] ^= 0x01;

    let result = map_ks_error(ks.decrypt(&blob, &process, &request, &cipher_text));
    assert_eq!(Err(Error::CryptoEngineError), result.map(|_| ()));

    // The wrong associated data fails the same way.
    cipher_text[0] ^= 0x01;
    let other_aad = ParamSetBuilder::new().nonce(SAMPLE_NONCE).associated_data(b"x").build();
    let result = map_ks_error(ks.decrypt(&blob, &process, &other_aad, &cipher_text));
    assert_eq!(Err(Error::CryptoEngineError), result.map(|_| ()));
}

/// Try to use a GCM key without a nonce. Test should fail with `InvalidArgument`.
#[test]
fn hwkeystore_aes_gcm_missing_nonce_fail() {
    let ks = setup();
    let process = test_process();
    let blob =
        key_generations::generate_aes_key(&ks, &process, 128, BlockMode::GCM, PaddingMode::NONE)
            .unwrap();
    let result = map_ks_error(ks.encrypt(&blob, &process, &ParamSetBuilder::new().build(), b"x"));
    assert_eq!(Err(Error::InvalidArgument), result);
}

/// CBC with PKCS7 padding round trips messages that are not a multiple of the block size.
#[test]
fn hwkeystore_aes_cbc_pkcs7_round_trip() {
    let ks = setup();
    let process = test_process();
    let blob =
        key_generations::generate_aes_key(&ks, &process, 256, BlockMode::CBC, PaddingMode::PKCS7)
            .unwrap();
    let request = ParamSetBuilder::new().iv(SAMPLE_IV).build();
    let message = b"seventeen bytes!!";

    let cipher_text = ks.encrypt(&blob, &process, &request, message).unwrap();
    assert_eq!(cipher_text.len(), 32);
    let plain_text = ks.decrypt(&blob, &process, &request, &cipher_text).unwrap();
    assert_eq!(&plain_text[..], message);

    let no_iv = ParamSetBuilder::new().build();
    let result = map_ks_error(ks.encrypt(&blob, &process, &no_iv, message));
    assert_eq!(Err(Error::InvalidArgument), result);
}

/// Encrypt and decrypt in several stages, feeding input in small chunks. The output must match
/// the one-shot result.
#[test]
fn hwkeystore_aes_gcm_multi_stage() {
    let ks = setup();
    let process = test_process();
    let blob =
        key_generations::generate_aes_key(&ks, &process, 256, BlockMode::GCM, PaddingMode::NONE)
            .unwrap();
    let message = vec![0x42u8; 100];
    let one_shot_request = ParamSetBuilder::new().nonce(SAMPLE_NONCE).build();
    let expected = ks.encrypt(&blob, &process, &one_shot_request, &message).unwrap();

    let encrypt = ParamSetBuilder::new()
        .purpose(KeyPurpose::ENCRYPT)
        .nonce(SAMPLE_NONCE)
        .build();
    let mut op = begin_on_blob(&ks, &blob, &encrypt).unwrap();
    let cipher_text = run_operation(&ks, &mut op, &message, 7, &[]).unwrap();
    assert_eq!(cipher_text, expected);
    assert!(!op.is_active());

    let decrypt = ParamSetBuilder::new()
        .purpose(KeyPurpose::DECRYPT)
        .nonce(SAMPLE_NONCE)
        .build();
    let mut op = begin_on_blob(&ks, &blob, &decrypt).unwrap();
    let plain_text = run_operation(&ks, &mut op, &cipher_text, 9, &[]).unwrap();
    assert_eq!(plain_text, message);
}
