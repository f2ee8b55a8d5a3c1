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
use hwkeystore::key_parameter::{Algorithm, Digest, KeyPurpose};
use hwkeystore::keystore::KeyStoreService;
use hwkeystore_test_utils::authorizations::ParamSetBuilder;
use hwkeystore_test_utils::key_generations::{self, map_ks_error};
use hwkeystore_test_utils::{setup, test_process};
use openssl::hash::MessageDigest;
use openssl::pkcs5::pbkdf2_hmac;

fn import_derivation_key(
    ks: &hwkeystore::keystore::KeyStore,
    key: &[u8],
    digest: Digest,
) -> Vec<u8> {
    let params = ParamSetBuilder::new()
        .algorithm(Algorithm::HMAC)
        .purpose(KeyPurpose::DERIVE)
        .digest(digest)
        .build();
    ks.import_key(&params, key, &test_process()).unwrap()
}

/// HKDF over an imported key reproduces RFC 5869 test case 1.
#[test]
fn hwkeystore_hkdf_derive() {
    let ks = setup();
    let blob = import_derivation_key(&ks, &[0x0b; 22], Digest::SHA256);
    let request = ParamSetBuilder::new()
        .algorithm(Algorithm::HKDF)
        .salt(&hex::decode("000102030405060708090a0b0c").unwrap())
        .info(&hex::decode("f0f1f2f3f4f5f6f7f8f9").unwrap())
        .derive_key_size(42)
        .build();
    let derived = ks.derive_key(&blob, &test_process(), &request).unwrap();
    assert_eq!(
        hex::encode(&derived[..]),
        "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
    );
}

/// PBKDF2 over an imported key matches openssl.
#[test]
fn hwkeystore_pbkdf2_derive() {
    let ks = setup();
    let password = b"a derivation password";
    let blob = import_derivation_key(&ks, password, Digest::SHA512);
    let request = ParamSetBuilder::new()
        .algorithm(Algorithm::PBKDF2)
        .salt(b"salt")
        .iteration(100)
        .derive_key_size(24)
        .build();
    let derived = ks.derive_key(&blob, &test_process(), &request).unwrap();

    let mut expected = [0u8; 24];
    pbkdf2_hmac(password, b"salt", 100, MessageDigest::sha512(), &mut expected).unwrap();
    assert_eq!(&derived[..], &expected);
}

/// Derived keys differ between keys and between salts.
#[test]
fn hwkeystore_derive_generated_key() {
    let ks = setup();
    let process = test_process();
    let blob_a = key_generations::generate_derivation_key(&ks, &process, Digest::SHA256).unwrap();
    let blob_b = key_generations::generate_derivation_key(&ks, &process, Digest::SHA256).unwrap();
    let request = |salt: &[u8]| {
        ParamSetBuilder::new()
            .algorithm(Algorithm::HKDF)
            .salt(salt)
            .derive_key_size(32)
            .build()
    };
    let a1 = ks.derive_key(&blob_a, &process, &request(b"one")).unwrap();
    let a1_again = ks.derive_key(&blob_a, &process, &request(b"one")).unwrap();
    let a2 = ks.derive_key(&blob_a, &process, &request(b"two")).unwrap();
    let b1 = ks.derive_key(&blob_b, &process, &request(b"one")).unwrap();
    assert_eq!(&a1[..], &a1_again[..]);
    assert_ne!(&a1[..], &a2[..]);
    assert_ne!(&a1[..], &b1[..]);
}

/// Derivation requests that are malformed or not authorized. Test should fail with
/// `InvalidArgument`.
#[test]
fn hwkeystore_derive_invalid_request_fail() {
    let ks = setup();
    let process = test_process();
    let blob = key_generations::generate_derivation_key(&ks, &process, Digest::SHA256).unwrap();

    let requests = [
        // Not a key derivation function.
        ParamSetBuilder::new().algorithm(Algorithm::AES).derive_key_size(16),
        // No function at all.
        ParamSetBuilder::new().derive_key_size(16),
        // Nothing to derive.
        ParamSetBuilder::new().algorithm(Algorithm::HKDF).derive_key_size(0),
        ParamSetBuilder::new().algorithm(Algorithm::HKDF),
        // PBKDF2 needs an iteration count.
        ParamSetBuilder::new().algorithm(Algorithm::PBKDF2).derive_key_size(16),
        // The key was created for SHA256.
        ParamSetBuilder::new().algorithm(Algorithm::HKDF).digest(Digest::SHA1).derive_key_size(16),
    ];
    for request in requests {
        let result = map_ks_error(ks.derive_key(&blob, &process, &request.clone().build()));
        assert_eq!(Err(Error::InvalidArgument), result.map(|_| ()), "{request:?}");
    }

    // A MAC key may not be used for derivation.
    let mac_key = key_generations::generate_hmac_key(&ks, &process, 256, Digest::SHA256).unwrap();
    let request = ParamSetBuilder::new().algorithm(Algorithm::HKDF).derive_key_size(16).build();
    let result = map_ks_error(ks.derive_key(&mac_key, &process, &request));
    assert_eq!(Err(Error::InvalidArgument), result.map(|_| ()));
}
