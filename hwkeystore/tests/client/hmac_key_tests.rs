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
use hwkeystore::key_parameter::{Digest, KeyPurpose};
use hwkeystore::keystore::KeyStoreService;
use hwkeystore_test_utils::authorizations::ParamSetBuilder;
use hwkeystore_test_utils::key_generations::{self, map_ks_error};
use hwkeystore_test_utils::{setup, test_process};

use crate::test_utils::{begin_on_blob, run_operation, SAMPLE_MESSAGE};

/// Generate HMAC keys with different digests and check the MAC length.
#[test]
fn hwkeystore_hmac_key_digests() {
    let ks = setup();
    let process = test_process();
    for (digest, mac_len) in [
        (Digest::SHA1, 20),
        (Digest::SHA224, 28),
        (Digest::SHA256, 32),
        (Digest::SHA384, 48),
        (Digest::SHA512, 64),
    ] {
        let blob = key_generations::generate_hmac_key(&ks, &process, 256, digest).unwrap();
        let request = ParamSetBuilder::new().build();
        let mac = ks.mac(&blob, &process, &request, SAMPLE_MESSAGE).unwrap();
        assert_eq!(mac.len(), mac_len, "{digest:?}");
        assert_eq!(mac, ks.mac(&blob, &process, &request, SAMPLE_MESSAGE).unwrap());
    }
}

/// Try to generate HMAC keys of unsupported sizes. Test should fail with `InvalidArgument`.
#[test]
fn hwkeystore_hmac_invalid_key_size_fail() {
    let ks = setup();
    let process = test_process();
    for key_size in [0, 7, 1032] {
        let result = map_ks_error(key_generations::generate_hmac_key(
            &ks,
            &process,
            key_size,
            Digest::SHA256,
        ));
        assert_eq!(Err(Error::InvalidArgument), result);
    }
}

/// Try to compute a MAC with another digest than the key was created with. Test should fail
/// with `InvalidArgument`.
#[test]
fn hwkeystore_hmac_unauthorized_digest_fail() {
    let ks = setup();
    let process = test_process();
    let blob = key_generations::generate_hmac_key(&ks, &process, 128, Digest::SHA256).unwrap();
    let request = ParamSetBuilder::new().digest(Digest::SHA512).build();
    let result = map_ks_error(ks.mac(&blob, &process, &request, SAMPLE_MESSAGE));
    assert_eq!(Err(Error::InvalidArgument), result);
}

/// The multi-stage MAC matches the one-shot MAC.
#[test]
fn hwkeystore_hmac_multi_stage() {
    let ks = setup();
    let process = test_process();
    let blob = key_generations::generate_hmac_key(&ks, &process, 256, Digest::SHA256).unwrap();
    let expected = ks.mac(&blob, &process, &ParamSetBuilder::new().build(), SAMPLE_MESSAGE);

    let request = ParamSetBuilder::new().purpose(KeyPurpose::MAC).build();
    let mut op = begin_on_blob(&ks, &blob, &request).unwrap();
    let mac = run_operation(&ks, &mut op, SAMPLE_MESSAGE, 2, &[]).unwrap();
    assert_eq!(mac, expected.unwrap());
}
