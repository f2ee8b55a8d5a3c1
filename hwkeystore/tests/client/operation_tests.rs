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
use hwkeystore::key_node::KeyNodeHandle;
use hwkeystore::key_parameter::{BlockMode, Digest, KeyPurpose, PaddingMode};
use hwkeystore::keystore::KeyStoreService;
use hwkeystore_test_utils::authorizations::ParamSetBuilder;
use hwkeystore_test_utils::key_generations::{self, map_ks_error};
use hwkeystore_test_utils::{setup, test_process};
use std::thread;

use crate::test_utils::{begin_on_blob, SAMPLE_MESSAGE, SAMPLE_NONCE};

/// Loading a key publishes it in the registry until the handle is freed.
#[test]
fn hwkeystore_load_and_free_key() {
    let ks = setup();
    let process = test_process();
    let blob = key_generations::generate_ec_p256_signing_key(&ks, &process).unwrap();

    let first = ks.load_key(&blob, &process).unwrap();
    let second = ks.load_key(&blob, &process).unwrap();
    assert_ne!(first, second);
    assert_eq!(ks.registry().len(), 2);

    ks.free_key(first).unwrap();
    assert_eq!(ks.registry().len(), 1);
    ks.free_key(second).unwrap();
    assert!(ks.registry().is_empty());

    // Freed handles are stale, even once their slot is reused.
    assert_eq!(Err(Error::BadState), map_ks_error(ks.free_key(first)));
    let third = ks.load_key(&blob, &process).unwrap();
    let sign = ParamSetBuilder::new().purpose(KeyPurpose::SIGN).build();
    assert_eq!(Err(Error::BadState), map_ks_error(ks.begin(first, &sign)).map(|_| ()));
    ks.free_key(third).unwrap();

    let never_issued = KeyNodeHandle::from_u64(0xdead_beef_0000_0007);
    assert_eq!(Err(Error::BadState), map_ks_error(ks.free_key(never_issued)));
}

/// An operation keeps its key alive after the handle was freed.
#[test]
fn hwkeystore_operation_outlives_handle() {
    let ks = setup();
    let process = test_process();
    let blob = key_generations::generate_ec_p256_signing_key(&ks, &process).unwrap();
    let handle = ks.load_key(&blob, &process).unwrap();
    let sign = ParamSetBuilder::new().purpose(KeyPurpose::SIGN).build();
    let mut op = ks.begin(handle, &sign).unwrap();
    ks.free_key(handle).unwrap();
    assert!(ks.registry().is_empty());

    ks.update(&mut op, SAMPLE_MESSAGE).unwrap();
    let signature = ks.finish(&mut op, &[]).unwrap();
    ks.verify(&blob, &process, &ParamSetBuilder::new().build(), SAMPLE_MESSAGE, &signature)
        .unwrap();
}

/// Once an operation is finished or aborted every further call fails with `NullPointer`.
#[test]
fn hwkeystore_operation_after_end_fail() {
    let ks = setup();
    let process = test_process();
    let blob = key_generations::generate_hmac_key(&ks, &process, 256, Digest::SHA256).unwrap();
    let request = ParamSetBuilder::new().purpose(KeyPurpose::MAC).build();

    let mut op = begin_on_blob(&ks, &blob, &request).unwrap();
    assert!(op.is_active());
    ks.finish(&mut op, SAMPLE_MESSAGE).unwrap();
    assert_eq!(Err(Error::NullPointer), map_ks_error(ks.update(&mut op, b"more")));
    assert_eq!(Err(Error::NullPointer), map_ks_error(ks.finish(&mut op, &[])));
    assert_eq!(Err(Error::NullPointer), map_ks_error(ks.abort(&mut op)));

    let mut op = begin_on_blob(&ks, &blob, &request).unwrap();
    ks.update(&mut op, SAMPLE_MESSAGE).unwrap();
    ks.abort(&mut op).unwrap();
    assert!(!op.is_active());
    assert_eq!(Err(Error::NullPointer), map_ks_error(ks.finish(&mut op, &[])));
}

/// Dropping an active operation releases it.
#[test]
fn hwkeystore_drop_active_operation() {
    let ks = setup();
    let process = test_process();
    let blob =
        key_generations::generate_aes_key(&ks, &process, 128, BlockMode::GCM, PaddingMode::NONE)
            .unwrap();
    let request = ParamSetBuilder::new().purpose(KeyPurpose::ENCRYPT).nonce(SAMPLE_NONCE).build();
    let mut op = begin_on_blob(&ks, &blob, &request).unwrap();
    ks.update(&mut op, b"partial").unwrap();
    drop(op);
    assert!(ks.registry().is_empty());
}

/// Requests that cannot start an operation.
#[test]
fn hwkeystore_begin_invalid_request_fail() {
    let ks = setup();
    let process = test_process();
    let blob = key_generations::generate_ec_p256_signing_key(&ks, &process).unwrap();

    // No purpose.
    let result = begin_on_blob(&ks, &blob, &ParamSetBuilder::new().build());
    assert_eq!(Err(Error::InvalidArgument), result.map(|_| ()));

    // A purpose the key was not created for.
    let request = ParamSetBuilder::new().purpose(KeyPurpose::ENCRYPT).build();
    assert_eq!(Err(Error::InvalidArgument), begin_on_blob(&ks, &blob, &request).map(|_| ()));

    // Key agreement has no multi-stage form.
    let blob = key_generations::generate_x25519_key(&ks, &process).unwrap();
    let request = ParamSetBuilder::new().purpose(KeyPurpose::AGREE).build();
    assert_eq!(Err(Error::NotSupported), begin_on_blob(&ks, &blob, &request).map(|_| ()));
}

/// One key store serves operations from several threads at once.
#[test]
fn hwkeystore_concurrent_operations() {
    let ks = setup();
    let process = test_process();
    let blob = key_generations::generate_ec_p256_signing_key(&ks, &process).unwrap();
    let handle = ks.load_key(&blob, &process).unwrap();

    thread::scope(|s| {
        for i in 0..8u8 {
            let ks = &ks;
            let blob = &blob;
            s.spawn(move || {
                let message = [i; 64];
                let sign = ParamSetBuilder::new().purpose(KeyPurpose::SIGN).build();
                let mut op = ks.begin(handle, &sign).unwrap();
                let signature = ks.finish(&mut op, &message).unwrap();
                let request = ParamSetBuilder::new().build();
                ks.verify(blob, &test_process(), &request, &message, &signature).unwrap();
            });
        }
    });

    assert_eq!(ks.registry().len(), 1);
    ks.free_key(handle).unwrap();
    assert!(ks.registry().is_empty());
}
