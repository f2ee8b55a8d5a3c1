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

//! Shared fixtures for the hwkeystore integration tests.

pub mod authorizations;
pub mod device_certs;
pub mod key_generations;

use hwkeystore::config::KeyStoreConfig;
use hwkeystore::key_blob::ProcessInfo;
use hwkeystore::key_node::KeyNodeRegistry;
use hwkeystore::keystore::KeyStore;
use hwkeystore::openssl_engine::OpenSslEngine;
use std::sync::Arc;

/// Process name used by the fixtures.
pub const TEST_PROCESS_NAME: &[u8] = b"com.example.keystore.test";
/// User id used by the fixtures.
pub const TEST_USER_ID: u32 = 10;

/// Initializes logging once per test binary.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The calling process of the fixtures.
pub fn test_process() -> ProcessInfo {
    ProcessInfo::new(TEST_PROCESS_NAME, TEST_USER_ID)
}

/// Configuration with a low PBKDF2 iteration count to keep tests fast.
pub fn test_config() -> KeyStoreConfig {
    KeyStoreConfig { pbkdf2_iterations: 8, ..Default::default() }
}

/// A key store with a random main key, a fresh registry and an EC device certificate chain.
pub fn setup() -> KeyStore {
    setup_with_device_key(device_certs::DeviceKeyType::Ec)
}

/// Like [`setup`] with the given kind of device key.
pub fn setup_with_device_key(key_type: device_certs::DeviceKeyType) -> KeyStore {
    init_logger();
    let engine = OpenSslEngine::with_random_main_key().expect("Failed to create engine.");
    let chain = device_certs::DeviceChain::generate(key_type).expect("Failed to create chain.");
    KeyStore::with_config(
        Box::new(engine),
        Box::new(chain.provisioned_certs().expect("Failed to provision certs.")),
        test_config(),
        Arc::new(KeyNodeRegistry::new()),
    )
}
