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

//! Process wide state of the key store.

use crate::config::KeyStoreConfig;
use crate::key_node::KeyNodeRegistry;
use lazy_static::lazy_static;
use std::sync::Arc;

lazy_static! {
    /// Key nodes loaded by callers, shared by all key store instances that do not bring their
    /// own registry.
    pub static ref KEY_NODES: Arc<KeyNodeRegistry> = Arc::new(KeyNodeRegistry::new());
    /// Configuration read from the environment on first use.
    pub static ref CONFIG: KeyStoreConfig = KeyStoreConfig::from_env();
}
