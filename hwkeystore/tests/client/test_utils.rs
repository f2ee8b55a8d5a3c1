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
use hwkeystore::key_node::KeyOperation;
use hwkeystore::keystore::{KeyStore, KeyStoreService};
use hwkeystore::param_set::ParamSet;
use hwkeystore_test_utils::key_generations::map_ks_error;

/// Sample plain text input for encrypt operation.
pub const SAMPLE_PLAIN_TEXT: &[u8] = b"my message 11111";

/// Sample message for sign and mac operations.
pub const SAMPLE_MESSAGE: &[u8] = b"my message";

/// A 12 byte GCM nonce.
pub const SAMPLE_NONCE: &[u8] = &[0x1f; 12];

/// A 16 byte IV.
pub const SAMPLE_IV: &[u8] = &[0x2e; 16];

/// Runs a whole multi-stage operation, feeding `input` in chunks of `chunk` bytes.
pub fn run_operation(
    ks: &KeyStore,
    operation: &mut KeyOperation,
    input: &[u8],
    chunk: usize,
    last: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    for part in input.chunks(chunk) {
        out.extend(map_ks_error(ks.update(operation, part))?);
    }
    out.extend(map_ks_error(ks.finish(operation, last))?);
    Ok(out)
}

/// Loads `blob`, begins an operation with `request` and frees the handle again. The operation
/// keeps its key node alive.
pub fn begin_on_blob(
    ks: &KeyStore,
    blob: &[u8],
    request: &ParamSet,
) -> Result<KeyOperation, Error> {
    let process = hwkeystore_test_utils::test_process();
    let handle = map_ks_error(ks.load_key(blob, &process))?;
    let operation = map_ks_error(ks.begin(handle, request));
    map_ks_error(ks.free_key(handle))?;
    operation
}
