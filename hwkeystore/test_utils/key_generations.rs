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

//! This module implements test utils to generate various types of keys.

use hwkeystore::error::{Error, SerializedError};
use hwkeystore::key_blob::ProcessInfo;
use hwkeystore::key_parameter::{Algorithm, BlockMode, Digest, KeyPurpose, PaddingMode};
use hwkeystore::keystore::{KeyStore, KeyStoreService};

use crate::authorizations::ParamSetBuilder;

/// Maps a wire error back onto the key store error it encodes. Codes that are not key store
/// errors surface as `Error::BadState`.
pub fn map_ks_error<T>(r: Result<T, SerializedError>) -> Result<T, Error> {
    r.map_err(|e| e.error().unwrap_or(Error::BadState))
}

/// Generate EC Key with below key parameters -
///     Purposes: SIGN and VERIFY
///     Digest: SHA256
///     Curve: P-256
pub fn generate_ec_p256_signing_key(
    ks: &KeyStore,
    process: &ProcessInfo,
) -> Result<Vec<u8>, SerializedError> {
    let gen_params = ParamSetBuilder::new()
        .algorithm(Algorithm::ECC)
        .key_size(256)
        .purpose(KeyPurpose::SIGN)
        .purpose(KeyPurpose::VERIFY)
        .digest(Digest::SHA256)
        .build();
    ks.generate_key(&gen_params, process)
}

/// Generate EC Key usable for key agreement on the given curve size.
pub fn generate_ec_agree_key(
    ks: &KeyStore,
    process: &ProcessInfo,
    key_size: u32,
) -> Result<Vec<u8>, SerializedError> {
    let gen_params = ParamSetBuilder::new()
        .algorithm(Algorithm::ECC)
        .key_size(key_size)
        .purpose(KeyPurpose::AGREE)
        .build();
    ks.generate_key(&gen_params, process)
}

/// Generate RSA signing key with the given size, padding and digest.
pub fn generate_rsa_signing_key(
    ks: &KeyStore,
    process: &ProcessInfo,
    key_size: u32,
    padding: PaddingMode,
    digest: Digest,
) -> Result<Vec<u8>, SerializedError> {
    let gen_params = ParamSetBuilder::new()
        .algorithm(Algorithm::RSA)
        .key_size(key_size)
        .purpose(KeyPurpose::SIGN)
        .purpose(KeyPurpose::VERIFY)
        .padding_mode(padding)
        .digest(digest)
        .build();
    ks.generate_key(&gen_params, process)
}

/// Generate RSA encryption key with the given size, padding and digest.
pub fn generate_rsa_encryption_key(
    ks: &KeyStore,
    process: &ProcessInfo,
    key_size: u32,
    padding: PaddingMode,
    digest: Digest,
) -> Result<Vec<u8>, SerializedError> {
    let gen_params = ParamSetBuilder::new()
        .algorithm(Algorithm::RSA)
        .key_size(key_size)
        .purpose(KeyPurpose::ENCRYPT)
        .purpose(KeyPurpose::DECRYPT)
        .padding_mode(padding)
        .digest(digest)
        .build();
    ks.generate_key(&gen_params, process)
}

/// Generate AES key for encryption and decryption in the given block mode.
pub fn generate_aes_key(
    ks: &KeyStore,
    process: &ProcessInfo,
    key_size: u32,
    block_mode: BlockMode,
    padding: PaddingMode,
) -> Result<Vec<u8>, SerializedError> {
    let gen_params = ParamSetBuilder::new()
        .algorithm(Algorithm::AES)
        .key_size(key_size)
        .purpose(KeyPurpose::ENCRYPT)
        .purpose(KeyPurpose::DECRYPT)
        .block_mode(block_mode)
        .padding_mode(padding)
        .build();
    ks.generate_key(&gen_params, process)
}

/// Generate HMAC key with the given size and digest.
pub fn generate_hmac_key(
    ks: &KeyStore,
    process: &ProcessInfo,
    key_size: u32,
    digest: Digest,
) -> Result<Vec<u8>, SerializedError> {
    let gen_params = ParamSetBuilder::new()
        .algorithm(Algorithm::HMAC)
        .key_size(key_size)
        .purpose(KeyPurpose::MAC)
        .digest(digest)
        .build();
    ks.generate_key(&gen_params, process)
}

/// Generate an HMAC key that may only be used as key derivation input.
pub fn generate_derivation_key(
    ks: &KeyStore,
    process: &ProcessInfo,
    digest: Digest,
) -> Result<Vec<u8>, SerializedError> {
    let gen_params = ParamSetBuilder::new()
        .algorithm(Algorithm::HMAC)
        .key_size(256)
        .purpose(KeyPurpose::DERIVE)
        .digest(digest)
        .build();
    ks.generate_key(&gen_params, process)
}

/// Generate Ed25519 signing key.
pub fn generate_ed25519_key(
    ks: &KeyStore,
    process: &ProcessInfo,
) -> Result<Vec<u8>, SerializedError> {
    let gen_params = ParamSetBuilder::new()
        .algorithm(Algorithm::ED25519)
        .key_size(256)
        .purpose(KeyPurpose::SIGN)
        .purpose(KeyPurpose::VERIFY)
        .build();
    ks.generate_key(&gen_params, process)
}

/// Generate X25519 key agreement key.
pub fn generate_x25519_key(
    ks: &KeyStore,
    process: &ProcessInfo,
) -> Result<Vec<u8>, SerializedError> {
    let gen_params = ParamSetBuilder::new()
        .algorithm(Algorithm::X25519)
        .key_size(256)
        .purpose(KeyPurpose::AGREE)
        .build();
    ks.generate_key(&gen_params, process)
}
