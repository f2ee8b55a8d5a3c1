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

//! Protection of key material at rest.
//!
//! A key blob is a serialized [`ParamSet`]: the caller's key parameters followed by
//! `KEY_VERSION`, `KEY_FLAG`, `PROCESS_NAME`, `USER_ID` and, always last, `KEY`. The `KEY` value
//! is laid out as
//!
//! ```text
//! [0..16]    salt
//! [16..28]   nonce
//! [28..44]   AES-GCM tag
//! [44..48]   size of the ciphertext, little endian
//! [48..]     ciphertext
//! ```
//!
//! The encryption key is derived with PBKDF2-HMAC-SHA256 from the engine main key and the salt
//! `salt || process name || user id`. The additional authenticated data is the whole blob up to
//! the ciphertext with the tag bytes set to zero, so every parameter is bound to the key.

use crate::config::KeyStoreConfig;
use crate::engine::CryptoEngine;
use crate::key_node::KeyNode;
use crate::key_parameter::{KeyFlag, KeyParameter, KeyParameterValue, Tag};
use crate::ks_err;
use crate::kserr;
use crate::param_set::ParamSet;
use anyhow::{Context, Result};
use hwkeystore_crypto::{
    aes_gcm_decrypt_with_aad, aes_gcm_encrypt_with_aad, Password, ZVec, AES_256_KEY_LENGTH,
    GCM_IV_LENGTH, SALT_LENGTH, TAG_LENGTH,
};
use std::mem::size_of;

/// Error macro.
macro_rules! bloberr {
    { $($arg:tt)+ } => {
        kserr!(InvalidKeyInfo, $($arg)+)
    };
}

/// Version written into new key blobs.
pub const KEY_BLOB_VERSION: u32 = 1;

/// Size of the fixed part of the `KEY` value.
pub const KEY_BLOB_INFO_LEN: usize = SALT_LENGTH + GCM_IV_LENGTH + TAG_LENGTH + size_of::<u32>();

const NONCE_OFFSET: usize = SALT_LENGTH;
const TAG_OFFSET: usize = NONCE_OFFSET + GCM_IV_LENGTH;
const KEY_SIZE_OFFSET: usize = TAG_OFFSET + TAG_LENGTH;

/// Tags the envelope adds itself. Callers may not supply them.
const ENVELOPE_TAGS: [Tag; 5] =
    [Tag::KEY_VERSION, Tag::KEY_FLAG, Tag::PROCESS_NAME, Tag::USER_ID, Tag::KEY];

/// The caller a key blob belongs to. Part of the key derivation salt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Name of the calling process.
    pub process_name: Vec<u8>,
    /// User the process runs as.
    pub user_id: u32,
}

impl ProcessInfo {
    /// Creates a process description.
    pub fn new(process_name: &[u8], user_id: u32) -> Self {
        Self { process_name: process_name.to_vec(), user_id }
    }
}

/// Derives the AES-256 key protecting a blob.
fn derive_blob_key(
    engine: &dyn CryptoEngine,
    config: &KeyStoreConfig,
    blob_salt: &[u8],
    process: &ProcessInfo,
) -> Result<ZVec> {
    let mut salt =
        Vec::with_capacity(blob_salt.len() + process.process_name.len() + size_of::<u32>());
    salt.extend_from_slice(blob_salt);
    salt.extend_from_slice(&process.process_name);
    salt.extend_from_slice(&process.user_id.to_le_bytes());

    let password = Password::Owned(engine.main_key().context(ks_err!())?);
    password
        .derive_key_pbkdf2(&salt, config.pbkdf2_iterations, AES_256_KEY_LENGTH)
        .context(ks_err!("Failed to derive key blob key."))
}

/// Encrypts `key` and binds it to `params`, `flag` and `process`, returning the key blob.
pub fn wrap(
    engine: &dyn CryptoEngine,
    config: &KeyStoreConfig,
    key: &[u8],
    flag: KeyFlag,
    params: &ParamSet,
    process: &ProcessInfo,
) -> Result<Vec<u8>> {
    if key.is_empty() {
        return Err(kserr!(InvalidArgument, "no key material to wrap"));
    }
    if let Some(p) = params.iter().find(|p| ENVELOPE_TAGS.contains(&p.tag)) {
        return Err(kserr!(InvalidArgument, "caller supplied envelope tag {:?}", p.tag));
    }
    let key_size = u32::try_from(key.len())
        .map_err(|_| kserr!(InvalidArgument, "key material too large ({})", key.len()))?;

    let mut salt = [0u8; SALT_LENGTH];
    engine.fill_random(&mut salt).context(ks_err!("Failed to generate salt."))?;
    let mut nonce = [0u8; GCM_IV_LENGTH];
    engine.fill_random(&mut nonce).context(ks_err!("Failed to generate nonce."))?;

    // The tag and ciphertext are filled in after encryption; until then they are zero, which is
    // exactly the form authenticated as AAD.
    let mut info = Vec::with_capacity(KEY_BLOB_INFO_LEN + key.len());
    info.extend_from_slice(&salt);
    info.extend_from_slice(&nonce);
    info.extend_from_slice(&[0u8; TAG_LENGTH]);
    info.extend_from_slice(&key_size.to_le_bytes());
    info.resize(KEY_BLOB_INFO_LEN + key.len(), 0);

    let mut envelope = params.clone();
    envelope.push(KeyParameter::new(Tag::KEY_VERSION, KeyParameterValue::Uint(KEY_BLOB_VERSION)));
    envelope.push(KeyParameter::new(Tag::KEY_FLAG, KeyParameterValue::Uint(flag.0)));
    envelope.push(KeyParameter::new(
        Tag::PROCESS_NAME,
        KeyParameterValue::Blob(process.process_name.clone()),
    ));
    envelope.push(KeyParameter::new(Tag::USER_ID, KeyParameterValue::Uint(process.user_id)));
    envelope.push(KeyParameter::new(Tag::KEY, KeyParameterValue::Blob(info)));
    let mut blob = envelope.serialize().context(ks_err!("Failed to serialize key blob."))?;

    // KEY is the last parameter, so its data ends the blob.
    let ciphertext_start = blob.len() - key.len();
    let tag_start = ciphertext_start - KEY_BLOB_INFO_LEN + TAG_OFFSET;

    let blob_key = derive_blob_key(engine, config, &salt, process)?;
    let (ciphertext, tag) =
        aes_gcm_encrypt_with_aad(key, &blob_key, &nonce, &blob[..ciphertext_start])
            .context(ks_err!("Failed to encrypt key material."))?;
    blob[tag_start..tag_start + TAG_LENGTH].copy_from_slice(&tag);
    blob[ciphertext_start..].copy_from_slice(&ciphertext);
    Ok(blob)
}

/// Authenticates and decrypts a key blob produced by [`wrap`] for the same process.
///
/// The returned node carries every parameter of the blob except `KEY`.
pub fn unwrap(
    engine: &dyn CryptoEngine,
    config: &KeyStoreConfig,
    blob: &[u8],
    process: &ProcessInfo,
) -> Result<KeyNode> {
    let params = ParamSet::deserialize(blob).context(ks_err!("Failed to parse key blob."))?;
    let info = match params.last() {
        Some(KeyParameter { tag: Tag::KEY, value: KeyParameterValue::Blob(info) }) => info,
        _ => return Err(kserr!(InvalidArgument, "KEY is not the last key blob parameter")),
    };
    if info.len() < KEY_BLOB_INFO_LEN {
        return Err(bloberr!("KEY value too short (len = {})", info.len()));
    }
    let key_size = u32::from_le_bytes(
        info[KEY_SIZE_OFFSET..KEY_BLOB_INFO_LEN].try_into().context(ks_err!())?,
    ) as usize;
    if key_size == 0 || key_size != info.len() - KEY_BLOB_INFO_LEN {
        return Err(bloberr!(
            "declared key size {} does not match ciphertext of {} bytes",
            key_size,
            info.len() - KEY_BLOB_INFO_LEN
        ));
    }
    match params.get_uint(Tag::KEY_VERSION)? {
        Some(KEY_BLOB_VERSION) => {}
        version => return Err(bloberr!("unsupported key blob version {:?}", version)),
    }

    let salt = &info[..NONCE_OFFSET];
    let nonce = &info[NONCE_OFFSET..TAG_OFFSET];
    let tag = &info[TAG_OFFSET..KEY_SIZE_OFFSET];
    let ciphertext = &info[KEY_BLOB_INFO_LEN..];

    let ciphertext_start = blob.len() - key_size;
    let tag_start = ciphertext_start - KEY_BLOB_INFO_LEN + TAG_OFFSET;
    let mut aad = blob[..ciphertext_start].to_vec();
    aad[tag_start..tag_start + TAG_LENGTH].fill(0);

    let blob_key = derive_blob_key(engine, config, salt, process)?;
    let key = aes_gcm_decrypt_with_aad(ciphertext, &blob_key, nonce, &aad, tag)
        .context(ks_err!("Key blob authentication failed."))?;

    let node_params: ParamSet = params.as_slice()[..params.len() - 1].to_vec().into();
    Ok(KeyNode::new(node_params, key))
}
