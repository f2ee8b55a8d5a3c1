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

//! The key store facade.
//!
//! [`KeyStore`] ties the key blob codec, the key node registry, the usage policy, the crypto
//! engine and attestation together. Every entry point of [`KeyStoreService`] returns a
//! [`SerializedError`] on failure; the error is logged once, here.

use crate::attestation;
use crate::authorization::{check_key_usage, AuthId};
use crate::certs::{DeviceCertStore, ProvisionedCerts};
use crate::config::KeyStoreConfig;
use crate::engine::{CryptoEngine, UsageParams, UsageSpec};
use crate::error::{map_or_log_err, SerializedError};
use crate::globals::{CONFIG, KEY_NODES};
use crate::key_blob::{self, ProcessInfo};
use crate::key_material::{
    check_curve25519_key, format_public_key_der, from_material, is_symmetric, RawKey,
};
use crate::key_node::{KeyNode, KeyNodeHandle, KeyNodeRegistry, KeyOperation};
use crate::key_parameter::{
    Algorithm, Digest, KeyFlag, KeyParameterValue, KeyPurpose, PaddingMode, Tag,
};
use crate::ks_err;
use crate::kserr;
use crate::param_set::ParamSet;
use anyhow::{Context, Result};
use hwkeystore_crypto::ZVec;
use std::sync::Arc;

/// The key store entry points. Keys are passed around as key blobs bound to the calling
/// process; multi-stage operations run on key nodes loaded into the registry.
pub trait KeyStoreService {
    /// Generates a key described by `params` (`ALGORITHM`, `KEY_SIZE`) and returns its blob.
    fn generate_key(
        &self,
        params: &ParamSet,
        process: &ProcessInfo,
    ) -> Result<Vec<u8>, SerializedError>;

    /// Wraps caller supplied key material into a blob.
    fn import_key(
        &self,
        params: &ParamSet,
        key: &[u8],
        process: &ProcessInfo,
    ) -> Result<Vec<u8>, SerializedError>;

    /// Returns the DER `SubjectPublicKeyInfo` of an asymmetric key.
    fn export_public_key(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
    ) -> Result<Vec<u8>, SerializedError>;

    /// Signs `data`.
    fn sign(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
        data: &[u8],
    ) -> Result<Vec<u8>, SerializedError>;

    /// Verifies `signature` over `data`.
    fn verify(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), SerializedError>;

    /// Encrypts `data`.
    fn encrypt(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
        data: &[u8],
    ) -> Result<Vec<u8>, SerializedError>;

    /// Decrypts `data`.
    fn decrypt(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
        data: &[u8],
    ) -> Result<ZVec, SerializedError>;

    /// Computes an HMAC over `data`.
    fn mac(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
        data: &[u8],
    ) -> Result<Vec<u8>, SerializedError>;

    /// Computes a shared secret with the DER encoded `peer_public_key`.
    fn agree_key(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
        peer_public_key: &[u8],
    ) -> Result<ZVec, SerializedError>;

    /// Derives `DERIVE_KEY_SIZE` bytes with the `ALGORITHM` (HKDF or PBKDF2) of the request.
    fn derive_key(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
    ) -> Result<ZVec, SerializedError>;

    /// Attests the key and returns the formatted certificate chain.
    fn attest_key(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
    ) -> Result<Vec<u8>, SerializedError>;

    /// Like `attest_key`, writing the chain into `out` and returning its length.
    fn attest_key_into(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
        out: &mut [u8],
    ) -> Result<usize, SerializedError>;

    /// Authenticates and decrypts a blob into the key node registry.
    fn load_key(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
    ) -> Result<KeyNodeHandle, SerializedError>;

    /// Releases a handle returned by `load_key`.
    fn free_key(&self, handle: KeyNodeHandle) -> Result<(), SerializedError>;

    /// Starts a multi-stage operation on a loaded key.
    fn begin(
        &self,
        handle: KeyNodeHandle,
        request: &ParamSet,
    ) -> Result<KeyOperation, SerializedError>;

    /// Feeds input to an operation.
    fn update(
        &self,
        operation: &mut KeyOperation,
        input: &[u8],
    ) -> Result<Vec<u8>, SerializedError>;

    /// Feeds the last input and ends an operation. For verification `input` is the signature.
    fn finish(
        &self,
        operation: &mut KeyOperation,
        input: &[u8],
    ) -> Result<Vec<u8>, SerializedError>;

    /// Ends an operation without output.
    fn abort(&self, operation: &mut KeyOperation) -> Result<(), SerializedError>;
}

/// A key store over one crypto engine and one device certificate store.
pub struct KeyStore {
    engine: Box<dyn CryptoEngine>,
    certs: Box<dyn DeviceCertStore>,
    config: KeyStoreConfig,
    registry: Arc<KeyNodeRegistry>,
}

/// A copy of `request` whose purpose is `purpose`.
fn with_purpose(request: &ParamSet, purpose: KeyPurpose) -> ParamSet {
    let mut params = ParamSet::new();
    for p in request.iter().filter(|p| p.tag != Tag::PURPOSE) {
        params.push(p.clone());
    }
    params.with(Tag::PURPOSE, KeyParameterValue::Uint(purpose.0))
}

/// Checks that the key of `node` may be used as `usage` describes.
fn authorize(node: &KeyNode, usage: &UsageSpec) -> Result<()> {
    let algorithm = node.algorithm()?;
    let auth_id = AuthId::for_usage(algorithm, usage.purpose).ok_or_else(|| {
        kserr!(InvalidArgument, "{:?} keys cannot be used for {:?}", algorithm, usage.purpose)
    })?;
    let request = ParamSet::new()
        .with(Tag::ALGORITHM, KeyParameterValue::Uint(algorithm.0))
        .with(Tag::PURPOSE, KeyParameterValue::Uint(usage.purpose.0))
        .with(Tag::DIGEST, KeyParameterValue::Uint(usage.digest.0))
        .with(Tag::PADDING, KeyParameterValue::Uint(usage.padding.0))
        .with(Tag::BLOCK_MODE, KeyParameterValue::Uint(usage.mode.0));
    check_key_usage(auth_id, node.params(), &request)
}

/// Checks that imported material matches the algorithm and size recorded in `params`.
fn check_import(algorithm: Algorithm, params: &ParamSet, key: &[u8]) -> Result<()> {
    let raw = from_material(algorithm, false, key).context(ks_err!("Bad key material."))?;
    if !raw.has_private() {
        return Err(kserr!(InvalidArgument, "imported {algorithm:?} key has no private part"));
    }
    match &raw {
        RawKey::Symmetric(k) if algorithm == Algorithm::AES && !matches!(k.len(), 16 | 24 | 32) => {
            return Err(kserr!(InvalidArgument, "AES key of {} bytes", k.len()));
        }
        RawKey::Curve25519(k) => check_curve25519_key(k)?,
        _ => {}
    }
    if let Some(key_size) = params.get_uint(Tag::KEY_SIZE)? {
        if key_size != raw.key_size() {
            return Err(kserr!(
                InvalidArgument,
                "KEY_SIZE {} does not match the {} bit key",
                key_size,
                raw.key_size()
            ));
        }
    }
    Ok(())
}

impl KeyStore {
    /// Creates a key store using the process wide configuration and key node registry.
    pub fn new(engine: Box<dyn CryptoEngine>, certs: Box<dyn DeviceCertStore>) -> Self {
        Self::with_config(engine, certs, CONFIG.clone(), KEY_NODES.clone())
    }

    /// Creates a key store with its own configuration and registry.
    pub fn with_config(
        engine: Box<dyn CryptoEngine>,
        certs: Box<dyn DeviceCertStore>,
        config: KeyStoreConfig,
        registry: Arc<KeyNodeRegistry>,
    ) -> Self {
        Self { engine, certs, config, registry }
    }

    /// Creates a key store whose device certificates are loaded from the configured directory.
    pub fn from_env(engine: Box<dyn CryptoEngine>) -> Result<Self> {
        let dir = CONFIG
            .cert_dir
            .as_ref()
            .ok_or_else(|| kserr!(BadState, "no device certificate directory configured"))?;
        let certs = ProvisionedCerts::load_from_dir(dir).context(ks_err!())?;
        Ok(Self::new(engine, Box::new(certs)))
    }

    /// The configuration in use.
    pub fn config(&self) -> &KeyStoreConfig {
        &self.config
    }

    /// The key node registry in use.
    pub fn registry(&self) -> &KeyNodeRegistry {
        &self.registry
    }

    fn unwrap_key(&self, blob: &[u8], process: &ProcessInfo) -> Result<KeyNode> {
        key_blob::unwrap(self.engine.as_ref(), &self.config, blob, process)
            .context(ks_err!("Failed to unwrap key blob."))
    }

    /// Loads the key and builds the authorized usage of a one-shot operation.
    fn prepare(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
        purpose: KeyPurpose,
    ) -> Result<(KeyNode, UsageSpec)> {
        let node = self.unwrap_key(blob, process)?;
        let usage = UsageSpec::from_params(node.params(), &with_purpose(request, purpose))
            .context(ks_err!())?;
        authorize(&node, &usage).context(ks_err!())?;
        Ok((node, usage))
    }

    /// What a signature covers: the digest of `data` unless the usage signs messages directly.
    fn signature_input(&self, usage: &UsageSpec, data: &[u8]) -> Result<Vec<u8>> {
        if usage.algorithm == Algorithm::ED25519 || usage.digest == Digest::NONE {
            Ok(data.to_vec())
        } else {
            self.engine.hash(usage.digest, data).context(ks_err!())
        }
    }

    fn generate(&self, params: &ParamSet, process: &ProcessInfo) -> Result<Vec<u8>> {
        let algorithm = Algorithm(params.require_uint(Tag::ALGORITHM)?);
        let key_size = params.require_uint(Tag::KEY_SIZE)?;
        let key = self
            .engine
            .generate_key(algorithm, key_size)
            .context(ks_err!("Failed to generate {:?} key.", algorithm))?;
        key_blob::wrap(self.engine.as_ref(), &self.config, &key, KeyFlag::GENERATE, params, process)
    }

    fn import(&self, params: &ParamSet, key: &[u8], process: &ProcessInfo) -> Result<Vec<u8>> {
        let algorithm = Algorithm(params.require_uint(Tag::ALGORITHM)?);
        check_import(algorithm, params, key)?;
        key_blob::wrap(self.engine.as_ref(), &self.config, key, KeyFlag::IMPORT, params, process)
    }

    fn export_public(&self, blob: &[u8], process: &ProcessInfo) -> Result<Vec<u8>> {
        let node = self.unwrap_key(blob, process)?;
        let algorithm = node.algorithm()?;
        if is_symmetric(algorithm) {
            return Err(kserr!(InvalidArgument, "{algorithm:?} keys have no public part"));
        }
        let params = node.params();
        let usage = UsageSpec::new(
            algorithm,
            KeyPurpose(params.get_uint(Tag::PURPOSE)?.unwrap_or(0)),
            Digest(params.get_uint(Tag::DIGEST)?.unwrap_or(Digest::NONE.0)),
            PaddingMode(params.get_uint(Tag::PADDING)?.unwrap_or(PaddingMode::NONE.0)),
        );
        format_public_key_der(node.key(), &usage)
    }

    fn sign_message(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
        data: &[u8],
    ) -> Result<Vec<u8>> {
        let (node, usage) = self.prepare(blob, process, request, KeyPurpose::SIGN)?;
        let input = self.signature_input(&usage, data)?;
        self.engine.sign(node.key(), &usage, &input).context(ks_err!())
    }

    fn verify_message(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
        data: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        let (node, usage) = self.prepare(blob, process, request, KeyPurpose::VERIFY)?;
        let input = self.signature_input(&usage, data)?;
        self.engine.verify(node.key(), &usage, &input, signature).context(ks_err!())
    }

    fn encrypt_data(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
        data: &[u8],
    ) -> Result<Vec<u8>> {
        let (node, usage) = self.prepare(blob, process, request, KeyPurpose::ENCRYPT)?;
        self.engine.encrypt(node.key(), &usage, data).context(ks_err!())
    }

    fn decrypt_data(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
        data: &[u8],
    ) -> Result<ZVec> {
        let (node, usage) = self.prepare(blob, process, request, KeyPurpose::DECRYPT)?;
        self.engine.decrypt(node.key(), &usage, data).context(ks_err!())
    }

    fn mac_data(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
        data: &[u8],
    ) -> Result<Vec<u8>> {
        let (node, usage) = self.prepare(blob, process, request, KeyPurpose::MAC)?;
        if usage.digest == Digest::NONE {
            return Err(kserr!(InvalidArgument, "HMAC needs a digest"));
        }
        self.engine.hmac(usage.digest, node.key(), data).context(ks_err!())
    }

    fn agree(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
        peer_public_key: &[u8],
    ) -> Result<ZVec> {
        let (node, usage) = self.prepare(blob, process, request, KeyPurpose::AGREE)?;
        let algorithm = match usage.algorithm {
            Algorithm::ECC => Algorithm::ECDH,
            alg => alg,
        };
        self.engine.agree_key(algorithm, node.key(), peer_public_key).context(ks_err!())
    }

    fn derive(&self, blob: &[u8], process: &ProcessInfo, request: &ParamSet) -> Result<ZVec> {
        let node = self.unwrap_key(blob, process)?;
        let function = Algorithm(request.require_uint(Tag::ALGORITHM)?);
        if !matches!(function, Algorithm::HKDF | Algorithm::PBKDF2) {
            return Err(kserr!(InvalidArgument, "{function:?} is not a key derivation function"));
        }
        let out_len = request.require_uint(Tag::DERIVE_KEY_SIZE)? as usize;
        if out_len == 0 {
            return Err(kserr!(InvalidArgument, "derived key size is zero"));
        }
        let digest = match request.get_uint(Tag::DIGEST)? {
            Some(d) => Digest(d),
            None => Digest(node.params().get_uint(Tag::DIGEST)?.unwrap_or(Digest::NONE.0)),
        };
        let key_usage =
            UsageSpec::new(node.algorithm()?, KeyPurpose::DERIVE, digest, PaddingMode::NONE);
        authorize(&node, &key_usage).context(ks_err!())?;

        let params = UsageParams::Derivation {
            salt: request.get_blob(Tag::SALT)?.unwrap_or_default().to_vec(),
            info: request.get_blob(Tag::INFO)?.unwrap_or_default().to_vec(),
            iterations: request.get_uint(Tag::ITERATION)?.unwrap_or(0),
        };
        let usage = UsageSpec::new(function, KeyPurpose::DERIVE, digest, PaddingMode::NONE)
            .with_params(params);
        self.engine.derive_key(&usage, node.key(), out_len).context(ks_err!())
    }

    fn attest(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
    ) -> Result<attestation::CertificateChain> {
        let node = self.unwrap_key(blob, process)?;
        attestation::attest_key(
            self.engine.as_ref(),
            self.certs.as_ref(),
            &self.config,
            &node,
            request,
        )
        .context(ks_err!("Failed to attest key."))
    }

    fn load(&self, blob: &[u8], process: &ProcessInfo) -> Result<KeyNodeHandle> {
        let node = self.unwrap_key(blob, process)?;
        self.registry.insert(node).context(ks_err!())
    }

    fn begin_operation(&self, handle: KeyNodeHandle, request: &ParamSet) -> Result<KeyOperation> {
        let node = self.registry.acquire(handle).context(ks_err!())?;
        // The operation keeps the node alive through its own reference.
        self.registry.release(handle).context(ks_err!())?;
        let usage = UsageSpec::from_params(node.params(), request).context(ks_err!())?;
        authorize(&node, &usage).context(ks_err!())?;
        let mut operation = KeyOperation::new(node, request.clone());
        operation.init(self.engine.as_ref(), &usage)?;
        Ok(operation)
    }
}

impl KeyStoreService for KeyStore {
    fn generate_key(
        &self,
        params: &ParamSet,
        process: &ProcessInfo,
    ) -> Result<Vec<u8>, SerializedError> {
        map_or_log_err(self.generate(params, process), Ok)
    }

    fn import_key(
        &self,
        params: &ParamSet,
        key: &[u8],
        process: &ProcessInfo,
    ) -> Result<Vec<u8>, SerializedError> {
        map_or_log_err(self.import(params, key, process), Ok)
    }

    fn export_public_key(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
    ) -> Result<Vec<u8>, SerializedError> {
        map_or_log_err(self.export_public(blob, process), Ok)
    }

    fn sign(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
        data: &[u8],
    ) -> Result<Vec<u8>, SerializedError> {
        map_or_log_err(self.sign_message(blob, process, request, data), Ok)
    }

    fn verify(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), SerializedError> {
        map_or_log_err(self.verify_message(blob, process, request, data, signature), Ok)
    }

    fn encrypt(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
        data: &[u8],
    ) -> Result<Vec<u8>, SerializedError> {
        map_or_log_err(self.encrypt_data(blob, process, request, data), Ok)
    }

    fn decrypt(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
        data: &[u8],
    ) -> Result<ZVec, SerializedError> {
        map_or_log_err(self.decrypt_data(blob, process, request, data), Ok)
    }

    fn mac(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
        data: &[u8],
    ) -> Result<Vec<u8>, SerializedError> {
        map_or_log_err(self.mac_data(blob, process, request, data), Ok)
    }

    fn agree_key(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
        peer_public_key: &[u8],
    ) -> Result<ZVec, SerializedError> {
        map_or_log_err(self.agree(blob, process, request, peer_public_key), Ok)
    }

    fn derive_key(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
    ) -> Result<ZVec, SerializedError> {
        map_or_log_err(self.derive(blob, process, request), Ok)
    }

    fn attest_key(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
    ) -> Result<Vec<u8>, SerializedError> {
        let alignment = self.config.cert_alignment;
        map_or_log_err(
            self.attest(blob, process, request).and_then(|chain| chain.to_bytes(alignment)),
            Ok,
        )
    }

    fn attest_key_into(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
        request: &ParamSet,
        out: &mut [u8],
    ) -> Result<usize, SerializedError> {
        let alignment = self.config.cert_alignment;
        map_or_log_err(
            self.attest(blob, process, request)
                .and_then(|chain| attestation::format_chain(&chain, alignment, out)),
            Ok,
        )
    }

    fn load_key(
        &self,
        blob: &[u8],
        process: &ProcessInfo,
    ) -> Result<KeyNodeHandle, SerializedError> {
        map_or_log_err(self.load(blob, process), Ok)
    }

    fn free_key(&self, handle: KeyNodeHandle) -> Result<(), SerializedError> {
        map_or_log_err(self.registry.release(handle), Ok)
    }

    fn begin(
        &self,
        handle: KeyNodeHandle,
        request: &ParamSet,
    ) -> Result<KeyOperation, SerializedError> {
        map_or_log_err(self.begin_operation(handle, request), Ok)
    }

    fn update(
        &self,
        operation: &mut KeyOperation,
        input: &[u8],
    ) -> Result<Vec<u8>, SerializedError> {
        map_or_log_err(operation.update(input), Ok)
    }

    fn finish(
        &self,
        operation: &mut KeyOperation,
        input: &[u8],
    ) -> Result<Vec<u8>, SerializedError> {
        map_or_log_err(operation.finish(input), Ok)
    }

    fn abort(&self, operation: &mut KeyOperation) -> Result<(), SerializedError> {
        map_or_log_err(operation.abort(), Ok)
    }
}
