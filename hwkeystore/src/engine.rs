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

//! The crypto backend interface. The key store never implements primitives itself; everything
//! goes through a [`CryptoEngine`] chosen when the key store is constructed.

use crate::key_parameter::{Algorithm, BlockMode, Digest, KeyPurpose, PaddingMode, Tag};
use crate::kserr;
use crate::param_set::ParamSet;
use anyhow::Result;
use hwkeystore_crypto::ZVec;

/// Length of the AES-GCM tag appended to ciphertexts.
pub const AEAD_TAG_LEN: usize = 16;

/// Algorithm specific inputs of an operation.
#[derive(Clone, PartialEq, Eq)]
pub enum UsageParams {
    /// Authenticated encryption. On decryption the tag is expected at the end of the input.
    Aead {
        /// Nonce.
        nonce: Vec<u8>,
        /// Additional authenticated data.
        aad: Vec<u8>,
        /// Tag length in bytes.
        tag_len: usize,
    },
    /// Unauthenticated block or stream cipher.
    Cipher {
        /// Initialization vector. Empty for ECB.
        iv: Vec<u8>,
    },
    /// Key derivation.
    Derivation {
        /// Salt.
        salt: Vec<u8>,
        /// HKDF info.
        info: Vec<u8>,
        /// PBKDF2 iteration count.
        iterations: u32,
    },
}

impl std::fmt::Debug for UsageParams {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Aead { nonce, aad, tag_len } => write!(
                f,
                "Aead {{ nonce: {} bytes, aad: {} bytes, tag_len: {tag_len} }}",
                nonce.len(),
                aad.len()
            ),
            Self::Cipher { iv } => write!(f, "Cipher {{ iv: {} bytes }}", iv.len()),
            Self::Derivation { salt, info, iterations } => write!(
                f,
                "Derivation {{ salt: {} bytes, info: {} bytes, iterations: {iterations} }}",
                salt.len(),
                info.len()
            ),
        }
    }
}

/// How a key is used by one operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UsageSpec {
    /// Algorithm of the operation.
    pub algorithm: Algorithm,
    /// Purpose of the operation.
    pub purpose: KeyPurpose,
    /// Digest.
    pub digest: Digest,
    /// Padding.
    pub padding: PaddingMode,
    /// Block mode, for symmetric ciphers.
    pub mode: BlockMode,
    /// Algorithm specific inputs.
    pub params: Option<UsageParams>,
}

impl UsageSpec {
    /// A spec without block mode or extra inputs.
    pub fn new(
        algorithm: Algorithm,
        purpose: KeyPurpose,
        digest: Digest,
        padding: PaddingMode,
    ) -> Self {
        Self { algorithm, purpose, digest, padding, mode: BlockMode::default(), params: None }
    }

    /// Sets the block mode.
    pub fn with_mode(mut self, mode: BlockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the algorithm specific inputs.
    pub fn with_params(mut self, params: UsageParams) -> Self {
        self.params = Some(params);
        self
    }

    /// Builds the spec of an operation from the stored key parameters and the request. Request
    /// values take precedence over stored ones for digest, padding and block mode.
    pub fn from_params(key_params: &ParamSet, request: &ParamSet) -> Result<Self> {
        let lookup = |tag: Tag| -> Result<Option<u32>> {
            match request.get_uint(tag)? {
                Some(v) => Ok(Some(v)),
                None => key_params.get_uint(tag),
            }
        };
        let algorithm = Algorithm(key_params.require_uint(Tag::ALGORITHM)?);
        let purpose = KeyPurpose(request.require_uint(Tag::PURPOSE)?);
        let digest = Digest(lookup(Tag::DIGEST)?.unwrap_or(Digest::NONE.0));
        let padding = PaddingMode(lookup(Tag::PADDING)?.unwrap_or(PaddingMode::NONE.0));
        let mode = BlockMode(lookup(Tag::BLOCK_MODE)?.unwrap_or_default());

        let mut spec = Self::new(algorithm, purpose, digest, padding).with_mode(mode);
        if algorithm == Algorithm::AES && matches!(mode, BlockMode::GCM | BlockMode::CCM) {
            let nonce = request.require_blob(Tag::NONCE)?.to_vec();
            let aad = request.get_blob(Tag::ASSOCIATED_DATA)?.unwrap_or_default().to_vec();
            spec.params = Some(UsageParams::Aead { nonce, aad, tag_len: AEAD_TAG_LEN });
        } else if algorithm == Algorithm::AES {
            let iv = request.get_blob(Tag::IV)?.unwrap_or_default().to_vec();
            spec.params = Some(UsageParams::Cipher { iv });
        } else if matches!(algorithm, Algorithm::HKDF | Algorithm::PBKDF2) {
            let salt = request.get_blob(Tag::SALT)?.unwrap_or_default().to_vec();
            let info = request.get_blob(Tag::INFO)?.unwrap_or_default().to_vec();
            let iterations = request.get_uint(Tag::ITERATION)?.unwrap_or(0);
            spec.params = Some(UsageParams::Derivation { salt, info, iterations });
        }
        Ok(spec)
    }

    /// The AEAD inputs, failing if the spec has none.
    pub fn aead(&self) -> Result<(&[u8], &[u8], usize)> {
        match &self.params {
            Some(UsageParams::Aead { nonce, aad, tag_len }) => Ok((nonce, aad, *tag_len)),
            _ => Err(kserr!(InvalidArgument, "missing AEAD parameters for {:?}", self.mode)),
        }
    }
}

/// State of a multi-stage operation inside the engine.
pub trait EngineContext: Send {
    /// Feeds input, returning any output that is ready.
    fn update(&mut self, input: &[u8]) -> Result<Vec<u8>>;

    /// Feeds the last input and finishes the operation, consuming the context.
    fn finish(self: Box<Self>, input: &[u8]) -> Result<Vec<u8>>;
}

/// A crypto backend.
///
/// Key material passed in and out is in the format of the `key_material` module. Signing and
/// verification operate on a message digest computed by the caller when `usage.digest` is not
/// `Digest::NONE`, except for Ed25519 which always takes the message.
pub trait CryptoEngine: Send + Sync {
    /// Generates a key and returns its material.
    fn generate_key(&self, algorithm: Algorithm, key_size: u32) -> Result<ZVec>;

    /// Returns the public-only material of an asymmetric key.
    fn get_public_key(&self, algorithm: Algorithm, material: &[u8]) -> Result<ZVec>;

    /// Signs `data`.
    fn sign(&self, material: &[u8], usage: &UsageSpec, data: &[u8]) -> Result<Vec<u8>>;

    /// Verifies `signature` over `data`. A mismatch is a `CryptoEngineError`.
    fn verify(
        &self,
        material: &[u8],
        usage: &UsageSpec,
        data: &[u8],
        signature: &[u8],
    ) -> Result<()>;

    /// Encrypts `plaintext`. AEAD ciphertexts carry the tag at the end.
    fn encrypt(&self, material: &[u8], usage: &UsageSpec, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypts `ciphertext`.
    fn decrypt(&self, material: &[u8], usage: &UsageSpec, ciphertext: &[u8]) -> Result<ZVec>;

    /// Hashes `data`.
    fn hash(&self, digest: Digest, data: &[u8]) -> Result<Vec<u8>>;

    /// Computes an HMAC of `data`.
    fn hmac(&self, digest: Digest, key: &[u8], data: &[u8]) -> Result<Vec<u8>>;

    /// Derives `out_len` bytes from `key` with HKDF or PBKDF2.
    fn derive_key(&self, usage: &UsageSpec, key: &[u8], out_len: usize) -> Result<ZVec>;

    /// Computes a shared secret with a peer public key given as DER `SubjectPublicKeyInfo`.
    fn agree_key(
        &self,
        algorithm: Algorithm,
        private_material: &[u8],
        peer_public_key: &[u8],
    ) -> Result<ZVec>;

    /// Fills `buf` with random bytes.
    fn fill_random(&self, buf: &mut [u8]) -> Result<()>;

    /// Returns the device main key, used as the password of key blob protection.
    fn main_key(&self) -> Result<ZVec>;

    /// Starts a multi-stage operation.
    fn init_context(&self, material: &[u8], usage: &UsageSpec) -> Result<Box<dyn EngineContext>>;
}
