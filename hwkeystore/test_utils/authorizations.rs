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

//! This module implements test utils to create parameter sets.

use hwkeystore::key_parameter::{
    Algorithm, BlockMode, Digest, KeyParameter, KeyParameterValue, KeyPurpose, PaddingMode, Tag,
};
use hwkeystore::param_set::ParamSet;

/// Helper struct to create a [`ParamSet`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSetBuilder(Vec<KeyParameter>);

impl ParamSetBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    fn uint(mut self, tag: Tag, v: u32) -> Self {
        self.0.push(KeyParameter::new(tag, KeyParameterValue::Uint(v)));
        self
    }

    fn blob(mut self, tag: Tag, b: &[u8]) -> Self {
        self.0.push(KeyParameter::new(tag, KeyParameterValue::Blob(b.to_vec())));
        self
    }

    /// Add Purpose. Repeated purposes are merged into one mask.
    pub fn purpose(mut self, p: KeyPurpose) -> Self {
        for param in self.0.iter_mut().filter(|param| param.tag == Tag::PURPOSE) {
            if let KeyParameterValue::Uint(mask) = &mut param.value {
                *mask |= p.0;
                return self;
            }
        }
        self.uint(Tag::PURPOSE, p.0)
    }

    /// Add Digest.
    pub fn digest(self, d: Digest) -> Self {
        self.uint(Tag::DIGEST, d.0)
    }

    /// Add Algorithm.
    pub fn algorithm(self, a: Algorithm) -> Self {
        self.uint(Tag::ALGORITHM, a.0)
    }

    /// Add Key-Size in bits.
    pub fn key_size(self, s: u32) -> Self {
        self.uint(Tag::KEY_SIZE, s)
    }

    /// Add Padding-Mode.
    pub fn padding_mode(self, p: PaddingMode) -> Self {
        self.uint(Tag::PADDING, p.0)
    }

    /// Add Block-Mode.
    pub fn block_mode(self, b: BlockMode) -> Self {
        self.uint(Tag::BLOCK_MODE, b.0)
    }

    /// Add Nonce.
    pub fn nonce(self, b: &[u8]) -> Self {
        self.blob(Tag::NONCE, b)
    }

    /// Add IV.
    pub fn iv(self, b: &[u8]) -> Self {
        self.blob(Tag::IV, b)
    }

    /// Add Associated-Data.
    pub fn associated_data(self, b: &[u8]) -> Self {
        self.blob(Tag::ASSOCIATED_DATA, b)
    }

    /// Add Salt.
    pub fn salt(self, b: &[u8]) -> Self {
        self.blob(Tag::SALT, b)
    }

    /// Add Info.
    pub fn info(self, b: &[u8]) -> Self {
        self.blob(Tag::INFO, b)
    }

    /// Add Iteration count.
    pub fn iteration(self, n: u32) -> Self {
        self.uint(Tag::ITERATION, n)
    }

    /// Add Derive-Key-Size in bytes.
    pub fn derive_key_size(self, n: u32) -> Self {
        self.uint(Tag::DERIVE_KEY_SIZE, n)
    }

    /// Add Attestation-Challenge.
    pub fn attestation_challenge(self, b: &[u8]) -> Self {
        self.blob(Tag::ATTESTATION_CHALLENGE, b)
    }

    /// Add Attestation-ID-Alias, the key id of an attestation.
    pub fn attestation_id_alias(self, b: &[u8]) -> Self {
        self.blob(Tag::ATTESTATION_ID_ALIAS, b)
    }

    /// Add Attestation-Application-ID.
    pub fn attestation_app_id(self, b: &[u8]) -> Self {
        self.blob(Tag::ATTESTATION_APPLICATION_ID, b)
    }

    /// Add Attestation-Device-Brand.
    pub fn attestation_device_brand(self, b: &[u8]) -> Self {
        self.blob(Tag::ATTESTATION_ID_BRAND, b)
    }

    /// Add Attestation-Device-name.
    pub fn attestation_device_name(self, b: &[u8]) -> Self {
        self.blob(Tag::ATTESTATION_ID_DEVICE, b)
    }

    /// Add Attestation-Device-Serial.
    pub fn attestation_device_serial(self, b: &[u8]) -> Self {
        self.blob(Tag::ATTESTATION_ID_SERIAL, b)
    }

    /// Add Attestation-Device-IMEI.
    pub fn attestation_device_imei(self, b: &[u8]) -> Self {
        self.blob(Tag::ATTESTATION_ID_IMEI, b)
    }

    /// Add Attestation-Device-Manufacturer.
    pub fn attestation_device_manufacturer(self, b: &[u8]) -> Self {
        self.blob(Tag::ATTESTATION_ID_MANUFACTURER, b)
    }

    /// Add Attestation-Device-Model.
    pub fn attestation_device_model(self, b: &[u8]) -> Self {
        self.blob(Tag::ATTESTATION_ID_MODEL, b)
    }

    /// Add an arbitrary parameter.
    pub fn param(mut self, tag: Tag, value: KeyParameterValue) -> Self {
        self.0.push(KeyParameter::new(tag, value));
        self
    }

    /// Builds the parameter set.
    pub fn build(self) -> ParamSet {
        let mut params = ParamSet::new();
        for p in self.0 {
            params.push(p);
        }
        params
    }
}

impl From<ParamSetBuilder> for ParamSet {
    fn from(builder: ParamSetBuilder) -> Self {
        builder.build()
    }
}
