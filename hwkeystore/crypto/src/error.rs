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

//! This module implements Error for the hwkeystore_crypto library.

/// Crypto specific error codes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// This is returned if a sensitive buffer could not be allocated.
    #[error("Failed to allocate {0} bytes.")]
    AllocationFailed(usize),

    /// This is returned if the random number generator failed.
    #[error("Failed to generate random data.")]
    RandomNumberGenerationFailed,

    /// This is returned if the key has an unsupported length.
    #[error("Invalid key length {0}.")]
    InvalidKeyLength(usize),

    /// This is returned if the nonce does not have the AES-GCM nonce length.
    #[error("Invalid IV length {0}, expected {expected}.", expected = crate::GCM_IV_LENGTH)]
    InvalidIvLength(usize),

    /// This is returned if the AEAD tag does not have the AES-GCM tag length.
    #[error("Invalid AEAD tag length {0}, expected {expected}.", expected = crate::TAG_LENGTH)]
    InvalidAeadTagLength(usize),

    /// This is returned if the AES-GCM encryption failed.
    #[error("Failed to encrypt data.")]
    EncryptionFailed,

    /// This is returned if the AES-GCM decryption or tag verification failed.
    #[error("Failed to decrypt data.")]
    DecryptionFailed,

    /// This is returned if PBKDF2 key derivation failed.
    #[error("Failed to derive key with PBKDF2.")]
    Pbkdf2Failed,

    /// Wraps an error reported by the OpenSSL bindings.
    #[error(transparent)]
    OpenSsl(#[from] openssl::error::ErrorStack),
}
