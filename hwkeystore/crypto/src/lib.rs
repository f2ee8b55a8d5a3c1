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

//! This module implements safe wrappers around the OpenSSL primitives used by hwkeystore to
//! protect key material at rest.

mod error;
mod zvec;
pub use error::Error;
pub use zvec::ZVec;

use openssl::hash::MessageDigest;
use openssl::symm::{Cipher, Crypter, Mode};

/// Length of the expected initialization vector.
pub const GCM_IV_LENGTH: usize = 12;
/// Length of the expected AEAD TAG.
pub const TAG_LENGTH: usize = 16;
/// Length of an AES 256 key in bytes.
pub const AES_256_KEY_LENGTH: usize = 32;
/// Length of an AES 128 key in bytes.
pub const AES_128_KEY_LENGTH: usize = 16;
/// Length of the expected salt for key from password generation.
pub const SALT_LENGTH: usize = 16;

/// Generate `n` bytes of random data.
pub fn generate_random_data(n: usize) -> Result<Vec<u8>, Error> {
    let mut data = vec![0; n];
    fill_random(&mut data)?;
    Ok(data)
}

/// Fill the given buffer with cryptographically secure random bytes.
pub fn fill_random(buf: &mut [u8]) -> Result<(), Error> {
    if buf.is_empty() {
        return Ok(());
    }
    openssl::rand::rand_bytes(buf).map_err(|_| Error::RandomNumberGenerationFailed)
}

/// Generate a salt.
pub fn generate_salt() -> Result<Vec<u8>, Error> {
    generate_random_data(SALT_LENGTH)
}

fn gcm_cipher(key: &[u8]) -> Result<Cipher, Error> {
    match key.len() {
        AES_128_KEY_LENGTH => Ok(Cipher::aes_128_gcm()),
        24 => Ok(Cipher::aes_192_gcm()),
        AES_256_KEY_LENGTH => Ok(Cipher::aes_256_gcm()),
        len => Err(Error::InvalidKeyLength(len)),
    }
}

/// Uses AES GCM to encrypt a message given a key, an initialization vector and additional
/// authenticated data. The key length must be 16, 24 or 32 bytes and the iv must be 12 bytes.
/// Returns the ciphertext and the AEAD tag.
pub fn aes_gcm_encrypt_with_aad(
    plaintext: &[u8],
    key: &[u8],
    iv: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), Error> {
    let cipher = gcm_cipher(key)?;
    if iv.len() != GCM_IV_LENGTH {
        return Err(Error::InvalidIvLength(iv.len()));
    }
    let mut tag = vec![0; TAG_LENGTH];
    let ciphertext = openssl::symm::encrypt_aead(cipher, key, Some(iv), aad, plaintext, &mut tag)
        .map_err(|_| Error::EncryptionFailed)?;
    Ok((ciphertext, tag))
}

/// Uses AES GCM to decipher a message given an initialization vector, aead tag, additional
/// authenticated data and key. The plaintext is written directly into a ZVec so no unzeroed copy
/// of it is ever made.
pub fn aes_gcm_decrypt_with_aad(
    data: &[u8],
    key: &[u8],
    iv: &[u8],
    aad: &[u8],
    tag: &[u8],
) -> Result<ZVec, Error> {
    let cipher = gcm_cipher(key)?;
    if iv.len() != GCM_IV_LENGTH {
        return Err(Error::InvalidIvLength(iv.len()));
    }
    if tag.len() != TAG_LENGTH {
        return Err(Error::InvalidAeadTagLength(tag.len()));
    }

    let mut crypter = Crypter::new(cipher, Mode::Decrypt, key, Some(iv))?;
    crypter.aad_update(aad).map_err(|_| Error::DecryptionFailed)?;
    let mut result = ZVec::new(data.len() + cipher.block_size())?;
    let count = crypter.update(data, &mut result).map_err(|_| Error::DecryptionFailed)?;
    crypter.set_tag(tag).map_err(|_| Error::DecryptionFailed)?;
    let rest = crypter.finalize(&mut result[count..]).map_err(|_| Error::DecryptionFailed)?;
    result.reduce_len(count + rest);
    Ok(result)
}

/// Represents a "password" that can be used to key the PBKDF2 algorithm.
pub enum Password<'a> {
    /// Borrow an existing byte array
    Ref(&'a [u8]),
    /// Use an owned ZVec to store the key
    Owned(ZVec),
}

impl<'a> From<&'a [u8]> for Password<'a> {
    fn from(pw: &'a [u8]) -> Self {
        Self::Ref(pw)
    }
}

impl<'a> Password<'a> {
    fn get_key(&'a self) -> &'a [u8] {
        match self {
            Self::Ref(v) => v,
            Self::Owned(v) => v,
        }
    }

    /// Derives a key from the given password and salt, using PBKDF2 with HMAC-SHA256 and the
    /// given iteration count.
    pub fn derive_key_pbkdf2(
        &self,
        salt: &[u8],
        iterations: u32,
        out_len: usize,
    ) -> Result<ZVec, Error> {
        if iterations == 0 {
            return Err(Error::Pbkdf2Failed);
        }
        let mut result = ZVec::new(out_len)?;
        openssl::pkcs5::pbkdf2_hmac(
            self.get_key(),
            salt,
            iterations as usize,
            MessageDigest::sha256(),
            &mut result,
        )
        .map_err(|_| Error::Pbkdf2Failed)?;
        Ok(result)
    }

    /// Try to make another Password object with the same data.
    pub fn try_clone(&self) -> Result<Password<'static>, Error> {
        Ok(Password::Owned(ZVec::try_from(self.get_key())?))
    }
}
