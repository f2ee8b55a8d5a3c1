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

//! [`CryptoEngine`] implemented on top of OpenSSL.

use crate::engine::{CryptoEngine, EngineContext, UsageSpec};
use crate::key_material::{
    self, check_curve25519_key, Curve25519Key, EccKey, RawKey, RsaKey,
};
use crate::key_parameter::{Algorithm, BlockMode, Digest, KeyPurpose, PaddingMode};
use crate::ks_err;
use crate::kserr;
use anyhow::{Context, Result};
use hwkeystore_crypto::ZVec;
use openssl::bn::{BigNum, BigNumContext};
use openssl::derive::Deriver;
use openssl::ec::{EcGroup, EcKey, PointConversionForm};
use openssl::hash::MessageDigest;
use openssl::md::{Md, MdRef};
use openssl::nid::Nid;
use openssl::pkey::{HasPublic, Id, PKey, Private, Public};
use openssl::pkey_ctx::{HkdfMode, PkeyCtx};
use openssl::rsa::{Padding, Rsa, RsaPrivateKeyBuilder};
use openssl::sign::{RsaPssSaltlen, Signer, Verifier};
use openssl::symm::{Cipher, Crypter, Mode};

/// Error macro.
macro_rules! engine_err {
    { $($arg:tt)+ } => {
        kserr!(CryptoEngineError, $($arg)+)
    };
}

/// Smallest main key accepted.
const MIN_MAIN_KEY_LEN: usize = 16;

/// An OpenSSL backed crypto engine. It owns the device main key.
#[derive(Debug)]
pub struct OpenSslEngine {
    main_key: ZVec,
}

impl OpenSslEngine {
    /// Creates an engine with the given main key.
    pub fn new(main_key: ZVec) -> Result<Self> {
        if main_key.len() < MIN_MAIN_KEY_LEN {
            return Err(kserr!(
                InvalidArgument,
                "main key of {} bytes, need at least {}",
                main_key.len(),
                MIN_MAIN_KEY_LEN
            ));
        }
        Ok(Self { main_key })
    }

    /// Creates an engine with a fresh random 256 bit main key.
    pub fn with_random_main_key() -> Result<Self> {
        let mut key = ZVec::new(hwkeystore_crypto::AES_256_KEY_LENGTH).context(ks_err!())?;
        hwkeystore_crypto::fill_random(&mut key).context(ks_err!("Failed to generate main key."))?;
        Self::new(key)
    }
}

fn md(digest: Digest) -> Result<&'static MdRef> {
    match digest {
        Digest::MD5 => Ok(Md::md5()),
        Digest::SHA1 => Ok(Md::sha1()),
        Digest::SHA224 => Ok(Md::sha224()),
        Digest::SHA256 => Ok(Md::sha256()),
        Digest::SHA384 => Ok(Md::sha384()),
        Digest::SHA512 => Ok(Md::sha512()),
        _ => Err(kserr!(InvalidArgument, "unsupported digest {digest:?}")),
    }
}

fn message_digest(digest: Digest) -> Result<MessageDigest> {
    match digest {
        Digest::MD5 => Ok(MessageDigest::md5()),
        Digest::SHA1 => Ok(MessageDigest::sha1()),
        Digest::SHA224 => Ok(MessageDigest::sha224()),
        Digest::SHA256 => Ok(MessageDigest::sha256()),
        Digest::SHA384 => Ok(MessageDigest::sha384()),
        Digest::SHA512 => Ok(MessageDigest::sha512()),
        _ => Err(kserr!(InvalidArgument, "unsupported digest {digest:?}")),
    }
}

fn bn(v: &[u8]) -> Result<BigNum> {
    BigNum::from_slice(v).map_err(|e| engine_err!("BigNum::from_slice failed: {e}"))
}

fn ec_group(key_size: u32) -> Result<EcGroup> {
    let nid = match key_size {
        256 => Nid::X9_62_PRIME256V1,
        384 => Nid::SECP384R1,
        521 => Nid::SECP521R1,
        _ => return Err(kserr!(NotSupported, "unsupported ECC key size {key_size}")),
    };
    EcGroup::from_curve_name(nid).map_err(|e| engine_err!("EcGroup::from_curve_name failed: {e}"))
}

fn curve25519_id(alg: Algorithm) -> Result<Id> {
    match alg {
        Algorithm::X25519 => Ok(Id::X25519),
        Algorithm::ED25519 => Ok(Id::ED25519),
        _ => Err(kserr!(NotSupported, "{alg:?} is not a curve25519 algorithm")),
    }
}

fn ec_public_key(k: &EccKey) -> Result<EcKey<Public>> {
    let group = ec_group(k.key_size)?;
    EcKey::from_public_key_affine_coordinates(&group, &*bn(&k.x)?, &*bn(&k.y)?)
        .map_err(|e| engine_err!("invalid EC public key: {e}"))
}

fn private_pkey(alg: Algorithm, material: &[u8]) -> Result<PKey<Private>> {
    let key = key_material::from_material(alg, false, material).context(ks_err!())?;
    if !key.has_private() {
        return Err(kserr!(InvalidKeyInfo, "{alg:?} material without private key"));
    }
    let pkey = match key {
        RawKey::Rsa(k) => {
            let rsa = RsaPrivateKeyBuilder::new(bn(&k.n)?, bn(&k.e)?, bn(&k.d)?)
                .map_err(|e| engine_err!("invalid RSA key: {e}"))?
                .build();
            PKey::from_rsa(rsa)
        }
        RawKey::Ecc(k) => {
            let group = ec_group(k.key_size)?;
            let public = ec_public_key(&k)?;
            let ec = EcKey::from_private_components(&group, &*bn(&k.z)?, public.public_key())
                .map_err(|e| engine_err!("invalid EC private key: {e}"))?;
            PKey::from_ec_key(ec)
        }
        RawKey::Curve25519(k) => PKey::private_key_from_raw_bytes(&k.private, curve25519_id(alg)?),
        RawKey::Symmetric(_) => return Err(kserr!(NotSupported, "{alg:?} is not asymmetric")),
    };
    pkey.map_err(|e| engine_err!("failed to load {alg:?} private key: {e}"))
}

fn public_pkey(alg: Algorithm, material: &[u8]) -> Result<PKey<Public>> {
    let pkey = match key_material::from_material(alg, true, material).context(ks_err!())? {
        RawKey::Rsa(k) => {
            let rsa = Rsa::from_public_components(bn(&k.n)?, bn(&k.e)?)
                .map_err(|e| engine_err!("invalid RSA public key: {e}"))?;
            PKey::from_rsa(rsa)
        }
        RawKey::Ecc(k) => PKey::from_ec_key(ec_public_key(&k)?),
        RawKey::Curve25519(k) => PKey::public_key_from_raw_bytes(&k.public, curve25519_id(alg)?),
        RawKey::Symmetric(_) => return Err(kserr!(NotSupported, "{alg:?} is not asymmetric")),
    };
    pkey.map_err(|e| engine_err!("failed to load {alg:?} public key: {e}"))
}

/// Applies padding and digest of `usage` to a signing or verification context.
fn configure_signature<T>(ctx: &mut PkeyCtx<T>, usage: &UsageSpec) -> Result<()> {
    let is_pss = usage.algorithm == Algorithm::RSA && usage.padding == PaddingMode::PSS;
    if usage.algorithm == Algorithm::RSA {
        let padding = match usage.padding {
            PaddingMode::PKCS1_V1_5 => Padding::PKCS1,
            PaddingMode::PSS => Padding::PKCS1_PSS,
            PaddingMode::NONE => Padding::NONE,
            p => return Err(kserr!(InvalidArgument, "unsupported RSA signature padding {p:?}")),
        };
        ctx.set_rsa_padding(padding).map_err(|e| engine_err!("set_rsa_padding failed: {e}"))?;
    }
    if usage.digest != Digest::NONE {
        let md = md(usage.digest)?;
        ctx.set_signature_md(md).map_err(|e| engine_err!("set_signature_md failed: {e}"))?;
        if is_pss {
            ctx.set_rsa_mgf1_md(md).map_err(|e| engine_err!("set_rsa_mgf1_md failed: {e}"))?;
            ctx.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)
                .map_err(|e| engine_err!("set_rsa_pss_saltlen failed: {e}"))?;
        }
    } else if is_pss {
        return Err(kserr!(InvalidArgument, "RSA-PSS needs a digest"));
    }
    Ok(())
}

fn sign_data(material: &[u8], usage: &UsageSpec, data: &[u8]) -> Result<Vec<u8>> {
    match usage.algorithm {
        Algorithm::ED25519 => {
            let pkey = private_pkey(Algorithm::ED25519, material)?;
            let mut signer = Signer::new_without_digest(&pkey)
                .map_err(|e| engine_err!("Signer::new_without_digest failed: {e}"))?;
            signer.sign_oneshot_to_vec(data).map_err(|e| engine_err!("Ed25519 sign failed: {e}"))
        }
        Algorithm::RSA | Algorithm::ECC => {
            let pkey = private_pkey(usage.algorithm, material)?;
            let mut ctx = PkeyCtx::new(&pkey).map_err(|e| engine_err!("PkeyCtx::new failed: {e}"))?;
            ctx.sign_init().map_err(|e| engine_err!("sign_init failed: {e}"))?;
            configure_signature(&mut ctx, usage)?;
            let mut signature = Vec::new();
            ctx.sign_to_vec(data, &mut signature).map_err(|e| engine_err!("sign failed: {e}"))?;
            Ok(signature)
        }
        alg => Err(kserr!(NotSupported, "cannot sign with {alg:?}")),
    }
}

fn verify_data(material: &[u8], usage: &UsageSpec, data: &[u8], signature: &[u8]) -> Result<()> {
    let valid = match usage.algorithm {
        Algorithm::ED25519 => {
            let pkey = public_pkey(Algorithm::ED25519, material)?;
            let mut verifier = Verifier::new_without_digest(&pkey)
                .map_err(|e| engine_err!("Verifier::new_without_digest failed: {e}"))?;
            verifier.verify_oneshot(signature, data).unwrap_or(false)
        }
        Algorithm::RSA | Algorithm::ECC => {
            let pkey = public_pkey(usage.algorithm, material)?;
            let mut ctx = PkeyCtx::new(&pkey).map_err(|e| engine_err!("PkeyCtx::new failed: {e}"))?;
            ctx.verify_init().map_err(|e| engine_err!("verify_init failed: {e}"))?;
            configure_signature(&mut ctx, usage)?;
            ctx.verify(data, signature).unwrap_or(false)
        }
        alg => return Err(kserr!(NotSupported, "cannot verify with {alg:?}")),
    };
    if !valid {
        return Err(engine_err!("signature verification failed"));
    }
    Ok(())
}

fn configure_rsa_cipher<T>(ctx: &mut PkeyCtx<T>, usage: &UsageSpec) -> Result<()> {
    let padding = match usage.padding {
        PaddingMode::OAEP => Padding::PKCS1_OAEP,
        PaddingMode::PKCS1_V1_5 => Padding::PKCS1,
        PaddingMode::NONE => Padding::NONE,
        p => return Err(kserr!(InvalidArgument, "unsupported RSA cipher padding {p:?}")),
    };
    ctx.set_rsa_padding(padding).map_err(|e| engine_err!("set_rsa_padding failed: {e}"))?;
    if usage.padding == PaddingMode::OAEP && usage.digest != Digest::NONE {
        let md = md(usage.digest)?;
        ctx.set_rsa_oaep_md(md).map_err(|e| engine_err!("set_rsa_oaep_md failed: {e}"))?;
        ctx.set_rsa_mgf1_md(md).map_err(|e| engine_err!("set_rsa_mgf1_md failed: {e}"))?;
    }
    Ok(())
}

fn rsa_encrypt(material: &[u8], usage: &UsageSpec, plaintext: &[u8]) -> Result<Vec<u8>> {
    let pkey = public_pkey(Algorithm::RSA, material)?;
    let mut ctx = PkeyCtx::new(&pkey).map_err(|e| engine_err!("PkeyCtx::new failed: {e}"))?;
    ctx.encrypt_init().map_err(|e| engine_err!("encrypt_init failed: {e}"))?;
    configure_rsa_cipher(&mut ctx, usage)?;
    let mut out = Vec::new();
    ctx.encrypt_to_vec(plaintext, &mut out).map_err(|e| engine_err!("RSA encrypt failed: {e}"))?;
    Ok(out)
}

fn rsa_decrypt(material: &[u8], usage: &UsageSpec, ciphertext: &[u8]) -> Result<ZVec> {
    let pkey = private_pkey(Algorithm::RSA, material)?;
    let mut ctx = PkeyCtx::new(&pkey).map_err(|e| engine_err!("PkeyCtx::new failed: {e}"))?;
    ctx.decrypt_init().map_err(|e| engine_err!("decrypt_init failed: {e}"))?;
    configure_rsa_cipher(&mut ctx, usage)?;
    let mut out = Vec::new();
    ctx.decrypt_to_vec(ciphertext, &mut out).map_err(|e| engine_err!("RSA decrypt failed: {e}"))?;
    ZVec::try_from(out).context(ks_err!())
}

fn hash_data(digest: Digest, data: &[u8]) -> Result<Vec<u8>> {
    let bytes = openssl::hash::hash(message_digest(digest)?, data)
        .map_err(|e| engine_err!("hash failed: {e}"))?;
    Ok(bytes.to_vec())
}

fn hmac_data(digest: Digest, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let pkey = PKey::hmac(key).map_err(|e| engine_err!("PKey::hmac failed: {e}"))?;
    let mut signer = Signer::new(message_digest(digest)?, &pkey)
        .map_err(|e| engine_err!("Signer::new failed: {e}"))?;
    signer.update(data).map_err(|e| engine_err!("HMAC update failed: {e}"))?;
    signer.sign_to_vec().map_err(|e| engine_err!("HMAC failed: {e}"))
}

/// What a signature covers: the message itself for Ed25519 and digest NONE, its hash otherwise.
fn to_be_signed(usage: &UsageSpec, message: Vec<u8>) -> Result<Vec<u8>> {
    if usage.algorithm == Algorithm::ED25519 || usage.digest == Digest::NONE {
        Ok(message)
    } else {
        hash_data(usage.digest, &message)
    }
}

fn aes_cipher(key_len: usize, mode: BlockMode) -> Result<Cipher> {
    let cipher = match (key_len, mode) {
        (16, BlockMode::ECB) => Cipher::aes_128_ecb(),
        (16, BlockMode::CBC) => Cipher::aes_128_cbc(),
        (16, BlockMode::CTR) => Cipher::aes_128_ctr(),
        (16, BlockMode::GCM) => Cipher::aes_128_gcm(),
        (24, BlockMode::ECB) => Cipher::aes_192_ecb(),
        (24, BlockMode::CBC) => Cipher::aes_192_cbc(),
        (24, BlockMode::CTR) => Cipher::aes_192_ctr(),
        (24, BlockMode::GCM) => Cipher::aes_192_gcm(),
        (32, BlockMode::ECB) => Cipher::aes_256_ecb(),
        (32, BlockMode::CBC) => Cipher::aes_256_cbc(),
        (32, BlockMode::CTR) => Cipher::aes_256_ctr(),
        (32, BlockMode::GCM) => Cipher::aes_256_gcm(),
        (16 | 24 | 32, mode) => return Err(kserr!(NotSupported, "unsupported AES mode {mode:?}")),
        (len, _) => return Err(kserr!(InvalidKeyInfo, "invalid AES key length {len}")),
    };
    Ok(cipher)
}

/// Pending AEAD state of a [`CipherContext`].
struct AeadState {
    tag_len: usize,
    /// On decryption, the trailing input bytes that may turn out to be the tag.
    held: Vec<u8>,
}

/// A streaming AES operation.
struct CipherContext {
    crypter: Crypter,
    block_size: usize,
    mode: Mode,
    aead: Option<AeadState>,
}

impl CipherContext {
    fn new(key: &[u8], usage: &UsageSpec, mode: Mode) -> Result<Self> {
        let cipher = aes_cipher(key.len(), usage.mode)?;
        let padded = matches!(usage.padding, PaddingMode::PKCS7 | PaddingMode::PKCS5);
        let (crypter, aead) = match usage.mode {
            BlockMode::GCM => {
                let (nonce, aad, tag_len) = usage.aead()?;
                if !(4..=16).contains(&tag_len) {
                    return Err(kserr!(InvalidArgument, "invalid AEAD tag length {tag_len}"));
                }
                let mut crypter = Crypter::new(cipher, mode, key, Some(nonce))
                    .map_err(|e| engine_err!("Crypter::new failed: {e}"))?;
                crypter.aad_update(aad).map_err(|e| engine_err!("aad_update failed: {e}"))?;
                (crypter, Some(AeadState { tag_len, held: Vec::new() }))
            }
            BlockMode::CBC | BlockMode::CTR => {
                let iv = match &usage.params {
                    Some(crate::engine::UsageParams::Cipher { iv }) if iv.len() == 16 => iv,
                    _ => return Err(kserr!(InvalidArgument, "{:?} needs a 16 byte IV", usage.mode)),
                };
                (
                    Crypter::new(cipher, mode, key, Some(iv))
                        .map_err(|e| engine_err!("Crypter::new failed: {e}"))?,
                    None,
                )
            }
            _ => (
                Crypter::new(cipher, mode, key, None)
                    .map_err(|e| engine_err!("Crypter::new failed: {e}"))?,
                None,
            ),
        };
        let mut ctx = Self { crypter, block_size: cipher.block_size(), mode, aead };
        if matches!(usage.mode, BlockMode::ECB | BlockMode::CBC) {
            ctx.crypter.pad(padded);
        }
        Ok(ctx)
    }

    fn run(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = vec![0u8; data.len() + self.block_size];
        let n = self.crypter.update(data, &mut out).map_err(|e| engine_err!("update failed: {e}"))?;
        out.truncate(n);
        Ok(out)
    }
}

impl EngineContext for CipherContext {
    fn update(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        match (&mut self.aead, self.mode) {
            (Some(state), Mode::Decrypt) => {
                state.held.extend_from_slice(input);
                let ready = state.held.len().saturating_sub(state.tag_len);
                let chunk: Vec<u8> = state.held.drain(..ready).collect();
                self.run(&chunk)
            }
            _ => self.run(input),
        }
    }

    fn finish(mut self: Box<Self>, input: &[u8]) -> Result<Vec<u8>> {
        let mut out = self.update(input)?;
        if let (Some(state), Mode::Decrypt) = (&self.aead, self.mode) {
            if state.held.len() != state.tag_len {
                return Err(kserr!(InvalidArgument, "ciphertext shorter than the AEAD tag"));
            }
            self.crypter.set_tag(&state.held).map_err(|e| engine_err!("set_tag failed: {e}"))?;
        }
        let mut tail = vec![0u8; self.block_size];
        let n = self
            .crypter
            .finalize(&mut tail)
            .map_err(|e| engine_err!("finalize failed (authentication or padding): {e}"))?;
        out.extend_from_slice(&tail[..n]);
        if let (Some(state), Mode::Encrypt) = (&self.aead, self.mode) {
            let mut tag = vec![0u8; state.tag_len];
            self.crypter.get_tag(&mut tag).map_err(|e| engine_err!("get_tag failed: {e}"))?;
            out.extend_from_slice(&tag);
        }
        Ok(out)
    }
}

/// Operations that need the whole input before they can produce output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BufferedKind {
    Sign,
    Verify,
    Encrypt,
    Decrypt,
    Mac,
}

/// Collects input and runs a one-shot operation on `finish`. For verification the input of
/// `finish` is the signature.
struct BufferedContext {
    kind: BufferedKind,
    material: ZVec,
    usage: UsageSpec,
    data: Vec<u8>,
}

impl EngineContext for BufferedContext {
    fn update(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        self.data.extend_from_slice(input);
        Ok(Vec::new())
    }

    fn finish(mut self: Box<Self>, input: &[u8]) -> Result<Vec<u8>> {
        if self.kind != BufferedKind::Verify {
            self.data.extend_from_slice(input);
        }
        let data = std::mem::take(&mut self.data);
        match self.kind {
            BufferedKind::Sign => {
                sign_data(&self.material, &self.usage, &to_be_signed(&self.usage, data)?)
            }
            BufferedKind::Verify => {
                verify_data(&self.material, &self.usage, &to_be_signed(&self.usage, data)?, input)?;
                Ok(Vec::new())
            }
            BufferedKind::Encrypt => rsa_encrypt(&self.material, &self.usage, &data),
            BufferedKind::Decrypt => Ok(rsa_decrypt(&self.material, &self.usage, &data)?.to_vec()),
            BufferedKind::Mac => hmac_data(self.usage.digest, &self.material, &data),
        }
    }
}

fn ec_coordinates<T: HasPublic>(ec: &EcKey<T>, key_size: u32) -> Result<(Vec<u8>, Vec<u8>)> {
    let group = ec_group(key_size)?;
    let mut bn_ctx = BigNumContext::new().map_err(|e| engine_err!("BigNumContext failed: {e}"))?;
    let point = ec
        .public_key()
        .to_bytes(&group, PointConversionForm::UNCOMPRESSED, &mut bn_ctx)
        .map_err(|e| engine_err!("EcPoint::to_bytes failed: {e}"))?;
    let len = (point.len() - 1) / 2;
    Ok((point[1..1 + len].to_vec(), point[1 + len..].to_vec()))
}

impl CryptoEngine for OpenSslEngine {
    fn generate_key(&self, algorithm: Algorithm, key_size: u32) -> Result<ZVec> {
        let key = match algorithm {
            Algorithm::AES => {
                if !matches!(key_size, 128 | 192 | 256) {
                    return Err(kserr!(InvalidArgument, "invalid AES key size {key_size}"));
                }
                let mut k = ZVec::new(key_size as usize / 8).context(ks_err!())?;
                self.fill_random(&mut k)?;
                RawKey::Symmetric(k)
            }
            Algorithm::HMAC => {
                if key_size % 8 != 0 || !(8..=1024).contains(&key_size) {
                    return Err(kserr!(InvalidArgument, "invalid HMAC key size {key_size}"));
                }
                let mut k = ZVec::new(key_size as usize / 8).context(ks_err!())?;
                self.fill_random(&mut k)?;
                RawKey::Symmetric(k)
            }
            Algorithm::RSA => {
                if key_size % 8 != 0 || !(512..=4096).contains(&key_size) {
                    return Err(kserr!(InvalidArgument, "invalid RSA key size {key_size}"));
                }
                let rsa =
                    Rsa::generate(key_size).map_err(|e| engine_err!("Rsa::generate failed: {e}"))?;
                RawKey::Rsa(RsaKey {
                    key_size,
                    n: rsa.n().to_vec(),
                    e: rsa.e().to_vec(),
                    d: ZVec::try_from(rsa.d().to_vec()).context(ks_err!())?,
                })
            }
            Algorithm::ECC => {
                let group = ec_group(key_size)?;
                let ec = EcKey::generate(&group)
                    .map_err(|e| engine_err!("EcKey::generate failed: {e}"))?;
                let (x, y) = ec_coordinates(&ec, key_size)?;
                let z = ec
                    .private_key()
                    .to_vec_padded(x.len() as i32)
                    .map_err(|e| engine_err!("to_vec_padded failed: {e}"))?;
                RawKey::Ecc(EccKey { key_size, x, y, z: ZVec::try_from(z).context(ks_err!())? })
            }
            Algorithm::X25519 | Algorithm::ED25519 => {
                let pkey = if algorithm == Algorithm::X25519 {
                    PKey::generate_x25519()
                } else {
                    PKey::generate_ed25519()
                }
                .map_err(|e| engine_err!("{algorithm:?} generation failed: {e}"))?;
                let key = Curve25519Key {
                    public: pkey.raw_public_key().map_err(|e| engine_err!("raw_public_key: {e}"))?,
                    private: ZVec::try_from(
                        pkey.raw_private_key().map_err(|e| engine_err!("raw_private_key: {e}"))?,
                    )
                    .context(ks_err!())?,
                };
                check_curve25519_key(&key)?;
                RawKey::Curve25519(key)
            }
            alg => return Err(kserr!(NotSupported, "cannot generate {alg:?} keys")),
        };
        key_material::to_material(algorithm, false, &key)
    }

    fn get_public_key(&self, algorithm: Algorithm, material: &[u8]) -> Result<ZVec> {
        let key = key_material::from_material(algorithm, true, material).context(ks_err!())?;
        key_material::to_material(algorithm, true, &key.public_key()?)
    }

    fn sign(&self, material: &[u8], usage: &UsageSpec, data: &[u8]) -> Result<Vec<u8>> {
        sign_data(material, usage, data)
    }

    fn verify(
        &self,
        material: &[u8],
        usage: &UsageSpec,
        data: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        verify_data(material, usage, data, signature)
    }

    fn encrypt(&self, material: &[u8], usage: &UsageSpec, plaintext: &[u8]) -> Result<Vec<u8>> {
        match usage.algorithm {
            Algorithm::AES => {
                Box::new(CipherContext::new(material, usage, Mode::Encrypt)?).finish(plaintext)
            }
            Algorithm::RSA => rsa_encrypt(material, usage, plaintext),
            alg => Err(kserr!(NotSupported, "cannot encrypt with {alg:?}")),
        }
    }

    fn decrypt(&self, material: &[u8], usage: &UsageSpec, ciphertext: &[u8]) -> Result<ZVec> {
        match usage.algorithm {
            Algorithm::AES => {
                let context = Box::new(CipherContext::new(material, usage, Mode::Decrypt)?);
                let plaintext = context.finish(ciphertext)?;
                ZVec::try_from(plaintext).context(ks_err!())
            }
            Algorithm::RSA => rsa_decrypt(material, usage, ciphertext),
            alg => Err(kserr!(NotSupported, "cannot decrypt with {alg:?}")),
        }
    }

    fn hash(&self, digest: Digest, data: &[u8]) -> Result<Vec<u8>> {
        hash_data(digest, data)
    }

    fn hmac(&self, digest: Digest, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        hmac_data(digest, key, data)
    }

    fn derive_key(&self, usage: &UsageSpec, key: &[u8], out_len: usize) -> Result<ZVec> {
        let (salt, info, iterations) = match &usage.params {
            Some(crate::engine::UsageParams::Derivation { salt, info, iterations }) => {
                (&salt[..], &info[..], *iterations)
            }
            _ => (&[][..], &[][..], 0),
        };
        let mut out = ZVec::new(out_len).context(ks_err!())?;
        match usage.algorithm {
            Algorithm::HKDF => {
                let mut ctx =
                    PkeyCtx::new_id(Id::HKDF).map_err(|e| engine_err!("PkeyCtx::new_id: {e}"))?;
                ctx.derive_init().map_err(|e| engine_err!("derive_init failed: {e}"))?;
                ctx.set_hkdf_md(md(usage.digest)?).map_err(|e| engine_err!("set_hkdf_md: {e}"))?;
                ctx.set_hkdf_mode(HkdfMode::EXTRACT_THEN_EXPAND)
                    .map_err(|e| engine_err!("set_hkdf_mode: {e}"))?;
                ctx.set_hkdf_key(key).map_err(|e| engine_err!("set_hkdf_key: {e}"))?;
                if !salt.is_empty() {
                    ctx.set_hkdf_salt(salt).map_err(|e| engine_err!("set_hkdf_salt: {e}"))?;
                }
                if !info.is_empty() {
                    ctx.add_hkdf_info(info).map_err(|e| engine_err!("add_hkdf_info: {e}"))?;
                }
                ctx.derive(Some(&mut out[..])).map_err(|e| engine_err!("HKDF failed: {e}"))?;
            }
            Algorithm::PBKDF2 => {
                if iterations == 0 {
                    return Err(kserr!(InvalidArgument, "PBKDF2 needs an iteration count"));
                }
                openssl::pkcs5::pbkdf2_hmac(
                    key,
                    salt,
                    iterations as usize,
                    message_digest(usage.digest)?,
                    &mut out,
                )
                .map_err(|e| engine_err!("PBKDF2 failed: {e}"))?;
            }
            alg => return Err(kserr!(NotSupported, "cannot derive with {alg:?}")),
        }
        Ok(out)
    }

    fn agree_key(
        &self,
        algorithm: Algorithm,
        private_material: &[u8],
        peer_public_key: &[u8],
    ) -> Result<ZVec> {
        let private = match algorithm {
            Algorithm::ECDH => private_pkey(Algorithm::ECC, private_material)?,
            Algorithm::X25519 => private_pkey(Algorithm::X25519, private_material)?,
            alg => return Err(kserr!(NotSupported, "cannot agree with {alg:?}")),
        };
        let peer = PKey::public_key_from_der(peer_public_key)
            .map_err(|e| kserr!(InvalidArgument, "malformed peer public key: {e}"))?;
        let mut deriver =
            Deriver::new(&private).map_err(|e| engine_err!("Deriver::new failed: {e}"))?;
        deriver.set_peer(&peer).map_err(|e| engine_err!("set_peer failed: {e}"))?;
        let secret = deriver.derive_to_vec().map_err(|e| engine_err!("derive failed: {e}"))?;
        ZVec::try_from(secret).context(ks_err!())
    }

    fn fill_random(&self, buf: &mut [u8]) -> Result<()> {
        hwkeystore_crypto::fill_random(buf).context(ks_err!("Failed to generate random data."))
    }

    fn main_key(&self) -> Result<ZVec> {
        self.main_key.try_clone().context(ks_err!("Failed to copy main key."))
    }

    fn init_context(&self, material: &[u8], usage: &UsageSpec) -> Result<Box<dyn EngineContext>> {
        let buffered = |kind: BufferedKind| -> Result<Box<dyn EngineContext>> {
            Ok(Box::new(BufferedContext {
                kind,
                material: ZVec::try_from(material).context(ks_err!())?,
                usage: usage.clone(),
                data: Vec::new(),
            }))
        };
        match (usage.algorithm, usage.purpose) {
            (Algorithm::AES, KeyPurpose::ENCRYPT) => {
                Ok(Box::new(CipherContext::new(material, usage, Mode::Encrypt)?))
            }
            (Algorithm::AES, KeyPurpose::DECRYPT) => {
                Ok(Box::new(CipherContext::new(material, usage, Mode::Decrypt)?))
            }
            (Algorithm::RSA | Algorithm::ECC | Algorithm::ED25519, KeyPurpose::SIGN) => {
                buffered(BufferedKind::Sign)
            }
            (Algorithm::RSA | Algorithm::ECC | Algorithm::ED25519, KeyPurpose::VERIFY) => {
                buffered(BufferedKind::Verify)
            }
            (Algorithm::RSA, KeyPurpose::ENCRYPT) => buffered(BufferedKind::Encrypt),
            (Algorithm::RSA, KeyPurpose::DECRYPT) => buffered(BufferedKind::Decrypt),
            (Algorithm::HMAC, KeyPurpose::MAC) => buffered(BufferedKind::Mac),
            (alg, purpose) => {
                Err(kserr!(NotSupported, "no multi-stage {purpose:?} operation for {alg:?}"))
            }
        }
    }
}
