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

//! Conversion between algorithm specific keys and the fixed-layout key material record that is
//! stored inside key blobs, plus DER output and parsing for public and device keys.
//!
//! Asymmetric key material starts with a 20 byte little-endian header:
//!
//! ```text
//! [0..4]    algorithm
//! [4..8]    key size in bits
//! [8..12]   size A of the first field
//! [12..16]  size B of the second field
//! [16..20]  size C of the third field
//! [20..]    A bytes, B bytes, C bytes
//! ```
//!
//! The fields are `{n, e, d}` for RSA, `{x, y, z}` for ECC and `{public, private, -}` for
//! X25519 and Ed25519. Public-only records carry an empty private field. Symmetric keys are the
//! raw key bytes without a header.

use crate::asn1::{self, TAG_BIT_STRING, TAG_INTEGER, TAG_OCTET_STRING, TAG_OID, TAG_SEQUENCE};
use crate::engine::UsageSpec;
use crate::key_parameter::{Algorithm, Digest};
use crate::ks_err;
use crate::kserr;
use anyhow::{Context, Result};
use hwkeystore_crypto::ZVec;
use std::mem::size_of;

/// Error macro.
macro_rules! keyerr {
    { $($arg:tt)+ } => {
        kserr!(InvalidKeyInfo, $($arg)+)
    };
}

/// Size of the asymmetric key material header.
pub const KEY_MATERIAL_HEADER_LEN: usize = 5 * size_of::<u32>();
/// Size of X25519 and Ed25519 keys.
pub const CURVE25519_KEY_LEN: usize = 32;

/// DER-encoded `AlgorithmIdentifier` for a P-256 key.
const DER_ALGORITHM_ID_P256: &[u8] = &[
    0x30, 0x13, // SEQUENCE (AlgorithmIdentifier) {
    0x06, 0x07, // OBJECT IDENTIFIER (algorithm)
    0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, // 1.2.840.10045.2.1 (ecPublicKey)
    0x06, 0x08, // OBJECT IDENTIFIER (param)
    0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, //  1.2.840.10045.3.1.7 (secp256r1) }
];

/// DER-encoded `AlgorithmIdentifier` for a P-384 key.
const DER_ALGORITHM_ID_P384: &[u8] = &[
    0x30, 0x10, // SEQUENCE (AlgorithmIdentifier) {
    0x06, 0x07, // OBJECT IDENTIFIER (algorithm)
    0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, // 1.2.840.10045.2.1 (ecPublicKey)
    0x06, 0x05, // OBJECT IDENTIFIER (param)
    0x2b, 0x81, 0x04, 0x00, 0x22, //  1.3.132.0.34 (secp384r1) }
];

/// DER-encoded `AlgorithmIdentifier` for a P-521 key.
const DER_ALGORITHM_ID_P521: &[u8] = &[
    0x30, 0x10, // SEQUENCE (AlgorithmIdentifier) {
    0x06, 0x07, // OBJECT IDENTIFIER (algorithm)
    0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, // 1.2.840.10045.2.1 (ecPublicKey)
    0x06, 0x05, // OBJECT IDENTIFIER (param)
    0x2b, 0x81, 0x04, 0x00, 0x23, //  1.3.132.0.35 (secp521r1) }
];

/// DER-encoded `AlgorithmIdentifier` for an X25519 key.
const DER_ALGORITHM_ID_X25519: &[u8] = &[
    0x30, 0x05, // SEQUENCE (AlgorithmIdentifier) {
    0x06, 0x03, // OBJECT IDENTIFIER (algorithm)
    0x2b, 0x65, 0x6e, // 1.3.101.110 (X25519) }
];

/// DER-encoded `AlgorithmIdentifier` for an Ed25519 key.
const DER_ALGORITHM_ID_ED25519: &[u8] = &[
    0x30, 0x05, // SEQUENCE (AlgorithmIdentifier) {
    0x06, 0x03, // OBJECT IDENTIFIER (algorithm)
    0x2b, 0x65, 0x70, // 1.3.101.112 (Ed25519) }
];

/// Content of the rsaEncryption OID, 1.2.840.113549.1.1.1. The shaNNNWithRSAEncryption OIDs only
/// differ in the last byte.
const RSA_OID_PREFIX: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01];

/// DER-encoded NULL.
const DER_NULL: &[u8] = &[0x05, 0x00];

/// Uncompressed EC point marker.
const EC_POINT_UNCOMPRESSED: u8 = 0x04;

/// An RSA key.
#[derive(Debug, PartialEq, Eq)]
pub struct RsaKey {
    /// Modulus size in bits.
    pub key_size: u32,
    /// Modulus, big endian.
    pub n: Vec<u8>,
    /// Public exponent, big endian.
    pub e: Vec<u8>,
    /// Private exponent, big endian. Empty for public keys.
    pub d: ZVec,
}

/// A NIST curve key.
#[derive(Debug, PartialEq, Eq)]
pub struct EccKey {
    /// Curve size in bits: 256, 384 or 521.
    pub key_size: u32,
    /// Affine x coordinate of the public point, big endian.
    pub x: Vec<u8>,
    /// Affine y coordinate of the public point, big endian.
    pub y: Vec<u8>,
    /// Private scalar, big endian. Empty for public keys.
    pub z: ZVec,
}

/// An X25519 or Ed25519 key.
#[derive(Debug, PartialEq, Eq)]
pub struct Curve25519Key {
    /// Raw public key.
    pub public: Vec<u8>,
    /// Raw private key. Empty for public keys.
    pub private: ZVec,
}

/// A key in algorithm specific form.
#[derive(Debug, PartialEq, Eq)]
pub enum RawKey {
    /// RSA.
    Rsa(RsaKey),
    /// ECC on a NIST curve.
    Ecc(EccKey),
    /// X25519 or Ed25519.
    Curve25519(Curve25519Key),
    /// AES or HMAC key bytes.
    Symmetric(ZVec),
}

impl RawKey {
    /// Key size in bits.
    pub fn key_size(&self) -> u32 {
        match self {
            RawKey::Rsa(k) => k.key_size,
            RawKey::Ecc(k) => k.key_size,
            RawKey::Curve25519(_) => 256,
            RawKey::Symmetric(k) => (k.len() * 8) as u32,
        }
    }

    /// True if the private part is present.
    pub fn has_private(&self) -> bool {
        match self {
            RawKey::Rsa(k) => !k.d.is_empty(),
            RawKey::Ecc(k) => !k.z.is_empty(),
            RawKey::Curve25519(k) => !k.private.is_empty(),
            RawKey::Symmetric(_) => true,
        }
    }

    /// The public half of an asymmetric key.
    pub fn public_key(&self) -> Result<RawKey> {
        Ok(match self {
            RawKey::Rsa(k) => RawKey::Rsa(RsaKey {
                key_size: k.key_size,
                n: k.n.clone(),
                e: k.e.clone(),
                d: ZVec::default(),
            }),
            RawKey::Ecc(k) => RawKey::Ecc(EccKey {
                key_size: k.key_size,
                x: k.x.clone(),
                y: k.y.clone(),
                z: ZVec::default(),
            }),
            RawKey::Curve25519(k) => RawKey::Curve25519(Curve25519Key {
                public: k.public.clone(),
                private: ZVec::default(),
            }),
            RawKey::Symmetric(_) => {
                return Err(kserr!(NotSupported, "symmetric keys have no public part"))
            }
        })
    }
}

/// True for algorithms whose material is the raw key without a header.
pub fn is_symmetric(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::AES | Algorithm::HMAC)
}

/// True for algorithms using `Curve25519Key` material.
pub fn is_curve25519(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::X25519 | Algorithm::ED25519)
}

/// Checks a freshly generated X25519/Ed25519 key pair.
pub fn check_curve25519_key(key: &Curve25519Key) -> Result<()> {
    let valid = |v: &[u8]| v.len() == CURVE25519_KEY_LEN && v.iter().any(|b| *b != 0);
    if !valid(&key.public) || !valid(&key.private) {
        return Err(kserr!(
            CryptoEngineError,
            "invalid curve25519 key pair: public {} bytes, private {} bytes",
            key.public.len(),
            key.private.len()
        ));
    }
    Ok(())
}

fn header_len_fields(alg: Algorithm, key_size: u32, fields: [&[u8]; 3]) -> Result<ZVec> {
    let total = fields
        .iter()
        .try_fold(KEY_MATERIAL_HEADER_LEN, |acc, f| acc.checked_add(f.len()))
        .filter(|t| *t <= u32::MAX as usize)
        .ok_or_else(|| keyerr!("key material too large"))?;
    let mut out = ZVec::new(total).context(ks_err!("Failed to allocate key material."))?;
    let mut header = [0u32; 5];
    header[0] = alg.0;
    header[1] = key_size;
    for (i, f) in fields.iter().enumerate() {
        header[2 + i] = f.len() as u32;
    }
    let mut pos = 0;
    for v in header {
        out[pos..pos + 4].copy_from_slice(&v.to_le_bytes());
        pos += 4;
    }
    for f in fields {
        out[pos..pos + f.len()].copy_from_slice(f);
        pos += f.len();
    }
    Ok(out)
}

/// Serializes `key` into key material for `alg`. With `public_only` the private field is left
/// empty.
pub fn to_material(alg: Algorithm, public_only: bool, key: &RawKey) -> Result<ZVec> {
    let private = |p: &[u8]| -> Vec<u8> {
        if public_only {
            Vec::new()
        } else {
            p.to_vec()
        }
    };
    match (alg, key) {
        (Algorithm::RSA, RawKey::Rsa(k)) => {
            let d = ZVec::try_from(private(&k.d)).context(ks_err!())?;
            header_len_fields(alg, k.key_size, [&k.n[..], &k.e[..], &d[..]])
        }
        (Algorithm::ECC, RawKey::Ecc(k)) => {
            let z = ZVec::try_from(private(&k.z)).context(ks_err!())?;
            header_len_fields(alg, k.key_size, [&k.x[..], &k.y[..], &z[..]])
        }
        (alg, RawKey::Curve25519(k)) if is_curve25519(alg) => {
            let p = ZVec::try_from(private(&k.private)).context(ks_err!())?;
            header_len_fields(alg, 256, [&k.public[..], &p[..], &[]])
        }
        (alg, RawKey::Symmetric(k)) if is_symmetric(alg) => {
            if public_only {
                return Err(kserr!(NotSupported, "symmetric key {alg:?} has no public material"));
            }
            k.try_clone().context(ks_err!())
        }
        (alg, _) => Err(kserr!(InvalidArgument, "key does not match algorithm {alg:?}")),
    }
}

fn read_u32_le(data: &[u8], index: usize) -> u32 {
    let mut chunk = [0u8; 4];
    chunk.copy_from_slice(&data[index * 4..index * 4 + 4]);
    u32::from_le_bytes(chunk)
}

/// Parses key material for `alg`. With `public_only` the private field is not copied out.
pub fn from_material(alg: Algorithm, public_only: bool, data: &[u8]) -> Result<RawKey> {
    if is_symmetric(alg) {
        if data.is_empty() {
            return Err(keyerr!("empty {alg:?} key"));
        }
        return Ok(RawKey::Symmetric(ZVec::try_from(data).context(ks_err!())?));
    }
    if data.len() < KEY_MATERIAL_HEADER_LEN {
        return Err(keyerr!("key material too short (len = {})", data.len()));
    }
    let header_alg = Algorithm(read_u32_le(data, 0));
    if header_alg != alg {
        return Err(keyerr!("key material holds {header_alg:?}, expected {alg:?}"));
    }
    let key_size = read_u32_le(data, 1);
    let sizes = [read_u32_le(data, 2), read_u32_le(data, 3), read_u32_le(data, 4)];
    let fields_len = sizes
        .iter()
        .try_fold(0usize, |acc, s| acc.checked_add(*s as usize))
        .ok_or_else(|| keyerr!("key material field sizes overflow"))?;
    if fields_len > data.len() - KEY_MATERIAL_HEADER_LEN {
        return Err(keyerr!(
            "key material fields need {} bytes, have {}",
            fields_len,
            data.len() - KEY_MATERIAL_HEADER_LEN
        ));
    }
    let rest = &data[KEY_MATERIAL_HEADER_LEN..];
    let (a, rest) = rest.split_at(sizes[0] as usize);
    let (b, rest) = rest.split_at(sizes[1] as usize);
    let c = &rest[..sizes[2] as usize];
    let secret = |s: &[u8]| -> Result<ZVec> {
        if public_only {
            Ok(ZVec::default())
        } else {
            ZVec::try_from(s).context(ks_err!())
        }
    };
    match alg {
        Algorithm::RSA => {
            if a.is_empty() || b.is_empty() {
                return Err(keyerr!("RSA key material without modulus or exponent"));
            }
            Ok(RawKey::Rsa(RsaKey { key_size, n: a.to_vec(), e: b.to_vec(), d: secret(c)? }))
        }
        Algorithm::ECC => {
            if a.is_empty() || b.is_empty() {
                return Err(keyerr!("ECC key material without public point"));
            }
            Ok(RawKey::Ecc(EccKey { key_size, x: a.to_vec(), y: b.to_vec(), z: secret(c)? }))
        }
        alg if is_curve25519(alg) => {
            if a.len() != CURVE25519_KEY_LEN {
                return Err(keyerr!("{alg:?} public key of {} bytes", a.len()));
            }
            Ok(RawKey::Curve25519(Curve25519Key { public: a.to_vec(), private: secret(b)? }))
        }
        alg => Err(kserr!(NotSupported, "no key material format for {alg:?}")),
    }
}

/// Reads the algorithm and key size from a key material header.
pub fn material_header(data: &[u8]) -> Result<(Algorithm, u32)> {
    if data.len() < KEY_MATERIAL_HEADER_LEN {
        return Err(keyerr!("key material too short (len = {})", data.len()));
    }
    Ok((Algorithm(read_u32_le(data, 0)), read_u32_le(data, 1)))
}

fn rsa_algorithm_id(digest: Digest) -> Result<Vec<u8>> {
    let last = match digest {
        Digest::NONE => 0x01,   // rsaEncryption
        Digest::SHA1 => 0x05,   // sha1WithRSAEncryption
        Digest::SHA224 => 0x0e, // sha224WithRSAEncryption
        Digest::SHA256 => 0x0b, // sha256WithRSAEncryption
        Digest::SHA384 => 0x0c, // sha384WithRSAEncryption
        Digest::SHA512 => 0x0d, // sha512WithRSAEncryption
        _ => return Err(kserr!(NotSupported, "no RSA algorithm identifier for {digest:?}")),
    };
    let mut oid = RSA_OID_PREFIX.to_vec();
    oid.push(last);
    asn1::sequence(&[&asn1::tlv(TAG_OID, &oid)?, DER_NULL])
}

/// Left pads a big endian value to `len` bytes.
fn pad_to(v: &[u8], len: usize) -> Result<Vec<u8>> {
    let stripped = &v[v.iter().position(|b| *b != 0).unwrap_or(v.len())..];
    if stripped.len() > len {
        return Err(keyerr!("coordinate of {} bytes exceeds {}", stripped.len(), len));
    }
    let mut out = vec![0u8; len - stripped.len()];
    out.extend_from_slice(stripped);
    Ok(out)
}

fn ecc_algorithm_id(key_size: u32) -> Result<&'static [u8]> {
    match key_size {
        256 => Ok(DER_ALGORITHM_ID_P256),
        384 => Ok(DER_ALGORITHM_ID_P384),
        521 => Ok(DER_ALGORITHM_ID_P521),
        _ => Err(kserr!(NotSupported, "unsupported ECC key size {key_size}")),
    }
}

/// Formats the public part of `material` as a DER `SubjectPublicKeyInfo`.
pub fn format_public_key_der(material: &[u8], usage: &UsageSpec) -> Result<Vec<u8>> {
    let alg = usage.algorithm;
    if is_symmetric(alg) {
        return Err(kserr!(NotSupported, "{alg:?} has no public key"));
    }
    let key = from_material(alg, true, material).context(ks_err!("Failed to parse material."))?;
    let (algorithm_id, public_key) = match key {
        RawKey::Rsa(k) => {
            let rsa_public_key = asn1::sequence(&[
                &asn1::tlv(TAG_INTEGER, &k.n)?,
                &asn1::tlv(TAG_INTEGER, &k.e)?,
            ])?;
            (rsa_algorithm_id(usage.digest)?, rsa_public_key)
        }
        RawKey::Ecc(k) => {
            let id = ecc_algorithm_id(k.key_size)?;
            let coordinate_len = (k.key_size as usize + 7) / 8;
            let mut point = vec![EC_POINT_UNCOMPRESSED];
            point.extend_from_slice(&pad_to(&k.x, coordinate_len)?);
            point.extend_from_slice(&pad_to(&k.y, coordinate_len)?);
            (id.to_vec(), point)
        }
        RawKey::Curve25519(k) => {
            let id = if alg == Algorithm::ED25519 {
                DER_ALGORITHM_ID_ED25519
            } else {
                DER_ALGORITHM_ID_X25519
            };
            (id.to_vec(), k.public)
        }
        RawKey::Symmetric(_) => return Err(kserr!(NotSupported, "{alg:?} has no public key")),
    };
    asn1::sequence(&[&algorithm_id, &asn1::tlv(TAG_BIT_STRING, &public_key)?])
        .context(ks_err!("Failed to encode SubjectPublicKeyInfo."))
}

/// Parses a DER `RSAPrivateKey` (RFC 8017 A.1.2) into RSA key material.
pub fn rsa_material_from_pkcs1_der(der: &[u8]) -> Result<ZVec> {
    let (seq, _) = asn1::extract_tag(der, TAG_SEQUENCE).context(ks_err!("RSAPrivateKey"))?;
    let (version, rest) = asn1::extract_tag(seq.value, TAG_INTEGER).context(ks_err!("version"))?;
    if version.integer_u32()? != 0 {
        return Err(keyerr!("unsupported RSAPrivateKey version"));
    }
    let (n, rest) = asn1::extract_tag(rest, TAG_INTEGER).context(ks_err!("modulus"))?;
    let (e, rest) = asn1::extract_tag(rest, TAG_INTEGER).context(ks_err!("publicExponent"))?;
    let (d, _) = asn1::extract_tag(rest, TAG_INTEGER).context(ks_err!("privateExponent"))?;
    let n = n.unsigned_integer()?;
    let key = RawKey::Rsa(RsaKey {
        key_size: (n.len() * 8) as u32,
        n: n.to_vec(),
        e: e.unsigned_integer()?.to_vec(),
        d: ZVec::try_from(d.unsigned_integer()?).context(ks_err!())?,
    });
    to_material(Algorithm::RSA, false, &key)
}

/// OID content of the named curves, paired with their size.
const NAMED_CURVES: &[(&[u8], u32)] = &[
    (&[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07], 256),
    (&[0x2b, 0x81, 0x04, 0x00, 0x22], 384),
    (&[0x2b, 0x81, 0x04, 0x00, 0x23], 521),
];

/// Parses a DER `ECPrivateKey` (RFC 5915) into ECC key material. The optional public key
/// element must be present.
pub fn ecc_material_from_sec1_der(der: &[u8]) -> Result<ZVec> {
    const TAG_CONTEXT_0: u32 = 0xa0;
    const TAG_CONTEXT_1: u32 = 0xa1;

    let (seq, _) = asn1::extract_tag(der, TAG_SEQUENCE).context(ks_err!("ECPrivateKey"))?;
    let (version, rest) = asn1::extract_tag(seq.value, TAG_INTEGER).context(ks_err!("version"))?;
    if version.integer_u32()? != 1 {
        return Err(keyerr!("unsupported ECPrivateKey version"));
    }
    let (private, mut rest) =
        asn1::extract_tag(rest, TAG_OCTET_STRING).context(ks_err!("privateKey"))?;

    let mut key_size = match private.value.len() {
        32 => 256,
        48 => 384,
        66 => 521,
        len => return Err(keyerr!("private key of {len} bytes")),
    };
    if let Some((params, tail)) = asn1::probe_tag(rest, TAG_CONTEXT_0)? {
        let (oid, _) = asn1::extract_tag(params.value, TAG_OID).context(ks_err!("namedCurve"))?;
        key_size = NAMED_CURVES
            .iter()
            .find_map(|(c, size)| if *c == oid.value { Some(*size) } else { None })
            .ok_or_else(|| kserr!(NotSupported, "unknown named curve"))?;
        rest = tail;
    }
    let (public, _) = asn1::probe_tag(rest, TAG_CONTEXT_1)?
        .ok_or_else(|| keyerr!("ECPrivateKey without public key"))?;
    let (bits, _) = asn1::extract_tag(public.value, TAG_BIT_STRING).context(ks_err!("publicKey"))?;
    let point = bits.bit_string_bytes()?;
    let coordinate_len = (key_size as usize + 7) / 8;
    if point.len() != 1 + 2 * coordinate_len || point[0] != EC_POINT_UNCOMPRESSED {
        return Err(keyerr!("unexpected EC point encoding"));
    }
    let key = RawKey::Ecc(EccKey {
        key_size,
        x: point[1..1 + coordinate_len].to_vec(),
        y: point[1 + coordinate_len..].to_vec(),
        z: ZVec::try_from(private.value).context(ks_err!())?,
    });
    to_material(Algorithm::ECC, false, &key)
}
