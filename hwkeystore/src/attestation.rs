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

//! Key attestation.
//!
//! An attestation is a certificate over the public part of a stored key, signed by the device
//! key. The certificate carries a claims extension describing the request (challenge, key id,
//! application id), the device identity and how the key may be used. The result is a chain of
//! four DER certificates: the attestation certificate, the device certificate, the intermediate
//! and the root, formatted as
//!
//! ```text
//! u32 count (= 4)
//! count x { u32 length, certificate, zero padding to the chain alignment }
//! ```
//!
//! with all integers little endian.

use crate::asn1::{
    self, DerWriter, DER_TRUE, MAX_HEADER_LEN, TAG_CONTEXT_0, TAG_CONTEXT_3, TAG_INTEGER,
    TAG_OCTET_STRING, TAG_RAW, TAG_SEQUENCE, TAG_UTC_TIME, TAG_UTF8_STRING, TAG_BIT_STRING,
};
use crate::certs::{CertType, DeviceCertStore};
use crate::config::KeyStoreConfig;
use crate::engine::{CryptoEngine, UsageSpec};
use crate::key_material::{
    ecc_material_from_sec1_der, format_public_key_der, rsa_material_from_pkcs1_der,
};
use crate::key_node::KeyNode;
use crate::key_parameter::{newtype_consts, Algorithm, Digest, KeyPurpose, PaddingMode, Tag};
use crate::ks_err;
use crate::kserr;
use crate::param_set::ParamSet;
use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Months, Utc};
use hwkeystore_crypto::ZVec;
use std::mem::size_of;

/// Version of the claims structure.
pub const ATTESTATION_VERSION: u32 = 0;
/// Number of certificates in an attestation chain.
pub const ATTEST_CERT_COUNT: u32 = 4;
/// Shortest accepted attestation challenge.
pub const MIN_CHALLENGE_LEN: usize = 16;
/// Longest accepted attestation challenge.
pub const MAX_CHALLENGE_LEN: usize = 128;

/// Latest time a UTCTime can express.
const UTC_TIME_MAX: &str = "491231235959Z";
const UTC_TIME_MAX_YEAR: i32 = 2049;

newtype_consts!(
    /// How much the attestation vouches for a claim.
    SecurityLevel {
        LOW = 0,
        MEDIUM = 1,
        HIGH = 2,
        SUPER = 3,
    }
);

/// OID content under which all claims live. Claim OIDs append a suffix to it.
const ATTESTATION_OID_BASE: &[u8] =
    &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x8f, 0x5b, 0x02, 0x82, 0x78, 0x02];

/// OID of the certificate extension holding the claims, with its DER header.
pub const OID_ATTESTATION_EXTENSION: &[u8] =
    &[0x06, 0x0c, 0x2b, 0x06, 0x01, 0x04, 0x01, 0x8f, 0x5b, 0x02, 0x82, 0x78, 0x01, 0x03];

/// Claim OID suffixes.
pub mod claim_oid {
    /// Key purpose.
    pub const KEY_USAGE: &[u8] = &[0x01, 0x01];
    /// Key id.
    pub const KEY_ID: &[u8] = &[0x01, 0x02];
    /// Application id.
    pub const APP_ID: &[u8] = &[0x01, 0x03];
    /// Raw application id, inside the application id claim.
    pub const APP_ID_RAW: &[u8] = &[0x01, 0x03, 0x01];
    /// Attestation challenge.
    pub const CHALLENGE: &[u8] = &[0x01, 0x04];
    /// Key digest.
    pub const DIGEST: &[u8] = &[0x01, 0x08];
    /// Key padding.
    pub const PADDING: &[u8] = &[0x01, 0x09];
    /// OS version information.
    pub const OS_VERSION: &[u8] = &[0x02, 0x02, 0x04];
    /// Security level information.
    pub const SEC_INFO: &[u8] = &[0x02, 0x02, 0x05];
    /// IMEI.
    pub const IMEI: &[u8] = &[0x02, 0x04, 0x01];
    /// MEID.
    pub const MEID: &[u8] = &[0x02, 0x04, 0x02];
    /// Serial number.
    pub const SERIAL: &[u8] = &[0x02, 0x04, 0x03];
    /// Brand.
    pub const BRAND: &[u8] = &[0x02, 0x04, 0x04];
    /// Device.
    pub const DEVICE: &[u8] = &[0x02, 0x04, 0x05];
    /// Product.
    pub const PRODUCT: &[u8] = &[0x02, 0x04, 0x06];
    /// Manufacturer.
    pub const MANUFACTURER: &[u8] = &[0x02, 0x04, 0x07];
    /// Model.
    pub const MODEL: &[u8] = &[0x02, 0x04, 0x08];
    /// SoC id.
    pub const SOCID: &[u8] = &[0x02, 0x04, 0x09];
    /// UDID.
    pub const UDID: &[u8] = &[0x02, 0x04, 0x0a];
    /// RSA-PSS with MGF1 and SHA-256 signature group.
    pub const GROUP_SIG_RSA_PSS_MGF1_SHA256: &[u8] = &[0x04, 0x01, 0x03];
    /// ECDSA with SHA-256 signature group.
    pub const GROUP_SIG_ECDSA_SHA256: &[u8] = &[0x04, 0x01, 0x05];
    /// RSA-OAEP encryption group.
    pub const GROUP_ENC_RSA_OAEP: &[u8] = &[0x04, 0x02, 0x02];
    /// RSA-OAEP with MGF1 and SHA-256 encryption group.
    pub const GROUP_ENC_RSA_OAEP_MGF1_SHA256: &[u8] = &[0x04, 0x02, 0x03];
}

/// sha256WithRSAEncryption with its DER header.
const OID_SHA256_WITH_RSA: &[u8] =
    &[0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0b];
/// ecdsa-with-SHA256 with its DER header.
const OID_ECDSA_WITH_SHA256: &[u8] = &[0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x02];
const DER_NULL: &[u8] = &[0x05, 0x00];

/// Device identity claims, in the order they are emitted.
const DEVICE_ID_CLAIMS: &[(Tag, &[u8], u32)] = &[
    (Tag::ATTESTATION_ID_BRAND, claim_oid::BRAND, TAG_UTF8_STRING),
    (Tag::ATTESTATION_ID_DEVICE, claim_oid::DEVICE, TAG_UTF8_STRING),
    (Tag::ATTESTATION_ID_PRODUCT, claim_oid::PRODUCT, TAG_UTF8_STRING),
    (Tag::ATTESTATION_ID_SERIAL, claim_oid::SERIAL, TAG_UTF8_STRING),
    (Tag::ATTESTATION_ID_IMEI, claim_oid::IMEI, TAG_UTF8_STRING),
    (Tag::ATTESTATION_ID_MEID, claim_oid::MEID, TAG_UTF8_STRING),
    (Tag::ATTESTATION_ID_MANUFACTURER, claim_oid::MANUFACTURER, TAG_UTF8_STRING),
    (Tag::ATTESTATION_ID_MODEL, claim_oid::MODEL, TAG_UTF8_STRING),
    (Tag::ATTESTATION_ID_SOCID, claim_oid::SOCID, TAG_UTF8_STRING),
    (Tag::ATTESTATION_ID_UDID, claim_oid::UDID, TAG_UTF8_STRING),
    (Tag::ATTESTATION_ID_SEC_LEVEL_INFO, claim_oid::SEC_INFO, TAG_OCTET_STRING),
    (Tag::ATTESTATION_ID_VERSION_INFO, claim_oid::OS_VERSION, TAG_OCTET_STRING),
];

/// TBS certificates the attestation certificate is derived from, one per device key type.
/// Version, serial number and subject are taken as they are; everything else is replaced.
const TBS_TEMPLATE_ECC: &[u8] = &[
    0x30, 0x81, 0xf6, 0xa0, 0x03, 0x02, 0x01, 0x02, 0x02, 0x01, 0x01, 0x30, 0x0a, 0x06, 0x08, 0x2a,
    0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x02, 0x30, 0x1d, 0x31, 0x1b, 0x30, 0x19, 0x06, 0x03, 0x55,
    0x04, 0x03, 0x13, 0x12, 0x41, 0x6e, 0x64, 0x72, 0x6f, 0x69, 0x64, 0x20, 0x4b, 0x65, 0x79, 0x6d,
    0x61, 0x73, 0x74, 0x65, 0x72, 0x32, 0x30, 0x1e, 0x17, 0x0d, 0x31, 0x36, 0x30, 0x36, 0x30, 0x31,
    0x31, 0x32, 0x31, 0x37, 0x32, 0x31, 0x5a, 0x17, 0x0d, 0x32, 0x36, 0x30, 0x36, 0x30, 0x31, 0x31,
    0x32, 0x31, 0x37, 0x32, 0x31, 0x5a, 0x30, 0x1a, 0x31, 0x18, 0x30, 0x16, 0x06, 0x03, 0x55, 0x04,
    0x03, 0x13, 0x0f, 0x41, 0x20, 0x4b, 0x65, 0x79, 0x6d, 0x61, 0x73, 0x74, 0x65, 0x72, 0x20, 0x4b,
    0x65, 0x79, 0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06,
    0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00, 0x04, 0xb0, 0x51, 0x4c,
    0x4c, 0x13, 0x54, 0x0f, 0x23, 0x97, 0xf5, 0x47, 0x19, 0xf3, 0x33, 0x2e, 0x7e, 0xf3, 0x8e, 0x42,
    0xad, 0x9d, 0xc0, 0x8b, 0x71, 0xe6, 0x60, 0xce, 0x16, 0xb9, 0xe8, 0x8d, 0x09, 0x4e, 0x7f, 0x3a,
    0xdc, 0x88, 0x8e, 0x94, 0x4d, 0x45, 0xd5, 0xe4, 0x59, 0x4e, 0x3f, 0xbe, 0x28, 0x91, 0x80, 0xbb,
    0x1c, 0xd7, 0xfc, 0x55, 0xd1, 0xb5, 0xc7, 0xcb, 0x50, 0x1c, 0x09, 0xca, 0x50, 0xa3, 0x2a, 0x30,
    0x28, 0x30, 0x0b, 0x06, 0x03, 0x55, 0x1d, 0x0f, 0x04, 0x04, 0x03, 0x02, 0x07, 0x80, 0x30, 0x07,
    0x06, 0x03, 0x55, 0x1d, 0x1f, 0x04, 0x00, 0x30, 0x10, 0x06, 0x0a, 0x2b, 0x06, 0x01, 0x04, 0x01,
    0xd6, 0x79, 0x02, 0x01, 0x11, 0x04, 0x02, 0x30, 0x00,
];

const TBS_TEMPLATE_RSA: &[u8] = &[
    0x30, 0x82, 0x01, 0xc7, 0xa0, 0x03, 0x02, 0x01, 0x02, 0x02, 0x01, 0x01, 0x30, 0x0b, 0x06, 0x09,
    0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0b, 0x30, 0x1d, 0x31, 0x1b, 0x30, 0x19, 0x06,
    0x03, 0x55, 0x04, 0x03, 0x13, 0x12, 0x48, 0x75, 0x61, 0x77, 0x65, 0x69, 0x20, 0x4b, 0x65, 0x79,
    0x53, 0x74, 0x6f, 0x72, 0x65, 0x20, 0x20, 0x20, 0x30, 0x1e, 0x17, 0x0d, 0x31, 0x36, 0x30, 0x36,
    0x30, 0x34, 0x31, 0x38, 0x32, 0x38, 0x34, 0x34, 0x5a, 0x17, 0x0d, 0x32, 0x36, 0x30, 0x36, 0x30,
    0x34, 0x31, 0x38, 0x32, 0x38, 0x34, 0x34, 0x5a, 0x30, 0x1a, 0x31, 0x18, 0x30, 0x16, 0x06, 0x03,
    0x55, 0x04, 0x03, 0x13, 0x0f, 0x41, 0x20, 0x4b, 0x65, 0x79, 0x6d, 0x61, 0x73, 0x74, 0x65, 0x72,
    0x20, 0x4b, 0x65, 0x79, 0x30, 0x82, 0x01, 0x22, 0x30, 0x0d, 0x06, 0x09, 0x2a, 0x86, 0x48, 0x86,
    0xf7, 0x0d, 0x01, 0x01, 0x01, 0x05, 0x00, 0x03, 0x82, 0x01, 0x0f, 0x00, 0x30, 0x82, 0x01, 0x0a,
    0x02, 0x82, 0x01, 0x01, 0x00, 0xe8, 0xd8, 0xf9, 0x14, 0x5f, 0x88, 0xf7, 0x36, 0x63, 0xcb, 0x28,
    0x0c, 0x18, 0xf7, 0xc7, 0x3f, 0x0d, 0xa0, 0x73, 0x9a, 0x9c, 0xe0, 0x3c, 0xc6, 0x79, 0x5a, 0xd4,
    0xa3, 0xd7, 0x72, 0x2f, 0x46, 0x42, 0xe1, 0x3b, 0xc1, 0xc8, 0xf3, 0xbc, 0x51, 0xd3, 0x5d, 0x8d,
    0xc4, 0x18, 0x03, 0x92, 0x26, 0x5a, 0xd7, 0x92, 0xbb, 0x1e, 0x4f, 0xc0, 0x71, 0x51, 0x75, 0xc2,
    0x41, 0x31, 0xb9, 0xd2, 0xc7, 0xf2, 0x9c, 0x03, 0x6c, 0xff, 0x77, 0x75, 0x17, 0x82, 0x5b, 0x3c,
    0x05, 0x0d, 0x1c, 0x82, 0x1c, 0xa3, 0xd5, 0x25, 0xd9, 0x31, 0x0f, 0x2d, 0x2b, 0xf1, 0x82, 0xd2,
    0x2a, 0x0a, 0xdc, 0xe1, 0x0c, 0xcc, 0x8b, 0xc1, 0xd1, 0x9e, 0x20, 0xaf, 0x00, 0x2a, 0xcb, 0x7a,
    0x3c, 0xcb, 0x8f, 0x6d, 0xb0, 0x52, 0xc3, 0x3b, 0x17, 0x85, 0x56, 0xe7, 0x45, 0xb6, 0x1e, 0x3a,
    0x42, 0xb9, 0x38, 0xdb, 0xf7, 0x7b, 0x0f, 0x73, 0x37, 0x1b, 0xf4, 0x20, 0xcb, 0x85, 0xbf, 0xdc,
    0xb4, 0x2f, 0x3d, 0x77, 0x27, 0x31, 0x53, 0x31, 0xb4, 0x71, 0x72, 0x3a, 0x47, 0xcd, 0x98, 0xcf,
    0xf0, 0x34, 0x5d, 0x90, 0x1d, 0x71, 0xba, 0x19, 0x7d, 0xf6, 0xe9, 0xdc, 0xe6, 0xf9, 0x67, 0xf4,
    0x1c, 0x93, 0x7d, 0x10, 0xfd, 0x3a, 0x58, 0x71, 0xc2, 0xf5, 0x3d, 0x45, 0xca, 0xcf, 0xf9, 0x1b,
    0x6c, 0x27, 0x79, 0x5f, 0xcd, 0xf2, 0x4f, 0xa7, 0xa2, 0x91, 0x9f, 0xd1, 0x8b, 0xbb, 0x3b, 0x4c,
    0x36, 0x40, 0x2e, 0x73, 0xf6, 0xd9, 0xb8, 0xdf, 0x21, 0x6e, 0xcd, 0xae, 0x6b, 0x43, 0xb2, 0x99,
    0xea, 0x9e, 0xdd, 0x3d, 0x4c, 0xc8, 0x0a, 0xf4, 0x5a, 0xaa, 0x66, 0x24, 0x98, 0xce, 0xfd, 0xb1,
    0xfb, 0x16, 0x94, 0xd8, 0x87, 0xa2, 0x08, 0xc4, 0x55, 0x95, 0xf5, 0x95, 0xcd, 0x75, 0x03, 0xc9,
    0x99, 0x8a, 0x84, 0xe4, 0x57, 0x02, 0x03, 0x01, 0x00, 0x01, 0xa3, 0x2f, 0x30, 0x2d, 0x30, 0x0b,
    0x06, 0x03, 0x55, 0x1d, 0x0f, 0x04, 0x04, 0x03, 0x02, 0x07, 0x80, 0x30, 0x08, 0x06, 0x03, 0x55,
    0x1d, 0x1f, 0x04, 0x01, 0x00, 0x30, 0x14, 0x06, 0x0a, 0x2b, 0x06, 0x01, 0x04, 0x01, 0xd6, 0x79,
    0x02, 0x01, 0x11, 0x04, 0x06, 0x30, 0x04, 0x04, 0x02, 0x0b, 0x0c,
];

/// Extensions of the attestation certificate: key usage (patched per key), an empty CRL
/// distribution point and a placeholder for the claims extension.
const EXTENSIONS_TEMPLATE: &[u8] = &[
    0x30, 0x2c, 0x30, 0x0b, 0x06, 0x03, 0x55, 0x1d, 0x0f, 0x04, 0x04, 0x03, 0x02, 0x07, 0x80, 0x30,
    0x08, 0x06, 0x03, 0x55, 0x1d, 0x1f, 0x04, 0x01, 0x00, 0x30, 0x13, 0x06, 0x0a, 0x2b, 0x06, 0x01,
    0x04, 0x01, 0xd6, 0x79, 0x02, 0x01, 0x11, 0x04, 0x05, 0x30, 0x03, 0x01, 0x01, 0xff,
];

/// Validity period of a certificate, as UTCTime strings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validity {
    /// Start of the period, `YYMMDDHHMMSSZ`.
    pub not_before: String,
    /// End of the period, `YYMMDDHHMMSSZ`.
    pub not_after: String,
}

impl Validity {
    /// The period of `years` years starting at `start`. The end is clamped to the last
    /// second UTCTime can express.
    pub fn starting_at(start: DateTime<Utc>, years: u32) -> Result<Self> {
        if start.year() > UTC_TIME_MAX_YEAR {
            return Err(kserr!(NotSupported, "{start} cannot be expressed as UTCTime"));
        }
        let end = years
            .checked_mul(12)
            .and_then(|months| start.checked_add_months(Months::new(months)));
        let not_after = match end {
            Some(end) if end.year() <= UTC_TIME_MAX_YEAR => utc_time(&end),
            _ => {
                log::warn!("Clamping attestation validity of {years} years from {start}.");
                UTC_TIME_MAX.to_string()
            }
        };
        Ok(Self { not_before: utc_time(&start), not_after })
    }

    fn to_der(&self) -> Result<Vec<u8>> {
        asn1::sequence(&[
            &asn1::tlv(TAG_UTC_TIME, self.not_before.as_bytes())?,
            &asn1::tlv(TAG_UTC_TIME, self.not_after.as_bytes())?,
        ])
    }
}

fn utc_time(t: &DateTime<Utc>) -> String {
    t.format("%y%m%d%H%M%SZ").to_string()
}

/// Everything needed to issue one attestation certificate. Secrets are zeroized when the
/// spec is dropped.
#[derive(Debug)]
pub struct AttestationSpec {
    /// How the attested key may be used.
    pub usage: UsageSpec,
    /// DER `SEQUENCE { INTEGER version, claim* }`.
    pub claims: Vec<u8>,
    /// Validity of the certificate.
    pub validity: Validity,
    /// DER device certificate; its subject becomes the issuer.
    pub device_cert: ZVec,
    /// DER device private key. Taken and dropped by [`sign_and_assemble`].
    pub device_key: Option<ZVec>,
    /// Material of the attested key.
    pub key_material: ZVec,
}

/// The usage recorded for the attested key.
fn attested_usage(key_params: &ParamSet) -> Result<UsageSpec> {
    let algorithm = Algorithm(key_params.require_uint(Tag::ALGORITHM)?);
    let purpose = KeyPurpose(key_params.require_uint(Tag::PURPOSE)?);
    let digest = Digest(key_params.get_uint(Tag::DIGEST)?.unwrap_or(Digest::NONE.0));
    let padding = PaddingMode(key_params.get_uint(Tag::PADDING)?.unwrap_or(PaddingMode::NONE.0));
    Ok(UsageSpec::new(algorithm, purpose, digest, padding))
}

fn check_attest_usage(usage: &UsageSpec) -> Result<()> {
    if !matches!(usage.algorithm, Algorithm::RSA | Algorithm::ECC | Algorithm::X25519) {
        return Err(kserr!(InvalidArgument, "cannot attest {:?} keys", usage.algorithm));
    }
    if key_usage_bits(usage.purpose).1 == 0 {
        return Err(kserr!(InvalidArgument, "cannot attest purpose {:?}", usage.purpose));
    }
    if usage.algorithm == Algorithm::RSA
        && !matches!(usage.padding, PaddingMode::PSS | PaddingMode::OAEP)
    {
        return Err(kserr!(InvalidArgument, "cannot attest RSA keys with {:?}", usage.padding));
    }
    Ok(())
}

/// Collects the inputs of an attestation of `node` for `request`.
pub fn build_spec(
    node: &KeyNode,
    request: &ParamSet,
    certs: &dyn DeviceCertStore,
    config: &KeyStoreConfig,
) -> Result<AttestationSpec> {
    let usage = attested_usage(node.params()).context(ks_err!("Failed to read key usage."))?;
    check_attest_usage(&usage)?;
    let validity = Validity::starting_at(Utc::now(), config.attestation_validity_years)?;
    let claims = build_claims(request, &usage).context(ks_err!("Failed to build claims."))?;
    let device_cert = certs.get(CertType::DeviceCert).context(ks_err!())?;
    let device_key = certs.get(CertType::DeviceKey).context(ks_err!())?;
    Ok(AttestationSpec {
        usage,
        claims,
        validity,
        device_cert,
        device_key: Some(device_key),
        key_material: ZVec::try_from(node.key()).context(ks_err!())?,
    })
}

/// Appends `SEQUENCE { INTEGER level, OID, value }` to `out`.
fn insert_claim(
    out: &mut Vec<u8>,
    oid_suffix: &[u8],
    value: &[u8],
    level: SecurityLevel,
) -> Result<()> {
    let oid = asn1::tlv(asn1::TAG_OID, &[ATTESTATION_OID_BASE, oid_suffix].concat())?;
    let claim = asn1::sequence(&[&asn1::tlv(TAG_INTEGER, &level.0.to_be_bytes())?, &oid, value])?;
    out.extend_from_slice(&claim);
    Ok(())
}

fn insert_message_claims(out: &mut Vec<u8>, request: &ParamSet) -> Result<()> {
    let challenge = request
        .get_blob(Tag::ATTESTATION_CHALLENGE)?
        .ok_or_else(|| kserr!(InvalidArgument, "missing attestation challenge"))?;
    if !(MIN_CHALLENGE_LEN..=MAX_CHALLENGE_LEN).contains(&challenge.len()) {
        return Err(kserr!(InvalidArgument, "challenge of {} bytes", challenge.len()));
    }
    insert_claim(
        out,
        claim_oid::CHALLENGE,
        &asn1::tlv(TAG_OCTET_STRING, challenge)?,
        SecurityLevel::LOW,
    )?;

    let key_id = request
        .get_blob(Tag::ATTESTATION_ID_ALIAS)?
        .ok_or_else(|| kserr!(InvalidArgument, "missing attested key id"))?;
    let key_id = asn1::tlv(TAG_OCTET_STRING, key_id)?;
    insert_claim(out, claim_oid::KEY_ID, &key_id, SecurityLevel::HIGH)?;

    if let Some(app_id) = request.get_blob(Tag::ATTESTATION_APPLICATION_ID)? {
        let raw_oid =
            asn1::tlv(asn1::TAG_OID, &[ATTESTATION_OID_BASE, claim_oid::APP_ID_RAW].concat())?;
        let value = asn1::sequence(&[&raw_oid, &asn1::tlv(TAG_OCTET_STRING, app_id)?])?;
        insert_claim(out, claim_oid::APP_ID, &value, SecurityLevel::HIGH)?;
    }
    Ok(())
}

fn insert_device_claims(out: &mut Vec<u8>, request: &ParamSet) -> Result<()> {
    for (tag, oid_suffix, value_tag) in DEVICE_ID_CLAIMS {
        if let Some(value) = request.get_blob(*tag)? {
            insert_claim(out, oid_suffix, &asn1::tlv(*value_tag, value)?, SecurityLevel::SUPER)
                .context(ks_err!("Failed to insert {:?}.", tag))?;
        }
    }
    Ok(())
}

/// The group claim summarizing `usage`, if one describes it.
fn group_claim(usage: &UsageSpec) -> Option<&'static [u8]> {
    let signs = usage.purpose.0 & (KeyPurpose::SIGN | KeyPurpose::VERIFY).0 != 0;
    let ciphers = usage.purpose.0 & (KeyPurpose::ENCRYPT | KeyPurpose::DECRYPT).0 != 0;
    match (usage.algorithm, usage.padding) {
        (Algorithm::RSA, PaddingMode::PSS) if signs && usage.digest == Digest::SHA256 => {
            Some(claim_oid::GROUP_SIG_RSA_PSS_MGF1_SHA256)
        }
        (Algorithm::ECC, PaddingMode::NONE) if signs && usage.digest == Digest::SHA256 => {
            Some(claim_oid::GROUP_SIG_ECDSA_SHA256)
        }
        (Algorithm::RSA, PaddingMode::OAEP) if ciphers && usage.digest == Digest::SHA256 => {
            Some(claim_oid::GROUP_ENC_RSA_OAEP_MGF1_SHA256)
        }
        (Algorithm::RSA, PaddingMode::OAEP) if ciphers => Some(claim_oid::GROUP_ENC_RSA_OAEP),
        _ => None,
    }
}

fn insert_key_claims(out: &mut Vec<u8>, usage: &UsageSpec) -> Result<()> {
    if let Some(group) = group_claim(usage) {
        return insert_claim(out, group, DER_TRUE, SecurityLevel::HIGH);
    }
    let le_octets = |v: u32| asn1::tlv(TAG_OCTET_STRING, &v.to_le_bytes());
    insert_claim(out, claim_oid::KEY_USAGE, &le_octets(usage.purpose.0)?, SecurityLevel::HIGH)?;
    insert_claim(out, claim_oid::DIGEST, &le_octets(usage.digest.0)?, SecurityLevel::HIGH)?;
    if usage.algorithm != Algorithm::RSA {
        insert_claim(out, claim_oid::PADDING, &le_octets(usage.padding.0)?, SecurityLevel::HIGH)?;
    }
    Ok(())
}

/// Builds `SEQUENCE { INTEGER version, claim* }`: the request claims, then the device
/// identity claims present in `request`, then the key claims of `usage`.
pub fn build_claims(request: &ParamSet, usage: &UsageSpec) -> Result<Vec<u8>> {
    let mut claims = asn1::tlv(TAG_INTEGER, &ATTESTATION_VERSION.to_be_bytes())?;
    insert_message_claims(&mut claims, request).context(ks_err!())?;
    insert_device_claims(&mut claims, request).context(ks_err!())?;
    insert_key_claims(&mut claims, usage).context(ks_err!())?;
    asn1::sequence(&[&claims])
}

/// Returns the unused-bits octet and the key usage bits for `purpose`.
pub fn key_usage_bits(purpose: KeyPurpose) -> (u8, u8) {
    let mut bits = 0u8;
    let mut unused = 0u8;
    if purpose.0 & (KeyPurpose::SIGN | KeyPurpose::VERIFY).0 != 0 {
        bits |= 0x80; // digitalSignature
        unused = 7;
    }
    if purpose.0 & (KeyPurpose::ENCRYPT | KeyPurpose::DECRYPT).0 != 0 {
        bits |= 0x20; // keyEncipherment
        unused = 5;
    }
    if purpose.contains(KeyPurpose::AGREE) {
        bits |= 0x08; // keyAgreement
        unused = 3;
    }
    (unused, bits)
}

/// Builds the `[3] { SEQUENCE { extension* } }` of the attestation certificate.
pub fn create_extension(purpose: KeyPurpose, claims: &[u8]) -> Result<Vec<u8>> {
    let (extensions, _) = asn1::extract_tag(EXTENSIONS_TEMPLATE, TAG_SEQUENCE)?;
    let (key_usage, rest) = asn1::extract_tag(extensions.value, TAG_SEQUENCE)?;
    let (crl, rest) = asn1::extract_tag(rest, TAG_SEQUENCE)?;
    asn1::extract_tag(rest, TAG_SEQUENCE).context(ks_err!("claims placeholder"))?;

    // The key usage extension ends with the BIT STRING `03 02 <unused> <bits>`.
    let mut key_usage = key_usage.raw.to_vec();
    let len = key_usage.len();
    let (unused, bits) = key_usage_bits(purpose);
    key_usage[len - 2] = unused;
    key_usage[len - 1] = bits;

    let claims_extension =
        asn1::sequence(&[OID_ATTESTATION_EXTENSION, &asn1::tlv(TAG_OCTET_STRING, claims)?])?;
    let extensions = asn1::sequence(&[&key_usage, crl.raw, &claims_extension])?;
    asn1::constructed(TAG_CONTEXT_3, &[&extensions])
}

/// The subject of a DER certificate.
fn certificate_subject(cert: &[u8]) -> Result<&[u8]> {
    let (cert, _) = asn1::extract_tag(cert, TAG_SEQUENCE).context(ks_err!("Certificate"))?;
    let (tbs, _) = asn1::extract_tag(cert.value, TAG_SEQUENCE).context(ks_err!("tbsCertificate"))?;
    let mut rest = tbs.value;
    if let Some((_, r)) = asn1::probe_tag(rest, TAG_CONTEXT_0)? {
        rest = r;
    }
    let (_, rest) = asn1::extract_tag(rest, TAG_INTEGER).context(ks_err!("serialNumber"))?;
    let (_, rest) = asn1::extract_tag(rest, TAG_SEQUENCE).context(ks_err!("signature"))?;
    let (_, rest) = asn1::extract_tag(rest, TAG_SEQUENCE).context(ks_err!("issuer"))?;
    let (_, rest) = asn1::extract_tag(rest, TAG_SEQUENCE).context(ks_err!("validity"))?;
    let (subject, _) = asn1::extract_tag(rest, TAG_SEQUENCE).context(ks_err!("subject"))?;
    Ok(subject.raw)
}

/// The `AlgorithmIdentifier` of signatures made by a device key of `algorithm`.
fn signature_algorithm(algorithm: Algorithm) -> Result<Vec<u8>> {
    match algorithm {
        Algorithm::RSA => asn1::sequence(&[OID_SHA256_WITH_RSA, DER_NULL]),
        Algorithm::ECC => asn1::sequence(&[OID_ECDSA_WITH_SHA256]),
        alg => Err(kserr!(NotSupported, "no signature algorithm for {alg:?} device keys")),
    }
}

fn tbs_template(sign_alg: Algorithm) -> Result<&'static [u8]> {
    match sign_alg {
        Algorithm::RSA => Ok(TBS_TEMPLATE_RSA),
        Algorithm::ECC => Ok(TBS_TEMPLATE_ECC),
        alg => Err(kserr!(NotSupported, "no certificate template for {alg:?} device keys")),
    }
}

/// Builds the DER `TBSCertificate` of the attestation certificate, to be signed by a device key
/// of `sign_alg`.
pub fn build_tbs(spec: &AttestationSpec, sign_alg: Algorithm) -> Result<Vec<u8>> {
    let (template, _) = asn1::extract_tag(tbs_template(sign_alg)?, TAG_SEQUENCE)?;
    let (version, rest) = asn1::extract_tag(template.value, TAG_CONTEXT_0)?;
    let (serial, rest) = asn1::extract_tag(rest, TAG_INTEGER)?;
    let (_, rest) = asn1::extract_tag(rest, TAG_SEQUENCE)?;
    let (_, rest) = asn1::extract_tag(rest, TAG_SEQUENCE)?;
    let (_, rest) = asn1::extract_tag(rest, TAG_SEQUENCE)?;
    let (subject, _) = asn1::extract_tag(rest, TAG_SEQUENCE)?;

    let signature = signature_algorithm(sign_alg)?;
    let issuer = certificate_subject(&spec.device_cert).context(ks_err!("Bad device cert."))?;
    let validity = spec.validity.to_der()?;
    let spki = format_public_key_der(&spec.key_material, &spec.usage)
        .context(ks_err!("Failed to format the attested public key."))?;
    let extensions = create_extension(spec.usage.purpose, &spec.claims)?;

    let parts: [&[u8]; 8] =
        [version.raw, serial.raw, &signature, issuer, &validity, subject.raw, &spki, &extensions];
    let content_len = parts.iter().map(|p| p.len()).sum::<usize>();
    let mut tbs = vec![0u8; content_len + MAX_HEADER_LEN];
    let mut writer = DerWriter::new(&mut tbs);
    for part in parts {
        writer.encode_tlv(TAG_RAW, part)?;
    }
    let span = writer.wrap_since(TAG_SEQUENCE, 0)?;
    tbs.truncate(span.len);
    Ok(tbs)
}

/// The device key, converted to key material.
struct DeviceKey {
    algorithm: Algorithm,
    material: ZVec,
}

impl DeviceKey {
    /// Accepts a PKCS#1 `RSAPrivateKey` (version 0) or a SEC1 `ECPrivateKey` (version 1).
    fn from_der(der: &[u8]) -> Result<Self> {
        let (seq, _) = asn1::extract_tag(der, TAG_SEQUENCE).context(ks_err!("device key"))?;
        let (version, _) = asn1::extract_tag(seq.value, TAG_INTEGER).context(ks_err!("version"))?;
        match version.integer_u32()? {
            0 => {
                Ok(Self { algorithm: Algorithm::RSA, material: rsa_material_from_pkcs1_der(der)? })
            }
            1 => {
                Ok(Self { algorithm: Algorithm::ECC, material: ecc_material_from_sec1_der(der)? })
            }
            v => Err(kserr!(InvalidKeyInfo, "unknown device key version {v}")),
        }
    }

    fn signing_usage(&self) -> UsageSpec {
        let padding = if self.algorithm == Algorithm::RSA {
            PaddingMode::PKCS1_V1_5
        } else {
            PaddingMode::NONE
        };
        UsageSpec::new(self.algorithm, KeyPurpose::SIGN, Digest::SHA256, padding)
    }
}

/// Signs the TBS certificate of `spec` with the device key and returns the DER certificate.
/// The device key is removed from `spec` and zeroized once the signature is made.
pub fn sign_and_assemble(engine: &dyn CryptoEngine, spec: &mut AttestationSpec) -> Result<Vec<u8>> {
    let der = spec.device_key.take().ok_or_else(|| kserr!(BadState, "device key already used"))?;
    let device_key = DeviceKey::from_der(&der).context(ks_err!("Bad device key."))?;
    drop(der);
    let tbs = build_tbs(spec, device_key.algorithm)?;
    let digest = engine.hash(Digest::SHA256, &tbs).context(ks_err!())?;
    let signature = engine
        .sign(&device_key.material, &device_key.signing_usage(), &digest)
        .context(ks_err!("Failed to sign the attestation."))?;
    let sign_alg = device_key.algorithm;
    drop(device_key);

    let signature = asn1::tlv(TAG_BIT_STRING, &signature)?;
    asn1::sequence(&[&tbs, &signature_algorithm(sign_alg)?, &signature])
        .context(ks_err!("Failed to assemble the attestation certificate."))
}

/// An attestation certificate chain, attestation certificate first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateChain {
    certs: Vec<Vec<u8>>,
}

impl CertificateChain {
    /// Creates a chain from DER certificates.
    pub fn new(certs: Vec<Vec<u8>>) -> Self {
        Self { certs }
    }

    /// The certificates, attestation certificate first.
    pub fn certs(&self) -> &[Vec<u8>] {
        &self.certs
    }

    /// Number of bytes [`format_chain`] writes.
    pub fn encoded_len(&self, alignment: usize) -> Result<usize> {
        self.certs.iter().try_fold(size_of::<u32>(), |acc, cert| {
            align_up(cert.len(), alignment)
                .and_then(|padded| padded.checked_add(size_of::<u32>()))
                .and_then(|entry| acc.checked_add(entry))
                .ok_or_else(|| kserr!(InvalidArgument, "certificate chain too large"))
        })
    }

    /// The chain formatted by [`format_chain`] into a new vector.
    pub fn to_bytes(&self, alignment: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.encoded_len(alignment)?];
        format_chain(self, alignment, &mut out)?;
        Ok(out)
    }
}

fn align_up(len: usize, alignment: usize) -> Option<usize> {
    let alignment = alignment.max(1);
    len.checked_add(alignment - 1).map(|l| l / alignment * alignment)
}

/// Writes `chain` into `out` and returns the number of bytes used. Fails with `BufferTooSmall`
/// before writing anything if `out` cannot hold the chain.
pub fn format_chain(chain: &CertificateChain, alignment: usize, out: &mut [u8]) -> Result<usize> {
    let needed = chain.encoded_len(alignment)?;
    if out.len() < needed {
        return Err(kserr!(BufferTooSmall, "chain needs {} bytes, have {}", needed, out.len()));
    }
    let count = u32::try_from(chain.certs.len())
        .map_err(|_| kserr!(InvalidArgument, "too many certificates"))?;
    out[..size_of::<u32>()].copy_from_slice(&count.to_le_bytes());
    let mut pos = size_of::<u32>();
    for cert in &chain.certs {
        let len = u32::try_from(cert.len())
            .map_err(|_| kserr!(InvalidArgument, "certificate of {} bytes", cert.len()))?;
        out[pos..pos + size_of::<u32>()].copy_from_slice(&len.to_le_bytes());
        pos += size_of::<u32>();
        out[pos..pos + cert.len()].copy_from_slice(cert);
        let padded = align_up(cert.len(), alignment).unwrap_or(cert.len());
        out[pos + cert.len()..pos + padded].fill(0);
        pos += padded;
    }
    Ok(pos)
}

/// Parses a chain written by [`format_chain`] with the same `alignment`.
pub fn parse_chain(data: &[u8], alignment: usize) -> Result<CertificateChain> {
    let read_u32 = |data: &[u8], pos: usize| -> Result<u32> {
        let bytes = data
            .get(pos..pos + size_of::<u32>())
            .ok_or_else(|| kserr!(InsufficientData, "chain truncated at {}", pos))?;
        Ok(u32::from_le_bytes(bytes.try_into().context(ks_err!())?))
    };
    let count = read_u32(data, 0)? as usize;
    if count > data.len() / size_of::<u32>() {
        return Err(kserr!(InvalidArgument, "implausible certificate count {}", count));
    }
    let mut pos = size_of::<u32>();
    let mut certs = Vec::with_capacity(count);
    for _ in 0..count {
        let len = read_u32(data, pos)? as usize;
        pos += size_of::<u32>();
        let cert = data
            .get(pos..pos.saturating_add(len))
            .ok_or_else(|| kserr!(InsufficientData, "certificate of {} bytes truncated", len))?;
        certs.push(cert.to_vec());
        pos = align_up(len, alignment)
            .and_then(|padded| pos.checked_add(padded))
            .ok_or_else(|| kserr!(InvalidArgument, "certificate length overflows"))?;
    }
    Ok(CertificateChain::new(certs))
}

/// Attests the key of `node`: builds and signs the attestation certificate and returns the
/// full chain.
pub fn attest_key(
    engine: &dyn CryptoEngine,
    certs: &dyn DeviceCertStore,
    config: &KeyStoreConfig,
    node: &KeyNode,
    request: &ParamSet,
) -> Result<CertificateChain> {
    let mut spec = build_spec(node, request, certs, config)?;
    let attestation = sign_and_assemble(engine, &mut spec)?;
    let ca = certs.get(CertType::CaCert).context(ks_err!())?;
    let root = certs.get(CertType::RootCert).context(ks_err!())?;
    log::info!("Issued attestation certificate of {} bytes.", attestation.len());
    Ok(CertificateChain::new(vec![
        attestation,
        spec.device_cert.to_vec(),
        ca.to_vec(),
        root.to_vec(),
    ]))
}
