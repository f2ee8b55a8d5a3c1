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

//! Generates a root, intermediate and device certificate chain for attestation tests.

use anyhow::{Context, Result};
use hwkeystore::certs::ProvisionedCerts;
use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Name, X509NameBuilder, X509};
use std::fs;
use std::path::Path;

/// Kind of device attestation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKeyType {
    /// RSA 2048.
    Rsa,
    /// ECDSA P-256.
    Ec,
}

/// A freshly generated device certificate chain.
pub struct DeviceChain {
    /// Self-signed root.
    pub root: X509,
    /// Intermediate, signed by the root.
    pub ca: X509,
    /// Device certificate, signed by the intermediate.
    pub device: X509,
    /// Private key of the device certificate.
    pub device_key: PKey<Private>,
}

fn ec_key() -> Result<PKey<Private>> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    Ok(PKey::from_ec_key(EcKey::generate(&group)?)?)
}

fn name(common_name: &str) -> Result<X509Name> {
    let mut builder = X509NameBuilder::new()?;
    builder.append_entry_by_text("O", "hwkeystore test")?;
    builder.append_entry_by_text("CN", common_name)?;
    Ok(builder.build())
}

fn issue(
    subject: &str,
    key: &PKey<Private>,
    issuer: Option<(&X509, &PKey<Private>)>,
    serial: u32,
    is_ca: bool,
) -> Result<X509> {
    let mut builder = X509::builder()?;
    builder.set_version(2)?;
    let serial: BigNum = BigNum::from_u32(serial)?;
    let serial = Asn1Integer::from_bn(&serial)?;
    builder.set_serial_number(&serial)?;
    let subject = name(subject)?;
    builder.set_subject_name(&subject)?;
    match issuer {
        Some((cert, _)) => builder.set_issuer_name(cert.subject_name())?,
        None => builder.set_issuer_name(&subject)?,
    }
    builder.set_pubkey(key)?;
    let not_before: Asn1Time = Asn1Time::days_from_now(0)?;
    builder.set_not_before(&not_before)?;
    let not_after: Asn1Time = Asn1Time::days_from_now(3650)?;
    builder.set_not_after(&not_after)?;
    if is_ca {
        builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
        builder.append_extension(KeyUsage::new().critical().key_cert_sign().build()?)?;
    } else {
        let usage = KeyUsage::new().critical().key_cert_sign().digital_signature().build()?;
        builder.append_extension(usage)?;
    }
    let signing_key = issuer.map(|(_, k)| k).unwrap_or(key);
    builder.sign(signing_key, MessageDigest::sha256())?;
    Ok(builder.build())
}

impl DeviceChain {
    /// Generates a chain whose device key is of `key_type`. Root and intermediate use P-256.
    pub fn generate(key_type: DeviceKeyType) -> Result<Self> {
        let root_key = ec_key()?;
        let root = issue("Test Root", &root_key, None, 1, true).context("root")?;
        let ca_key = ec_key()?;
        let ca = issue("Test Intermediate", &ca_key, Some((&root, &root_key)), 2, true)
            .context("intermediate")?;
        let device_key = match key_type {
            DeviceKeyType::Rsa => PKey::from_rsa(Rsa::generate(2048)?)?,
            DeviceKeyType::Ec => ec_key()?,
        };
        let device = issue("Test Device", &device_key, Some((&ca, &ca_key)), 3, false)
            .context("device")?;
        Ok(Self { root, ca, device, device_key })
    }

    /// The device key as DER `RSAPrivateKey` or `ECPrivateKey`.
    pub fn device_key_der(&self) -> Result<Vec<u8>> {
        Ok(match self.device_key.rsa() {
            Ok(rsa) => rsa.private_key_to_der()?,
            Err(_) => self.device_key.ec_key()?.private_key_to_der()?,
        })
    }

    /// The chain as a certificate store.
    pub fn provisioned_certs(&self) -> Result<ProvisionedCerts> {
        ProvisionedCerts::new(
            &self.root.to_der()?,
            &self.ca.to_der()?,
            &self.device.to_der()?,
            &self.device_key_der()?,
        )
    }

    /// Writes the chain as PEM files into `dir`, in the layout `ProvisionedCerts` loads.
    pub fn write_pem(&self, dir: &Path) -> Result<()> {
        fs::write(dir.join("root.pem"), self.root.to_pem()?)?;
        fs::write(dir.join("ca.pem"), self.ca.to_pem()?)?;
        fs::write(dir.join("device.pem"), self.device.to_pem()?)?;
        fs::write(dir.join("device_key.pem"), self.device_key.private_key_to_pem_pkcs8()?)?;
        Ok(())
    }
}
