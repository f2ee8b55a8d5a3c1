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

//! Access to the provisioned device certificates and the device attestation key.

use crate::ks_err;
use crate::kserr;
use anyhow::{Context, Result};
use hwkeystore_crypto::ZVec;
use openssl::pkey::{Id, PKey};
use openssl::x509::X509;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// The items a device certificate store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertType {
    /// Self-signed root certificate.
    RootCert,
    /// Intermediate certificate, signed by the root.
    CaCert,
    /// Device certificate, signed by the intermediate.
    DeviceCert,
    /// Private key of the device certificate, DER `RSAPrivateKey` or `ECPrivateKey`.
    DeviceKey,
}

impl CertType {
    /// File name stem used by [`ProvisionedCerts::load_from_dir`].
    pub fn file_stem(&self) -> &'static str {
        match self {
            Self::RootCert => "root",
            Self::CaCert => "ca",
            Self::DeviceCert => "device",
            Self::DeviceKey => "device_key",
        }
    }
}

/// Source of the device certificate chain and key.
pub trait DeviceCertStore: Send + Sync {
    /// Returns a fresh copy of the requested item. Callers drop it as soon as they are done, so
    /// the device key never outlives one request.
    fn get(&self, cert_type: CertType) -> Result<ZVec>;
}

/// Device certificates held in memory.
pub struct ProvisionedCerts {
    root: ZVec,
    ca: ZVec,
    device: ZVec,
    device_key: ZVec,
}

impl std::fmt::Debug for ProvisionedCerts {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ProvisionedCerts")
            .field("root", &self.root.len())
            .field("ca", &self.ca.len())
            .field("device", &self.device.len())
            .finish_non_exhaustive()
    }
}

impl ProvisionedCerts {
    /// Creates a store from DER certificates and a DER device key.
    pub fn new(root: &[u8], ca: &[u8], device: &[u8], device_key: &[u8]) -> Result<Self> {
        for (name, der) in [("root", root), ("ca", ca), ("device", device), ("key", device_key)] {
            if der.is_empty() {
                return Err(kserr!(InvalidArgument, "empty {name} item"));
            }
        }
        Ok(Self {
            root: ZVec::try_from(root).context(ks_err!())?,
            ca: ZVec::try_from(ca).context(ks_err!())?,
            device: ZVec::try_from(device).context(ks_err!())?,
            device_key: ZVec::try_from(device_key).context(ks_err!())?,
        })
    }

    /// Loads `root`, `ca`, `device` and `device_key` from `dir`. Each item is read from
    /// `<stem>.der`, or from `<stem>.pem` if there is no DER file.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let root = read_item(dir, CertType::RootCert)?;
        let ca = read_item(dir, CertType::CaCert)?;
        let device = read_item(dir, CertType::DeviceCert)?;
        let device_key = read_item(dir, CertType::DeviceKey)?;
        log::info!("Loaded device certificates from {}.", dir.display());
        Self::new(&root, &ca, &device, &device_key)
    }
}

impl DeviceCertStore for ProvisionedCerts {
    fn get(&self, cert_type: CertType) -> Result<ZVec> {
        let item = match cert_type {
            CertType::RootCert => &self.root,
            CertType::CaCert => &self.ca,
            CertType::DeviceCert => &self.device,
            CertType::DeviceKey => &self.device_key,
        };
        item.try_clone().context(ks_err!("Failed to copy {:?}.", cert_type))
    }
}

fn read_file(path: &Path) -> Result<Option<ZVec>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(ZVec::try_from(data).context(ks_err!())?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).context(ks_err!("Failed to read {}.", path.display())),
    }
}

fn read_item(dir: &Path, cert_type: CertType) -> Result<ZVec> {
    let stem = cert_type.file_stem();
    if let Some(der) = read_file(&dir.join(format!("{stem}.der")))? {
        return Ok(der);
    }
    match read_file(&dir.join(format!("{stem}.pem")))? {
        Some(pem) => pem_to_der(cert_type, &pem),
        None => Err(kserr!(BadState, "{stem} is not provisioned in {}", dir.display())),
    }
}

/// Converts a PEM certificate or private key to the DER form the store hands out.
fn pem_to_der(cert_type: CertType, pem: &[u8]) -> Result<ZVec> {
    let der = if cert_type == CertType::DeviceKey {
        let pkey = PKey::private_key_from_pem(pem)
            .map_err(|e| kserr!(InvalidArgument, "malformed device key PEM: {e}"))?;
        let der = match pkey.id() {
            Id::RSA => pkey.rsa().and_then(|rsa| rsa.private_key_to_der()),
            Id::EC => pkey.ec_key().and_then(|ec| ec.private_key_to_der()),
            id => return Err(kserr!(NotSupported, "unsupported device key type {id:?}")),
        };
        der.map_err(|e| kserr!(CryptoEngineError, "failed to encode device key: {e}"))?
    } else {
        X509::from_pem(pem)
            .and_then(|cert| cert.to_der())
            .map_err(|e| kserr!(InvalidArgument, "malformed {cert_type:?} PEM: {e}"))?
    };
    ZVec::try_from(der).context(ks_err!())
}
