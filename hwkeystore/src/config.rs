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

//! Tunables of the key store.

use std::path::PathBuf;
use std::str::FromStr;

/// Environment variable overriding [`KeyStoreConfig::pbkdf2_iterations`].
pub const ENV_PBKDF2_ITERATIONS: &str = "HWKEYSTORE_PBKDF2_ITERATIONS";
/// Environment variable overriding [`KeyStoreConfig::attestation_validity_years`].
pub const ENV_ATTEST_VALIDITY_YEARS: &str = "HWKEYSTORE_ATTEST_VALIDITY_YEARS";
/// Environment variable setting [`KeyStoreConfig::cert_dir`].
pub const ENV_CERT_DIR: &str = "HWKEYSTORE_CERT_DIR";

/// Iteration count used when deriving key blob protection keys.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 1000;
/// Validity period of attestation certificates.
pub const DEFAULT_ATTEST_VALIDITY_YEARS: u32 = 10;
/// Alignment of certificates in a formatted chain.
pub const DEFAULT_CERT_ALIGNMENT: usize = 4;

/// Key store configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyStoreConfig {
    /// PBKDF2 iterations for key blob protection keys. Must be non zero.
    pub pbkdf2_iterations: u32,
    /// Validity of attestation certificates in years. Must be non zero.
    pub attestation_validity_years: u32,
    /// Certificates in a formatted chain are padded to a multiple of this.
    pub cert_alignment: usize,
    /// Directory holding the provisioned device certificates, if any.
    pub cert_dir: Option<PathBuf>,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
            attestation_validity_years: DEFAULT_ATTEST_VALIDITY_YEARS,
            cert_alignment: DEFAULT_CERT_ALIGNMENT,
            cert_dir: None,
        }
    }
}

impl KeyStoreConfig {
    /// Builds the configuration from the process environment. Unset variables keep their default;
    /// malformed ones are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`KeyStoreConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();
        Self {
            pbkdf2_iterations: read_non_zero(&lookup, ENV_PBKDF2_ITERATIONS)
                .unwrap_or(default.pbkdf2_iterations),
            attestation_validity_years: read_non_zero(&lookup, ENV_ATTEST_VALIDITY_YEARS)
                .unwrap_or(default.attestation_validity_years),
            cert_alignment: default.cert_alignment,
            cert_dir: lookup(ENV_CERT_DIR).filter(|d| !d.is_empty()).map(PathBuf::from),
        }
    }
}

fn read_non_zero<F, T>(lookup: &F, name: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Default + PartialEq,
{
    let value = lookup(name)?;
    match value.trim().parse::<T>() {
        Ok(v) if v != T::default() => Some(v),
        _ => {
            log::warn!("Ignoring invalid value {:?} of {}.", value, name);
            None
        }
    }
}
