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

//! This crate implements the key protection and attestation core of a hardware backed key
//! store: authenticated key blobs, key nodes and multi-stage operations, usage policy, and key
//! attestation certificate chains.

#[macro_use]
pub mod ks_err;

pub mod asn1;
pub mod attestation;
pub mod authorization;
pub mod certs;
pub mod config;
pub mod engine;
pub mod error;
pub mod globals;
pub mod key_blob;
pub mod key_material;
pub mod key_node;
pub mod key_parameter;
pub mod keystore;
pub mod openssl_engine;
pub mod param_set;
