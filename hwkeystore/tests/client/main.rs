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

pub mod aes_key_tests;
pub mod attest_key_tests;
pub mod authorizations_tests;
pub mod ec_key_tests;
pub mod hmac_key_tests;
pub mod import_keys_tests;
pub mod key_agreement_tests;
pub mod key_derivation_tests;
pub mod operation_tests;
pub mod test_utils;
