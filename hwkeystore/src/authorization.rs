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

//! This module decides whether a key may be used for a request.
//!
//! Every operation class has a fixed list of tags. For each of them the value recorded when the
//! key was created is compared with the value of the request: purposes must be a non-empty
//! subset of the stored purposes, everything else must be equal.

use crate::key_parameter::{newtype_consts, Algorithm, KeyPurpose, Tag};
use crate::kserr;
use crate::param_set::ParamSet;
use anyhow::Result;

newtype_consts!(
    /// Operation class a usage check is made for.
    AuthId {
        SIGN_VERIFY_RSA = 1,
        SIGN_VERIFY_ECC = 2,
        SIGN_VERIFY_ED25519 = 3,
        SYM_CIPHER = 4,
        ASYM_CIPHER = 5,
        MAC = 6,
        DERIVE = 7,
        AGREE = 8,
    }
);

/// The tags compared for each operation class.
const AUTH_POLICIES: &[(AuthId, &[Tag])] = &[
    (AuthId::SIGN_VERIFY_RSA, &[Tag::ALGORITHM, Tag::PURPOSE, Tag::PADDING, Tag::DIGEST]),
    (AuthId::SIGN_VERIFY_ECC, &[Tag::ALGORITHM, Tag::PURPOSE, Tag::DIGEST]),
    (AuthId::SIGN_VERIFY_ED25519, &[Tag::ALGORITHM, Tag::PURPOSE]),
    (AuthId::SYM_CIPHER, &[Tag::ALGORITHM, Tag::BLOCK_MODE, Tag::PADDING, Tag::PURPOSE]),
    (AuthId::ASYM_CIPHER, &[Tag::ALGORITHM, Tag::PURPOSE, Tag::PADDING, Tag::DIGEST]),
    (AuthId::MAC, &[Tag::ALGORITHM, Tag::PURPOSE, Tag::DIGEST]),
    (AuthId::DERIVE, &[Tag::ALGORITHM, Tag::PURPOSE, Tag::DIGEST]),
    (AuthId::AGREE, &[Tag::ALGORITHM, Tag::PURPOSE]),
];

impl AuthId {
    /// The operation class of `purpose` on a key of `algorithm`, if there is one.
    pub fn for_usage(algorithm: Algorithm, purpose: KeyPurpose) -> Option<AuthId> {
        let sign = KeyPurpose::SIGN | KeyPurpose::VERIFY;
        let cipher = KeyPurpose::ENCRYPT | KeyPurpose::DECRYPT;
        let id = match algorithm {
            Algorithm::RSA if sign.contains(purpose) => AuthId::SIGN_VERIFY_RSA,
            Algorithm::RSA if cipher.contains(purpose) => AuthId::ASYM_CIPHER,
            Algorithm::ECC if sign.contains(purpose) => AuthId::SIGN_VERIFY_ECC,
            Algorithm::ED25519 if sign.contains(purpose) => AuthId::SIGN_VERIFY_ED25519,
            Algorithm::AES if cipher.contains(purpose) => AuthId::SYM_CIPHER,
            Algorithm::HMAC if purpose == KeyPurpose::MAC => AuthId::MAC,
            Algorithm::AES | Algorithm::HMAC if purpose == KeyPurpose::DERIVE => AuthId::DERIVE,
            Algorithm::ECC | Algorithm::X25519 if purpose == KeyPurpose::AGREE => AuthId::AGREE,
            _ => return None,
        };
        if purpose.0 == 0 {
            return None;
        }
        Some(id)
    }
}

/// Checks that the request may use a key with the given parameters for the operation class
/// `auth_id`.
pub fn check_key_usage(auth_id: AuthId, key_params: &ParamSet, request: &ParamSet) -> Result<()> {
    let tags = AUTH_POLICIES
        .iter()
        .find_map(|(id, tags)| if *id == auth_id { Some(*tags) } else { None })
        .ok_or_else(|| kserr!(BadState, "no usage policy for {:?}", auth_id))?;

    for tag in tags {
        let stored = key_params
            .get_uint(*tag)?
            .ok_or_else(|| kserr!(InvalidArgument, "key has no {:?}", tag))?;
        let requested = request
            .get_uint(*tag)?
            .ok_or_else(|| kserr!(InvalidArgument, "request has no {:?}", tag))?;
        let allowed = if *tag == Tag::PURPOSE {
            requested != 0 && KeyPurpose(stored).contains(KeyPurpose(requested))
        } else {
            stored == requested
        };
        if !allowed {
            return Err(kserr!(
                InvalidArgument,
                "{:?} not authorized: key has {:#x}, request has {:#x}",
                tag,
                stored,
                requested
            ));
        }
    }
    Ok(())
}
