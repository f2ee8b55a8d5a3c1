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

//! Key parameters: the tags, tag types and typed values that describe a key and a request.
//!
//! Enumerations are modelled as transparent newtypes with associated constants so that values
//! read off the wire which we do not know about can still be carried and compared.

use std::fmt;

macro_rules! newtype_consts {
    ($(#[$m:meta])* $name:ident { $($(#[$cm:meta])* $c:ident = $v:expr,)* }) => {
        $(#[$m])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub u32);

        #[allow(missing_docs)]
        impl $name {
            $($(#[$cm])* pub const $c: $name = $name($v);)*
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                match *self {
                    $($name::$c => write!(f, "{}::{}", stringify!($name), stringify!($c)),)*
                    _ => write!(f, "{}({:#x})", stringify!($name), self.0),
                }
            }
        }
    };
}

pub(crate) use newtype_consts;

newtype_consts!(
    /// Key algorithm.
    Algorithm {
        RSA = 1,
        ECC = 2,
        DSA = 3,
        AES = 20,
        HMAC = 50,
        HKDF = 51,
        PBKDF2 = 52,
        ECDH = 100,
        X25519 = 101,
        ED25519 = 102,
        DH = 103,
    }
);

newtype_consts!(
    /// Key purposes. Unlike the other enumerations, purposes combine as a bit mask.
    KeyPurpose {
        ENCRYPT = 1,
        DECRYPT = 2,
        SIGN = 4,
        VERIFY = 8,
        DERIVE = 16,
        WRAP = 32,
        UNWRAP = 64,
        MAC = 128,
        AGREE = 256,
    }
);

impl KeyPurpose {
    /// True if every bit of `other` is set in `self`.
    pub fn contains(&self, other: KeyPurpose) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for KeyPurpose {
    type Output = KeyPurpose;

    fn bitor(self, rhs: KeyPurpose) -> KeyPurpose {
        KeyPurpose(self.0 | rhs.0)
    }
}

newtype_consts!(
    /// Message digest.
    Digest {
        NONE = 0,
        MD5 = 1,
        SHA1 = 10,
        SHA224 = 11,
        SHA256 = 12,
        SHA384 = 13,
        SHA512 = 14,
    }
);

newtype_consts!(
    /// Padding mode.
    PaddingMode {
        NONE = 0,
        OAEP = 1,
        PSS = 2,
        PKCS1_V1_5 = 3,
        PKCS5 = 4,
        PKCS7 = 5,
    }
);

newtype_consts!(
    /// Block cipher mode.
    BlockMode {
        ECB = 1,
        CBC = 2,
        CTR = 3,
        OFB = 4,
        CCM = 31,
        GCM = 32,
    }
);

newtype_consts!(
    /// How a key entered the store. Recorded in the key blob.
    KeyFlag {
        IMPORT = 1,
        GENERATE = 2,
        AGREE = 3,
        DERIVE = 4,
    }
);

newtype_consts!(
    /// Encoding of a parameter value, stored in the upper nibble of a tag.
    TagType {
        INVALID = 0,
        UINT = 2 << 28,
        ULONG = 3 << 28,
        BOOL = 4 << 28,
        BYTES = 5 << 28,
    }
);

const TAG_TYPE_MASK: u32 = 0xf000_0000;

newtype_consts!(
    /// Parameter tag. The upper nibble holds the `TagType`.
    Tag {
        INVALID = 0,
        ALGORITHM = (2 << 28) | 1,
        PURPOSE = (2 << 28) | 2,
        KEY_SIZE = (2 << 28) | 3,
        DIGEST = (2 << 28) | 4,
        PADDING = (2 << 28) | 5,
        BLOCK_MODE = (2 << 28) | 6,
        KEY_TYPE = (2 << 28) | 7,
        ASSOCIATED_DATA = (5 << 28) | 8,
        NONCE = (5 << 28) | 9,
        IV = (5 << 28) | 10,
        AE_TAG = (5 << 28) | 11,
        SALT = (5 << 28) | 12,
        INFO = (5 << 28) | 13,
        ITERATION = (2 << 28) | 14,
        DERIVE_KEY_SIZE = (2 << 28) | 15,
        AGREE_PUBLIC_KEY = (5 << 28) | 16,
        ATTESTATION_CHALLENGE = (5 << 28) | 501,
        ATTESTATION_APPLICATION_ID = (5 << 28) | 502,
        ATTESTATION_ID_BRAND = (5 << 28) | 503,
        ATTESTATION_ID_DEVICE = (5 << 28) | 504,
        ATTESTATION_ID_PRODUCT = (5 << 28) | 505,
        ATTESTATION_ID_SERIAL = (5 << 28) | 506,
        ATTESTATION_ID_IMEI = (5 << 28) | 507,
        ATTESTATION_ID_MEID = (5 << 28) | 508,
        ATTESTATION_ID_MANUFACTURER = (5 << 28) | 509,
        ATTESTATION_ID_MODEL = (5 << 28) | 510,
        ATTESTATION_ID_ALIAS = (5 << 28) | 511,
        ATTESTATION_ID_SOCID = (5 << 28) | 512,
        ATTESTATION_ID_UDID = (5 << 28) | 513,
        ATTESTATION_ID_SEC_LEVEL_INFO = (5 << 28) | 514,
        ATTESTATION_ID_VERSION_INFO = (5 << 28) | 515,
        KEY_VERSION = (2 << 28) | 10001,
        PROCESS_NAME = (5 << 28) | 10002,
        KEY_FLAG = (2 << 28) | 10003,
        USER_ID = (2 << 28) | 10004,
        KEY_ALIAS = (5 << 28) | 10005,
        KEY = (5 << 28) | 10006,
    }
);

impl Tag {
    /// Get the [`TagType`] for a [`Tag`].
    pub fn tag_type(&self) -> TagType {
        TagType(self.0 & TAG_TYPE_MASK)
    }
}

/// The value of a key parameter.
#[derive(Clone, PartialEq, Eq)]
pub enum KeyParameterValue {
    /// `TagType::UINT`; enumerations are carried as their raw value.
    Uint(u32),
    /// `TagType::ULONG`.
    Ulong(u64),
    /// `TagType::BOOL`.
    Bool(bool),
    /// `TagType::BYTES`.
    Blob(Vec<u8>),
}

impl fmt::Debug for KeyParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Uint(v) => write!(f, "Uint({v})"),
            Self::Ulong(v) => write!(f, "Ulong({v})"),
            Self::Bool(v) => write!(f, "Bool({v})"),
            // Blobs may hold key bytes.
            Self::Blob(v) => write!(f, "Blob(len {})", v.len()),
        }
    }
}

/// A single tag/value pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyParameter {
    /// Key parameter tag.
    pub tag: Tag,
    /// Key parameter value.
    pub value: KeyParameterValue,
}

impl KeyParameter {
    /// Creates a parameter.
    pub fn new(tag: Tag, value: KeyParameterValue) -> Self {
        Self { tag, value }
    }

    /// True if the value variant matches the type encoded in the tag.
    pub fn is_well_typed(&self) -> bool {
        matches!(
            (self.tag.tag_type(), &self.value),
            (TagType::UINT, KeyParameterValue::Uint(_))
                | (TagType::ULONG, KeyParameterValue::Ulong(_))
                | (TagType::BOOL, KeyParameterValue::Bool(_))
                | (TagType::BYTES, KeyParameterValue::Blob(_))
        )
    }
}
