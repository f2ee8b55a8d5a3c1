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

use crate::error::Error;
use std::convert::TryFrom;
use std::fmt;
use std::ops::{Deref, DerefMut};
use zeroize::Zeroize;

/// A fixed size u8 vector that is zeroed when dropped. Use this type for buffers that hold key
/// material or any other plaintext secret.
#[derive(Default)]
pub struct ZVec {
    elems: Box<[u8]>,
    len: usize,
}

impl ZVec {
    /// Create a ZVec with the given size, filled with zeros.
    pub fn new(size: usize) -> Result<Self, Error> {
        let mut v: Vec<u8> = Vec::new();
        v.try_reserve_exact(size).map_err(|_| Error::AllocationFailed(size))?;
        v.resize(size, 0);
        Ok(Self { elems: v.into_boxed_slice(), len: size })
    }

    /// Reduce the length to the given value. Does nothing if that length is greater than the
    /// length of the vector. Note that it still zeroes out the entire vector when dropped.
    pub fn reduce_len(&mut self, len: usize) {
        if len <= self.elems.len() {
            self.len = len;
        }
    }

    /// Attempts to make a clone of the ZVec. This may fail due to allocation failure.
    pub fn try_clone(&self) -> Result<Self, Error> {
        let mut result = Self::new(self.len())?;
        result[..].copy_from_slice(&self[..]);
        Ok(result)
    }
}

impl Drop for ZVec {
    fn drop(&mut self) {
        self.elems.zeroize();
    }
}

impl Deref for ZVec {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.elems[0..self.len]
    }
}

impl DerefMut for ZVec {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.elems[0..self.len]
    }
}

impl PartialEq for ZVec {
    fn eq(&self, other: &Self) -> bool {
        self[..] == other[..]
    }
}

impl Eq for ZVec {}

impl fmt::Debug for ZVec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.elems.is_empty() {
            write!(f, "Zvec empty")
        } else {
            write!(f, "Zvec size: {} [ Sensitive information redacted ]", self.len)
        }
    }
}

impl TryFrom<&[u8]> for ZVec {
    type Error = Error;

    fn try_from(v: &[u8]) -> Result<Self, Self::Error> {
        let mut z = ZVec::new(v.len())?;
        if !v.is_empty() {
            z.clone_from_slice(v);
        }
        Ok(z)
    }
}

impl TryFrom<Vec<u8>> for ZVec {
    type Error = Error;

    fn try_from(mut v: Vec<u8>) -> Result<Self, Self::Error> {
        let len = v.len();
        // Take ownership of the allocation so no unzeroed copy is left behind.
        v.resize(v.capacity(), 0);
        let elems = v.into_boxed_slice();
        Ok(Self { elems, len })
    }
}
