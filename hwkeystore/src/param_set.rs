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

//! An ordered collection of key parameters and its serialized form.

use crate::key_parameter::{KeyParameter, KeyParameterValue, Tag, TagType};
use crate::kserr;
use anyhow::Result;
use std::mem::size_of;

/// Error macro.
macro_rules! paramerr {
    { $($arg:tt)+ } => {
        kserr!(InvalidArgument, $($arg)+)
    };
}

/// Size of the collection header: total size and parameter count.
pub(crate) const HEADER_SIZE: usize = 2 * size_of::<u32>();
/// Size of one serialized parameter: tag and an 8-byte value slot.
pub(crate) const ENTRY_SIZE: usize = size_of::<u32>() + size_of::<u64>();
/// Upper bound on the number of parameters in a collection.
pub const MAX_PARAM_COUNT: usize = 512;

/// An ordered collection of `KeyParameter`s.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParamSet {
    params: Vec<KeyParameter>,
}

impl ParamSet {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a parameter.
    pub fn push(&mut self, param: KeyParameter) {
        self.params.push(param);
    }

    /// Appends a tag/value pair and returns self for chaining.
    pub fn with(mut self, tag: Tag, value: KeyParameterValue) -> Self {
        self.push(KeyParameter { tag, value });
        self
    }

    /// Appends all parameters of `other`.
    pub fn extend_from(&mut self, other: &ParamSet) {
        self.params.extend_from_slice(&other.params);
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// True if there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Iterates over the parameters in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &KeyParameter> {
        self.params.iter()
    }

    /// The parameters as a slice.
    pub fn as_slice(&self) -> &[KeyParameter] {
        &self.params
    }

    /// The last parameter, if any.
    pub fn last(&self) -> Option<&KeyParameter> {
        self.params.last()
    }

    /// Get the `KeyParameterValue` associated with the first occurrence of a tag.
    pub fn get(&self, tag: Tag) -> Option<&KeyParameterValue> {
        self.params.iter().find_map(|kp| if kp.tag == tag { Some(&kp.value) } else { None })
    }

    /// True if the tag is present.
    pub fn contains(&self, tag: Tag) -> bool {
        self.get(tag).is_some()
    }

    /// Get a `TagType::UINT` value. A present tag of another type is an error.
    pub fn get_uint(&self, tag: Tag) -> Result<Option<u32>> {
        match self.get(tag) {
            None => Ok(None),
            Some(KeyParameterValue::Uint(v)) => Ok(Some(*v)),
            Some(v) => Err(paramerr!("{tag:?} holds {v:?}, expected an integer")),
        }
    }

    /// Get a `TagType::UINT` value, failing if it is absent.
    pub fn require_uint(&self, tag: Tag) -> Result<u32> {
        self.get_uint(tag)?.ok_or_else(|| paramerr!("missing {tag:?}"))
    }

    /// Get a `TagType::BYTES` value. A present tag of another type is an error.
    pub fn get_blob(&self, tag: Tag) -> Result<Option<&[u8]>> {
        match self.get(tag) {
            None => Ok(None),
            Some(KeyParameterValue::Blob(v)) => Ok(Some(v)),
            Some(v) => Err(paramerr!("{tag:?} holds {v:?}, expected bytes")),
        }
    }

    /// Get a `TagType::BYTES` value, failing if it is absent.
    pub fn require_blob(&self, tag: Tag) -> Result<&[u8]> {
        self.get_blob(tag)?.ok_or_else(|| paramerr!("missing {tag:?}"))
    }

    /// Serialize the collection:
    ///
    /// ```text
    /// [0..4]              Total size T of the serialized collection, little endian.
    /// [4..8]              Count N of the number of parameters, little endian.
    /// [8..8+12N]          Parameters one after another.
    /// [8+12N..T]    (*)   Concatenated contents of each `TagType::BYTES` parameter, in order.
    /// ```
    ///
    /// Individual parameters are serialized as:
    ///
    /// ```text
    /// [0..4]              Tag number, little endian.
    /// Followed by an 8-byte slot depending on the tag's `TagType`; all integers little endian:
    ///   [4..5]            Bool value (`TagType::BOOL`), rest of the slot zero
    ///   [4..8]            u32 value (`TagType::UINT`), rest of the slot zero
    ///   [4..12]           u64 value (`TagType::ULONG`)
    ///   [4..8] + [8..12]  Size + offset from the start of the collection of data in (*)
    /// ```
    pub fn serialize(&self) -> Result<Vec<u8>> {
        if self.params.len() > MAX_PARAM_COUNT {
            return Err(paramerr!("too many parameters ({})", self.params.len()));
        }
        let entries_size = self.params.len() * ENTRY_SIZE;
        let blob_size = self.params.iter().try_fold(0usize, |acc, p| match &p.value {
            KeyParameterValue::Blob(v) => {
                acc.checked_add(v.len()).ok_or_else(|| paramerr!("blob size overflow"))
            }
            _ => Ok(acc),
        })?;
        let total = (HEADER_SIZE + entries_size)
            .checked_add(blob_size)
            .filter(|t| *t <= u32::MAX as usize)
            .ok_or_else(|| paramerr!("collection too large"))?;

        let mut result = Vec::with_capacity(total);
        result.extend_from_slice(&(total as u32).to_le_bytes());
        result.extend_from_slice(&(self.params.len() as u32).to_le_bytes());

        let mut blob_offset = HEADER_SIZE + entries_size;
        for param in &self.params {
            if !param.is_well_typed() {
                return Err(paramerr!("unexpected value {:?} for tag {:?}", param.value, param.tag));
            }
            result.extend_from_slice(&param.tag.0.to_le_bytes());
            match &param.value {
                KeyParameterValue::Uint(v) => {
                    result.extend_from_slice(&v.to_le_bytes());
                    result.extend_from_slice(&[0u8; 4]);
                }
                KeyParameterValue::Ulong(v) => result.extend_from_slice(&v.to_le_bytes()),
                KeyParameterValue::Bool(v) => {
                    result.push(u8::from(*v));
                    result.extend_from_slice(&[0u8; 7]);
                }
                KeyParameterValue::Blob(v) => {
                    result.extend_from_slice(&(v.len() as u32).to_le_bytes());
                    result.extend_from_slice(&(blob_offset as u32).to_le_bytes());
                    blob_offset += v.len();
                }
            }
        }
        for param in &self.params {
            if let KeyParameterValue::Blob(v) = &param.value {
                result.extend_from_slice(v);
            }
        }
        Ok(result)
    }

    /// Deserialize a collection produced by [`ParamSet::serialize`]. The declared total size must
    /// equal the length of `data`, and blob data must follow the parameters without gaps.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let mut cursor = data;
        let total = consume_u32(&mut cursor)? as usize;
        if total != data.len() {
            return Err(paramerr!(
                "declared size {} does not match data (len={})",
                total,
                data.len()
            ));
        }
        let count = consume_u32(&mut cursor)? as usize;
        if count > MAX_PARAM_COUNT {
            return Err(paramerr!("too many parameters ({count})"));
        }
        let blob_start = count
            .checked_mul(ENTRY_SIZE)
            .and_then(|s| s.checked_add(HEADER_SIZE))
            .ok_or_else(|| paramerr!("parameter count overflow"))?;
        if blob_start > total {
            return Err(paramerr!("size mismatch 8+12*{} > {}", count, total));
        }

        let mut next_blob_offset = blob_start;
        let mut params = Vec::with_capacity(count);
        for _i in 0..count {
            let tag = Tag(consume_u32(&mut cursor)?);
            let value = match tag.tag_type() {
                TagType::UINT => {
                    let v = consume_u32(&mut cursor)?;
                    consume_u32(&mut cursor)?;
                    KeyParameterValue::Uint(v)
                }
                TagType::ULONG => KeyParameterValue::Ulong(consume_u64(&mut cursor)?),
                TagType::BOOL => {
                    let v = consume_u64(&mut cursor)?;
                    match v {
                        0 => KeyParameterValue::Bool(false),
                        1 => KeyParameterValue::Bool(true),
                        _ => return Err(paramerr!("bool value other than 0 or 1 encountered")),
                    }
                }
                TagType::BYTES => {
                    KeyParameterValue::Blob(consume_blob(&mut cursor, &mut next_blob_offset, data)?)
                }
                _ => return Err(paramerr!("invalid tag {:?} encountered", tag)),
            };
            params.push(KeyParameter { tag, value });
        }
        if next_blob_offset != total {
            return Err(paramerr!("{} trailing bytes after blob data", total - next_blob_offset));
        }
        Ok(Self { params })
    }
}

impl From<Vec<KeyParameter>> for ParamSet {
    fn from(params: Vec<KeyParameter>) -> Self {
        Self { params }
    }
}

impl<'a> IntoIterator for &'a ParamSet {
    type Item = &'a KeyParameter;
    type IntoIter = std::slice::Iter<'a, KeyParameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.params.iter()
    }
}

/// Retrieve a little-endian `u32` from the start of the given slice, if possible.
fn consume_u32(data: &mut &[u8]) -> Result<u32> {
    const LEN: usize = size_of::<u32>();
    if data.len() < LEN {
        return Err(paramerr!("failed to find {LEN} bytes"));
    }
    let chunk: [u8; LEN] = data[..LEN].try_into().unwrap(); // safe: just checked
    *data = &(*data)[LEN..];
    Ok(u32::from_le_bytes(chunk))
}

/// Retrieve a little-endian `u64` from the start of the given slice, if possible.
fn consume_u64(data: &mut &[u8]) -> Result<u64> {
    const LEN: usize = size_of::<u64>();
    if data.len() < LEN {
        return Err(paramerr!("failed to find {LEN} bytes"));
    }
    let chunk: [u8; LEN] = data[..LEN].try_into().unwrap(); // safe: just checked
    *data = &(*data)[LEN..];
    Ok(u64::from_le_bytes(chunk))
}

/// Retrieve the contents of a tag of `TagType::BYTES`. A length and offset are read from `data`
/// (and consumed). The offset refers to a location in the whole collection `all`, and is expected
/// to be the next unconsumed chunk of blob data as indicated by `next_blob_offset`.
fn consume_blob(data: &mut &[u8], next_blob_offset: &mut usize, all: &[u8]) -> Result<Vec<u8>> {
    let data_len = consume_u32(data)? as usize;
    let data_offset = consume_u32(data)? as usize;
    if data_offset != *next_blob_offset {
        return Err(paramerr!("got blob offset {} instead of {}", data_offset, next_blob_offset));
    }
    let end = data_offset
        .checked_add(data_len)
        .filter(|end| *end <= all.len())
        .ok_or_else(|| {
            paramerr!(
                "blob at offset [{}..{}+{}] goes beyond collection size {}",
                data_offset,
                data_offset,
                data_len,
                all.len(),
            )
        })?;
    *next_blob_offset = end;
    Ok(all[data_offset..end].to_vec())
}
