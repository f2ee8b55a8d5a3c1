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

//! A minimal DER encoder and decoder.
//!
//! Only the handful of universal types needed for attestation certificates are understood:
//! BOOLEAN, INTEGER, BIT STRING, OCTET STRING, OBJECT IDENTIFIER (as pre-encoded bytes),
//! UTF8String, UTCTime, SEQUENCE and the context-specific constructed tags [0] and [3]. Lengths
//! are limited to two length octets.
//!
//! Encoding goes through [`DerWriter`], a cursor over a caller-provided buffer that checks
//! capacity before writing anything. Decoding hands out borrowed [`Asn1Object`] views and never
//! copies.

use crate::ks_err;
use crate::kserr;
use anyhow::{Context, Result};

/// BOOLEAN
pub const TAG_BOOLEAN: u32 = 0x01;
/// INTEGER
pub const TAG_INTEGER: u32 = 0x02;
/// BIT STRING
pub const TAG_BIT_STRING: u32 = 0x03;
/// OCTET STRING
pub const TAG_OCTET_STRING: u32 = 0x04;
/// OBJECT IDENTIFIER
pub const TAG_OID: u32 = 0x06;
/// UTF8String
pub const TAG_UTF8_STRING: u32 = 0x0c;
/// UTCTime
pub const TAG_UTC_TIME: u32 = 0x17;
/// SEQUENCE (constructed)
pub const TAG_SEQUENCE: u32 = 0x30;
/// Context-specific constructed [0]
pub const TAG_CONTEXT_0: u32 = 0xa0;
/// Context-specific constructed [3]
pub const TAG_CONTEXT_3: u32 = 0xa3;
/// Not a DER tag: the value is already encoded and is copied without a header.
pub const TAG_RAW: u32 = 0xff00_0000;

/// Largest content length the encoder accepts.
pub const MAX_CONTENT_LEN: usize = 0x10000 - 0x100;
/// Largest header the encoder produces: tag, 0x82 and two length octets.
pub const MAX_HEADER_LEN: usize = 4;

/// DER BOOLEAN true.
pub const DER_TRUE: &[u8] = &[
    0x01, // BOOLEAN
    0x01, // len
    0xff, // TRUE
];

/// Decoding errors that callers may want to distinguish from malformed input.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone, Copy)]
pub enum Asn1Error {
    /// The element at the cursor is well formed but carries another tag.
    #[error("Asn1Error::UnexpectedTag: expected {expected:#04x}, found {found:#04x}")]
    UnexpectedTag {
        /// The tag the caller asked for.
        expected: u8,
        /// The tag found in the data.
        found: u8,
    },
}

/// A decoded TLV. All slices borrow from the decoded buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Asn1Object<'a> {
    /// The identifier octet.
    pub tag: u8,
    /// Tag and length octets.
    pub header: &'a [u8],
    /// Content octets.
    pub value: &'a [u8],
    /// Header followed by content.
    pub raw: &'a [u8],
}

impl<'a> Asn1Object<'a> {
    /// The magnitude of a non-negative INTEGER, without the sign padding byte.
    pub fn unsigned_integer(&self) -> Result<&'a [u8]> {
        if self.tag as u32 != TAG_INTEGER {
            return Err(kserr!(InvalidArgument, "tag {:#04x} is not an INTEGER", self.tag));
        }
        match self.value {
            [] => Err(kserr!(InvalidArgument, "empty INTEGER")),
            [first, ..] if first & 0x80 != 0 => Err(kserr!(InvalidArgument, "negative INTEGER")),
            [0, rest @ ..] if !rest.is_empty() => Ok(rest),
            v => Ok(v),
        }
    }

    /// The value of a small non-negative INTEGER.
    pub fn integer_u32(&self) -> Result<u32> {
        let bytes = self.unsigned_integer()?;
        if bytes.len() > 4 {
            return Err(kserr!(InvalidArgument, "INTEGER of {} bytes does not fit", bytes.len()));
        }
        Ok(bytes.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32))
    }

    /// The content of a BIT STRING without its unused-bits octet, which must be zero.
    pub fn bit_string_bytes(&self) -> Result<&'a [u8]> {
        if self.tag as u32 != TAG_BIT_STRING {
            return Err(kserr!(InvalidArgument, "tag {:#04x} is not a BIT STRING", self.tag));
        }
        match self.value {
            [0, rest @ ..] => Ok(rest),
            _ => Err(kserr!(InvalidArgument, "BIT STRING with unused bits")),
        }
    }
}

/// A region of a [`DerWriter`] buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Offset of the first byte.
    pub offset: usize,
    /// Number of bytes.
    pub len: usize,
}

impl Span {
    /// Offset one past the last byte.
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Returns the content prefix the encoder adds and the slice of `value` it keeps.
fn content_parts(tag: u32, value: &[u8]) -> Result<(&'static [u8], &[u8])> {
    match tag {
        TAG_INTEGER => {
            let kept = match value.iter().position(|b| *b != 0) {
                Some(i) => &value[i..],
                None if !value.is_empty() => &value[value.len() - 1..],
                None => return Err(kserr!(InvalidArgument, "empty INTEGER value")),
            };
            let pad: &'static [u8] = if kept[0] & 0x80 != 0 { &[0x00] } else { &[] };
            Ok((pad, kept))
        }
        TAG_BIT_STRING => Ok((&[0x00], value)),
        _ => Ok((&[], value)),
    }
}

/// Encodes a DER tag and length into `out`, returning the number of bytes used.
fn der_header(tag: u32, len: usize, out: &mut [u8; MAX_HEADER_LEN]) -> Result<usize> {
    if tag > 0xff {
        return Err(kserr!(InvalidArgument, "unsupported tag {tag:#x}"));
    }
    if len > MAX_CONTENT_LEN {
        return Err(kserr!(InvalidArgument, "unsupported DER length {len}"));
    }
    out[0] = tag as u8;
    if len <= 0x7f {
        out[1] = len as u8;
        Ok(2)
    } else if len <= 0xff {
        out[1] = 0x81; // One length octet to come
        out[2] = len as u8;
        Ok(3)
    } else {
        out[1] = 0x82; // Two length octets to come
        out[2] = (len >> 8) as u8;
        out[3] = (len & 0xff) as u8;
        Ok(4)
    }
}

/// Number of bytes `encode_tlv(tag, value)` writes.
pub fn encoded_len(tag: u32, value: &[u8]) -> Result<usize> {
    if tag == TAG_RAW {
        return Ok(value.len());
    }
    let (prefix, body) = content_parts(tag, value)?;
    let content_len = prefix.len() + body.len();
    let mut header = [0u8; MAX_HEADER_LEN];
    Ok(der_header(tag, content_len, &mut header)? + content_len)
}

/// A bounds checked DER writer over a caller supplied buffer.
pub struct DerWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> DerWriter<'a> {
    /// Starts writing at the beginning of `buf`.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Number of bytes written so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Free space left in the buffer.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// The bytes written so far.
    pub fn written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    /// The written bytes covered by `span`, or `None` if `span` reaches past what this writer
    /// has written.
    pub fn get(&self, span: Span) -> Option<&[u8]> {
        self.written().get(span.offset..span.offset.checked_add(span.len)?)
    }

    fn reserve(&self, needed: usize) -> Result<()> {
        if needed > self.remaining() {
            return Err(kserr!(
                BufferTooSmall,
                "need {} bytes at offset {}, have {}",
                needed,
                self.pos,
                self.remaining()
            ));
        }
        Ok(())
    }

    /// Writes one TLV. INTEGER content loses redundant leading zeros and gains a zero byte when
    /// its top bit is set; BIT STRING content gains a zero unused-bits byte; `TAG_RAW` content is
    /// copied verbatim without a header. Nothing is written if the buffer is too small.
    pub fn encode_tlv(&mut self, tag: u32, value: &[u8]) -> Result<Span> {
        if tag == TAG_RAW {
            return self.write_raw(value);
        }
        let (prefix, body) = content_parts(tag, value)?;
        let content_len = prefix.len() + body.len();
        let mut header = [0u8; MAX_HEADER_LEN];
        let header_len = der_header(tag, content_len, &mut header)?;
        self.reserve(header_len + content_len)?;

        let offset = self.pos;
        let mut pos = offset;
        for part in [&header[..header_len], prefix, body] {
            self.buf[pos..pos + part.len()].copy_from_slice(part);
            pos += part.len();
        }
        self.pos = pos;
        Ok(Span { offset, len: pos - offset })
    }

    /// Copies pre-encoded DER.
    pub fn write_raw(&mut self, der: &[u8]) -> Result<Span> {
        self.reserve(der.len())?;
        let offset = self.pos;
        self.buf[offset..offset + der.len()].copy_from_slice(der);
        self.pos += der.len();
        Ok(Span { offset, len: der.len() })
    }

    /// Wraps everything written since `start` in a `tag` header, in place. The content is taken
    /// verbatim, so this is meant for constructed tags and OCTET STRING.
    pub fn wrap_since(&mut self, tag: u32, start: usize) -> Result<Span> {
        if start > self.pos {
            return Err(kserr!(InvalidArgument, "wrap start {} beyond cursor {}", start, self.pos));
        }
        let content_len = self.pos - start;
        let mut header = [0u8; MAX_HEADER_LEN];
        let header_len = der_header(tag, content_len, &mut header)?;
        self.reserve(header_len)?;
        self.buf.copy_within(start..self.pos, start + header_len);
        self.buf[start..start + header_len].copy_from_slice(&header[..header_len]);
        self.pos += header_len;
        Ok(Span { offset: start, len: self.pos - start })
    }
}

/// Encodes a single TLV into a new, exactly sized vector.
pub fn tlv(tag: u32, value: &[u8]) -> Result<Vec<u8>> {
    let mut out = vec![0u8; encoded_len(tag, value)?];
    DerWriter::new(&mut out).encode_tlv(tag, value)?;
    Ok(out)
}

/// Encodes `tag { parts... }` where each part is already DER.
pub fn constructed(tag: u32, parts: &[&[u8]]) -> Result<Vec<u8>> {
    tlv(tag, &parts.concat())
}

/// Encodes `SEQUENCE { parts... }` where each part is already DER.
pub fn sequence(parts: &[&[u8]]) -> Result<Vec<u8>> {
    constructed(TAG_SEQUENCE, parts)
}

/// Decodes the TLV at the start of `buf`. Returns it and the bytes that follow.
pub fn decode_tlv(buf: &[u8]) -> Result<(Asn1Object<'_>, &[u8])> {
    if buf.len() < 2 {
        return Err(kserr!(InsufficientData, "TLV needs 2 bytes, have {}", buf.len()));
    }
    let tag = buf[0];
    if tag & 0x1f == 0x1f {
        return Err(kserr!(InvalidArgument, "multi-byte tag {:#04x} not supported", tag));
    }
    let (header_len, len) = match buf[1] {
        l if l < 0x80 => (2, l as usize),
        0x81 if buf.len() >= 3 => (3, buf[2] as usize),
        0x82 if buf.len() >= 4 => (4, ((buf[2] as usize) << 8) | buf[3] as usize),
        0x81 | 0x82 => {
            return Err(kserr!(InsufficientData, "truncated length of tag {:#04x}", tag))
        }
        l => return Err(kserr!(InvalidArgument, "unsupported length octet {:#04x}", l)),
    };
    let end = header_len + len;
    if end > buf.len() {
        return Err(kserr!(
            InsufficientData,
            "tag {:#04x} declares {} bytes, {} available",
            tag,
            len,
            buf.len() - header_len
        ));
    }
    let obj = Asn1Object {
        tag,
        header: &buf[..header_len],
        value: &buf[header_len..end],
        raw: &buf[..end],
    };
    Ok((obj, &buf[end..]))
}

/// Decodes the TLV at the start of `buf`, which must carry `expected`. A different tag is
/// reported with an [`Asn1Error::UnexpectedTag`] root cause.
pub fn extract_tag(buf: &[u8], expected: u32) -> Result<(Asn1Object<'_>, &[u8])> {
    let (obj, rest) = decode_tlv(buf)?;
    if obj.tag as u32 != expected {
        return Err(anyhow::Error::new(Asn1Error::UnexpectedTag {
            expected: expected as u8,
            found: obj.tag,
        }))
        .context(ks_err!("extract_tag"));
    }
    Ok((obj, rest))
}

/// Like [`extract_tag`], for optional elements: an empty buffer or a different tag yields
/// `Ok(None)` and leaves the input untouched.
pub fn probe_tag(buf: &[u8], expected: u32) -> Result<Option<(Asn1Object<'_>, &[u8])>> {
    match buf.first() {
        Some(t) if *t as u32 == expected => decode_tlv(buf).map(Some),
        _ => Ok(None),
    }
}

/// Decodes all TLVs in `buf`, which must be consumed exactly.
pub fn decode_all(mut buf: &[u8]) -> Result<Vec<Asn1Object<'_>>> {
    let mut result = Vec::new();
    while !buf.is_empty() {
        let (obj, rest) = decode_tlv(buf)?;
        result.push(obj);
        buf = rest;
    }
    Ok(result)
}
