//! TLV (Type‑Length‑Value) encoding and decoding utilities.
//!
//! ccnfwd uses the CCNx layout: a 2‑byte type followed by a 2‑byte length,
//! both in network byte order. Names travel as a run of segment TLVs, and
//! the PIT builds its lookup keys from those runs.

use crate::error::Error;
use bytes::{Buf, BufMut, BytesMut};

/* ---------------------------------------------------------------- *
 * TLV type constants
 * ---------------------------------------------------------------- */

pub const T_NAMESEGMENT: u16   = 0x0001;
pub const T_KEYID_RESTR: u16   = 0x0002;
pub const T_OBJHASH_RESTR: u16 = 0x0003;
pub const T_CHUNK: u16         = 0x0010;

/// Size of a TLV header (type + length).
pub const TLV_HEADER_LEN: usize = 4;

/// Largest value a single TLV can carry.
pub const MAX_TLV_VALUE_LEN: usize = u16::MAX as usize;

/* ---------------------------------------------------------------- *
 * Encoding helpers
 * ---------------------------------------------------------------- */

/// Encode a TLV header for a value of `length` bytes.
pub fn encode_tlv_header(tlv_type: u16, length: usize, buf: &mut BytesMut) -> Result<(), Error> {
    if length > MAX_TLV_VALUE_LEN {
        return Err(Error::Tlv(format!(
            "TLV value of {} bytes exceeds the {} byte limit",
            length, MAX_TLV_VALUE_LEN
        )));
    }
    buf.put_u16(tlv_type);
    buf.put_u16(length as u16);
    Ok(())
}

/// Encode a complete TLV into `buf`.
pub fn encode_tlv(tlv_type: u16, value: &[u8], buf: &mut BytesMut) -> Result<(), Error> {
    encode_tlv_header(tlv_type, value.len(), buf)?;
    buf.extend_from_slice(value);
    Ok(())
}

/// Encode a chunk-number segment. Chunk numbers are written as 4 bytes.
pub fn encode_chunk(chunk: u32, buf: &mut BytesMut) {
    buf.put_u16(T_CHUNK);
    buf.put_u16(4);
    buf.put_u32(chunk);
}

/* ---------------------------------------------------------------- *
 * Decoding helpers
 * ---------------------------------------------------------------- */

/// Decode a TLV header, returning `(type, length)`.
pub fn decode_tlv_header(buf: &mut impl Buf) -> Result<(u16, usize), Error> {
    if buf.remaining() < TLV_HEADER_LEN {
        return Err(Error::Tlv("Buffer too small for TLV header".into()));
    }
    let tlv_type = buf.get_u16();
    let length = buf.get_u16() as usize;
    Ok((tlv_type, length))
}

/// Decode a chunk-number value (1 to 4 big-endian bytes).
pub fn decode_chunk(value: &[u8]) -> Result<u32, Error> {
    if value.is_empty() || value.len() > 4 {
        return Err(Error::Tlv(format!("invalid chunk length {}", value.len())));
    }
    Ok(value.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32))
}

/* ---------------------------------------------------------------- *
 * Name segments
 * ---------------------------------------------------------------- */

/// One segment of a wire-encoded name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub tlv_type: u16,
    /// Offset of the segment header within the name.
    pub offset: usize,
    pub value: &'a [u8],
}

/// Iterator over the segments of a wire-encoded name.
#[derive(Debug, Clone)]
pub struct Segments<'a> {
    name: &'a [u8],
    pos: usize,
}

impl<'a> Segments<'a> {
    pub fn new(name: &'a [u8]) -> Self {
        Self { name, pos: 0 }
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = Result<Segment<'a>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.name.len() {
            return None;
        }
        let mut rest = &self.name[self.pos..];
        let (tlv_type, length) = match decode_tlv_header(&mut rest) {
            Ok(header) => header,
            Err(e) => {
                self.pos = self.name.len();
                return Some(Err(e));
            }
        };
        if rest.len() < length {
            self.pos = self.name.len();
            return Some(Err(Error::Tlv(format!(
                "name segment at offset {} is truncated",
                self.pos
            ))));
        }
        let offset = self.pos;
        let start = offset + TLV_HEADER_LEN;
        self.pos = start + length;
        Some(Ok(Segment {
            tlv_type,
            offset,
            value: &self.name[start..start + length],
        }))
    }
}

/// Returns the last segment of `name`, if any.
pub fn last_segment(name: &[u8]) -> Result<Option<Segment<'_>>, Error> {
    let mut last = None;
    for segment in Segments::new(name) {
        last = Some(segment?);
    }
    Ok(last)
}

/// Splits a trailing chunk segment off `name`.
///
/// Returns the chunk-less prefix and the chunk number, or `None` when the
/// name does not end in a chunk segment.
pub fn split_chunk(name: &[u8]) -> Result<Option<(&[u8], u32)>, Error> {
    match last_segment(name)? {
        Some(seg) if seg.tlv_type == T_CHUNK => {
            let chunk = decode_chunk(seg.value)?;
            Ok(Some((&name[..seg.offset], chunk)))
        }
        _ => Ok(None),
    }
}
