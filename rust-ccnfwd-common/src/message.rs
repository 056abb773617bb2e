//! Parsed CCNx message records.
//!
//! The codec turns wire bytes into a [`ParsedMessage`]; the PIT only ever
//! reads from it. The one exception is the lifetime field of the outgoing
//! buffer, which the PIT may rewrite through the typed [`LifetimeField`]
//! range the codec hands over.

use crate::error::Error;
use crate::tlv::{self, Segments};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default hop limit for locally generated Interests.
pub const DEFAULT_HOPLIMIT: u8 = 32;

/// A wire-encoded name: a run of segment TLVs without the outer name TLV.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Name(Bytes);

impl Name {
    /// Wraps already encoded name segments.
    pub fn from_wire(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Parses a URI such as `ccnx:/video/seg/chunk=3`.
    ///
    /// Every path component becomes a name segment, except `chunk=N` which
    /// becomes a chunk segment.
    pub fn from_uri(uri: &str) -> Result<Self, Error> {
        let path = uri.strip_prefix("ccnx:").unwrap_or(uri);
        let mut buf = BytesMut::new();

        for comp in path.split('/').filter(|c| !c.is_empty()) {
            if let Some(n) = comp.strip_prefix("chunk=") {
                let chunk = n
                    .parse::<u32>()
                    .map_err(|_| Error::Message(format!("invalid chunk number '{}'", n)))?;
                tlv::encode_chunk(chunk, &mut buf);
            } else {
                tlv::encode_tlv(tlv::T_NAMESEGMENT, comp.as_bytes(), &mut buf)?;
            }
        }

        Ok(Self(buf.freeze()))
    }

    /// Returns the encoded segments.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a copy of this name with a chunk segment appended.
    pub fn with_chunk(&self, chunk: u32) -> Self {
        let mut buf = BytesMut::with_capacity(self.0.len() + tlv::TLV_HEADER_LEN + 4);
        buf.extend_from_slice(&self.0);
        tlv::encode_chunk(chunk, &mut buf);
        Self(buf.freeze())
    }

    /// Trailing chunk number, if the name ends in a chunk segment.
    pub fn chunk(&self) -> Result<Option<u32>, Error> {
        Ok(tlv::split_chunk(&self.0)?.map(|(_, chunk)| chunk))
    }

    /// The name with its trailing chunk segment removed.
    pub fn without_chunk(&self) -> Result<&[u8], Error> {
        Ok(match tlv::split_chunk(&self.0)? {
            Some((prefix, _)) => prefix,
            None => &self.0,
        })
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "ccnx:/");
        }
        write!(f, "ccnx:")?;
        for segment in Segments::new(&self.0) {
            let Ok(seg) = segment else {
                return write!(f, "/<malformed>");
            };
            if seg.tlv_type == tlv::T_CHUNK {
                match tlv::decode_chunk(seg.value) {
                    Ok(chunk) => write!(f, "/chunk={}", chunk)?,
                    Err(_) => write!(f, "/chunk=?")?,
                }
            } else if seg.value.iter().all(|b| b.is_ascii_graphic()) {
                write!(f, "/{}", String::from_utf8_lossy(seg.value))?;
            } else {
                write!(f, "/0x")?;
                for b in seg.value {
                    write!(f, "{:02x}", b)?;
                }
            }
        }
        Ok(())
    }
}

/// Request-id and node identity carried by a ccninfo discovery request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CcninfoRequest {
    /// Identifier of the node that issued the discovery.
    pub node_id: Bytes,
    /// Per-node request identifier.
    pub request_id: u16,
    /// Full discovery traces every cache on the path and waits longer.
    pub full_discovery: bool,
}

/// Message class as reported by the codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageClass {
    Interest,
    Object,
    Ccninfo(CcninfoRequest),
}

/// Application registration sub-type of an Interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppRegistration {
    PitRegistration,
    PitDeregistration,
    /// Registration on behalf of a device; lives for the supplied cache time.
    DevicePitRegistration,
}

/// Location of the lifetime field inside an outgoing buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifetimeField {
    pub offset: usize,
    /// Width of the field in bytes (1 to 8).
    pub len: usize,
}

impl LifetimeField {
    /// Writes `lifetime_ms` big endian into this field of `buf`.
    pub fn write(&self, buf: &mut [u8], lifetime_ms: u64) -> Result<(), Error> {
        if self.len == 0 || self.len > 8 {
            return Err(Error::Message(format!("invalid lifetime field width {}", self.len)));
        }
        let end = self
            .offset
            .checked_add(self.len)
            .filter(|&end| end <= buf.len())
            .ok_or_else(|| {
                Error::Message(format!(
                    "lifetime field {}..{} outside buffer of {} bytes",
                    self.offset,
                    self.offset.saturating_add(self.len),
                    buf.len()
                ))
            })?;
        if self.len < 8 && lifetime_ms >> (self.len * 8) != 0 {
            return Err(Error::Message(format!(
                "lifetime {}ms does not fit in {} bytes",
                lifetime_ms, self.len
            )));
        }
        let be = lifetime_ms.to_be_bytes();
        buf[self.offset..end].copy_from_slice(&be[8 - self.len..]);
        Ok(())
    }
}

/// A decoded Interest, Content Object or ccninfo request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedMessage {
    pub class: MessageClass,
    pub name: Name,
    pub nonce: u32,
    pub hoplimit: u8,
    /// Requested lifetime; `None` when the field is absent.
    pub lifetime_ms: Option<u64>,
    /// Where the lifetime lives in the outgoing buffer.
    pub lifetime_field: Option<LifetimeField>,
    pub chunk: Option<u32>,
    pub end_chunk: Option<u32>,
    pub symbolic: bool,
    pub long_life: bool,
    pub keyid: Option<Bytes>,
    pub objhash: Option<Bytes>,
    pub app_reg: Option<AppRegistration>,
    pub cache_time_ms: Option<u64>,
}

impl ParsedMessage {
    fn with_class(class: MessageClass, name: Name) -> Self {
        let chunk = name.chunk().ok().flatten();
        Self {
            class,
            name,
            nonce: 0,
            hoplimit: DEFAULT_HOPLIMIT,
            lifetime_ms: None,
            lifetime_field: None,
            chunk,
            end_chunk: None,
            symbolic: false,
            long_life: false,
            keyid: None,
            objhash: None,
            app_reg: None,
            cache_time_ms: None,
        }
    }

    /// Creates an Interest for `name`.
    pub fn interest(name: Name) -> Self {
        Self::with_class(MessageClass::Interest, name)
    }

    /// Creates a Content Object record for `name`.
    pub fn object(name: Name) -> Self {
        Self::with_class(MessageClass::Object, name)
    }

    /// Creates a ccninfo discovery request.
    pub fn ccninfo(name: Name, request: CcninfoRequest) -> Self {
        Self::with_class(MessageClass::Ccninfo(request), name)
    }

    pub fn with_nonce(mut self, nonce: u32) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn with_hoplimit(mut self, hoplimit: u8) -> Self {
        self.hoplimit = hoplimit;
        self
    }

    /// Sets the requested lifetime.
    pub fn with_lifetime(mut self, lifetime_ms: u64) -> Self {
        self.lifetime_ms = Some(lifetime_ms);
        self
    }

    /// Records where the lifetime field sits in the outgoing buffer.
    pub fn with_lifetime_field(mut self, field: LifetimeField) -> Self {
        self.lifetime_field = Some(field);
        self
    }

    /// Marks this as a symbolic (long-life) Interest.
    pub fn with_symbolic(mut self, symbolic: bool) -> Self {
        self.symbolic = symbolic;
        self.long_life = symbolic;
        self
    }

    pub fn with_keyid(mut self, keyid: impl Into<Bytes>) -> Self {
        self.keyid = Some(keyid.into());
        self
    }

    pub fn with_objhash(mut self, objhash: impl Into<Bytes>) -> Self {
        self.objhash = Some(objhash.into());
        self
    }

    pub fn with_app_registration(mut self, reg: AppRegistration) -> Self {
        self.app_reg = Some(reg);
        self
    }

    pub fn with_cache_time(mut self, cache_time_ms: u64) -> Self {
        self.cache_time_ms = Some(cache_time_ms);
        self
    }

    pub fn is_interest(&self) -> bool {
        !matches!(self.class, MessageClass::Object)
    }

    pub fn is_ccninfo(&self) -> bool {
        matches!(self.class, MessageClass::Ccninfo(_))
    }

    /// True when the Interest explicitly asked for lifetime zero.
    pub fn cancels(&self) -> bool {
        self.lifetime_ms == Some(0)
    }

    pub fn is_deregistration(&self) -> bool {
        self.app_reg == Some(AppRegistration::PitDeregistration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_round_trips_through_display() {
        let name = Name::from_uri("ccnx:/video/seg/chunk=12").unwrap();
        assert_eq!(name.to_string(), "ccnx:/video/seg/chunk=12");
        assert_eq!(name.chunk().unwrap(), Some(12));
    }

    #[test]
    fn without_chunk_matches_prefix_name() {
        let prefix = Name::from_uri("/video/seg").unwrap();
        let chunked = prefix.with_chunk(3);
        assert_eq!(chunked.without_chunk().unwrap(), prefix.as_bytes());
        assert_eq!(prefix.without_chunk().unwrap(), prefix.as_bytes());
    }

    #[test]
    fn bad_chunk_in_uri_is_rejected() {
        assert!(Name::from_uri("/a/chunk=x").is_err());
    }

    #[test]
    fn interest_builder_picks_up_chunk() {
        let msg = ParsedMessage::interest(Name::from_uri("/a/chunk=5").unwrap())
            .with_nonce(9)
            .with_lifetime(0);
        assert_eq!(msg.chunk, Some(5));
        assert!(msg.cancels());
        assert!(msg.is_interest());
    }

    #[test]
    fn lifetime_field_write() {
        let mut buf = [0xffu8; 6];
        let field = LifetimeField { offset: 2, len: 2 };
        field.write(&mut buf, 0x0102).unwrap();
        assert_eq!(buf, [0xff, 0xff, 0x01, 0x02, 0xff, 0xff]);

        assert!(field.write(&mut buf, 0x1_0000).is_err());
        assert!(LifetimeField { offset: 5, len: 2 }.write(&mut buf, 1).is_err());
    }
}
