//! PIT key construction.
//!
//! A key is the exact byte string an entry is indexed under. Restrictions
//! are prepended as TLVs so that a restricted and an unrestricted request
//! for the same name land in distinct entries.

use std::borrow::Cow;

use rust_ccnfwd_common::message::{MessageClass, ParsedMessage};
use rust_ccnfwd_common::tlv::{TLV_HEADER_LEN, T_KEYID_RESTR, T_OBJHASH_RESTR};
use rust_ccnfwd_common::types::MAX_KEY_LEN;

use crate::error::{PitError, Result};

/// Whether a key is built for a request or for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Interest,
    Object,
}

/// Builds the lookup key for `name` and its restrictions.
///
/// Object-hash restrictions only apply to Interests. Without restrictions
/// the name is used as is.
pub fn build_key<'a>(
    msg_type: MessageType,
    name: &'a [u8],
    keyid: Option<&[u8]>,
    objhash: Option<&[u8]>,
) -> Result<Cow<'a, [u8]>> {
    let objhash = match msg_type {
        MessageType::Interest => objhash,
        MessageType::Object => None,
    };

    let restriction_len = keyid.map_or(0, |k| TLV_HEADER_LEN + k.len())
        + objhash.map_or(0, |h| TLV_HEADER_LEN + h.len());
    let len = restriction_len + name.len();
    if len > MAX_KEY_LEN {
        return Err(PitError::KeyTooLong {
            len,
            max: MAX_KEY_LEN,
        });
    }
    if restriction_len == 0 {
        return Ok(Cow::Borrowed(name));
    }

    let mut key = alloc_key(len)?;
    if let Some(keyid) = keyid {
        push_tlv(&mut key, T_KEYID_RESTR, keyid);
    }
    if let Some(objhash) = objhash {
        push_tlv(&mut key, T_OBJHASH_RESTR, objhash);
    }
    key.extend_from_slice(name);
    Ok(Cow::Owned(key))
}

/// Key of a ccninfo discovery: `name ++ node_id ++ request_id`.
pub fn ccninfo_key(name: &[u8], node_id: &[u8], request_id: u16) -> Result<Vec<u8>> {
    let len = name.len() + node_id.len() + 2;
    if len > MAX_KEY_LEN {
        return Err(PitError::KeyTooLong {
            len,
            max: MAX_KEY_LEN,
        });
    }
    let mut key = alloc_key(len)?;
    key.extend_from_slice(name);
    key.extend_from_slice(node_id);
    key.extend_from_slice(&request_id.to_be_bytes());
    Ok(key)
}

/// Key for a parsed message, picking the shape from its class.
pub fn key_for(msg: &ParsedMessage) -> Result<Cow<'_, [u8]>> {
    match &msg.class {
        MessageClass::Ccninfo(req) => Ok(Cow::Owned(ccninfo_key(
            msg.name.as_bytes(),
            &req.node_id,
            req.request_id,
        )?)),
        MessageClass::Interest => build_key(
            MessageType::Interest,
            msg.name.as_bytes(),
            msg.keyid.as_deref(),
            msg.objhash.as_deref(),
        ),
        MessageClass::Object => build_key(
            MessageType::Object,
            msg.name.as_bytes(),
            msg.keyid.as_deref(),
            None,
        ),
    }
}

/// FNV-1a hash of a key.
pub fn key_hash(key: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    let prime: u64 = 0x0000_0100_0000_01b3;

    for &b in key {
        hash ^= b as u64;
        hash = hash.wrapping_mul(prime);
    }

    hash
}

pub(crate) fn alloc_key(len: usize) -> Result<Vec<u8>> {
    let mut key = Vec::new();
    key.try_reserve_exact(len)
        .map_err(|e| PitError::Alloc(format!("{} byte PIT key: {}", len, e)))?;
    Ok(key)
}

fn push_tlv(key: &mut Vec<u8>, tlv_type: u16, value: &[u8]) {
    key.extend_from_slice(&tlv_type.to_be_bytes());
    key.extend_from_slice(&(value.len() as u16).to_be_bytes());
    key.extend_from_slice(value);
}
