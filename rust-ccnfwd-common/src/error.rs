//! Error types shared across ccnfwd crates.

use thiserror::Error;

/// All possible errors raised by the common ccnfwd helpers.
#[derive(Error, Debug)]
pub enum Error {
    /// Error related to TLV encoding/decoding.
    #[error("TLV error: {0}")]
    Tlv(String),

    /// Malformed or inconsistent parsed message.
    #[error("message error: {0}")]
    Message(String),
}
