//! Common types and utilities for the ccnfwd forwarder.
//!
//! This crate provides the vocabulary shared by the Pending Interest Table and
//! the tools built around it: face identifiers, CCNx TLV helpers, the parsed
//! message record handed over by the codec, and lightweight metrics.

pub mod error;
pub mod message;
pub mod metrics;
pub mod tlv;
pub mod types;

/// Reexport of common types
pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
