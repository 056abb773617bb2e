//! Error types for the Pending Interest Table.

use thiserror::Error;

/// Failures reported by PIT operations.
///
/// None of these are fatal: the caller decides whether to drop, NACK or
/// simply wait for the consumer to retransmit.
#[derive(Error, Debug)]
pub enum PitError {
    /// The entry index has no room for another entry.
    #[error("PIT is full ({capacity} entries)")]
    IndexFull { capacity: usize },

    /// The lookup key would exceed the supported size.
    #[error("PIT key of {len} bytes exceeds the {max} byte limit")]
    KeyTooLong { len: usize, max: usize },

    /// The entry lock stayed busy for the whole retry budget.
    #[error("PIT entry lock still busy after {attempts} attempts")]
    LockBusy { attempts: u32 },

    /// Memory for a new entry could not be reserved.
    #[error("allocation failed: {0}")]
    Alloc(String),

    /// The outgoing lifetime field could not be rewritten.
    #[error("lifetime field rewrite failed: {0}")]
    LifetimeField(String),

    #[error("invalid PIT configuration: {0}")]
    InvalidConfig(String),

    /// Name could not be decoded.
    #[error(transparent)]
    Message(#[from] rust_ccnfwd_common::Error),
}

pub type Result<T> = std::result::Result<T, PitError>;
