//! Identifiers and limits shared by every ccnfwd component.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest lookup key the PIT accepts, restriction prefixes included.
pub const MAX_KEY_LEN: usize = 65_535;

/// Default bound on the number of live PIT entries.
pub const DEFAULT_PIT_CAPACITY: usize = 2048;

/// Identifier of a face (a consumer- or producer-facing connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceId(pub u16);

impl fmt::Display for FaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FaceId({})", self.0)
    }
}

impl From<u16> for FaceId {
    fn from(id: u16) -> Self {
        FaceId(id)
    }
}
