//! Concurrent Pending Interest Table for a CCNx forwarder.
//!
//! The table records which consumers wait on which request, aggregates
//! duplicate Interests, decides when a request has to go upstream again and
//! hands back the consumers a Content Object satisfies.

pub mod clock;
pub mod config;
pub mod decision;
pub mod entry;
pub mod error;
pub mod face;
pub mod index;
pub mod key;
pub mod nack;
pub mod search;
pub mod table;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LockRetry, PitConfig, ResendMethod, MAX_CHUNK_PROBE_WINDOW};
pub use entry::{DownFace, EntryKind, LockedEntry, PitEntry, UpFace};
pub use error::{PitError, Result};
pub use face::{FaceManager, LiveFaces};
pub use index::{DashIndex, EntryIndex, Publish};
pub use key::{build_key, ccninfo_key, key_for, key_hash, MessageType};
pub use nack::{InterestReturn, ReturnKind};
pub use search::{AcceptAll, VariantMatcher};
pub use table::Pit;
