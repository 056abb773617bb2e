//! ccnfwd: the Pending Interest Table core of a CCNx forwarder.
//!
//! This crate re-exports the workspace members:
//!
//! - [`common`]: names, TLV helpers, parsed messages and metrics
//! - [`pit`]: the concurrent Pending Interest Table
//!
//! ```
//! use std::sync::Arc;
//! use rust_ccnfwd::common::message::{Name, ParsedMessage};
//! use rust_ccnfwd::common::types::FaceId;
//! use rust_ccnfwd::pit::{LiveFaces, Pit, PitConfig, ResendMethod, SystemClock};
//!
//! let pit = Pit::new(
//!     PitConfig::default(),
//!     Arc::new(SystemClock::new()),
//!     Arc::new(LiveFaces::with_faces([1, 2])),
//! )
//! .unwrap();
//!
//! let interest = ParsedMessage::interest(Name::from_uri("/video/seg").unwrap()).with_nonce(7);
//! let mut entry = pit.find_or_create_locked(&interest).unwrap();
//! assert!(pit
//!     .on_request(&mut entry, FaceId(1), &interest, &mut [], ResendMethod::Rfc)
//!     .unwrap());
//! drop(entry);
//!
//! let object = ParsedMessage::object(Name::from_uri("/video/seg").unwrap());
//! assert_eq!(pit.satisfy(&object).unwrap(), vec![FaceId(1)]);
//! ```

pub use rust_ccnfwd_common as common;
pub use rust_ccnfwd_pit as pit;

pub use rust_ccnfwd_common::types::FaceId;
pub use rust_ccnfwd_pit::{Pit, PitConfig, PitError, ResendMethod};
