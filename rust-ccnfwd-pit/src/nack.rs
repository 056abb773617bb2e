//! InterestReturn bookkeeping.
//!
//! Each down-face keeps at most one pending negative acknowledgement. A
//! newer return only replaces the stored one when it is of the same kind or
//! ranks higher, so a hop-limit failure is never masked by congestion.

use bytes::Bytes;
use log::trace;
use rust_ccnfwd_common::types::FaceId;
use serde::{Deserialize, Serialize};

use crate::entry::LockedEntry;

/// InterestReturn reasons the PIT keeps, lowest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReturnKind {
    Congestion,
    NoRoute,
    HopLimitExceeded,
}

impl ReturnKind {
    /// Ranking used when deciding whether to replace a stored return.
    pub fn priority(self) -> u8 {
        match self {
            ReturnKind::HopLimitExceeded => 3,
            ReturnKind::NoRoute => 2,
            ReturnKind::Congestion => 1,
        }
    }

    /// Maps a CCNx InterestReturn code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(ReturnKind::NoRoute),
            0x02 => Some(ReturnKind::HopLimitExceeded),
            0x06 => Some(ReturnKind::Congestion),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            ReturnKind::NoRoute => 0x01,
            ReturnKind::HopLimitExceeded => 0x02,
            ReturnKind::Congestion => 0x06,
        }
    }
}

/// A cached InterestReturn message for one consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterestReturn {
    pub kind: ReturnKind,
    pub payload: Bytes,
}

impl LockedEntry {
    /// Stores an InterestReturn for every down-face of `face_id`.
    ///
    /// Returns `true` if at least one face took the new value.
    pub fn set_interest_return(&mut self, face_id: FaceId, kind: ReturnKind, msg: &[u8]) -> bool {
        let hash = self.hash();
        let mut updated = false;
        let mut payload: Option<Bytes> = None;

        for idx in 0..self.down_faces().len() {
            let face = self.down_face_mut(idx);
            if face.face_id != face_id {
                continue;
            }
            let replace = match &face.pending_return {
                Some(current) => kind.priority() >= current.kind.priority(),
                None => true,
            };
            if !replace {
                trace!("entry {:016x}: keeping higher priority return for {}", hash, face_id);
                continue;
            }
            let payload = payload.get_or_insert_with(|| Bytes::copy_from_slice(msg));
            face.pending_return = Some(InterestReturn {
                kind,
                payload: payload.clone(),
            });
            updated = true;
        }
        updated
    }

    /// Pending InterestReturns, one per down-face that has one.
    pub fn interest_returns(&self) -> Vec<(FaceId, InterestReturn)> {
        self.down_faces()
            .iter()
            .filter_map(|f| f.pending_return().map(|r| (f.face_id, r.clone())))
            .collect()
    }
}
