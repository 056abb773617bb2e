//! PIT entries and their face lists.
//!
//! An entry keeps its identity (key, hash, kind, restrictions) immutable and
//! guards its face lists behind a per-entry mutex. The handful of fields read
//! by lock-free search paths (advertised lifetime, symbolic and removal
//! flags, face count) are mirrored in atomics that are only ever written
//! while the lock is held.
//!
//! Down-faces that are removed are never dropped in place: they move to the
//! entry's clean list and are released together with the entry.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use lock_api::ArcMutexGuard;
use log::{trace, warn};
use parking_lot::{Mutex, RawMutex};
use rust_ccnfwd_common::message::{AppRegistration, MessageClass, ParsedMessage};
use rust_ccnfwd_common::types::FaceId;

use crate::config::LockRetry;
use crate::error::{PitError, Result};
use crate::face::FaceManager;
use crate::key::{alloc_key, key_hash};
use crate::nack::InterestReturn;

/// What kind of request created an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Regular,
    Symbolic,
    PitRegistration,
    CcninfoDiscovery,
}

impl EntryKind {
    pub fn of(msg: &ParsedMessage) -> Self {
        if matches!(msg.class, MessageClass::Ccninfo(_)) {
            return EntryKind::CcninfoDiscovery;
        }
        match msg.app_reg {
            Some(AppRegistration::PitRegistration)
            | Some(AppRegistration::DevicePitRegistration) => EntryKind::PitRegistration,
            _ if msg.symbolic || msg.long_life => EntryKind::Symbolic,
            _ => EntryKind::Regular,
        }
    }
}

/// A consumer waiting on this entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownFace {
    pub face_id: FaceId,
    /// Last nonce seen from this consumer.
    pub nonce: u32,
    /// Absolute expiry of this consumer's interest.
    pub lifetime_us: u64,
    pub(crate) pending_return: Option<InterestReturn>,
}

impl DownFace {
    fn new(face_id: FaceId, nonce: u32) -> Self {
        Self {
            face_id,
            nonce,
            lifetime_us: 0,
            pending_return: None,
        }
    }

    /// Negative acknowledgement queued for this consumer.
    pub fn pending_return(&self) -> Option<&InterestReturn> {
        self.pending_return.as_ref()
    }
}

/// A face the Interest has been relayed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpFace {
    pub face_id: FaceId,
}

#[derive(Debug, Default)]
pub(crate) struct EntryState {
    pub(crate) down_faces: Vec<DownFace>,
    pub(crate) up_faces: Vec<UpFace>,
    pub(crate) clean_down_faces: Vec<DownFace>,
    pub(crate) hoplimit: u8,
}

/// One pending request identity.
pub struct PitEntry {
    key: Bytes,
    hash: u64,
    kind: EntryKind,
    restriction_keyid: Option<Bytes>,
    restriction_objhash: Option<Bytes>,

    adv_lifetime_us: AtomicU64,
    drop_lifetime_us: AtomicU64,
    next_cleanup_us: AtomicU64,
    is_symbolic: AtomicBool,
    pending_removal: AtomicBool,
    freed: AtomicBool,
    down_face_count: AtomicUsize,

    state: Arc<Mutex<EntryState>>,
}

impl PitEntry {
    /// Allocates an unregistered entry for `key`.
    pub(crate) fn new(
        key: &[u8],
        kind: EntryKind,
        keyid: Option<&[u8]>,
        objhash: Option<&[u8]>,
        next_cleanup_us: u64,
    ) -> Result<Self> {
        let mut owned = alloc_key(key.len())?;
        owned.extend_from_slice(key);

        Ok(Self {
            hash: key_hash(key),
            key: Bytes::from(owned),
            kind,
            restriction_keyid: keyid.map(Bytes::copy_from_slice),
            restriction_objhash: objhash.map(Bytes::copy_from_slice),
            adv_lifetime_us: AtomicU64::new(0),
            drop_lifetime_us: AtomicU64::new(0),
            next_cleanup_us: AtomicU64::new(next_cleanup_us),
            is_symbolic: AtomicBool::new(false),
            pending_removal: AtomicBool::new(false),
            freed: AtomicBool::new(false),
            down_face_count: AtomicUsize::new(0),
            state: Arc::new(Mutex::new(EntryState::default())),
        })
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn restriction_keyid(&self) -> Option<&Bytes> {
        self.restriction_keyid.as_ref()
    }

    pub fn restriction_objhash(&self) -> Option<&Bytes> {
        self.restriction_objhash.as_ref()
    }

    /// Greatest lifetime advertised upstream.
    pub fn adv_lifetime_us(&self) -> u64 {
        self.adv_lifetime_us.load(Ordering::Acquire)
    }

    /// Deadline after which the sweep drops the entry.
    pub fn drop_lifetime_us(&self) -> u64 {
        self.drop_lifetime_us.load(Ordering::Acquire)
    }

    pub fn next_cleanup_us(&self) -> u64 {
        self.next_cleanup_us.load(Ordering::Acquire)
    }

    pub fn is_symbolic(&self) -> bool {
        self.is_symbolic.load(Ordering::Acquire)
    }

    pub fn pending_removal(&self) -> bool {
        self.pending_removal.load(Ordering::Acquire)
    }

    pub fn down_face_count(&self) -> usize {
        self.down_face_count.load(Ordering::Acquire)
    }

    /// Set once the entry has been unregistered and released. A freed entry
    /// is unreachable and must not take new consumers.
    pub fn is_freed(&self) -> bool {
        self.freed.load(Ordering::Acquire)
    }

    pub fn is_expired(&self, now_us: u64) -> bool {
        now_us > self.adv_lifetime_us()
    }

    /// Whether some thread currently holds the entry lock.
    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }

    /// Acquires the entry lock, retrying a bounded number of times.
    pub fn lock(self: &Arc<Self>, retry: LockRetry) -> Result<LockedEntry> {
        let attempts = retry.retries + 1;
        for attempt in 1..=attempts {
            if let Some(state) = self.state.try_lock_arc() {
                return Ok(LockedEntry {
                    entry: Arc::clone(self),
                    state,
                });
            }
            if attempt < attempts {
                thread::sleep(retry.backoff);
            }
        }
        warn!(
            "PIT entry {:016x} still locked after {} attempts",
            self.hash, attempts
        );
        Err(PitError::LockBusy { attempts })
    }
}

impl fmt::Debug for PitEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PitEntry")
            .field("hash", &format_args!("{:016x}", self.hash))
            .field("klen", &self.key.len())
            .field("kind", &self.kind)
            .field("adv_lifetime_us", &self.adv_lifetime_us())
            .field("drop_lifetime_us", &self.drop_lifetime_us())
            .field("down_face_count", &self.down_face_count())
            .field("is_symbolic", &self.is_symbolic())
            .field("pending_removal", &self.pending_removal())
            .field("freed", &self.is_freed())
            .finish()
    }
}

/// An entry whose lock is held. Dropping it unlocks the entry.
pub struct LockedEntry {
    entry: Arc<PitEntry>,
    state: ArcMutexGuard<RawMutex, EntryState>,
}

impl LockedEntry {
    pub fn entry(&self) -> &Arc<PitEntry> {
        &self.entry
    }

    /// Releases the lock and hands back the shared entry.
    pub fn unlock(self) -> Arc<PitEntry> {
        let LockedEntry { entry, state } = self;
        drop(state);
        entry
    }

    /// Live down-faces in arrival order.
    pub fn down_faces(&self) -> &[DownFace] {
        &self.state.down_faces
    }

    /// Removed down-faces awaiting release with the entry.
    pub fn clean_down_faces(&self) -> &[DownFace] {
        &self.state.clean_down_faces
    }

    pub fn up_faces(&self) -> &[UpFace] {
        &self.state.up_faces
    }

    pub fn hoplimit(&self) -> u8 {
        self.state.hoplimit
    }

    /// Unlinks every down-face of `face_id`.
    ///
    /// Symbolic entries keep their consumers; for them this is a no-op.
    /// Returns the number of face records moved to the clean list.
    pub fn remove_down_face(&mut self, face_id: FaceId) -> usize {
        if self.entry.is_symbolic() {
            trace!("symbolic entry {:016x}: keeping {}", self.entry.hash, face_id);
            return 0;
        }
        let mut removed = 0;
        let mut idx = 0;
        while idx < self.state.down_faces.len() {
            if self.state.down_faces[idx].face_id == face_id {
                self.retire_down_face(idx);
                removed += 1;
            } else {
                idx += 1;
            }
        }
        removed
    }

    /// Records that the Interest went out on `face_id`.
    ///
    /// Returns `false` if the face was already recorded.
    pub fn add_up_face(&mut self, face_id: FaceId) -> bool {
        if self.state.up_faces.iter().any(|f| f.face_id == face_id) {
            return false;
        }
        self.state.up_faces.push(UpFace { face_id });
        true
    }

    /// First recorded up-face that is still alive.
    pub fn upstream_face(&self, faces: &dyn FaceManager) -> Option<FaceId> {
        self.state
            .up_faces
            .iter()
            .map(|f| f.face_id)
            .find(|&id| faces.is_face_alive(id))
    }

    /// Finds the down-face a request from `face_id` belongs to, adding one if
    /// none matches. Symbolic requests match on the face alone; regular ones
    /// also need the nonce to agree, a zero nonce matching any.
    pub(crate) fn find_or_add_down_face(
        &mut self,
        face_id: FaceId,
        nonce: u32,
        symbolic: bool,
    ) -> (usize, bool) {
        let found = self.state.down_faces.iter().position(|f| {
            f.face_id == face_id
                && (symbolic || nonce == 0 || f.nonce == 0 || f.nonce == nonce)
        });
        match found {
            Some(idx) => (idx, false),
            None => {
                self.state.down_faces.push(DownFace::new(face_id, nonce));
                self.sync_face_count();
                self.entry.pending_removal.store(false, Ordering::Release);
                trace!("entry {:016x}: new down-face {}", self.entry.hash, face_id);
                (self.state.down_faces.len() - 1, true)
            }
        }
    }

    pub(crate) fn down_face_mut(&mut self, idx: usize) -> &mut DownFace {
        &mut self.state.down_faces[idx]
    }

    /// Moves the down-face at `idx` to the clean list.
    pub(crate) fn retire_down_face(&mut self, idx: usize) {
        let face = self.state.down_faces.remove(idx);
        trace!("entry {:016x}: retired down-face {}", self.entry.hash, face.face_id);
        self.state.clean_down_faces.push(face);
        self.sync_face_count();
        if self.state.down_faces.is_empty() {
            self.entry.pending_removal.store(true, Ordering::Release);
        }
    }

    /// Retires every consumer of an answered entry and forgets what was
    /// advertised upstream, so the next request is forwarded as a fresh one.
    pub(crate) fn consume(&mut self) {
        let state = &mut *self.state;
        state.clean_down_faces.append(&mut state.down_faces);
        state.up_faces.clear();
        state.hoplimit = 0;
        self.sync_face_count();
        self.set_lifetimes(0, 0);
        self.entry.pending_removal.store(true, Ordering::Release);
    }

    pub(crate) fn max_down_face_lifetime(&self) -> u64 {
        self.state
            .down_faces
            .iter()
            .map(|f| f.lifetime_us)
            .max()
            .unwrap_or(0)
    }

    pub(crate) fn set_hoplimit(&mut self, hoplimit: u8) {
        self.state.hoplimit = hoplimit;
    }

    pub(crate) fn mark_symbolic(&self) {
        self.entry.is_symbolic.store(true, Ordering::Release);
    }

    pub(crate) fn set_lifetimes(&self, adv_us: u64, drop_margin_us: u64) {
        self.entry.adv_lifetime_us.store(adv_us, Ordering::Release);
        self.entry
            .drop_lifetime_us
            .store(adv_us.saturating_add(drop_margin_us), Ordering::Release);
    }

    /// Drops expired and orphaned consumers if the cleanup is due.
    ///
    /// Returns the number of down-faces moved to the clean list.
    pub(crate) fn cleanup_if_due(
        &mut self,
        now_us: u64,
        interval_us: u64,
        faces: &dyn FaceManager,
    ) -> usize {
        if now_us < self.entry.next_cleanup_us() {
            return 0;
        }
        self.entry
            .next_cleanup_us
            .store(now_us.saturating_add(interval_us), Ordering::Release);

        let mut removed = 0;
        let mut idx = 0;
        while idx < self.state.down_faces.len() {
            let face = &self.state.down_faces[idx];
            if face.lifetime_us < now_us || !faces.is_face_alive(face.face_id) {
                self.retire_down_face(idx);
                removed += 1;
            } else {
                idx += 1;
            }
        }
        removed
    }

    /// Releases every face record and marks the entry freed.
    pub(crate) fn release_faces(&mut self) -> usize {
        let state = &mut *self.state;
        let released =
            state.down_faces.len() + state.clean_down_faces.len() + state.up_faces.len();
        state.down_faces.clear();
        state.clean_down_faces.clear();
        state.up_faces.clear();
        self.sync_face_count();
        self.entry.pending_removal.store(true, Ordering::Release);
        self.entry.freed.store(true, Ordering::Release);
        released
    }

    fn sync_face_count(&self) {
        self.entry
            .down_face_count
            .store(self.state.down_faces.len(), Ordering::Release);
    }
}

impl std::ops::Deref for LockedEntry {
    type Target = PitEntry;

    fn deref(&self) -> &PitEntry {
        &self.entry
    }
}

impl fmt::Debug for LockedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedEntry")
            .field("entry", &*self.entry)
            .field("state", &*self.state)
            .finish()
    }
}
