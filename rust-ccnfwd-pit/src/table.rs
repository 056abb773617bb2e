//! The PIT handle and entry lifecycle.
//!
//! [`Pit`] bundles the configuration with the collaborators the table needs
//! (index, clock, face liveness) and owns entry creation, lazy cleanup,
//! collection and release.

use std::sync::Arc;

use log::{debug, trace, warn};
use rust_ccnfwd_common::message::ParsedMessage;
use rust_ccnfwd_common::metrics::PitMetrics;
use rust_ccnfwd_common::types::FaceId;

use crate::clock::Clock;
use crate::config::PitConfig;
use crate::entry::{EntryKind, LockedEntry, PitEntry};
use crate::error::{PitError, Result};
use crate::face::FaceManager;
use crate::index::{DashIndex, EntryIndex, Publish};
use crate::key::{self, MessageType};
use crate::search::{AcceptAll, VariantMatcher};

/// Pending Interest Table.
pub struct Pit {
    pub(crate) config: Arc<PitConfig>,
    pub(crate) index: Arc<dyn EntryIndex>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) faces: Arc<dyn FaceManager>,
    pub(crate) matcher: Arc<dyn VariantMatcher>,
    pub(crate) metrics: Arc<PitMetrics>,
}

impl Pit {
    /// Creates a PIT backed by a [`DashIndex`] sized from `config`.
    pub fn new(
        config: PitConfig,
        clock: Arc<dyn Clock>,
        faces: Arc<dyn FaceManager>,
    ) -> Result<Self> {
        let index = Arc::new(DashIndex::new(config.capacity));
        Self::with_index(config, index, clock, faces)
    }

    /// Creates a PIT on top of a caller-supplied index.
    pub fn with_index(
        config: PitConfig,
        index: Arc<dyn EntryIndex>,
        clock: Arc<dyn Clock>,
        faces: Arc<dyn FaceManager>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            index,
            clock,
            faces,
            matcher: Arc::new(AcceptAll),
            metrics: Arc::new(PitMetrics::new()),
        })
    }

    /// Replaces the version matcher consulted by searches.
    pub fn with_variant_matcher(mut self, matcher: Arc<dyn VariantMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn config(&self) -> &Arc<PitConfig> {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<PitMetrics> {
        &self.metrics
    }

    pub fn now_us(&self) -> u64 {
        self.clock.now_us()
    }

    /// Number of entries currently reachable.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Point-in-time list of every registered entry.
    pub fn entries(&self) -> Vec<Arc<PitEntry>> {
        self.index.snapshot()
    }

    /// Looks up the entry for `msg`, creating it if absent. Unlocked.
    pub fn find_or_create(&self, msg: &ParsedMessage) -> Result<Arc<PitEntry>> {
        let (entry, _) = self.find_or_create_inner(msg, false)?;
        Ok(entry)
    }

    /// Looks up the entry for `msg`, creating it if absent, and locks it.
    pub fn find_or_create_locked(&self, msg: &ParsedMessage) -> Result<LockedEntry> {
        match self.find_or_create_inner(msg, true)? {
            (_, Some(locked)) => Ok(locked),
            (entry, None) => self.lock(&entry),
        }
    }

    fn find_or_create_inner(
        &self,
        msg: &ParsedMessage,
        want_lock: bool,
    ) -> Result<(Arc<PitEntry>, Option<LockedEntry>)> {
        let key = key::key_for(msg)?;

        // An entry can be freed while we wait for its lock; start over then.
        loop {
            if let Some(entry) = self.index.get(&key) {
                self.metrics.lookups_hit.increment();
                match self.join(entry, want_lock)? {
                    Some(found) => return Ok(found),
                    None => {
                        trace!("PIT entry for {} was freed, retrying", msg.name);
                        continue;
                    }
                }
            }
            self.metrics.lookups_miss.increment();

            let capacity = self.index.capacity();
            if self.index.len() >= capacity {
                self.metrics.index_full.increment();
                warn!("PIT full ({} entries), rejecting {}", capacity, msg.name);
                return Err(PitError::IndexFull { capacity });
            }

            let objhash = if msg.is_interest() {
                msg.objhash.as_deref()
            } else {
                None
            };
            let next_cleanup = self
                .clock
                .now_us()
                .saturating_add(self.config.cleaning_interval_us());
            let entry = Arc::new(PitEntry::new(
                &key,
                EntryKind::of(msg),
                msg.keyid.as_deref(),
                objhash,
                next_cleanup,
            )?);

            // Only published once locked, so nobody sees it half set up.
            let locked = match self.lock(&entry) {
                Ok(locked) => locked,
                Err(e) => {
                    debug!("discarding unpublished PIT entry for {}", msg.name);
                    return Err(e);
                }
            };

            match self.index.publish(Arc::clone(&entry)) {
                Ok(Publish::Inserted) => {
                    let locked = if want_lock { Some(locked) } else { None };
                    self.metrics.inserts.increment();
                    self.metrics.size.increment();
                    debug!(
                        "created PIT entry {:016x} ({:?}) for {}",
                        entry.hash(),
                        entry.kind(),
                        msg.name
                    );
                    return Ok((entry, locked));
                }
                Ok(Publish::Existing(existing)) => {
                    drop(locked);
                    trace!("lost creation race for {}, joining existing entry", msg.name);
                    if let Some(found) = self.join(existing, want_lock)? {
                        return Ok(found);
                    }
                }
                Err(e) => {
                    if matches!(e, PitError::IndexFull { .. }) {
                        self.metrics.index_full.increment();
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Takes a registered entry, locking it if asked. `None` if the entry
    /// turned out to be freed.
    fn join(
        &self,
        entry: Arc<PitEntry>,
        want_lock: bool,
    ) -> Result<Option<(Arc<PitEntry>, Option<LockedEntry>)>> {
        if !want_lock {
            return Ok((!entry.is_freed()).then(|| (entry, None)));
        }
        let locked = self.lock(&entry)?;
        if locked.is_freed() {
            return Ok(None);
        }
        Ok(Some((entry, Some(locked))))
    }

    /// Locks `entry` with the configured retry budget.
    pub fn lock(&self, entry: &Arc<PitEntry>) -> Result<LockedEntry> {
        entry.lock(self.config.lock_retry()).map_err(|e| {
            self.metrics.lock_failures.increment();
            e
        })
    }

    /// Drops expired or orphaned consumers from `entry` if its cleanup is due.
    ///
    /// Returns the number of down-faces moved to the clean list.
    pub fn lazy_cleanup(&self, entry: &Arc<PitEntry>) -> Result<usize> {
        let now = self.clock.now_us();
        if now < entry.next_cleanup_us() {
            return Ok(0);
        }
        let mut locked = self.lock(entry)?;
        Ok(self.cleanup_locked(&mut locked, now))
    }

    pub(crate) fn cleanup_locked(&self, locked: &mut LockedEntry, now: u64) -> usize {
        let removed =
            locked.cleanup_if_due(now, self.config.cleaning_interval_us(), self.faces.as_ref());
        if removed > 0 {
            self.metrics.faces_cleaned.add(removed as u64);
            trace!("entry {:016x}: cleaned {} down-faces", locked.hash(), removed);
        }
        removed
    }

    /// Unlinks `face_id` from the entry's consumers.
    pub fn remove_down_face(&self, locked: &mut LockedEntry, face_id: FaceId) -> usize {
        let removed = locked.remove_down_face(face_id);
        if removed > 0 && locked.pending_removal() {
            debug!("entry {:016x} has no consumers left", locked.hash());
        }
        removed
    }

    /// First live face the entry was forwarded to.
    pub fn upstream_face_of(&self, locked: &LockedEntry) -> Option<FaceId> {
        locked.upstream_face(self.faces.as_ref())
    }

    /// Unregisters the entry and releases every face record it holds.
    pub fn free(&self, mut locked: LockedEntry) {
        if locked.is_freed() {
            return;
        }
        if self.index.remove_entry(locked.entry()) {
            self.metrics.size.decrement();
        }
        let released = locked.release_faces();
        self.metrics.freed.increment();
        debug!(
            "freed PIT entry {:016x} ({} face records)",
            locked.hash(),
            released
        );
    }

    /// Delivers a Content Object to the entries it satisfies.
    ///
    /// Returns every distinct live consumer with an unexpired interest.
    /// Regular entries give up their consumers and become collectable;
    /// symbolic entries stay pending.
    pub fn satisfy(&self, object: &ParsedMessage) -> Result<Vec<FaceId>> {
        let now = self.clock.now_us();
        let name = object.name.as_bytes();
        let mut candidates: Vec<Arc<PitEntry>> = Vec::new();

        if let Some(keyid) = object.keyid.as_deref() {
            let key = key::build_key(MessageType::Object, name, Some(keyid), None)?;
            candidates.extend(self.index.get(&key));
        }
        candidates.extend(self.index.get(name));
        if let Some(symbolic) = self.search_without_chunk(object)? {
            if !candidates.iter().any(|c| Arc::ptr_eq(c, &symbolic)) {
                candidates.push(symbolic);
            }
        }

        let mut consumers = Vec::new();
        for entry in candidates {
            if entry.is_expired(now) {
                continue;
            }
            let mut locked = match self.lock(&entry) {
                Ok(locked) => locked,
                Err(e) => {
                    warn!("skipping PIT entry {:016x}: {}", entry.hash(), e);
                    continue;
                }
            };
            if locked.is_freed() {
                continue;
            }
            self.cleanup_locked(&mut locked, now);

            for face in locked.down_faces() {
                if face.lifetime_us >= now
                    && self.faces.is_face_alive(face.face_id)
                    && !consumers.contains(&face.face_id)
                {
                    consumers.push(face.face_id);
                }
            }
            if !locked.is_symbolic() {
                locked.consume();
            }
            self.metrics.satisfied.increment();
        }

        debug!("{} satisfied {} consumers", object.name, consumers.len());
        Ok(consumers)
    }

    /// Frees every entry that is collectable or past its drop deadline and
    /// runs lazy cleanup on the rest. Returns the number of entries freed.
    pub fn expire_sweep(&self) -> usize {
        let now = self.clock.now_us();
        let mut freed = 0;

        for entry in self.index.snapshot() {
            if !entry.pending_removal() && now <= entry.drop_lifetime_us() {
                if let Err(e) = self.lazy_cleanup(&entry) {
                    trace!("cleanup of {:016x} deferred: {}", entry.hash(), e);
                }
                continue;
            }
            let locked = match self.lock(&entry) {
                Ok(locked) => locked,
                Err(_) => continue,
            };
            // A request may have revived the entry since the check above.
            let revived = !locked.pending_removal() && now <= locked.drop_lifetime_us();
            if locked.is_freed() || revived {
                continue;
            }
            self.free(locked);
            self.metrics.expired.increment();
            freed += 1;
        }

        if freed > 0 {
            debug!("expiry sweep freed {} PIT entries", freed);
        }
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ResendMethod;
    use crate::face::LiveFaces;
    use rust_ccnfwd_common::message::Name;

    fn setup(capacity: usize) -> (Pit, Arc<ManualClock>, Arc<LiveFaces>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let faces = Arc::new(LiveFaces::with_faces(1..=8));
        let config = PitConfig {
            capacity,
            ..Default::default()
        };
        let pit = Pit::new(config, clock.clone(), faces.clone()).unwrap();
        (pit, clock, faces)
    }

    fn interest(uri: &str, nonce: u32) -> ParsedMessage {
        ParsedMessage::interest(Name::from_uri(uri).unwrap())
            .with_nonce(nonce)
            .with_lifetime(4_000)
    }

    fn request(pit: &Pit, face: u16, msg: &ParsedMessage) -> bool {
        let mut locked = pit.find_or_create_locked(msg).unwrap();
        pit.on_request(&mut locked, FaceId(face), msg, &mut [], ResendMethod::Rfc)
            .unwrap()
    }

    #[test]
    fn find_or_create_reuses_entry() {
        let (pit, _, _) = setup(8);
        let msg = interest("/a", 1);
        let a = pit.find_or_create(&msg).unwrap();
        let b = pit.find_or_create(&msg).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pit.len(), 1);
        assert_eq!(pit.metrics().inserts.value(), 1);
        assert_eq!(pit.metrics().lookups_hit.value(), 1);
    }

    #[test]
    fn full_index_rejects_without_allocating() {
        let (pit, _, _) = setup(1);
        pit.find_or_create(&interest("/a", 1)).unwrap();
        let err = pit.find_or_create(&interest("/b", 1)).unwrap_err();
        assert!(matches!(err, PitError::IndexFull { capacity: 1 }));
        assert_eq!(pit.len(), 1);
        assert_eq!(pit.metrics().index_full.value(), 1);
    }

    #[test]
    fn existing_entry_lock_failure_is_reported() {
        let (pit, _, _) = setup(8);
        let msg = interest("/a", 1);
        let _held = pit.find_or_create_locked(&msg).unwrap();
        let err = pit.find_or_create_locked(&msg).unwrap_err();
        assert!(matches!(err, PitError::LockBusy { .. }));
        assert_eq!(pit.metrics().lock_failures.value(), 1);
    }

    #[test]
    fn restricted_and_bare_requests_are_distinct() {
        let (pit, _, _) = setup(8);
        let bare = pit.find_or_create(&interest("/a", 1)).unwrap();
        let restricted = pit
            .find_or_create(&interest("/a", 1).with_keyid(&b"key"[..]))
            .unwrap();
        assert!(!Arc::ptr_eq(&bare, &restricted));
        assert!(restricted.key().len() > bare.key().len());
        assert_eq!(restricted.restriction_keyid().map(|k| &k[..]), Some(&b"key"[..]));
    }

    #[test]
    fn lazy_cleanup_is_throttled() {
        let (pit, clock, faces) = setup(8);
        let msg = interest("/a", 1);
        request(&pit, 1, &msg);
        request(&pit, 2, &interest("/a", 2));
        let entry = pit.find_or_create(&msg).unwrap();

        faces.close(FaceId(2));
        assert_eq!(pit.lazy_cleanup(&entry).unwrap(), 0);

        clock.advance_ms(1_000);
        assert_eq!(pit.lazy_cleanup(&entry).unwrap(), 1);
        assert_eq!(entry.down_face_count(), 1);

        let locked = pit.lock(&entry).unwrap();
        assert_eq!(locked.clean_down_faces()[0].face_id, FaceId(2));
    }

    #[test]
    fn remove_down_face_marks_pending_removal() {
        let (pit, _, _) = setup(8);
        let msg = interest("/a", 1);
        request(&pit, 1, &msg);
        let mut locked = pit.find_or_create_locked(&msg).unwrap();
        assert_eq!(pit.remove_down_face(&mut locked, FaceId(1)), 1);
        assert!(locked.pending_removal());
        assert_eq!(locked.clean_down_faces().len(), 1);
    }

    #[test]
    fn free_unregisters_and_releases() {
        let (pit, _, _) = setup(8);
        let msg = interest("/a", 1);
        request(&pit, 1, &msg);
        let locked = pit.find_or_create_locked(&msg).unwrap();
        let entry = Arc::clone(locked.entry());
        pit.free(locked);

        assert!(pit.is_empty());
        assert_eq!(entry.down_face_count(), 0);
        assert_eq!(pit.metrics().size.value(), 0);
        assert_eq!(pit.metrics().freed.value(), 1);
    }

    #[test]
    fn satisfy_returns_each_consumer_once() {
        let (pit, _, _) = setup(8);
        request(&pit, 1, &interest("/a", 1));
        request(&pit, 2, &interest("/a", 2));
        request(&pit, 1, &interest("/a", 3));

        let object = ParsedMessage::object(Name::from_uri("/a").unwrap());
        let consumers = pit.satisfy(&object).unwrap();
        assert_eq!(consumers, vec![FaceId(1), FaceId(2)]);

        let entry = pit.find_or_create(&interest("/a", 1)).unwrap();
        assert!(entry.pending_removal());
        assert!(pit.satisfy(&object).unwrap().is_empty());
    }

    #[test]
    fn satisfy_matches_keyid_restricted_interest() {
        let (pit, _, _) = setup(8);
        request(&pit, 1, &interest("/a", 1).with_keyid(&b"k"[..]));
        request(&pit, 2, &interest("/a", 2));

        let object = ParsedMessage::object(Name::from_uri("/a").unwrap()).with_keyid(&b"k"[..]);
        let mut consumers = pit.satisfy(&object).unwrap();
        consumers.sort();
        assert_eq!(consumers, vec![FaceId(1), FaceId(2)]);
    }

    #[test]
    fn symbolic_entry_survives_satisfy() {
        let (pit, _, _) = setup(8);
        let sym = ParsedMessage::interest(Name::from_uri("/live").unwrap())
            .with_symbolic(true)
            .with_lifetime(8_000);
        request(&pit, 3, &sym);

        let object = ParsedMessage::object(Name::from_uri("/live/chunk=4").unwrap());
        assert_eq!(pit.satisfy(&object).unwrap(), vec![FaceId(3)]);
        assert_eq!(pit.satisfy(&object).unwrap(), vec![FaceId(3)]);
    }

    #[test]
    fn request_after_satisfy_is_forwarded_again() {
        let (pit, clock, _) = setup(8);
        assert!(request(&pit, 1, &interest("/a", 1).with_hoplimit(32)));
        clock.advance_ms(100);
        let object = ParsedMessage::object(Name::from_uri("/a").unwrap());
        assert_eq!(pit.satisfy(&object).unwrap(), vec![FaceId(1)]);

        let late = ParsedMessage::interest(Name::from_uri("/a").unwrap())
            .with_nonce(2)
            .with_hoplimit(32)
            .with_lifetime(1_000);
        let mut locked = pit.find_or_create_locked(&late).unwrap();
        assert!(pit
            .on_request(&mut locked, FaceId(2), &late, &mut [], ResendMethod::Rfc)
            .unwrap());
        assert_eq!(locked.down_face_count(), 1);
        assert!(!locked.pending_removal());
        assert_eq!(locked.hoplimit(), 32);
        assert_eq!(locked.adv_lifetime_us(), pit.now_us() + 1_000_000);
        drop(locked);

        assert_eq!(pit.expire_sweep(), 0);
        assert_eq!(pit.satisfy(&object).unwrap(), vec![FaceId(2)]);
    }

    #[test]
    fn freed_entry_is_not_joined() {
        let (pit, _, _) = setup(8);
        let msg = interest("/a", 1);
        request(&pit, 1, &msg);
        let stale = pit.find_or_create(&msg).unwrap();
        pit.free(pit.lock(&stale).unwrap());
        assert!(stale.is_freed());

        // freeing twice is a no-op
        pit.free(pit.lock(&stale).unwrap());
        assert_eq!(pit.metrics().freed.value(), 1);

        let fresh = pit.find_or_create_locked(&msg).unwrap();
        assert!(!Arc::ptr_eq(fresh.entry(), &stale));
        assert!(!fresh.is_freed());
        assert_eq!(pit.len(), 1);
    }

    #[test]
    fn sweep_frees_collectable_and_expired_entries() {
        let (pit, clock, _) = setup(8);
        request(&pit, 1, &interest("/a", 1));
        request(&pit, 1, &interest("/b", 1));
        pit.satisfy(&ParsedMessage::object(Name::from_uri("/a").unwrap()))
            .unwrap();

        assert_eq!(pit.expire_sweep(), 1);
        assert_eq!(pit.len(), 1);

        // lifetime 4s plus the 1s drop margin
        clock.advance_ms(5_000);
        assert_eq!(pit.expire_sweep(), 0);
        clock.advance_ms(1);
        assert_eq!(pit.expire_sweep(), 1);
        assert!(pit.is_empty());
        assert_eq!(pit.metrics().expired.value(), 2);
    }
}
