//! Read-only lookups.
//!
//! Searches never take the entry lock. They read the atomic mirrors on
//! [`PitEntry`]; a stale read can only cost an aggregation, since removed
//! faces are moved to the clean list rather than freed.

use std::sync::Arc;

use log::trace;
use rust_ccnfwd_common::message::{MessageClass, Name, ParsedMessage};

use crate::entry::PitEntry;
use crate::error::Result;
use crate::key::{self, MessageType};
use crate::table::Pit;

/// Hook deciding whether an entry serves the requested version of a name.
pub trait VariantMatcher: Send + Sync {
    fn matches(&self, entry: &PitEntry, msg: &ParsedMessage) -> bool;
}

/// Accepts every version.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl VariantMatcher for AcceptAll {
    fn matches(&self, _entry: &PitEntry, _msg: &ParsedMessage) -> bool {
        true
    }
}

fn message_type(msg: &ParsedMessage) -> MessageType {
    match msg.class {
        MessageClass::Object => MessageType::Object,
        _ => MessageType::Interest,
    }
}

impl Pit {
    /// Exact lookup of the entry `msg` maps to.
    ///
    /// Expired entries are not returned, except to PIT deregistrations.
    /// ccninfo entries stay reachable until their drop deadline so late
    /// replies still find their requester.
    pub fn search(&self, msg: &ParsedMessage) -> Result<Option<Arc<PitEntry>>> {
        let key = key::key_for(msg)?;
        let now = self.clock.now_us();

        let found = self.index.get(&key).filter(|entry| {
            let live = if msg.is_deregistration() {
                true
            } else if msg.is_ccninfo() {
                now <= entry.drop_lifetime_us()
            } else {
                !entry.is_expired(now)
            };
            live && self.matcher.matches(entry, msg)
        });

        match &found {
            Some(_) => self.metrics.lookups_hit.increment(),
            None => self.metrics.lookups_miss.increment(),
        }
        Ok(found)
    }

    /// Looks for a symbolic entry registered on the name without its chunk.
    ///
    /// Returns `None` when the name carries no chunk segment.
    pub fn search_without_chunk(&self, msg: &ParsedMessage) -> Result<Option<Arc<PitEntry>>> {
        let prefix = match msg.name.chunk()? {
            Some(_) => msg.name.without_chunk()?,
            None => return Ok(None),
        };
        let objhash = match message_type(msg) {
            MessageType::Interest => msg.objhash.as_deref(),
            MessageType::Object => None,
        };
        let key = key::build_key(message_type(msg), prefix, msg.keyid.as_deref(), objhash)?;

        let now = self.clock.now_us();
        Ok(self.index.get(&key).filter(|entry| {
            entry.is_symbolic() && !entry.is_expired(now) && self.matcher.matches(entry, msg)
        }))
    }

    /// Probes chunks around the requested one for a live entry.
    ///
    /// Nearest chunks are tried first, the lower one before the higher.
    pub fn search_with_any_chunk(&self, msg: &ParsedMessage) -> Result<Option<Arc<PitEntry>>> {
        let target = match msg.name.chunk()? {
            Some(chunk) => chunk,
            None => return Ok(None),
        };
        let prefix = Name::from_wire(bytes::Bytes::copy_from_slice(msg.name.without_chunk()?));
        let objhash = match message_type(msg) {
            MessageType::Interest => msg.objhash.as_deref(),
            MessageType::Object => None,
        };
        let now = self.clock.now_us();
        let window = self.config.chunk_probe_window;

        let mut probes = Vec::with_capacity(2 * window as usize + 1);
        probes.push(target);
        for d in 1..=window {
            probes.extend(target.checked_sub(d));
            probes.extend(target.checked_add(d));
        }

        for chunk in probes {
            let name = prefix.with_chunk(chunk);
            let key = key::build_key(
                message_type(msg),
                name.as_bytes(),
                msg.keyid.as_deref(),
                objhash,
            )?;
            if let Some(entry) = self.index.get(&key) {
                if !entry.is_expired(now) && self.matcher.matches(&entry, msg) {
                    trace!("chunk {} of {} joins chunk {}", target, prefix, chunk);
                    return Ok(Some(entry));
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{PitConfig, ResendMethod};
    use crate::face::LiveFaces;
    use bytes::Bytes;
    use rust_ccnfwd_common::message::{AppRegistration, CcninfoRequest};
    use rust_ccnfwd_common::types::FaceId;

    fn setup(config: PitConfig) -> (Pit, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let faces = Arc::new(LiveFaces::with_faces(1..=4));
        (Pit::new(config, clock.clone(), faces).unwrap(), clock)
    }

    fn request(pit: &Pit, msg: &ParsedMessage) {
        let mut locked = pit.find_or_create_locked(msg).unwrap();
        pit.on_request(&mut locked, FaceId(1), msg, &mut [], ResendMethod::Rfc)
            .unwrap();
    }

    fn interest(uri: &str) -> ParsedMessage {
        ParsedMessage::interest(Name::from_uri(uri).unwrap())
            .with_nonce(1)
            .with_lifetime(2_000)
    }

    struct RejectAll;

    impl VariantMatcher for RejectAll {
        fn matches(&self, _entry: &PitEntry, _msg: &ParsedMessage) -> bool {
            false
        }
    }

    #[test]
    fn search_hides_expired_entries() {
        let (pit, clock) = setup(PitConfig::default());
        let msg = interest("/a/b");
        assert!(pit.search(&msg).unwrap().is_none());
        request(&pit, &msg);

        assert!(pit.search(&msg).unwrap().is_some());
        clock.advance_ms(2_000);
        assert!(pit.search(&msg).unwrap().is_some());
        clock.advance_ms(1);
        assert!(pit.search(&msg).unwrap().is_none());
        assert_eq!(pit.metrics().lookups_miss.value(), 3);
    }

    #[test]
    fn deregistration_ignores_expiry() {
        let (pit, clock) = setup(PitConfig::default());
        let reg = interest("/app").with_app_registration(AppRegistration::PitRegistration);
        request(&pit, &reg);
        clock.advance_ms(10_000);

        assert!(pit.search(&reg).unwrap().is_none());
        let dereg = interest("/app").with_app_registration(AppRegistration::PitDeregistration);
        assert!(pit.search(&dereg).unwrap().is_some());
    }

    #[test]
    fn ccninfo_survives_until_drop_deadline() {
        let (pit, clock) = setup(PitConfig::default());
        let msg = ParsedMessage::ccninfo(
            Name::from_uri("/a").unwrap(),
            CcninfoRequest {
                node_id: Bytes::from_static(b"node"),
                request_id: 5,
                full_discovery: false,
            },
        );
        request(&pit, &msg);

        clock.advance_ms(4_500);
        assert!(pit.search(&msg).unwrap().is_some());
        clock.advance_ms(600);
        assert!(pit.search(&msg).unwrap().is_none());
    }

    #[test]
    fn variant_matcher_is_consulted() {
        let (pit, _) = setup(PitConfig::default());
        let pit = pit.with_variant_matcher(Arc::new(RejectAll));
        let msg = interest("/a");
        request(&pit, &msg);
        assert!(pit.search(&msg).unwrap().is_none());
    }

    #[test]
    fn without_chunk_finds_symbolic_prefix() {
        let (pit, _) = setup(PitConfig::default());
        request(&pit, &interest("/live").with_symbolic(true));
        request(&pit, &interest("/plain"));

        let chunk = interest("/live/chunk=9");
        let found = pit.search_without_chunk(&chunk).unwrap().unwrap();
        assert!(found.is_symbolic());

        assert!(pit
            .search_without_chunk(&interest("/plain/chunk=9"))
            .unwrap()
            .is_none());
        assert!(pit.search_without_chunk(&interest("/live")).unwrap().is_none());
    }

    #[test]
    fn any_chunk_probes_the_window() {
        let config = PitConfig {
            chunk_probe_window: 2,
            ..Default::default()
        };
        let (pit, _) = setup(config);
        request(&pit, &interest("/v/chunk=10"));

        let near = pit.search_with_any_chunk(&interest("/v/chunk=12")).unwrap();
        assert!(near.is_some());
        let exact = pit.search_with_any_chunk(&interest("/v/chunk=10")).unwrap();
        assert!(Arc::ptr_eq(&exact.unwrap(), &near.unwrap()));

        assert!(pit
            .search_with_any_chunk(&interest("/v/chunk=13"))
            .unwrap()
            .is_none());
        assert!(pit.search_with_any_chunk(&interest("/v")).unwrap().is_none());
    }

    #[test]
    fn any_chunk_does_not_underflow() {
        let (pit, _) = setup(PitConfig::default());
        request(&pit, &interest("/v/chunk=2"));
        assert!(pit
            .search_with_any_chunk(&interest("/v/chunk=0"))
            .unwrap()
            .is_some());
    }
}
