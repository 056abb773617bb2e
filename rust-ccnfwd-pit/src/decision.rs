//! Forward decision for an incoming Interest.
//!
//! Given a locked entry, decides whether the Interest arriving on a face has
//! to go upstream or can be aggregated with what is already pending.

use log::{debug, trace};
use rust_ccnfwd_common::message::{AppRegistration, MessageClass, ParsedMessage};
use rust_ccnfwd_common::types::FaceId;

use crate::config::{ms_to_us, ResendMethod};
use crate::entry::{EntryKind, LockedEntry};
use crate::error::{PitError, Result};
use crate::table::Pit;

impl Pit {
    /// Records `msg` from `face_id` on the entry and decides whether to
    /// forward it.
    ///
    /// `raw` is the outgoing buffer; when the advertised lifetime shrinks its
    /// lifetime field is rewritten in place. The caller transmits the
    /// Interest and records the chosen upstream with
    /// [`LockedEntry::add_up_face`].
    pub fn on_request(
        &self,
        locked: &mut LockedEntry,
        face_id: FaceId,
        msg: &ParsedMessage,
        raw: &mut [u8],
        resend: ResendMethod,
    ) -> Result<bool> {
        let now = self.clock.now_us();
        let symbolic = msg.symbolic || msg.long_life;

        let (idx, is_new_face) = locked.find_or_add_down_face(face_id, msg.nonce, symbolic);

        {
            let face = locked.down_face_mut(idx);
            if !is_new_face && msg.nonce != 0 && face.nonce == msg.nonce {
                self.metrics.duplicates_suppressed.increment();
                trace!("duplicate nonce {:08x} from {} for {}", msg.nonce, face_id, msg.name);
                return Ok(false);
            }
            face.nonce = msg.nonce;
        }

        if is_new_face && symbolic {
            locked.mark_symbolic();
        }

        let target_us = self.lifetime_target_us(locked, msg);
        let face_lifetime = now.saturating_add(target_us);
        let prev_face_lifetime = {
            let face = locked.down_face_mut(idx);
            std::mem::replace(&mut face.lifetime_us, face_lifetime)
        };

        let prev_adv = locked.adv_lifetime_us();
        let drop_margin = self.config.drop_margin_us();
        let mut forward = false;
        let mut face_removed = false;

        if face_lifetime > prev_adv {
            locked.set_lifetimes(face_lifetime, drop_margin);
            forward = true;
        } else if msg.is_ccninfo() {
            self.metrics.aggregated.increment();
            return Ok(false);
        } else if face_lifetime < prev_face_lifetime {
            let max = locked.max_down_face_lifetime();
            if max < prev_adv {
                locked.set_lifetimes(max, drop_margin);
                forward = true;
                self.rewrite_lifetime(msg, raw, max.saturating_sub(now))?;
            }
            if msg.cancels() && prev_face_lifetime == prev_adv {
                locked.retire_down_face(idx);
                face_removed = true;
            }
        }

        let hop_exceeds = msg.hoplimit > locked.hoplimit();
        match resend {
            ResendMethod::NoSuppression => {
                if is_new_face {
                    forward = true;
                }
            }
            ResendMethod::Rfc => {
                if prev_adv == 0 {
                    forward = true;
                } else if !forward {
                    forward = hop_exceeds;
                } else if !is_new_face && !hop_exceeds {
                    forward = false;
                }
            }
        }

        if msg.cancels() {
            let others = locked.down_face_count() - usize::from(!face_removed);
            if others >= 2 {
                trace!("{} other consumers still want {}", others, msg.name);
                forward = false;
            }
        }

        if forward {
            if hop_exceeds {
                locked.set_hoplimit(msg.hoplimit);
            }
            self.metrics.forwarded.increment();
        } else {
            self.metrics.aggregated.increment();
        }

        debug!(
            "{} from {}: forward={} new_face={} adv={}us",
            msg.name,
            face_id,
            forward,
            is_new_face,
            locked.adv_lifetime_us()
        );
        Ok(forward)
    }

    /// Lifetime this request asks for, after policy caps.
    fn lifetime_target_us(&self, locked: &LockedEntry, msg: &ParsedMessage) -> u64 {
        let cfg = &self.config;

        if let MessageClass::Ccninfo(req) = &msg.class {
            return ms_to_us(if req.full_discovery {
                cfg.ccninfo_full_discovery_timeout_ms
            } else {
                cfg.ccninfo_reply_timeout_ms
            });
        }

        match msg.app_reg {
            Some(AppRegistration::PitRegistration) => {
                return ms_to_us(msg.lifetime_ms.unwrap_or(cfg.pit_registration_lifetime_ms));
            }
            Some(AppRegistration::DevicePitRegistration) => {
                return ms_to_us(msg.cache_time_ms.unwrap_or(cfg.pit_registration_lifetime_ms));
            }
            _ => {}
        }

        match msg.lifetime_ms {
            Some(lifetime) => {
                let cap = if locked.is_symbolic() || locked.kind() == EntryKind::Symbolic {
                    cfg.symbolic_max_lifetime_ms
                } else {
                    cfg.regular_max_lifetime_ms
                };
                ms_to_us(lifetime.min(cap))
            }
            None => ms_to_us(cfg.default_lifetime_ms),
        }
    }

    /// Patches the lifetime field of the outgoing buffer.
    fn rewrite_lifetime(&self, msg: &ParsedMessage, raw: &mut [u8], lifetime_us: u64) -> Result<()> {
        let Some(field) = msg.lifetime_field else {
            trace!("{} carries no lifetime field to rewrite", msg.name);
            return Ok(());
        };
        field
            .write(raw, lifetime_us / 1_000)
            .map_err(|e| PitError::LifetimeField(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::PitConfig;
    use crate::face::LiveFaces;
    use bytes::Bytes;
    use rust_ccnfwd_common::message::{CcninfoRequest, LifetimeField, Name};
    use std::sync::Arc;

    const T0: u64 = 10_000_000;

    fn setup() -> (Pit, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        let faces = Arc::new(LiveFaces::with_faces(1..=8));
        let pit = Pit::new(PitConfig::default(), clock.clone(), faces).unwrap();
        (pit, clock)
    }

    fn interest(nonce: u32, hoplimit: u8, lifetime_ms: u64) -> ParsedMessage {
        ParsedMessage::interest(Name::from_uri("/video/a").unwrap())
            .with_nonce(nonce)
            .with_hoplimit(hoplimit)
            .with_lifetime(lifetime_ms)
            .with_lifetime_field(LifetimeField { offset: 4, len: 2 })
    }

    fn on(pit: &Pit, face: u16, msg: &ParsedMessage, resend: ResendMethod) -> bool {
        let mut raw = [0u8; 8];
        on_raw(pit, face, msg, resend, &mut raw)
    }

    fn on_raw(
        pit: &Pit,
        face: u16,
        msg: &ParsedMessage,
        resend: ResendMethod,
        raw: &mut [u8],
    ) -> bool {
        let mut locked = pit.find_or_create_locked(msg).unwrap();
        pit.on_request(&mut locked, FaceId(face), msg, raw, resend)
            .unwrap()
    }

    #[test]
    fn first_request_is_forwarded() {
        let (pit, _) = setup();
        assert!(on(&pit, 1, &interest(1, 32, 4_000), ResendMethod::Rfc));
        let locked = pit.find_or_create_locked(&interest(1, 32, 4_000)).unwrap();
        assert_eq!(locked.adv_lifetime_us(), T0 + 4_000_000);
        assert_eq!(locked.drop_lifetime_us(), T0 + 5_000_000);
        assert_eq!(locked.hoplimit(), 32);
    }

    #[test]
    fn aggregation_keeps_one_entry() {
        let (pit, _) = setup();
        on(&pit, 1, &interest(1, 32, 4_000), ResendMethod::Rfc);
        on(&pit, 2, &interest(2, 32, 4_000), ResendMethod::Rfc);
        assert_eq!(pit.len(), 1);
        let entry = pit.find_or_create(&interest(3, 32, 4_000)).unwrap();
        assert_eq!(entry.down_face_count(), 2);
    }

    #[test]
    fn duplicate_nonce_is_suppressed() {
        let (pit, clock) = setup();
        let msg = interest(7, 32, 4_000);
        assert!(on(&pit, 1, &msg, ResendMethod::Rfc));
        clock.advance_ms(100);
        assert!(!on(&pit, 1, &msg, ResendMethod::Rfc));
        assert_eq!(pit.metrics().duplicates_suppressed.value(), 1);
    }

    #[test]
    fn hoplimit_heuristic() {
        let (pit, _) = setup();
        assert!(on(&pit, 1, &interest(1, 32, 4_000), ResendMethod::Rfc));
        assert!(!on(&pit, 2, &interest(2, 20, 4_000), ResendMethod::Rfc));
        assert!(on(&pit, 3, &interest(3, 40, 4_000), ResendMethod::Rfc));

        let locked = pit.find_or_create_locked(&interest(0, 0, 4_000)).unwrap();
        assert_eq!(locked.hoplimit(), 40);
        assert_eq!(locked.down_face_count(), 3);
    }

    #[test]
    fn lifetime_growth_is_forwarded() {
        let (pit, clock) = setup();
        on(&pit, 1, &interest(1, 32, 4_000), ResendMethod::Rfc);
        clock.advance_ms(500);
        assert!(on(&pit, 2, &interest(2, 32, 4_000), ResendMethod::Rfc));
        let entry = pit.find_or_create(&interest(0, 32, 4_000)).unwrap();
        assert_eq!(entry.adv_lifetime_us(), T0 + 4_500_000);
    }

    #[test]
    fn retransmission_without_higher_hoplimit_is_cancelled() {
        let (pit, clock) = setup();
        on(&pit, 1, &interest(0, 32, 4_000), ResendMethod::Rfc);
        clock.advance_ms(500);
        assert!(!on(&pit, 1, &interest(0, 32, 4_000), ResendMethod::Rfc));
        clock.advance_ms(500);
        assert!(on(&pit, 1, &interest(0, 33, 4_000), ResendMethod::Rfc));
    }

    #[test]
    fn no_suppression_forwards_every_new_face() {
        let (pit, _) = setup();
        assert!(on(&pit, 1, &interest(1, 32, 4_000), ResendMethod::NoSuppression));
        assert!(on(&pit, 2, &interest(2, 1, 1_000), ResendMethod::NoSuppression));
        assert!(on(&pit, 3, &interest(3, 0, 500), ResendMethod::NoSuppression));
        assert!(!on(&pit, 3, &interest(4, 0, 500), ResendMethod::Rfc));
    }

    #[test]
    fn lifetime_shrink_rewrites_buffer() {
        let (pit, clock) = setup();
        on(&pit, 1, &interest(0, 32, 4_000), ResendMethod::Rfc);
        on(&pit, 2, &interest(2, 32, 2_000), ResendMethod::Rfc);
        clock.advance_ms(200);

        let mut raw = [0u8; 8];
        let forward = on_raw(&pit, 1, &interest(0, 50, 1_000), ResendMethod::Rfc, &mut raw);
        assert!(forward);

        // face 2 now holds the maximum: T0 + 2s, i.e. 1800ms from now
        let entry = pit.find_or_create(&interest(0, 32, 4_000)).unwrap();
        assert_eq!(entry.adv_lifetime_us(), T0 + 2_000_000);
        assert_eq!(u16::from_be_bytes([raw[4], raw[5]]), 1_800);
    }

    #[test]
    fn cancel_by_max_holder_removes_face() {
        let (pit, _) = setup();
        on(&pit, 1, &interest(0, 32, 4_000), ResendMethod::Rfc);
        on(&pit, 2, &interest(2, 32, 1_000), ResendMethod::Rfc);

        on(&pit, 1, &interest(0, 32, 0), ResendMethod::Rfc);
        let locked = pit.find_or_create_locked(&interest(0, 32, 4_000)).unwrap();
        assert_eq!(locked.down_face_count(), 1);
        assert_eq!(locked.down_faces()[0].face_id, FaceId(2));
        assert_eq!(locked.clean_down_faces()[0].face_id, FaceId(1));
        assert_eq!(locked.adv_lifetime_us(), T0 + 1_000_000);
    }

    #[test]
    fn cancel_is_suppressed_while_others_wait() {
        let (pit, _) = setup();
        on(&pit, 1, &interest(0, 32, 4_000), ResendMethod::Rfc);
        on(&pit, 2, &interest(2, 32, 2_000), ResendMethod::Rfc);
        on(&pit, 3, &interest(3, 32, 2_000), ResendMethod::Rfc);

        assert!(!on(&pit, 1, &interest(0, 64, 0), ResendMethod::Rfc));
    }

    #[test]
    fn symbolic_flag_sticks_and_uses_symbolic_cap() {
        let (pit, _) = setup();
        let sym = interest(1, 32, 60_000).with_symbolic(true);
        assert!(on(&pit, 1, &sym, ResendMethod::Rfc));
        on(&pit, 2, &interest(2, 32, 4_000), ResendMethod::Rfc);

        let entry = pit.find_or_create(&sym).unwrap();
        assert!(entry.is_symbolic());
        assert_eq!(entry.adv_lifetime_us(), T0 + 10_000_000);
    }

    #[test]
    fn regular_lifetime_is_capped() {
        let (pit, _) = setup();
        on(&pit, 1, &interest(1, 32, 60_000), ResendMethod::Rfc);
        let entry = pit.find_or_create(&interest(1, 32, 60_000)).unwrap();
        assert_eq!(entry.adv_lifetime_us(), T0 + 4_000_000);
    }

    #[test]
    fn missing_lifetime_uses_default() {
        let (pit, _) = setup();
        let mut msg = interest(1, 32, 0);
        msg.lifetime_ms = None;
        on(&pit, 1, &msg, ResendMethod::Rfc);
        assert_eq!(pit.find_or_create(&msg).unwrap().adv_lifetime_us(), T0 + 4_000_000);
    }

    #[test]
    fn pit_registration_defaults_to_an_hour() {
        let (pit, _) = setup();
        let mut msg = interest(1, 32, 0)
            .with_app_registration(AppRegistration::PitRegistration);
        msg.lifetime_ms = None;
        on(&pit, 1, &msg, ResendMethod::Rfc);
        let entry = pit.find_or_create(&msg).unwrap();
        assert_eq!(entry.kind(), EntryKind::PitRegistration);
        assert_eq!(entry.adv_lifetime_us(), T0 + 3_600_000_000);
    }

    #[test]
    fn device_registration_uses_cache_time() {
        let (pit, _) = setup();
        let msg = interest(1, 32, 1_000)
            .with_app_registration(AppRegistration::DevicePitRegistration)
            .with_cache_time(30_000);
        on(&pit, 1, &msg, ResendMethod::Rfc);
        assert_eq!(pit.find_or_create(&msg).unwrap().adv_lifetime_us(), T0 + 30_000_000);
    }

    #[test]
    fn ccninfo_uses_fixed_timeouts() {
        let (pit, _) = setup();
        let request = |full: bool, id: u16| {
            ParsedMessage::ccninfo(
                Name::from_uri("/video/a").unwrap(),
                CcninfoRequest {
                    node_id: Bytes::from_static(b"n1"),
                    request_id: id,
                    full_discovery: full,
                },
            )
            .with_nonce(9)
        };

        let ordinary = request(false, 1);
        assert!(on(&pit, 1, &ordinary, ResendMethod::Rfc));
        assert!(!on(&pit, 2, &ordinary.clone().with_nonce(10), ResendMethod::NoSuppression));
        let entry = pit.find_or_create(&ordinary).unwrap();
        assert_eq!(entry.kind(), EntryKind::CcninfoDiscovery);
        assert_eq!(entry.adv_lifetime_us(), T0 + 4_000_000);

        let full = request(true, 2);
        on(&pit, 1, &full, ResendMethod::Rfc);
        assert_eq!(pit.find_or_create(&full).unwrap().adv_lifetime_us(), T0 + 10_000_000);
    }

    #[test]
    fn rewrite_outside_buffer_is_an_error() {
        let (pit, clock) = setup();
        on(&pit, 1, &interest(0, 32, 4_000), ResendMethod::Rfc);
        on(&pit, 2, &interest(2, 32, 2_000), ResendMethod::Rfc);
        clock.advance_ms(10);

        let msg = interest(0, 32, 1_000);
        let mut locked = pit.find_or_create_locked(&msg).unwrap();
        let mut short = [0u8; 2];
        let err = pit
            .on_request(&mut locked, FaceId(1), &msg, &mut short, ResendMethod::Rfc)
            .unwrap_err();
        assert!(matches!(err, PitError::LifetimeField(_)));
    }
}
