//! Trace replay for the ccnfwd CLI
//!
//! A trace is a JSON-lines file. Each line carries an `at_ms` offset and an
//! `op`:
//!
//! ```text
//! {"at_ms": 0,  "op": "interest", "face": 1, "name": "/a", "nonce": 7, "lifetime_ms": 2000}
//! {"at_ms": 5,  "op": "interest", "face": 2, "name": "/a", "nonce": 9, "upstream": 10}
//! {"at_ms": 9,  "op": "nack", "face": 1, "name": "/a", "code": 1}
//! {"at_ms": 12, "op": "object", "name": "/a"}
//! {"at_ms": 40, "op": "close_face", "face": 2}
//! {"at_ms": 90, "op": "sweep"}
//! ```
//!
//! Time is driven by the offsets, so a replay is deterministic.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use log::{debug, info, warn};
use rust_ccnfwd_common::message::{CcninfoRequest, Name, ParsedMessage};
use rust_ccnfwd_common::types::FaceId;
use rust_ccnfwd_pit::{
    FaceManager, LiveFaces, ManualClock, Pit, PitConfig, PitEntry, PitError, ResendMethod,
    ReturnKind,
};
use serde::Deserialize;
use std::{path::PathBuf, sync::Arc};

use crate::utils::{format_offset_us, print_header};

/// Replay clock origin, so that zero lifetimes never collide with time zero.
const ORIGIN_US: u64 = 1_000_000;

#[derive(Debug, Deserialize)]
struct TraceLine {
    at_ms: u64,
    #[serde(flatten)]
    event: TraceEvent,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum TraceEvent {
    Interest {
        face: u16,
        name: String,
        #[serde(default)]
        nonce: u32,
        hoplimit: Option<u8>,
        lifetime_ms: Option<u64>,
        #[serde(default)]
        symbolic: bool,
        keyid: Option<String>,
        /// Face the Interest is relayed to when forwarded.
        upstream: Option<u16>,
    },
    Ccninfo {
        face: u16,
        name: String,
        node_id: String,
        request_id: u16,
        #[serde(default)]
        full_discovery: bool,
    },
    Object {
        name: String,
        keyid: Option<String>,
    },
    Nack {
        face: u16,
        name: String,
        code: u8,
    },
    CloseFace {
        face: u16,
    },
    Sweep,
}

/// Replays `trace` against a fresh PIT and prints what it decided.
pub async fn run_replay(
    config: PitConfig,
    trace: PathBuf,
    resend: Option<ResendMethod>,
) -> Result<()> {
    let resend = resend.unwrap_or(config.resend_method);

    let text = tokio::fs::read_to_string(&trace)
        .await
        .with_context(|| format!("Failed to read trace {}", trace.display()))?;

    let mut events = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parsed: TraceLine = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid trace event", trace.display(), lineno + 1))?;
        events.push(parsed);
    }
    info!("Replaying {} events from {}", events.len(), trace.display());

    let clock = Arc::new(ManualClock::new(ORIGIN_US));
    let faces = Arc::new(LiveFaces::new());
    let pit = Pit::new(config, clock.clone(), faces.clone())?;
    let replay = Replay {
        pit,
        clock,
        faces,
        resend,
    };

    print_header("Replay");
    for line in events {
        replay.clock.set(ORIGIN_US + line.at_ms.saturating_mul(1_000));
        let stamp = format_offset_us(line.at_ms.saturating_mul(1_000));
        match replay.apply(line.event) {
            Ok(outcome) => println!("{} {}", stamp, outcome),
            Err(e) => {
                warn!("event at {}ms failed: {:#}", line.at_ms, e);
                println!("{} error: {:#}", stamp, e);
            }
        }
    }

    replay.print_summary();
    Ok(())
}

struct Replay {
    pit: Pit,
    clock: Arc<ManualClock>,
    faces: Arc<LiveFaces>,
    resend: ResendMethod,
}

impl Replay {
    fn apply(&self, event: TraceEvent) -> Result<String> {
        match event {
            TraceEvent::Interest {
                face,
                name,
                nonce,
                hoplimit,
                lifetime_ms,
                symbolic,
                keyid,
                upstream,
            } => {
                let mut msg = ParsedMessage::interest(Name::from_uri(&name)?)
                    .with_nonce(nonce)
                    .with_symbolic(symbolic);
                if let Some(hoplimit) = hoplimit {
                    msg = msg.with_hoplimit(hoplimit);
                }
                if let Some(lifetime) = lifetime_ms {
                    msg = msg.with_lifetime(lifetime);
                }
                if let Some(keyid) = keyid {
                    msg = msg.with_keyid(Bytes::from(keyid.into_bytes()));
                }
                self.request(face, &msg, upstream)
            }
            TraceEvent::Ccninfo {
                face,
                name,
                node_id,
                request_id,
                full_discovery,
            } => {
                let msg = ParsedMessage::ccninfo(
                    Name::from_uri(&name)?,
                    CcninfoRequest {
                        node_id: Bytes::from(node_id.into_bytes()),
                        request_id,
                        full_discovery,
                    },
                );
                self.request(face, &msg, None)
            }
            TraceEvent::Object { name, keyid } => {
                let mut object = ParsedMessage::object(Name::from_uri(&name)?);
                if let Some(keyid) = keyid {
                    object = object.with_keyid(Bytes::from(keyid.into_bytes()));
                }
                let consumers = self.pit.satisfy(&object)?;
                let list: Vec<String> = consumers.iter().map(|f| f.0.to_string()).collect();
                Ok(format!(
                    "object {}: satisfied {} [{}]",
                    object.name,
                    consumers.len(),
                    list.join(",")
                ))
            }
            TraceEvent::Nack { face, name, code } => {
                let kind = match ReturnKind::from_code(code) {
                    Some(kind) => kind,
                    None => bail!("unknown InterestReturn code {:#04x}", code),
                };
                let probe = ParsedMessage::interest(Name::from_uri(&name)?);
                let entry = match self.pit.search(&probe)? {
                    Some(entry) => entry,
                    None => return Ok(format!("nack {} on {}: no pending entry", name, face)),
                };
                let mut locked = self.pit.lock(&entry)?;
                let stored = locked.set_interest_return(FaceId(face), kind, &[code]);
                let upstream = self.pit.upstream_face_of(&locked);
                Ok(format!(
                    "nack {} for {} ({:?}): {}, upstream {}",
                    name,
                    FaceId(face),
                    kind,
                    if stored { "stored" } else { "kept previous" },
                    upstream.map_or_else(|| "none".to_string(), |f| f.to_string())
                ))
            }
            TraceEvent::CloseFace { face } => {
                let closed = self.faces.close(FaceId(face));
                let mut unlinked = 0;
                for entry in self.pit_entries_for(FaceId(face)) {
                    let mut locked = self.pit.lock(&entry)?;
                    unlinked += self.pit.remove_down_face(&mut locked, FaceId(face));
                }
                Ok(format!(
                    "close {}: {} ({} down-faces unlinked)",
                    FaceId(face),
                    if closed { "closed" } else { "unknown face" },
                    unlinked
                ))
            }
            TraceEvent::Sweep => {
                let freed = self.pit.expire_sweep();
                Ok(format!("sweep: freed {}, {} left", freed, self.pit.len()))
            }
        }
    }

    fn request(
        &self,
        face: u16,
        msg: &ParsedMessage,
        upstream: Option<u16>,
    ) -> Result<String> {
        if !self.faces.is_face_alive(FaceId(face)) {
            debug!("opening {} on first use", FaceId(face));
            self.faces.open(FaceId(face), i32::from(face));
        }

        let mut locked = match self.pit.find_or_create_locked(msg) {
            Ok(locked) => locked,
            Err(e @ PitError::IndexFull { .. }) => {
                return Ok(format!("interest {} on {}: dropped ({})", msg.name, FaceId(face), e))
            }
            Err(e) => return Err(e.into()),
        };
        let forward = self
            .pit
            .on_request(&mut locked, FaceId(face), msg, &mut [], self.resend)?;

        if forward {
            if let Some(up) = upstream {
                if !self.faces.is_face_alive(FaceId(up)) {
                    self.faces.open(FaceId(up), i32::from(up));
                }
                locked.add_up_face(FaceId(up));
            }
        }

        Ok(format!(
            "{} {} on {}: {} (consumers {}, lifetime {}ms)",
            if msg.is_ccninfo() { "ccninfo" } else { "interest" },
            msg.name,
            FaceId(face),
            if forward { "forward" } else { "aggregate" },
            locked.down_face_count(),
            locked.adv_lifetime_us().saturating_sub(self.pit.now_us()) / 1_000
        ))
    }

    fn pit_entries_for(&self, face: FaceId) -> Vec<Arc<PitEntry>> {
        self.pit
            .entries()
            .into_iter()
            .filter(|entry| match self.pit.lock(entry) {
                Ok(locked) => locked.down_faces().iter().any(|f| f.face_id == face),
                Err(_) => false,
            })
            .collect()
    }

    fn print_summary(&self) {
        let m = self.pit.metrics();
        print_header("Summary");
        println!("Entries left: {}", self.pit.len());
        println!("Created: {}", m.inserts.value());
        println!("Forwarded: {}", m.forwarded.value());
        println!("Aggregated: {}", m.aggregated.value());
        println!("Duplicates suppressed: {}", m.duplicates_suppressed.value());
        println!("Satisfied: {}", m.satisfied.value());
        println!("Freed: {} ({} by sweep)", m.freed.value(), m.expired.value());
        println!("Faces cleaned: {}", m.faces_cleaned.value());
    }
}
