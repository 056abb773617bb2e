//! Configuration for the Pending Interest Table.
//!
//! A [`PitConfig`] is built once at startup and shared by every PIT
//! operation through the [`crate::Pit`] handle.

use rust_ccnfwd_common::types::DEFAULT_PIT_CAPACITY;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{PitError, Result};

/// Widest chunk probe window accepted by [`PitConfig::validate`].
pub const MAX_CHUNK_PROBE_WINDOW: u32 = 64;

/// Policy deciding whether aggregated Interests are forwarded again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResendMethod {
    /// Aggregate per RFC 8569; re-forward only on lifetime growth or a
    /// higher hop limit.
    #[default]
    Rfc,
    /// Every new face triggers a forward.
    NoSuppression,
}

/// PIT tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PitConfig {
    /// Maximum number of live entries.
    pub capacity: usize,

    /// Ceiling for regular Interest lifetimes.
    pub regular_max_lifetime_ms: u64,

    /// Ceiling for symbolic (long-life) Interest lifetimes.
    pub symbolic_max_lifetime_ms: u64,

    /// Lifetime used when an Interest carries none.
    pub default_lifetime_ms: u64,

    /// Lifetime of a PIT registration without an explicit lifetime.
    pub pit_registration_lifetime_ms: u64,

    /// Reply timeout for ordinary ccninfo discovery.
    pub ccninfo_reply_timeout_ms: u64,

    /// Reply timeout for ccninfo full discovery.
    pub ccninfo_full_discovery_timeout_ms: u64,

    /// Minimum spacing between lazy cleanups of one entry.
    pub cleaning_interval_ms: u64,

    /// Added to the advertised lifetime to get the drop deadline.
    pub drop_margin_ms: u64,

    /// Chunks probed on each side of the target by `search_with_any_chunk`.
    pub chunk_probe_window: u32,

    /// Lock retries after the first failed attempt.
    pub lock_retry_count: u32,

    /// Sleep between lock attempts.
    pub lock_retry_backoff_us: u64,

    pub resend_method: ResendMethod,
}

impl Default for PitConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_PIT_CAPACITY,
            regular_max_lifetime_ms: 4_000,
            symbolic_max_lifetime_ms: 10_000,
            default_lifetime_ms: 4_000,
            pit_registration_lifetime_ms: 60 * 60 * 1_000,
            ccninfo_reply_timeout_ms: 4_000,
            ccninfo_full_discovery_timeout_ms: 10_000,
            cleaning_interval_ms: 1_000,
            drop_margin_ms: 1_000,
            chunk_probe_window: 4,
            lock_retry_count: 5,
            lock_retry_backoff_us: 100,
            resend_method: ResendMethod::Rfc,
        }
    }
}

/// Bounded retry budget for entry locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRetry {
    pub retries: u32,
    pub backoff: Duration,
}

impl PitConfig {
    /// Rejects values the PIT cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(PitError::InvalidConfig("capacity must be positive".into()));
        }
        if self.regular_max_lifetime_ms == 0 || self.symbolic_max_lifetime_ms == 0 {
            return Err(PitError::InvalidConfig(
                "maximum Interest lifetimes must be positive".into(),
            ));
        }
        if self.cleaning_interval_ms == 0 {
            return Err(PitError::InvalidConfig(
                "cleaning_interval_ms must be positive".into(),
            ));
        }
        if self.chunk_probe_window > MAX_CHUNK_PROBE_WINDOW {
            return Err(PitError::InvalidConfig(format!(
                "chunk_probe_window {} exceeds {}",
                self.chunk_probe_window, MAX_CHUNK_PROBE_WINDOW
            )));
        }
        Ok(())
    }

    pub fn lock_retry(&self) -> LockRetry {
        LockRetry {
            retries: self.lock_retry_count,
            backoff: Duration::from_micros(self.lock_retry_backoff_us),
        }
    }

    pub(crate) fn cleaning_interval_us(&self) -> u64 {
        ms_to_us(self.cleaning_interval_ms)
    }

    pub(crate) fn drop_margin_us(&self) -> u64 {
        ms_to_us(self.drop_margin_ms)
    }
}

pub(crate) fn ms_to_us(ms: u64) -> u64 {
    ms.saturating_mul(1_000)
}
