//! The refresh controller: freshness states and state-driven delays.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::debug;

use crate::manager::BootstrapSource;

/// Freshness of the applied manifest relative to its expiry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Expired,
}

/// Classify `now` against `expires_at` and the stale window.
pub fn freshness(
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    stale_window: Duration,
) -> Freshness {
    let stale_window = chrono::Duration::from_std(stale_window)
        .unwrap_or_else(|_| chrono::Duration::zero());
    if now < expires_at - stale_window {
        Freshness::Fresh
    } else if now < expires_at {
        Freshness::Stale
    } else {
        Freshness::Expired
    }
}

/// Controller tuning.
#[derive(Clone, Debug)]
pub struct RefreshConfig {
    pub refresh_interval: Duration,
    pub stale_refresh_interval: Duration,
    pub slow_polling_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_factor: f64,
    pub backoff_max: Duration,
    pub jitter_ratio: f64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(6 * 3600),
            stale_refresh_interval: Duration::from_secs(15 * 60),
            slow_polling_interval: Duration::from_secs(24 * 3600),
            backoff_base: Duration::from_secs(30),
            backoff_factor: 2.0,
            backoff_max: Duration::from_secs(3600),
            jitter_ratio: 0.2,
        }
    }
}

/// What the controller decided after an outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshDecision {
    pub next_delay: Duration,
    pub source: BootstrapSource,
    /// True when a manifest was accepted after running on a fallback
    /// source.
    pub restored_manifest: bool,
}

/// Drives the next-refresh schedule from accept/failure outcomes.
pub struct RefreshController {
    config: RefreshConfig,
    failures: u32,
    source: BootstrapSource,
}

impl RefreshController {
    pub fn new(config: RefreshConfig) -> Self {
        Self {
            config,
            failures: 0,
            source: BootstrapSource::None,
        }
    }

    /// The source the controller currently believes the transport runs on.
    pub fn source(&self) -> BootstrapSource {
        self.source
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// A manifest was verified and applied.
    pub fn on_manifest_accepted(&mut self, freshness: Freshness) -> RefreshDecision {
        let restored = self.source != BootstrapSource::Manifest;
        self.failures = 0;
        self.source = BootstrapSource::Manifest;
        let next_delay = match freshness {
            Freshness::Stale | Freshness::Expired => self.config.stale_refresh_interval,
            Freshness::Fresh => self.config.refresh_interval,
        };
        debug!(?freshness, restored, "manifest accepted");
        RefreshDecision {
            next_delay,
            source: self.source,
            restored_manifest: restored,
        }
    }

    /// A fetch or verification failed in a way worth retrying soon.
    /// The source degrades one step: manifest → cache → baked → none.
    pub fn on_recoverable_error(&mut self) -> RefreshDecision {
        self.failures += 1;
        self.source = match self.source {
            BootstrapSource::Manifest => BootstrapSource::Cache,
            BootstrapSource::Cache => BootstrapSource::Baked,
            BootstrapSource::Baked | BootstrapSource::None => BootstrapSource::None,
        };

        let attempt = self.failures.max(1);
        let base = self.config.backoff_base.as_secs_f64();
        let raw = base * self.config.backoff_factor.powi(attempt as i32 - 1);
        let capped = raw.min(self.config.backoff_max.as_secs_f64());
        let jittered = apply_jitter(capped, self.config.jitter_ratio);

        RefreshDecision {
            next_delay: Duration::from_secs_f64(jittered),
            source: self.source,
            restored_manifest: false,
        }
    }

    /// A failure that retrying soon cannot fix (e.g. schema rejection).
    pub fn on_non_recoverable_error(&mut self) -> RefreshDecision {
        self.failures = 0;
        RefreshDecision {
            next_delay: self.config.slow_polling_interval,
            source: self.source,
            restored_manifest: false,
        }
    }

    /// Seed the controller with a non-manifest startup source.
    pub fn set_initial_source(&mut self, source: BootstrapSource) {
        self.source = source;
    }
}

fn apply_jitter(value: f64, ratio: f64) -> f64 {
    if ratio <= 0.0 {
        return value;
    }
    let spread = value * ratio;
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    (value + offset).max(0.0)
}
