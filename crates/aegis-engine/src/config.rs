//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use aegis_core::identity::UserId;
use serde::Deserialize;

/// Default lower clamp for the aggregated strong-auth timeout: one hour.
pub const DEFAULT_STRONG_AUTH_TIMEOUT_MIN_MS: i64 = 60 * 60 * 1000;

/// Default upper clamp for the aggregated strong-auth timeout: 72 hours.
/// Also the effective value when no admin participates.
pub const DEFAULT_STRONG_AUTH_TIMEOUT_MAX_MS: i64 = 72 * 60 * 60 * 1000;

/// Default bound on waiting for an admin to acknowledge its disable
/// notification before its record is purged regardless.
pub const DEFAULT_DEACTIVATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Static configuration for one engine instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct EngineConfig {
    /// Directory holding per-user policy files and the ownership record.
    pub data_dir: PathBuf,

    /// The device's primary user, used by the wipe tie-break and treated
    /// as always affiliated.
    pub primary_user: UserId,

    /// Lower clamp applied to the aggregated strong-auth timeout.
    pub strong_auth_timeout_min_ms: i64,

    /// Upper clamp applied to the aggregated strong-auth timeout, and the
    /// value reported when no admin participates.
    pub strong_auth_timeout_max_ms: i64,

    /// How long a pending admin removal waits for the disable
    /// acknowledgment before the record is purged anyway.
    #[serde(with = "duration_secs")]
    pub deactivation_timeout: Duration,

    /// Platform variant that permits device-owner designation at most once
    /// per device lifetime.
    pub single_pairing: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("device_policies"),
            primary_user: UserId::SYSTEM,
            strong_auth_timeout_min_ms: DEFAULT_STRONG_AUTH_TIMEOUT_MIN_MS,
            strong_auth_timeout_max_ms: DEFAULT_STRONG_AUTH_TIMEOUT_MAX_MS,
            deactivation_timeout: DEFAULT_DEACTIVATION_TIMEOUT,
            single_pairing: false,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration rooted at `data_dir` with defaults.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Overrides the primary user.
    #[must_use]
    pub fn with_primary_user(mut self, user: UserId) -> Self {
        self.primary_user = user;
        self
    }

    /// Overrides the strong-auth clamp interval.
    #[must_use]
    pub fn with_strong_auth_bounds(mut self, min_ms: i64, max_ms: i64) -> Self {
        self.strong_auth_timeout_min_ms = min_ms;
        self.strong_auth_timeout_max_ms = max_ms;
        self
    }

    /// Overrides the deactivation acknowledgment timeout.
    #[must_use]
    pub fn with_deactivation_timeout(mut self, timeout: Duration) -> Self {
        self.deactivation_timeout = timeout;
        self
    }

    /// Enables the single-pairing platform variant.
    #[must_use]
    pub fn with_single_pairing(mut self, single_pairing: bool) -> Self {
        self.single_pairing = single_pairing;
        self
    }

    /// Clamps an aggregated strong-auth timeout into the configured
    /// interval; `0` (no admin participates) becomes the default maximum.
    #[must_use]
    pub fn clamp_strong_auth_timeout(&self, aggregated_ms: i64) -> i64 {
        if aggregated_ms == 0 {
            return self.strong_auth_timeout_max_ms;
        }
        aggregated_ms.clamp(self.strong_auth_timeout_min_ms, self.strong_auth_timeout_max_ms)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
