// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Tunables for the spin-then-park backoff and the reader bookkeeping.
// Durations are stored as integer microseconds so the struct can be embedded
// in a host's TOML/JSON configuration as plain numbers.

use std::time::Duration;

use serde::Deserialize;

/// Lock tunables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Cooperative-yield iterations before a waiter starts parking.
    pub spin_limit: u32,
    /// Upper bound of a single park; the waiter re-tests on every wake-up.
    pub park_timeout_us: u64,
    /// Minimum wall-clock gap between two dead-reader sweeps.
    pub reclaim_interval_us: u64,
    /// Warn once per acquisition when a writer waits longer than this.
    /// `0` disables the warning.
    pub slow_write_threshold_us: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            spin_limit: 100,
            park_timeout_us: 1_000,
            reclaim_interval_us: 1_000,
            slow_write_threshold_us: 1_000_000,
        }
    }
}

impl LockConfig {
    pub fn with_spin_limit(mut self, spin_limit: u32) -> Self {
        self.spin_limit = spin_limit;
        self
    }

    pub fn with_park_timeout(mut self, timeout: Duration) -> Self {
        self.park_timeout_us = duration_to_us(timeout);
        self
    }

    pub fn with_reclaim_interval(mut self, interval: Duration) -> Self {
        self.reclaim_interval_us = duration_to_us(interval);
        self
    }

    /// `None` disables the slow-write warning.
    pub fn with_slow_write_threshold(mut self, threshold: Option<Duration>) -> Self {
        self.slow_write_threshold_us = threshold.map_or(0, duration_to_us);
        self
    }

    pub fn park_timeout(&self) -> Duration {
        // A zero park would degrade into a hot spin.
        Duration::from_micros(self.park_timeout_us.max(1))
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_micros(self.reclaim_interval_us)
    }

    pub fn slow_write_threshold(&self) -> Option<Duration> {
        (self.slow_write_threshold_us > 0).then(|| Duration::from_micros(self.slow_write_threshold_us))
    }
}

fn duration_to_us(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = LockConfig::default();
        assert_eq!(cfg.spin_limit, 100);
        assert_eq!(cfg.park_timeout(), Duration::from_millis(1));
        assert_eq!(cfg.reclaim_interval(), Duration::from_millis(1));
        assert_eq!(cfg.slow_write_threshold(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn builder_overrides() {
        let cfg = LockConfig::default()
            .with_spin_limit(3)
            .with_park_timeout(Duration::from_micros(250))
            .with_slow_write_threshold(None);
        assert_eq!(cfg.spin_limit, 3);
        assert_eq!(cfg.park_timeout(), Duration::from_micros(250));
        assert_eq!(cfg.slow_write_threshold(), None);
    }

    #[test]
    fn zero_park_timeout_is_clamped() {
        let cfg = LockConfig::default().with_park_timeout(Duration::ZERO);
        assert_eq!(cfg.park_timeout(), Duration::from_micros(1));
    }

    #[test]
    fn deserializes_partial_toml() {
        let cfg: LockConfig = toml::from_str("spin_limit = 7\nreclaim_interval_us = 5000\n").unwrap();
        assert_eq!(cfg.spin_limit, 7);
        assert_eq!(cfg.reclaim_interval(), Duration::from_millis(5));
        assert_eq!(cfg.park_timeout_us, LockConfig::default().park_timeout_us);
    }
}
