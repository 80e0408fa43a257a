//! [`ReconnectBackoff`] – reconnect delay and hardware-reset scheduling.
//!
//! Delay after the n-th consecutive failure:
//!
//! ```text
//! n <= fast_retry_failures or refused:  floor
//! otherwise:                            min(max, base × growth^min(n − 1, cap))
//! ```
//!
//! multiplied by a uniform jitter factor.  Failures also accumulate points
//! (lost session 2, failed connect 1); reaching twice the configured
//! threshold requests a full hardware reset and zeroes the points.  A
//! successful registration resets everything.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::BackoffConfig;

/// Why the last attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The peer actively refused; retry almost immediately.
    Refused,
    /// Connect timed out, failed, or registration could not be sent.
    ConnectFailed,
    /// An active session was lost.
    SessionLost,
}

impl FailureKind {
    fn points(self) -> u32 {
        match self {
            FailureKind::SessionLost => 2,
            FailureKind::Refused | FailureKind::ConnectFailed => 1,
        }
    }
}

/// What to do before the next connect attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPlan {
    pub delay: Duration,
    /// Consecutive failures including this one.
    pub failures: u32,
    pub reset_hardware: bool,
}

#[derive(Debug)]
pub struct ReconnectBackoff {
    config: BackoffConfig,
    failures: u32,
    points: u32,
    rng: StdRng,
}

impl ReconnectBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: 0,
            points: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Seed the jitter source for deterministic tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay before jitter for the `failures`-th consecutive failure.
    pub fn nominal_delay(&self, failures: u32, kind: FailureKind) -> Duration {
        let cfg = &self.config;
        if kind == FailureKind::Refused || failures <= cfg.fast_retry_failures {
            return Duration::from_millis(cfg.floor_delay_ms);
        }
        let exponent = failures.saturating_sub(1).min(cfg.exponent_cap);
        let scaled = cfg.base_delay_ms as f64 * cfg.growth.powi(exponent as i32);
        Duration::from_millis(scaled.min(cfg.max_delay_ms as f64) as u64)
    }

    fn jitter(&mut self) -> f64 {
        let (lo, hi) = (self.config.jitter_min, self.config.jitter_max);
        if hi > lo { self.rng.gen_range(lo..hi) } else { lo }
    }

    pub fn record_failure(&mut self, kind: FailureKind) -> RetryPlan {
        self.failures = self.failures.saturating_add(1);
        self.points = self.points.saturating_add(kind.points());

        let reset_hardware = self.config.hardware_reset_threshold > 0
            && self.points >= 2 * self.config.hardware_reset_threshold;
        if reset_hardware {
            self.points = 0;
        }

        let nominal = self.nominal_delay(self.failures, kind);
        RetryPlan {
            delay: nominal.mul_f64(self.jitter()),
            failures: self.failures,
            reset_hardware,
        }
    }

    /// Registration succeeded.
    pub fn record_success(&mut self) {
        self.failures = 0;
        self.points = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> ReconnectBackoff {
        ReconnectBackoff::new(BackoffConfig::default()).with_seed(7)
    }

    #[test]
    fn first_failure_uses_floor() {
        let mut b = backoff();
        let plan = b.record_failure(FailureKind::SessionLost);
        assert!(plan.delay >= Duration::from_millis(80));
        assert!(plan.delay < Duration::from_millis(130));
    }

    #[test]
    fn fourth_retry_matches_growth_formula() {
        let mut b = backoff();
        let mut plans = Vec::new();
        for _ in 0..5 {
            plans.push(b.record_failure(FailureKind::ConnectFailed));
        }
        // 0.5 s × 1.5³ = 1.6875 s, jittered by [0.8, 1.3).
        let fourth = plans[3].delay.as_secs_f64();
        assert!((1.349..2.194).contains(&fourth), "fourth delay {fourth}");
        assert_eq!(
            b.nominal_delay(4, FailureKind::ConnectFailed),
            Duration::from_micros(1_687_000)
        );
    }

    #[test]
    fn nominal_delay_is_non_decreasing_up_to_max() {
        let b = backoff();
        let mut previous = Duration::ZERO;
        for n in 1..=20 {
            let d = b.nominal_delay(n, FailureKind::SessionLost);
            assert!(d >= previous, "failure {n}: {d:?} < {previous:?}");
            assert!(d <= Duration::from_millis(5_000));
            previous = d;
        }
        assert_eq!(previous, Duration::from_millis(5_000));
    }

    #[test]
    fn jittered_delay_stays_in_band() {
        let mut b = backoff();
        for _ in 0..50 {
            let plan = b.record_failure(FailureKind::ConnectFailed);
            let nominal = b.nominal_delay(plan.failures, FailureKind::ConnectFailed);
            assert!(plan.delay >= nominal.mul_f64(0.8));
            assert!(plan.delay < nominal.mul_f64(1.3));
        }
    }

    #[test]
    fn refusal_always_retries_fast() {
        let mut b = backoff();
        for _ in 0..5 {
            b.record_failure(FailureKind::SessionLost);
        }
        let plan = b.record_failure(FailureKind::Refused);
        assert!(plan.delay < Duration::from_millis(130));
    }

    #[test]
    fn success_resets_to_base() {
        let mut b = backoff();
        for _ in 0..6 {
            b.record_failure(FailureKind::SessionLost);
        }
        b.record_success();
        assert_eq!(b.failures(), 0);
        let plan = b.record_failure(FailureKind::SessionLost);
        assert_eq!(plan.failures, 1);
        assert!(plan.delay < Duration::from_millis(130));
    }

    #[test]
    fn hardware_reset_after_threshold_points() {
        let mut b = backoff();
        // Threshold 4 ⇒ reset at 8 points: four lost sessions.
        let resets: Vec<bool> = (0..8)
            .map(|_| b.record_failure(FailureKind::SessionLost).reset_hardware)
            .collect();
        assert_eq!(
            resets,
            vec![false, false, false, true, false, false, false, true]
        );
    }

    #[test]
    fn connect_failures_count_half() {
        let mut b = backoff();
        let resets = (0..8)
            .filter(|_| b.record_failure(FailureKind::ConnectFailed).reset_hardware)
            .count();
        assert_eq!(resets, 1);
    }
}
