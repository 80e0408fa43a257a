//! Runtime configuration.
//!
//! Every section derives `Deserialize` with `#[serde(default)]`, so a config
//! file only needs the keys it wants to change.  Durations are integer
//! milliseconds.  For silence thresholds `0` disables that level.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use stagelink_kernel::{Activity, ExecutorSettings, SafetyEnvelope, SilenceThresholds};

pub use stagelink_kernel::LimitPolicy;

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

fn optional_ms(value: u64) -> Option<Duration> {
    (value > 0).then(|| ms(value))
}

/// Top-level station configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Identity sent with every outbound message.
    pub station_id: String,
    /// Channel address, e.g. `ws://operator.local:8765/station`.
    pub server_url: String,
    /// Use simulated stage and camera drivers.
    pub simulate: bool,
    /// Size of the blocking worker pool for hardware and encode calls.
    pub workers: usize,
    pub session: SessionConfig,
    pub backoff: BackoffConfig,
    pub frames: FrameConfig,
    pub telemetry: TelemetryConfig,
    pub health: HealthConfig,
    pub safety: SafetyConfig,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            station_id: "station-1".to_string(),
            server_url: "ws://127.0.0.1:8765/station".to_string(),
            simulate: false,
            workers: 2,
            session: SessionConfig::default(),
            backoff: BackoffConfig::default(),
            frames: FrameConfig::default(),
            telemetry: TelemetryConfig::default(),
            health: HealthConfig::default(),
            safety: SafetyConfig::default(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sections
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub connect_timeout_ms: u64,
    pub send_timeout_ms: u64,
    /// Upper bound on waiting for session tasks to exit while draining.
    pub drain_wait_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3_000,
            send_timeout_ms: 2_000,
            drain_wait_ms: 2_000,
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        ms(self.connect_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        ms(self.send_timeout_ms)
    }

    pub fn drain_wait(&self) -> Duration {
        ms(self.drain_wait_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub growth: f64,
    pub max_delay_ms: u64,
    /// Largest exponent applied to `growth`.
    pub exponent_cap: u32,
    /// Delay used for the first `fast_retry_failures` failures and for
    /// every refused connection.
    pub floor_delay_ms: u64,
    pub fast_retry_failures: u32,
    pub jitter_min: f64,
    pub jitter_max: f64,
    /// A full hardware reset runs once failures reach twice this many
    /// points (lost session = 2, failed connect = 1).
    pub hardware_reset_threshold: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            growth: 1.5,
            max_delay_ms: 5_000,
            exponent_cap: 6,
            floor_delay_ms: 100,
            fast_retry_failures: 1,
            jitter_min: 0.8,
            jitter_max: 1.3,
            hardware_reset_threshold: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    pub target_interval_ms: u64,
    /// Longest single rate-limiting sleep.
    pub max_sleep_ms: u64,
    pub quality_ceiling: u8,
    pub quality_floor: u8,
    pub quality_step: u8,
    /// Backlog at which stale frames are flushed before capturing.
    pub severe_backlog: u32,
    pub flush_frames: u32,
    pub backlog_cap: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            target_interval_ms: 66,
            max_sleep_ms: 100,
            quality_ceiling: 70,
            quality_floor: 30,
            quality_step: 10,
            severe_backlog: 5,
            flush_frames: 2,
            backlog_cap: 20,
            width: 640,
            height: 480,
        }
    }
}

impl FrameConfig {
    pub fn target_interval(&self) -> Duration {
        ms(self.target_interval_ms)
    }

    pub fn max_sleep(&self) -> Duration {
        ms(self.max_sleep_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub poll_interval_ms: u64,
    /// Emit at least this often even when the position is unchanged.
    pub max_emit_interval_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            max_emit_interval_ms: 1_000,
        }
    }
}

impl TelemetryConfig {
    pub fn poll_interval(&self) -> Duration {
        ms(self.poll_interval_ms)
    }

    pub fn max_emit_interval(&self) -> Duration {
        ms(self.max_emit_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub interval_ms: u64,
    /// Interval used while any extended threshold is crossed.
    pub fast_interval_ms: u64,
    /// Fault polling, I/O flush and hardware init retry.
    pub maintenance_interval_ms: u64,
    pub frame_extended_ms: u64,
    pub frame_critical_ms: u64,
    pub ping_extended_ms: u64,
    pub ping_critical_ms: u64,
    pub command_extended_ms: u64,
    pub command_critical_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            fast_interval_ms: 250,
            maintenance_interval_ms: 5_000,
            frame_extended_ms: 5_000,
            frame_critical_ms: 15_000,
            ping_extended_ms: 20_000,
            ping_critical_ms: 60_000,
            command_extended_ms: 300_000,
            command_critical_ms: 0,
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        ms(self.interval_ms)
    }

    pub fn fast_interval(&self) -> Duration {
        ms(self.fast_interval_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        ms(self.maintenance_interval_ms)
    }

    pub fn thresholds(&self, activity: Activity) -> SilenceThresholds {
        let (extended, critical) = match activity {
            Activity::Frame => (self.frame_extended_ms, self.frame_critical_ms),
            Activity::Ping => (self.ping_extended_ms, self.ping_critical_ms),
            Activity::Command => (self.command_extended_ms, self.command_critical_ms),
        };
        SilenceThresholds::new(optional_ms(extended), optional_ms(critical))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub envelope_min_mm: f64,
    pub envelope_max_mm: f64,
    pub limit_policy: LimitPolicy,
    pub reference_mm: f64,
    /// Report simulated success for motion commands when no stage is
    /// attached.
    pub simulate_without_stage: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            envelope_min_mm: -30.0,
            envelope_max_mm: 30.0,
            limit_policy: LimitPolicy::Reject,
            reference_mm: 0.0,
            simulate_without_stage: false,
        }
    }
}

impl SafetyConfig {
    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            envelope: SafetyEnvelope::new(self.envelope_min_mm, self.envelope_max_mm),
            policy: self.limit_policy,
            reference_mm: self.reference_mm,
            simulate_without_stage: self.simulate_without_stage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: StationConfig = toml::from_str(
            r#"
            station_id = "bench-3"

            [backoff]
            base_delay_ms = 250

            [safety]
            limit_policy = "clamp"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.station_id, "bench-3");
        assert_eq!(cfg.backoff.base_delay_ms, 250);
        assert_eq!(cfg.backoff.growth, 1.5);
        assert_eq!(cfg.safety.limit_policy, LimitPolicy::Clamp);
        assert_eq!(cfg.frames, FrameConfig::default());
    }

    #[test]
    fn zero_threshold_disables_level() {
        let health = HealthConfig::default();
        let command = health.thresholds(Activity::Command);
        assert_eq!(command.extended, Some(Duration::from_secs(300)));
        assert_eq!(command.critical, None);
        let frame = health.thresholds(Activity::Frame);
        assert_eq!(frame.critical, Some(Duration::from_secs(15)));
    }

    #[test]
    fn executor_settings_follow_safety_section() {
        let safety = SafetyConfig {
            envelope_min_mm: -5.0,
            envelope_max_mm: 10.0,
            limit_policy: LimitPolicy::Clamp,
            ..Default::default()
        };
        let settings = safety.executor_settings();
        assert!(settings.envelope.contains(9.0));
        assert!(!settings.envelope.contains(-6.0));
        assert_eq!(settings.policy, LimitPolicy::Clamp);
    }
}
