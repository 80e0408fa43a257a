//! [`ActivityWatchdog`] – per-category silence tracking.
//!
//! The session records a timestamp every time an activity succeeds (a
//! command executed, a frame sent, a ping/pong exchanged).  The health
//! monitor asks the watchdog how long each activity has been silent and
//! compares that against two thresholds:
//!
//! - *extended* – something is slow; check more often.
//! - *critical* – the channel is presumed hung; force a reconnect.
//!
//! Every method has an `_at` variant taking the current instant explicitly so
//! callers driving a virtual clock see consistent results.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Activity categories tracked per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Activity {
    Command,
    Frame,
    Ping,
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activity::Command => write!(f, "command"),
            Activity::Frame => write!(f, "frame"),
            Activity::Ping => write!(f, "ping"),
        }
    }
}

/// Extended/critical silence thresholds for one activity.  `None` disables
/// that level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SilenceThresholds {
    pub extended: Option<Duration>,
    pub critical: Option<Duration>,
}

impl SilenceThresholds {
    pub fn new(extended: Option<Duration>, critical: Option<Duration>) -> Self {
        Self { extended, critical }
    }
}

/// Severity of one activity's silence, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SilenceLevel {
    Healthy,
    Extended,
    Critical,
}

/// Outcome of [`ActivityWatchdog::check_at`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SilenceReport {
    /// Worst level across all tracked activities.
    pub level: SilenceLevel,
    /// Activities at `Extended` or worse, with their silence.
    pub offenders: Vec<(Activity, SilenceLevel, Duration)>,
}

impl SilenceReport {
    pub fn is_critical(&self) -> bool {
        self.level == SilenceLevel::Critical
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Internal entry
// ────────────────────────────────────────────────────────────────────────────

struct ActivityEntry {
    last_success: Instant,
    thresholds: SilenceThresholds,
    tracked: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// ActivityWatchdog
// ────────────────────────────────────────────────────────────────────────────

/// Tracks the last-success instant for each [`Activity`].
///
/// # Example
///
/// ```
/// use std::time::{Duration, Instant};
/// use stagelink_kernel::watchdog::{Activity, ActivityWatchdog, SilenceLevel, SilenceThresholds};
///
/// let start = Instant::now();
/// let mut wd = ActivityWatchdog::new();
/// wd.register_at(
///     Activity::Frame,
///     SilenceThresholds::new(Some(Duration::from_secs(5)), Some(Duration::from_secs(15))),
///     start,
/// );
///
/// assert_eq!(wd.level_at(Activity::Frame, start + Duration::from_secs(6)), SilenceLevel::Extended);
/// wd.record_at(Activity::Frame, start + Duration::from_secs(6));
/// assert_eq!(wd.level_at(Activity::Frame, start + Duration::from_secs(7)), SilenceLevel::Healthy);
/// ```
#[derive(Default)]
pub struct ActivityWatchdog {
    entries: HashMap<Activity, ActivityEntry>,
}

impl ActivityWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `activity`, starting its silence clock at `now`.
    /// Re-registering resets the clock.
    pub fn register_at(&mut self, activity: Activity, thresholds: SilenceThresholds, now: Instant) {
        self.entries.insert(
            activity,
            ActivityEntry {
                last_success: now,
                thresholds,
                tracked: true,
            },
        );
    }

    pub fn register(&mut self, activity: Activity, thresholds: SilenceThresholds) {
        self.register_at(activity, thresholds, Instant::now());
    }

    /// Include or exclude `activity` from [`check_at`](Self::check_at).
    ///
    /// Re-enabling restarts the silence clock at `now` so a long untracked
    /// period does not count as silence.
    pub fn set_tracked_at(&mut self, activity: Activity, tracked: bool, now: Instant) {
        if let Some(entry) = self.entries.get_mut(&activity) {
            if tracked && !entry.tracked {
                entry.last_success = now;
            }
            entry.tracked = tracked;
        }
    }

    pub fn is_tracked(&self, activity: Activity) -> bool {
        self.entries.get(&activity).is_some_and(|e| e.tracked)
    }

    /// Record a success for `activity`.  No-op for unregistered activities.
    pub fn record_at(&mut self, activity: Activity, now: Instant) {
        if let Some(entry) = self.entries.get_mut(&activity) {
            entry.last_success = entry.last_success.max(now);
        }
    }

    pub fn record(&mut self, activity: Activity) {
        self.record_at(activity, Instant::now());
    }

    pub fn silence_at(&self, activity: Activity, now: Instant) -> Option<Duration> {
        self.entries
            .get(&activity)
            .map(|e| now.saturating_duration_since(e.last_success))
    }

    /// Level of one activity.  Unregistered or untracked activities are
    /// always [`SilenceLevel::Healthy`].
    pub fn level_at(&self, activity: Activity, now: Instant) -> SilenceLevel {
        match self.entries.get(&activity) {
            Some(entry) if entry.tracked => Self::classify(entry, now),
            _ => SilenceLevel::Healthy,
        }
    }

    fn classify(entry: &ActivityEntry, now: Instant) -> SilenceLevel {
        let silence = now.saturating_duration_since(entry.last_success);
        let over = |limit: Option<Duration>| limit.is_some_and(|l| silence > l);
        if over(entry.thresholds.critical) {
            SilenceLevel::Critical
        } else if over(entry.thresholds.extended) {
            SilenceLevel::Extended
        } else {
            SilenceLevel::Healthy
        }
    }

    /// Evaluate every tracked activity.  Offenders are listed worst first.
    pub fn check_at(&self, now: Instant) -> SilenceReport {
        let mut offenders: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, e)| e.tracked)
            .filter_map(|(activity, e)| {
                let level = Self::classify(e, now);
                (level > SilenceLevel::Healthy).then(|| {
                    (*activity, level, now.saturating_duration_since(e.last_success))
                })
            })
            .collect();
        offenders.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.cmp(&a.2)));
        SilenceReport {
            level: offenders
                .first()
                .map_or(SilenceLevel::Healthy, |(_, level, _)| *level),
            offenders,
        }
    }

    pub fn check(&self) -> SilenceReport {
        self.check_at(Instant::now())
    }
}
