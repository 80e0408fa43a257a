//! Frame rate and compression quality controller.
//!
//! A pure state machine fed once per capture with the time elapsed since the
//! previous capture.  It keeps a backlog counter:
//!
//! - elapsed > 2 × target: the loop is behind, backlog grows and the next
//!   capture happens immediately.
//! - otherwise backlog shrinks and the loop sleeps out the rest of the
//!   interval, never longer than `max_sleep`.
//!
//! Quality follows the backlog in steps: it drops at once to the level the
//! backlog calls for and climbs back at most one step per tick, so a short
//! recovery does not bounce straight back to the ceiling.

use std::time::Duration;

use tracing::debug;

use crate::config::FrameConfig;

/// What the frame loop should do on this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Sleep before capturing.  Zero when behind.
    pub sleep: Duration,
    /// Encode quality for the next frame.
    pub quality: u8,
    /// Frames to capture and discard first.
    pub flush_frames: u32,
    pub backlog: u32,
}

#[derive(Debug, Clone)]
pub struct RateController {
    target: Duration,
    max_sleep: Duration,
    ceiling: u8,
    floor: u8,
    step: u8,
    severe_backlog: u32,
    flush_frames: u32,
    backlog_cap: u32,
    backlog: u32,
    quality: u8,
}

impl RateController {
    pub fn new(config: &FrameConfig) -> Self {
        let floor = config.quality_floor.min(config.quality_ceiling);
        Self {
            target: config.target_interval(),
            max_sleep: config.max_sleep(),
            ceiling: config.quality_ceiling,
            floor,
            step: config.quality_step.max(1),
            severe_backlog: config.severe_backlog,
            flush_frames: config.flush_frames,
            backlog_cap: config.backlog_cap,
            backlog: 0,
            quality: config.quality_ceiling,
        }
    }

    pub fn backlog(&self) -> u32 {
        self.backlog
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Quality the current backlog calls for.
    pub fn target_quality(&self) -> u8 {
        let drop = u32::from(self.step).saturating_mul(self.backlog / 2);
        let drop = u8::try_from(drop).unwrap_or(u8::MAX);
        self.ceiling.saturating_sub(drop).clamp(self.floor, self.ceiling)
    }

    /// Back to the initial state: no backlog, full quality.
    pub fn reset(&mut self) {
        self.backlog = 0;
        self.quality = self.ceiling;
    }

    pub fn tick(&mut self, elapsed: Duration) -> RateDecision {
        let sleep = if elapsed > self.target * 2 {
            self.backlog = (self.backlog + 1).min(self.backlog_cap);
            Duration::ZERO
        } else {
            self.backlog = self.backlog.saturating_sub(1);
            self.target.saturating_sub(elapsed).min(self.max_sleep)
        };

        let target = self.target_quality();
        let previous = self.quality;
        self.quality = if target <= self.quality {
            target
        } else {
            self.quality.saturating_add(self.step).min(target)
        };
        if self.quality != previous {
            debug!(
                backlog = self.backlog,
                from = previous,
                to = self.quality,
                "frame quality adjusted"
            );
        }

        let flush_frames = if self.backlog >= self.severe_backlog {
            self.flush_frames
        } else {
            0
        };

        RateDecision {
            sleep,
            quality: self.quality,
            flush_frames,
            backlog: self.backlog,
        }
    }
}
