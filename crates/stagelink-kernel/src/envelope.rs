//! [`SafetyEnvelope`] – the position interlock every motion directive passes.
//!
//! The envelope is a closed range of absolute stage positions.  A relative
//! step is checked against the *predicted* resulting position; what happens
//! on a violation is decided by the configured [`LimitPolicy`]:
//!
//! - [`LimitPolicy::Reject`] – the step is refused with a safety-limit error
//!   and no hardware is touched.
//! - [`LimitPolicy::Clamp`] – the step is shortened so the predicted position
//!   lands exactly on the violated boundary.
//!
//! Either way the decision is deterministic and reported back to the caller.

use serde::{Deserialize, Serialize};
use stagelink_hal::ScanRange;
use stagelink_types::CommandError;

/// What to do with a step whose predicted position leaves the envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitPolicy {
    #[default]
    Reject,
    Clamp,
}

/// The result of checking one relative step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepDecision {
    pub requested_mm: f64,
    pub applied_mm: f64,
    /// Predicted absolute position after `applied_mm`.
    pub target_mm: f64,
    pub clamped: bool,
}

/// Closed range `[min_mm, max_mm]` of permitted absolute positions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyEnvelope {
    pub min_mm: f64,
    pub max_mm: f64,
}

impl Default for SafetyEnvelope {
    fn default() -> Self {
        Self::symmetric(30.0)
    }
}

impl SafetyEnvelope {
    pub fn new(min_mm: f64, max_mm: f64) -> Self {
        Self { min_mm, max_mm }
    }

    /// `[-half_width, +half_width]`.
    pub fn symmetric(half_width_mm: f64) -> Self {
        Self::new(-half_width_mm.abs(), half_width_mm.abs())
    }

    pub fn contains(&self, position_mm: f64) -> bool {
        (self.min_mm..=self.max_mm).contains(&position_mm)
    }

    /// Check a relative `step_mm` taken from `from_mm` under `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::SafetyLimit`] when the predicted position is
    /// outside the envelope and `policy` is [`LimitPolicy::Reject`].
    pub fn check_step(
        &self,
        from_mm: f64,
        step_mm: f64,
        policy: LimitPolicy,
    ) -> Result<StepDecision, CommandError> {
        let predicted = from_mm + step_mm;
        if self.contains(predicted) {
            return Ok(StepDecision {
                requested_mm: step_mm,
                applied_mm: step_mm,
                target_mm: predicted,
                clamped: false,
            });
        }
        match policy {
            LimitPolicy::Reject => Err(CommandError::SafetyLimit(format!(
                "predicted position {predicted:.6} mm outside [{}, {}] mm",
                self.min_mm, self.max_mm
            ))),
            LimitPolicy::Clamp => {
                let target = predicted.clamp(self.min_mm, self.max_mm);
                Ok(StepDecision {
                    requested_mm: step_mm,
                    applied_mm: target - from_mm,
                    target_mm: target,
                    clamped: true,
                })
            }
        }
    }

    /// Symmetric scan range of total width `span_mm` around `center_mm`,
    /// clipped to the envelope.  Returns the range and whether it was clipped.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::SafetyLimit`] when nothing of the range lies
    /// inside the envelope.
    pub fn scan_range(
        &self,
        center_mm: f64,
        span_mm: f64,
    ) -> Result<(ScanRange, bool), CommandError> {
        let half = span_mm / 2.0;
        let (start, end) = (center_mm - half, center_mm + half);
        let clipped = ScanRange {
            start_mm: start.max(self.min_mm),
            end_mm: end.min(self.max_mm),
        };
        if clipped.width() <= 0.0 {
            return Err(CommandError::SafetyLimit(format!(
                "scan [{start:.6}, {end:.6}] mm lies outside [{}, {}] mm",
                self.min_mm, self.max_mm
            )));
        }
        let was_clipped = clipped.start_mm != start || clipped.end_mm != end;
        Ok((clipped, was_clipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_inside_envelope_is_untouched() {
        let env = SafetyEnvelope::default();
        let d = env.check_step(29.5, -1.0, LimitPolicy::Reject).unwrap();
        assert!(!d.clamped);
        assert!((d.applied_mm + 1.0).abs() < 1e-12);
        assert!((d.target_mm - 28.5).abs() < 1e-12);
    }

    #[test]
    fn reject_policy_refuses_overshoot() {
        let env = SafetyEnvelope::default();
        let err = env.check_step(29.5, 1.0, LimitPolicy::Reject).unwrap_err();
        assert_eq!(err.kind(), "safety-limit");
    }

    #[test]
    fn clamp_policy_lands_on_boundary() {
        let env = SafetyEnvelope::default();
        let d = env.check_step(29.5, 1.0, LimitPolicy::Clamp).unwrap();
        assert!(d.clamped);
        assert!((d.applied_mm - 0.5).abs() < 1e-12);
        assert!((d.target_mm - 30.0).abs() < 1e-12);

        let d = env.check_step(-29.0, -5.0, LimitPolicy::Clamp).unwrap();
        assert!((d.target_mm + 30.0).abs() < 1e-12);
    }

    #[test]
    fn clamp_at_boundary_applies_zero_step() {
        let env = SafetyEnvelope::default();
        let d = env.check_step(30.0, 2.0, LimitPolicy::Clamp).unwrap();
        assert!(d.clamped);
        assert_eq!(d.applied_mm, 0.0);
    }

    #[test]
    fn boundary_itself_is_allowed() {
        let env = SafetyEnvelope::default();
        assert!(env.check_step(29.0, 1.0, LimitPolicy::Reject).is_ok());
    }

    #[test]
    fn no_checked_step_ever_leaves_envelope() {
        let env = SafetyEnvelope::symmetric(30.0);
        let starts = [-30.0, -12.5, 0.0, 17.0, 29.999, 30.0];
        let steps = [-100.0, -30.0, -0.001, 0.0, 0.5, 45.0, 1e6];
        for policy in [LimitPolicy::Reject, LimitPolicy::Clamp] {
            for &from in &starts {
                for &step in &steps {
                    if let Ok(d) = env.check_step(from, step, policy) {
                        assert!(env.contains(from + d.applied_mm), "{from} + {step} ({policy:?})");
                    }
                }
            }
        }
    }

    #[test]
    fn scan_range_is_clipped() {
        let env = SafetyEnvelope::default();
        let (range, clipped) = env.scan_range(0.0, 2.0).unwrap();
        assert!(!clipped);
        assert_eq!(range, ScanRange { start_mm: -1.0, end_mm: 1.0 });

        let (range, clipped) = env.scan_range(29.0, 4.0).unwrap();
        assert!(clipped);
        assert_eq!(range.end_mm, 30.0);
        assert_eq!(range.start_mm, 27.0);
    }

    #[test]
    fn scan_entirely_outside_is_rejected() {
        let env = SafetyEnvelope::default();
        assert!(env.scan_range(40.0, 2.0).is_err());
    }

    #[test]
    fn policy_deserializes_lowercase() {
        let p: LimitPolicy = serde_json::from_str("\"clamp\"").unwrap();
        assert_eq!(p, LimitPolicy::Clamp);
    }
}
