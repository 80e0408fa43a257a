//! Generic `MotionController` trait for the linear stage's motor controller.
//!
//! All distances are in canonical millimetres.  The controller's own firmware
//! runs the closed loop; every method here returns as soon as the directive
//! has been accepted, never when motion completes.

use stagelink_types::{FaultCategory, LinkError};

/// Inclusive numeric range a controller accepts for one parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound {
    pub min: f64,
    pub max: f64,
}

impl Bound {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// The documented bounds of the controller's tunable parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionLimits {
    /// mm/s
    pub speed: Bound,
    /// mm/s²
    pub acceleration: Bound,
    /// mm/s²
    pub deceleration: Bound,
}

impl Default for MotionLimits {
    fn default() -> Self {
        Self {
            speed: Bound::new(0.001, 50.0),
            acceleration: Bound::new(0.01, 500.0),
            deceleration: Bound::new(0.01, 500.0),
        }
    }
}

/// Absolute range for a back-and-forth scan, `start_mm <= end_mm`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanRange {
    pub start_mm: f64,
    pub end_mm: f64,
}

impl ScanRange {
    pub fn width(&self) -> f64 {
        self.end_mm - self.start_mm
    }
}

/// A fault flag latched by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FaultFlag {
    /// Vendor code, e.g. `"OVERTEMP"` or `"E_AMP"`.
    pub code: String,
    pub description: String,
}

impl FaultFlag {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
        }
    }

    pub fn category(&self) -> FaultCategory {
        match FaultCategory::classify(&self.code) {
            FaultCategory::Other => FaultCategory::classify(&self.description),
            known => known,
        }
    }
}

/// A position-controlled linear stage.
pub trait MotionController: Send {
    /// Stable identifier, e.g. `"x_stage"`.
    fn id(&self) -> &str;

    /// Open the controller and enable the drive.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::HardwareFault`] if the controller cannot be
    /// brought up (cable unplugged, port busy, firmware not responding).
    fn initialize(&mut self) -> Result<(), LinkError>;

    /// Disable the drive and release the port.  Never fails.
    fn shutdown(&mut self);

    /// `true` between a successful [`initialize`](Self::initialize) and
    /// [`shutdown`](Self::shutdown).
    fn is_ready(&self) -> bool;

    fn limits(&self) -> MotionLimits {
        MotionLimits::default()
    }

    fn set_speed(&mut self, mm_per_s: f64) -> Result<(), LinkError>;

    fn set_acceleration(&mut self, mm_per_s2: f64) -> Result<(), LinkError>;

    fn set_deceleration(&mut self, mm_per_s2: f64) -> Result<(), LinkError>;

    /// Relative move by `signed_mm`.
    fn step(&mut self, signed_mm: f64) -> Result<(), LinkError>;

    /// Drive to the reference (home) switch.
    fn move_to_reference(&mut self) -> Result<(), LinkError>;

    /// Read the encoder position.  May involve bus I/O.
    fn position(&mut self) -> Result<f64, LinkError>;

    fn start_scan(&mut self, range: ScanRange, cycles: u32) -> Result<(), LinkError>;

    /// Immediate stop.
    fn stop(&mut self) -> Result<(), LinkError>;

    /// Currently latched fault flags; empty when healthy.
    fn fault_status(&mut self) -> Result<Vec<FaultFlag>, LinkError>;

    /// Clear latched faults and re-enable the drive.
    fn clear_faults(&mut self) -> Result<(), LinkError>;

    /// Discard stale bytes buffered on the controller link.
    fn flush_io(&mut self) -> Result<(), LinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_clamps_both_sides() {
        let b = Bound::new(1.0, 10.0);
        assert_eq!(b.clamp(0.5), 1.0);
        assert_eq!(b.clamp(5.0), 5.0);
        assert_eq!(b.clamp(11.0), 10.0);
    }

    #[test]
    fn fault_flag_falls_back_to_description() {
        let coded = FaultFlag::new("OVERTEMP", "");
        assert_eq!(coded.category(), FaultCategory::Thermal);

        let described = FaultFlag::new("E17", "amplifier over-current");
        assert_eq!(described.category(), FaultCategory::Amplifier);

        let unknown = FaultFlag::new("E99", "???");
        assert_eq!(unknown.category(), FaultCategory::Other);
    }

    #[test]
    fn scan_range_width() {
        let r = ScanRange {
            start_mm: -1.5,
            end_mm: 2.0,
        };
        assert!((r.width() - 3.5).abs() < 1e-12);
    }
}
