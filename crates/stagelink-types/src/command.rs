//! Inbound command model.
//!
//! A [`MotionRequest`] is the loosely-typed payload the operator sends.  It is
//! turned into a [`MotionCommand`] by [`MotionCommand::from_request`], which
//! performs every client-side validation (direction, unit, magnitude) and the
//! unit conversion to the canonical millimetre.  No hardware is involved.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fault::FaultCategory;

/// Upper bound on the number of back-and-forth cycles a single `scan` may
/// request.
pub const MAX_SCAN_CYCLES: u32 = 100;

/// Raw `command` payload exactly as it arrives on the wire.
///
/// Fields are kept as strings/options so that malformed values surface as a
/// [`CommandError::Validation`] result instead of a decode failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionRequest {
    /// Optional correlation id echoed back in the command result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub verb: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceleration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deceleration: Option<f64>,
    /// Total scan width, in `unit`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycles: Option<u32>,
}

/// Direction of a relative `move`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
}

impl Direction {
    pub fn parse(raw: &str) -> Result<Self, CommandError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            other => Err(CommandError::Validation(format!(
                "direction must be 'left' or 'right', got '{other}'"
            ))),
        }
    }

    /// `-1.0` for left, `+1.0` for right.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Left => -1.0,
            Direction::Right => 1.0,
        }
    }
}

/// Length units accepted on the wire.  Millimetres are canonical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    Millimetre,
    Micrometre,
    Nanometre,
}

impl LengthUnit {
    /// Parse `mm`, `µm` / `μm` / `um`, or `nm`.
    pub fn parse(raw: &str) -> Result<Self, CommandError> {
        match raw.trim() {
            "mm" => Ok(LengthUnit::Millimetre),
            "µm" | "μm" | "um" => Ok(LengthUnit::Micrometre),
            "nm" => Ok(LengthUnit::Nanometre),
            other => Err(CommandError::Validation(format!(
                "unit must be one of mm, µm, nm; got '{other}'"
            ))),
        }
    }

    /// Convert `value` expressed in this unit to millimetres.
    pub fn to_mm(self, value: f64) -> f64 {
        match self {
            LengthUnit::Millimetre => value,
            LengthUnit::Micrometre => value / 1_000.0,
            LengthUnit::Nanometre => value / 1_000_000.0,
        }
    }
}

/// The verb-specific part of a validated motion command.
#[derive(Debug, Clone, PartialEq)]
pub enum MotionAction {
    /// Relative step, signed, in millimetres.
    Move { step_mm: f64 },
    Home,
    Stop,
    /// Symmetric scan of total width `span_mm` around the current position.
    Scan { span_mm: f64, cycles: u32 },
    SetSpeed(f64),
    SetAccel(f64),
    SetDecel(f64),
}

impl MotionAction {
    pub fn verb(&self) -> &'static str {
        match self {
            MotionAction::Move { .. } => "move",
            MotionAction::Home => "home",
            MotionAction::Stop => "stop",
            MotionAction::Scan { .. } => "scan",
            MotionAction::SetSpeed(_) => "set-speed",
            MotionAction::SetAccel(_) => "set-accel",
            MotionAction::SetDecel(_) => "set-decel",
        }
    }
}

/// A validated motion command.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionCommand {
    pub id: Option<String>,
    pub action: MotionAction,
    /// Applied (after clamping) before the main verb.
    pub acceleration: Option<f64>,
    pub deceleration: Option<f64>,
}

impl MotionCommand {
    /// Validate a raw request.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] for an unknown verb, a missing or
    /// invalid direction, a negative or non-finite magnitude, or an unknown
    /// unit.
    pub fn from_request(req: &MotionRequest) -> Result<Self, CommandError> {
        let acceleration = finite_opt("acceleration", req.acceleration)?;
        let deceleration = finite_opt("deceleration", req.deceleration)?;
        let unit = match req.unit.as_deref() {
            Some(raw) => LengthUnit::parse(raw)?,
            None => LengthUnit::Millimetre,
        };

        let action = match req.verb.trim().to_ascii_lowercase().as_str() {
            "move" => {
                let direction = req
                    .direction
                    .as_deref()
                    .ok_or_else(|| CommandError::Validation("move requires a direction".into()))
                    .and_then(Direction::parse)?;
                let magnitude = required_magnitude("move", req.magnitude)?;
                MotionAction::Move {
                    step_mm: direction.sign() * unit.to_mm(magnitude),
                }
            }
            "home" => MotionAction::Home,
            "stop" => MotionAction::Stop,
            "scan" => {
                let span = required_magnitude("scan span", req.span.or(req.magnitude))?;
                if span == 0.0 {
                    return Err(CommandError::Validation("scan span must be > 0".into()));
                }
                let cycles = req.cycles.unwrap_or(1);
                if cycles == 0 || cycles > MAX_SCAN_CYCLES {
                    return Err(CommandError::Validation(format!(
                        "scan cycles must be in 1..={MAX_SCAN_CYCLES}, got {cycles}"
                    )));
                }
                MotionAction::Scan {
                    span_mm: unit.to_mm(span),
                    cycles,
                }
            }
            "set-speed" | "set_speed" => MotionAction::SetSpeed(required_value("set-speed", req.magnitude)?),
            "set-accel" | "set_accel" => MotionAction::SetAccel(required_value("set-accel", req.magnitude)?),
            "set-decel" | "set_decel" => MotionAction::SetDecel(required_value("set-decel", req.magnitude)?),
            other => {
                return Err(CommandError::Validation(format!("unknown verb '{other}'")));
            }
        };

        Ok(Self {
            id: req.id.clone(),
            action,
            acceleration,
            deceleration,
        })
    }
}

fn finite_opt(field: &str, value: Option<f64>) -> Result<Option<f64>, CommandError> {
    match value {
        Some(v) if !v.is_finite() => Err(CommandError::Validation(format!(
            "{field} must be a finite number"
        ))),
        other => Ok(other),
    }
}

fn required_value(field: &str, value: Option<f64>) -> Result<f64, CommandError> {
    match value {
        Some(v) if v.is_finite() => Ok(v),
        Some(_) => Err(CommandError::Validation(format!("{field} must be a finite number"))),
        None => Err(CommandError::Validation(format!("{field} requires a magnitude"))),
    }
}

fn required_magnitude(field: &str, value: Option<f64>) -> Result<f64, CommandError> {
    let v = required_value(field, value)?;
    if v < 0.0 {
        return Err(CommandError::Validation(format!(
            "{field} magnitude must be >= 0, got {v}"
        )));
    }
    Ok(v)
}

/// A fully decoded inbound command, ready for the executor.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Answered immediately with a pong echoing `timestamp`.
    Ping { timestamp: f64 },
    Heartbeat,
    Motion(MotionCommand),
}

/// Everything that can go wrong while executing a command.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    /// Malformed request; no hardware was touched.
    #[error("validation error: {0}")]
    Validation(String),

    /// No initialized hardware adapter.
    #[error("not initialized")]
    NotReady,

    /// The request would have driven the stage outside its envelope.
    #[error("safety limit: {0}")]
    SafetyLimit(String),

    #[error("hardware fault ({category}): {details}")]
    HardwareFault {
        category: FaultCategory,
        details: String,
    },

    /// A supervised routine is already in progress.
    #[error("already running")]
    AlreadyRunning,
}

impl CommandError {
    /// Short machine-readable error kind, sent as `errorKind` in results.
    pub fn kind(&self) -> &'static str {
        match self {
            CommandError::Validation(_) => "validation",
            CommandError::NotReady => "not-ready",
            CommandError::SafetyLimit(_) => "safety-limit",
            CommandError::HardwareFault { .. } => "hardware-fault",
            CommandError::AlreadyRunning => "already-running",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(verb: &str) -> MotionRequest {
        MotionRequest {
            verb: verb.to_string(),
            ..Default::default()
        }
    }

    fn move_request(direction: &str, magnitude: f64, unit: &str) -> MotionRequest {
        MotionRequest {
            direction: Some(direction.to_string()),
            magnitude: Some(magnitude),
            unit: Some(unit.to_string()),
            ..request("move")
        }
    }

    fn step_of(req: &MotionRequest) -> f64 {
        match MotionCommand::from_request(req).unwrap().action {
            MotionAction::Move { step_mm } => step_mm,
            other => panic!("expected move, got {other:?}"),
        }
    }

    #[test]
    fn micrometres_convert_to_mm() {
        let step = step_of(&move_request("right", 5.0, "µm"));
        assert!((step - 0.005).abs() < 1e-12);
    }

    #[test]
    fn nanometres_convert_and_left_flips_sign() {
        let step = step_of(&move_request("left", 1_000_000.0, "nm"));
        assert!((step - (-1.0)).abs() < 1e-12);
    }

    #[test]
    fn ascii_and_greek_micro_spellings_accepted() {
        for unit in ["um", "µm", "μm"] {
            let step = step_of(&move_request("right", 1000.0, unit));
            assert!((step - 1.0).abs() < 1e-12, "unit {unit}");
        }
    }

    #[test]
    fn missing_unit_defaults_to_mm() {
        let mut req = move_request("right", 2.5, "mm");
        req.unit = None;
        assert!((step_of(&req) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn bad_direction_rejected() {
        let err = MotionCommand::from_request(&move_request("up", 1.0, "mm")).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn negative_magnitude_rejected() {
        let err = MotionCommand::from_request(&move_request("left", -1.0, "mm")).unwrap_err();
        assert!(matches!(err, CommandError::Validation(_)));
    }

    #[test]
    fn nan_magnitude_rejected() {
        let err = MotionCommand::from_request(&move_request("left", f64::NAN, "mm")).unwrap_err();
        assert!(matches!(err, CommandError::Validation(_)));
    }

    #[test]
    fn unknown_unit_rejected() {
        let err = MotionCommand::from_request(&move_request("left", 1.0, "inch")).unwrap_err();
        assert!(err.to_string().contains("inch"));
    }

    #[test]
    fn unknown_verb_rejected() {
        let err = MotionCommand::from_request(&request("teleport")).unwrap_err();
        assert!(err.to_string().contains("teleport"));
    }

    #[test]
    fn scan_defaults_to_one_cycle() {
        let req = MotionRequest {
            span: Some(500.0),
            unit: Some("µm".to_string()),
            ..request("scan")
        };
        let cmd = MotionCommand::from_request(&req).unwrap();
        assert_eq!(
            cmd.action,
            MotionAction::Scan {
                span_mm: 0.5,
                cycles: 1
            }
        );
    }

    #[test]
    fn scan_cycles_bounded() {
        let req = MotionRequest {
            span: Some(1.0),
            cycles: Some(MAX_SCAN_CYCLES + 1),
            ..request("scan")
        };
        assert!(MotionCommand::from_request(&req).is_err());
    }

    #[test]
    fn set_speed_requires_value() {
        assert!(MotionCommand::from_request(&request("set-speed")).is_err());
        let req = MotionRequest {
            magnitude: Some(12.0),
            ..request("set-speed")
        };
        assert_eq!(
            MotionCommand::from_request(&req).unwrap().action,
            MotionAction::SetSpeed(12.0)
        );
    }

    #[test]
    fn infinite_acceleration_rejected() {
        let req = MotionRequest {
            acceleration: Some(f64::INFINITY),
            ..request("home")
        };
        assert!(MotionCommand::from_request(&req).is_err());
    }

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(CommandError::NotReady.kind(), "not-ready");
        assert_eq!(CommandError::SafetyLimit("x".into()).kind(), "safety-limit");
        assert_eq!(CommandError::AlreadyRunning.to_string(), "already running");
        assert_eq!(CommandError::NotReady.to_string(), "not initialized");
    }
}
