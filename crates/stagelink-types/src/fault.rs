//! Hardware fault categories.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse class of an adapter-reported fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultCategory {
    Thermal,
    Amplifier,
    /// Serial/bus level trouble between us and the motor controller.
    Transport,
    Other,
}

impl FaultCategory {
    /// Classify a raw fault code or description by substring.
    ///
    /// Matching is case-insensitive and checked in the order thermal,
    /// amplifier, transport.
    pub fn classify(raw: &str) -> Self {
        let lower = raw.to_ascii_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));
        if has(&["therm", "temp", "overheat"]) {
            FaultCategory::Thermal
        } else if has(&["amp", "current", "drive", "motor"]) {
            FaultCategory::Amplifier
        } else if has(&["comm", "serial", "timeout", "crc", "transport", "link"]) {
            FaultCategory::Transport
        } else {
            FaultCategory::Other
        }
    }
}

impl fmt::Display for FaultCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultCategory::Thermal => write!(f, "thermal"),
            FaultCategory::Amplifier => write!(f, "amplifier"),
            FaultCategory::Transport => write!(f, "transport"),
            FaultCategory::Other => write!(f, "other"),
        }
    }
}

/// Point-in-time copy of the process-lifetime fault counters, as carried in
/// `health` messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultCounterSnapshot {
    pub thermal: u64,
    pub amplifier: u64,
    pub transport: u64,
    pub other: u64,
}

impl FaultCounterSnapshot {
    pub fn total(&self) -> u64 {
        self.thermal + self.amplifier + self.transport + self.other
    }
}
