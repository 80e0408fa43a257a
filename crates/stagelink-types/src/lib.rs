//! `stagelink-types` – shared value types for the station link.
//!
//! Everything that crosses a crate boundary lives here: the inbound and
//! outbound message shapes, the validated [`Command`] model, fault
//! categories, and the global [`LinkError`].
//!
//! # Modules
//!
//! - [`command`] – raw [`MotionRequest`] payloads and their validated
//!   [`Command`] / [`MotionCommand`] form, plus [`CommandError`].
//! - [`message`] – [`InboundMessage`] and [`OutboundMessage`], the two
//!   directions of the single bidirectional channel.
//! - [`fault`] – [`FaultCategory`] classification and counter snapshots.

use std::time::Duration;

use thiserror::Error;

pub mod command;
pub mod fault;
pub mod message;

pub use command::{
    Command, CommandError, Direction, LengthUnit, MotionAction, MotionCommand, MotionRequest,
};
pub use fault::{FaultCategory, FaultCounterSnapshot};
pub use message::{
    CommandResult, CommandStatus, FrameMessage, InboundMessage, OutboundMessage,
};

/// Global error type spanning transport failures, hardware faults, and
/// worker-pool problems.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Transport Error: {0}")]
    Transport(String),

    /// The peer actively refused the connection attempt.
    #[error("Connection refused: {0}")]
    Refused(String),

    #[error("Timed out after {after:?} during {operation}")]
    Timeout { operation: String, after: Duration },

    #[error("Channel closed by peer")]
    ChannelClosed,

    #[error("Channel retired; no further sends allowed")]
    Retired,

    #[error("Codec Error: {0}")]
    Codec(String),

    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Hardware not ready: {0}")]
    NotReady(String),

    #[error("Worker Error: {0}")]
    Worker(String),

    #[error("Config Error: {0}")]
    Config(String),
}

impl LinkError {
    /// `true` for errors that mean the channel itself can no longer be
    /// trusted. Any of these ends the current session.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            LinkError::Transport(_)
                | LinkError::Refused(_)
                | LinkError::Timeout { .. }
                | LinkError::ChannelClosed
                | LinkError::Retired
        )
    }

    /// Shorthand for a [`LinkError::HardwareFault`].
    pub fn hardware(component: impl Into<String>, details: impl Into<String>) -> Self {
        LinkError::HardwareFault {
            component: component.into(),
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_classification() {
        assert!(LinkError::ChannelClosed.is_transport());
        assert!(LinkError::Retired.is_transport());
        assert!(LinkError::Refused("127.0.0.1:9".to_string()).is_transport());
        assert!(
            LinkError::Timeout {
                operation: "send".to_string(),
                after: Duration::from_millis(5),
            }
            .is_transport()
        );
        assert!(!LinkError::hardware("stage", "overheat").is_transport());
        assert!(!LinkError::Codec("bad json".to_string()).is_transport());
    }

    #[test]
    fn link_error_display() {
        let err = LinkError::hardware("stage", "amplifier disabled");
        assert!(err.to_string().contains("stage"));
        assert!(err.to_string().contains("amplifier disabled"));
    }
}
