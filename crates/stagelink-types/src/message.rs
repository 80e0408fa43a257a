//! Messages carried by the single bidirectional channel.
//!
//! Both directions are JSON objects internally tagged by `"type"` with
//! camelCase field names.  Frame image bytes travel as standard base64.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::command::{CommandError, MotionRequest};
use crate::fault::FaultCounterSnapshot;

/// Messages the remote operator sends to the station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InboundMessage {
    Ping {
        timestamp: f64,
    },
    /// Reply to a station-originated ping.
    Pong {
        echoed_timestamp: f64,
    },
    Heartbeat,
    Command(MotionRequest),
    /// A sequence of motion commands run in the supervised routine slot.
    Routine {
        #[serde(default)]
        id: Option<String>,
        steps: Vec<MotionRequest>,
        #[serde(default)]
        dwell_ms: u64,
    },
}

/// Outcome reported in a command result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Success,
    Error,
}

/// Exactly one of these is sent for every inbound command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub station_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,
    pub status: CommandStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl CommandResult {
    pub fn success(
        station_id: impl Into<String>,
        command_id: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            station_id: station_id.into(),
            command_id,
            status: CommandStatus::Success,
            message: message.into(),
            error_kind: None,
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn from_error(
        station_id: impl Into<String>,
        command_id: Option<String>,
        err: &CommandError,
    ) -> Self {
        Self {
            station_id: station_id.into(),
            command_id,
            status: CommandStatus::Error,
            message: err.to_string(),
            error_kind: Some(err.kind().to_string()),
            details: None,
            timestamp: Utc::now(),
        }
    }

    /// An error result whose kind is not a [`CommandError`], e.g. a
    /// cancelled routine.
    pub fn failure(
        station_id: impl Into<String>,
        command_id: Option<String>,
        error_kind: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            station_id: station_id.into(),
            command_id,
            status: CommandStatus::Error,
            message: message.into(),
            error_kind: Some(error_kind.to_string()),
            details: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach structured details (builder-style).
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }
}

/// One encoded camera frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMessage {
    pub station_id: String,
    pub sequence_number: u64,
    pub captured_at: DateTime<Utc>,
    #[serde(with = "base64_bytes")]
    pub image_bytes: Vec<u8>,
    /// Compression quality the frame was encoded at.
    pub quality: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
}

/// Messages the station sends to the remote operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OutboundMessage {
    Register {
        station_id: String,
        connection_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    Frame(FrameMessage),
    Position {
        station_id: String,
        value: f64,
        timestamp: DateTime<Utc>,
    },
    Health {
        station_id: String,
        uptime_secs: f64,
        fault_counters: FaultCounterSnapshot,
        timestamp: DateTime<Utc>,
    },
    Ping {
        station_id: String,
        timestamp: DateTime<Utc>,
    },
    Pong {
        station_id: String,
        echoed_timestamp: f64,
        timestamp: DateTime<Utc>,
    },
    CommandResult(CommandResult),
}

impl OutboundMessage {
    /// Wire tag, handy for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Register { .. } => "register",
            OutboundMessage::Frame(_) => "frame",
            OutboundMessage::Position { .. } => "position",
            OutboundMessage::Health { .. } => "health",
            OutboundMessage::Ping { .. } => "ping",
            OutboundMessage::Pong { .. } => "pong",
            OutboundMessage::CommandResult(_) => "commandResult",
        }
    }

    pub fn station_id(&self) -> &str {
        match self {
            OutboundMessage::Register { station_id, .. }
            | OutboundMessage::Position { station_id, .. }
            | OutboundMessage::Health { station_id, .. }
            | OutboundMessage::Ping { station_id, .. }
            | OutboundMessage::Pong { station_id, .. } => station_id,
            OutboundMessage::Frame(frame) => &frame.station_id,
            OutboundMessage::CommandResult(result) => &result.station_id,
        }
    }
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_command_decodes_from_operator_json() {
        let raw = r#"{"type":"command","id":"c-1","verb":"move","direction":"right","magnitude":5,"unit":"µm"}"#;
        let msg: InboundMessage = serde_json::from_str(raw).unwrap();
        match msg {
            InboundMessage::Command(req) => {
                assert_eq!(req.id.as_deref(), Some("c-1"));
                assert_eq!(req.verb, "move");
                assert_eq!(req.unit.as_deref(), Some("µm"));
                assert_eq!(req.magnitude, Some(5.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn inbound_ping_and_heartbeat_decode() {
        let ping: InboundMessage = serde_json::from_str(r#"{"type":"ping","timestamp":1712.5}"#).unwrap();
        assert_eq!(ping, InboundMessage::Ping { timestamp: 1712.5 });
        let hb: InboundMessage = serde_json::from_str(r#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(hb, InboundMessage::Heartbeat);
    }

    #[test]
    fn inbound_routine_uses_camel_case_fields() {
        let raw = r#"{"type":"routine","dwellMs":250,"steps":[{"verb":"home"}]}"#;
        let msg: InboundMessage = serde_json::from_str(raw).unwrap();
        match msg {
            InboundMessage::Routine { steps, dwell_ms, id } => {
                assert_eq!(steps.len(), 1);
                assert_eq!(dwell_ms, 250);
                assert!(id.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_inbound_type_is_an_error() {
        assert!(serde_json::from_str::<InboundMessage>(r#"{"type":"reboot"}"#).is_err());
    }

    #[test]
    fn frame_bytes_travel_as_base64() {
        let msg = OutboundMessage::Frame(FrameMessage {
            station_id: "st-1".to_string(),
            sequence_number: 7,
            captured_at: Utc::now(),
            image_bytes: vec![0xff, 0xd8, 0xff],
            quality: 70,
            position: Some(1.25),
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"frame\""));
        assert!(json.contains("\"imageBytes\":\"/9j/\""));
        assert!(json.contains("\"sequenceNumber\":7"));
        let back: OutboundMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn command_result_from_error_carries_kind() {
        let result = CommandResult::from_error("st-1", Some("c-9".into()), &CommandError::NotReady);
        assert!(!result.is_success());
        assert_eq!(result.error_kind.as_deref(), Some("not-ready"));
        assert_eq!(result.message, "not initialized");

        let json = serde_json::to_string(&OutboundMessage::CommandResult(result)).unwrap();
        assert!(json.contains("\"type\":\"commandResult\""));
        assert!(json.contains("\"commandId\":\"c-9\""));
        assert!(json.contains("\"status\":\"error\""));
    }

    #[test]
    fn every_outbound_message_names_its_station() {
        let msg = OutboundMessage::Pong {
            station_id: "st-2".to_string(),
            echoed_timestamp: 3.0,
            timestamp: Utc::now(),
        };
        assert_eq!(msg.station_id(), "st-2");
        assert_eq!(msg.kind(), "pong");
    }
}
