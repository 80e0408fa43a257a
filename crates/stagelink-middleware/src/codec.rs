//! JSON wire codec shared by every channel implementation.

use stagelink_types::{InboundMessage, LinkError, OutboundMessage};

use crate::channel::Incoming;

pub fn encode_outbound(message: &OutboundMessage) -> Result<String, LinkError> {
    serde_json::to_string(message)
        .map_err(|e| LinkError::Codec(format!("encode {}: {e}", message.kind())))
}

/// Decode one inbound text frame.  Undecodable input is returned as
/// [`Incoming::Malformed`] rather than an error so a bad message never ends
/// the session.
pub fn decode_inbound(text: &str) -> Incoming {
    match serde_json::from_str::<InboundMessage>(text) {
        Ok(message) => Incoming::Message(message),
        Err(e) => Incoming::Malformed(e.to_string()),
    }
}

pub fn encode_inbound(message: &InboundMessage) -> Result<String, LinkError> {
    serde_json::to_string(message).map_err(|e| LinkError::Codec(e.to_string()))
}

pub fn decode_outbound(text: &str) -> Result<OutboundMessage, LinkError> {
    serde_json::from_str(text).map_err(|e| LinkError::Codec(e.to_string()))
}
