//! The channel abstraction the session manager is written against.
//!
//! A [`Connector`] opens one [`Channel`] per session.  The channel is an
//! ordered, message-based, full-duplex pipe with an explicit close:
//!
//! * any number of tasks may call [`Channel::send`] concurrently; each call
//!   delivers one whole message or fails,
//! * exactly one task calls [`Channel::recv`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stagelink_types::{InboundMessage, LinkError, OutboundMessage};

/// One item read from the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Message(InboundMessage),
    /// A frame that arrived intact but could not be decoded.  Carries the
    /// decoder's reason.
    Malformed(String),
}

/// An open, bidirectional message channel.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Send one message, failing if it is not handed to the transport within
    /// `timeout`.
    ///
    /// # Errors
    ///
    /// [`LinkError::Timeout`] on expiry, [`LinkError::ChannelClosed`] or
    /// [`LinkError::Transport`] when the channel is no longer usable, and
    /// [`LinkError::Codec`] when the message cannot be encoded.
    async fn send(&self, message: &OutboundMessage, timeout: Duration) -> Result<(), LinkError>;

    /// Wait for the next inbound item.  `Ok(None)` means the peer closed the
    /// channel cleanly.
    ///
    /// # Errors
    ///
    /// [`LinkError::Transport`] on a receive failure.
    async fn recv(&self) -> Result<Option<Incoming>, LinkError>;

    /// Close the channel.  Idempotent; never fails.
    async fn close(&self);
}

/// Opens channels to a remote address.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a channel to `address`, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`LinkError::Refused`] when the peer actively refused,
    /// [`LinkError::Timeout`] when the attempt did not finish in time, and
    /// [`LinkError::Transport`] for any other failure.
    async fn open(&self, address: &str, timeout: Duration) -> Result<Arc<dyn Channel>, LinkError>;
}
