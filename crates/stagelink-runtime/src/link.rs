//! [`SessionLink`] – the one channel of a session, shared by its tasks.
//!
//! All four tasks send through the link; only the inbound loop receives.
//! The first fatal condition any of them hits is recorded as the
//! [`DrainReason`] and cancels the session token, which every task watches.
//! Once [`retire`](SessionLink::retire) has been called no message reaches
//! the channel again.

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use stagelink_hal::lock;
use stagelink_middleware::{Channel, Incoming};
use stagelink_types::{LinkError, OutboundMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Why a session left the active phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainReason {
    /// The operator closed the channel.
    PeerClosed,
    /// A send or receive failed.
    Transport(String),
    /// An activity stayed silent past its critical threshold.
    Silence(String),
    /// Process shutdown.
    Shutdown,
}

impl fmt::Display for DrainReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrainReason::PeerClosed => write!(f, "peer closed the channel"),
            DrainReason::Transport(e) => write!(f, "transport error: {e}"),
            DrainReason::Silence(what) => write!(f, "silence: {what}"),
            DrainReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

pub struct SessionLink {
    channel: Arc<dyn Channel>,
    send_timeout: Duration,
    cancel: CancellationToken,
    retired: AtomicBool,
    reason: Mutex<Option<DrainReason>>,
}

impl SessionLink {
    pub fn new(channel: Arc<dyn Channel>, send_timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            channel,
            send_timeout,
            cancel,
            retired: AtomicBool::new(false),
            reason: Mutex::new(None),
        }
    }

    /// Session cancellation token.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_draining(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Send with the configured timeout.  A transport failure ends the
    /// session.
    ///
    /// # Errors
    ///
    /// [`LinkError::Retired`] after [`retire`](Self::retire), otherwise
    /// whatever the channel returned.
    pub async fn send(&self, message: &OutboundMessage) -> Result<(), LinkError> {
        if self.retired.load(Ordering::SeqCst) {
            return Err(LinkError::Retired);
        }
        match self.channel.send(message, self.send_timeout).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if e.is_transport() {
                    warn!(kind = message.kind(), error = %e, "send failed; ending session");
                    self.trip(DrainReason::Transport(e.to_string()));
                }
                Err(e)
            }
        }
    }

    /// Receive the next inbound item.  `None` means the peer closed.
    pub async fn recv(&self) -> Result<Option<Incoming>, LinkError> {
        self.channel.recv().await
    }

    /// Record `reason` (first one wins) and cancel the session.
    pub fn trip(&self, reason: DrainReason) {
        {
            let mut slot = lock(&self.reason);
            if slot.is_none() {
                debug!(%reason, "session drain requested");
                *slot = Some(reason);
            }
        }
        self.cancel.cancel();
    }

    pub fn reason(&self) -> Option<DrainReason> {
        lock(&self.reason).clone()
    }

    /// Refuse every later send.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    pub async fn close(&self) {
        self.channel.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stagelink_middleware::{Connector, LoopbackConnector};

    fn ping() -> OutboundMessage {
        OutboundMessage::Ping {
            station_id: "st-1".into(),
            timestamp: Utc::now(),
        }
    }

    async fn open() -> (SessionLink, stagelink_middleware::LoopbackPeer) {
        let (connector, mut acceptor) = LoopbackConnector::pair();
        let channel = connector
            .open("loop://test", Duration::from_secs(1))
            .await
            .unwrap();
        let peer = acceptor.accept().await.unwrap();
        let link = SessionLink::new(channel, Duration::from_millis(200), CancellationToken::new());
        (link, peer)
    }

    #[tokio::test]
    async fn retired_link_refuses_sends() {
        let (link, mut peer) = open().await;
        link.send(&ping()).await.unwrap();
        link.retire();
        assert!(matches!(link.send(&ping()).await, Err(LinkError::Retired)));
        assert_eq!(peer.recv().await.unwrap().kind(), "ping");
        assert!(peer.drain_ready().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn send_timeout_trips_the_session() {
        let (link, peer) = open().await;
        peer.stall_sends(true);
        assert!(link.send(&ping()).await.is_err());
        assert!(link.is_draining());
        assert!(matches!(link.reason(), Some(DrainReason::Transport(_))));
    }

    #[tokio::test]
    async fn first_reason_wins() {
        let (link, _peer) = open().await;
        link.trip(DrainReason::PeerClosed);
        link.trip(DrainReason::Shutdown);
        assert_eq!(link.reason(), Some(DrainReason::PeerClosed));
    }
}
