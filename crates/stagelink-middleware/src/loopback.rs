//! In-memory [`Connector`] for tests and local demos.
//!
//! Every successful [`LoopbackConnector::open`] creates a channel pair and
//! hands the far end to the [`LoopbackAcceptor`] as a [`LoopbackPeer`], which
//! plays the remote operator.  Messages cross the pair as JSON text, so the
//! same codec as the WebSocket transport is exercised.
//!
//! Failure injection:
//! - [`LoopbackConnector::refuse_next`] – the next `n` opens are refused.
//! - [`LoopbackConnector::hang_next`] – the next `n` opens time out.
//! - [`LoopbackPeer::stall_sends`] – sends on that channel time out.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use stagelink_types::{InboundMessage, LinkError, OutboundMessage};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::channel::{Channel, Connector, Incoming};
use crate::codec::{decode_inbound, decode_outbound, encode_inbound, encode_outbound};

#[derive(Default)]
struct Injection {
    refuse: u32,
    hang: u32,
}

/// Connector half of the loopback transport.
#[derive(Clone)]
pub struct LoopbackConnector {
    peers: mpsc::UnboundedSender<LoopbackPeer>,
    injection: Arc<Mutex<Injection>>,
    attempts: Arc<AtomicU32>,
}

/// Receives the far end of every opened channel.
pub struct LoopbackAcceptor {
    peers: mpsc::UnboundedReceiver<LoopbackPeer>,
}

impl LoopbackConnector {
    pub fn pair() -> (Self, LoopbackAcceptor) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers: tx,
                injection: Arc::default(),
                attempts: Arc::default(),
            },
            LoopbackAcceptor { peers: rx },
        )
    }

    pub fn refuse_next(&self, n: u32) {
        self.injection
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .refuse = n;
    }

    pub fn hang_next(&self, n: u32) {
        self.injection
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .hang = n;
    }

    /// Total `open` calls so far, successful or not.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn open(&self, address: &str, timeout: Duration) -> Result<Arc<dyn Channel>, LinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let (refuse, hang) = {
            let mut inj = self
                .injection
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if inj.refuse > 0 {
                inj.refuse -= 1;
                (true, false)
            } else if inj.hang > 0 {
                inj.hang -= 1;
                (false, true)
            } else {
                (false, false)
            }
        };
        if refuse {
            return Err(LinkError::Refused(address.to_string()));
        }
        if hang {
            tokio::time::sleep(timeout).await;
            return Err(LinkError::Timeout {
                operation: format!("connect {address}"),
                after: timeout,
            });
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(PairState::default());
        let peer = LoopbackPeer {
            outbound: out_rx,
            inbound: Some(in_tx),
            shared: Arc::clone(&shared),
        };
        self.peers
            .send(peer)
            .map_err(|_| LinkError::Refused(format!("{address}: no acceptor")))?;
        debug!(address, "loopback channel opened");
        Ok(Arc::new(LoopbackChannel {
            outbound: out_tx,
            inbound: tokio::sync::Mutex::new(in_rx),
            shared,
        }))
    }
}

impl LoopbackAcceptor {
    /// Wait for the next opened channel.  `None` once every connector clone
    /// has been dropped.
    pub async fn accept(&mut self) -> Option<LoopbackPeer> {
        self.peers.recv().await
    }
}

#[derive(Default)]
struct PairState {
    client_closed: AtomicBool,
    stalled: AtomicBool,
}

/// Station-side end of a loopback pair.
pub struct LoopbackChannel {
    outbound: mpsc::UnboundedSender<String>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    shared: Arc<PairState>,
}

#[async_trait]
impl Channel for LoopbackChannel {
    async fn send(&self, message: &OutboundMessage, timeout: Duration) -> Result<(), LinkError> {
        if self.shared.client_closed.load(Ordering::SeqCst) {
            return Err(LinkError::ChannelClosed);
        }
        if self.shared.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(timeout).await;
            return Err(LinkError::Timeout {
                operation: format!("send {}", message.kind()),
                after: timeout,
            });
        }
        let text = encode_outbound(message)?;
        self.outbound
            .send(text)
            .map_err(|_| LinkError::ChannelClosed)
    }

    async fn recv(&self) -> Result<Option<Incoming>, LinkError> {
        let mut inbound = self.inbound.lock().await;
        Ok(inbound.recv().await.map(|text| decode_inbound(&text)))
    }

    async fn close(&self) {
        self.shared.client_closed.store(true, Ordering::SeqCst);
    }
}

/// Operator-side end of a loopback pair.
pub struct LoopbackPeer {
    outbound: mpsc::UnboundedReceiver<String>,
    inbound: Option<mpsc::UnboundedSender<String>>,
    shared: Arc<PairState>,
}

impl LoopbackPeer {
    /// Next message the station sent, or `None` once the station side is
    /// dropped.  Undecodable text is logged and skipped.
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        loop {
            let text = self.outbound.recv().await?;
            match decode_outbound(&text) {
                Ok(msg) => return Some(msg),
                Err(e) => warn!(error = %e, "loopback peer skipped undecodable message"),
            }
        }
    }

    /// Receive until `pred` matches, discarding everything else.
    pub async fn recv_until(
        &mut self,
        mut pred: impl FnMut(&OutboundMessage) -> bool,
    ) -> Option<OutboundMessage> {
        while let Some(msg) = self.recv().await {
            if pred(&msg) {
                return Some(msg);
            }
        }
        None
    }

    /// Drain whatever has already been sent without waiting.
    pub fn drain_ready(&mut self) -> Vec<OutboundMessage> {
        let mut out = Vec::new();
        while let Ok(text) = self.outbound.try_recv() {
            if let Ok(msg) = decode_outbound(&text) {
                out.push(msg);
            }
        }
        out
    }

    /// Send a message to the station.  Returns `false` once closed.
    pub fn send(&self, message: &InboundMessage) -> bool {
        match encode_inbound(message) {
            Ok(text) => self.send_raw(text),
            Err(_) => false,
        }
    }

    /// Send arbitrary text, e.g. to exercise malformed-input handling.
    pub fn send_raw(&self, text: impl Into<String>) -> bool {
        self.inbound
            .as_ref()
            .is_some_and(|tx| tx.send(text.into()).is_ok())
    }

    /// Make every further send from the station time out.
    pub fn stall_sends(&self, stalled: bool) {
        self.shared.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Close the operator side: the station's `recv` returns `Ok(None)`.
    pub fn close(&mut self) {
        self.inbound = None;
    }

    /// `true` once the station called [`Channel::close`].
    pub fn closed_by_station(&self) -> bool {
        self.shared.client_closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_millis(100);

    fn ping() -> OutboundMessage {
        OutboundMessage::Ping {
            station_id: "st-1".into(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn messages_cross_in_both_directions() {
        let (connector, mut acceptor) = LoopbackConnector::pair();
        let channel = connector.open("loop://a", T).await.unwrap();
        let mut peer = acceptor.accept().await.unwrap();

        channel.send(&ping(), T).await.unwrap();
        assert_eq!(peer.recv().await.unwrap().kind(), "ping");

        assert!(peer.send(&InboundMessage::Heartbeat));
        assert_eq!(
            channel.recv().await.unwrap(),
            Some(Incoming::Message(InboundMessage::Heartbeat))
        );
    }

    #[tokio::test]
    async fn peer_close_ends_receive() {
        let (connector, mut acceptor) = LoopbackConnector::pair();
        let channel = connector.open("loop://a", T).await.unwrap();
        let mut peer = acceptor.accept().await.unwrap();
        peer.close();
        assert_eq!(channel.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn station_close_rejects_sends() {
        let (connector, mut acceptor) = LoopbackConnector::pair();
        let channel = connector.open("loop://a", T).await.unwrap();
        let peer = acceptor.accept().await.unwrap();
        channel.close().await;
        assert!(peer.closed_by_station());
        assert!(matches!(
            channel.send(&ping(), T).await,
            Err(LinkError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn malformed_text_surfaces_as_malformed() {
        let (connector, mut acceptor) = LoopbackConnector::pair();
        let channel = connector.open("loop://a", T).await.unwrap();
        let peer = acceptor.accept().await.unwrap();
        peer.send_raw("{{{");
        assert!(matches!(
            channel.recv().await.unwrap(),
            Some(Incoming::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn refusal_injection() {
        let (connector, _acceptor) = LoopbackConnector::pair();
        connector.refuse_next(2);
        assert!(matches!(
            connector.open("loop://a", T).await.err(),
            Some(LinkError::Refused(_))
        ));
        assert!(connector.open("loop://a", T).await.is_err());
        assert!(connector.open("loop://a", T).await.is_ok());
        assert_eq!(connector.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn hang_injection_times_out() {
        let (connector, _acceptor) = LoopbackConnector::pair();
        connector.hang_next(1);
        let started = tokio::time::Instant::now();
        let err = connector.open("loop://a", T).await.err().unwrap();
        assert!(matches!(err, LinkError::Timeout { .. }));
        assert!(started.elapsed() >= T);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_send_times_out() {
        let (connector, mut acceptor) = LoopbackConnector::pair();
        let channel = connector.open("loop://a", T).await.unwrap();
        let peer = acceptor.accept().await.unwrap();
        peer.stall_sends(true);
        assert!(matches!(
            channel.send(&ping(), T).await,
            Err(LinkError::Timeout { .. })
        ));
    }
}
