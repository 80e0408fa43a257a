//! WebSocket implementation of [`Connector`] / [`Channel`] over
//! `tokio-tungstenite`.
//!
//! The stream is split once at open time.  The sink sits behind an async
//! mutex so concurrent senders each write one whole frame; the read half has
//! its own mutex and is only ever locked by the inbound loop.

use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use stagelink_types::{LinkError, OutboundMessage};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::channel::{Channel, Connector, Incoming};
use crate::codec::{decode_inbound, encode_outbound};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Opens WebSocket channels with `connect_async`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, address: &str, timeout: Duration) -> Result<Arc<dyn Channel>, LinkError> {
        let (stream, response) = tokio::time::timeout(timeout, connect_async(address))
            .await
            .map_err(|_| LinkError::Timeout {
                operation: format!("connect {address}"),
                after: timeout,
            })?
            .map_err(|e| connect_error(address, e))?;
        info!(address, status = %response.status(), "websocket connected");

        let (sink, stream) = stream.split();
        Ok(Arc::new(WsChannel {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }))
    }
}

fn connect_error(address: &str, err: tungstenite::Error) -> LinkError {
    match err {
        tungstenite::Error::Io(io) if io.kind() == ErrorKind::ConnectionRefused => {
            LinkError::Refused(address.to_string())
        }
        other => LinkError::Transport(format!("connect {address}: {other}")),
    }
}

/// One open WebSocket connection.
pub struct WsChannel {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

#[async_trait]
impl Channel for WsChannel {
    async fn send(&self, message: &OutboundMessage, timeout: Duration) -> Result<(), LinkError> {
        let text = encode_outbound(message)?;
        let write = async {
            let mut sink = self.sink.lock().await;
            sink.send(Message::Text(text.into())).await
        };
        match tokio::time::timeout(timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed)) => {
                Err(LinkError::ChannelClosed)
            }
            Ok(Err(e)) => Err(LinkError::Transport(format!("send {}: {e}", message.kind()))),
            Err(_) => Err(LinkError::Timeout {
                operation: format!("send {}", message.kind()),
                after: timeout,
            }),
        }
    }

    async fn recv(&self) -> Result<Option<Incoming>, LinkError> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                None | Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Text(text))) => return Ok(Some(decode_inbound(text.as_str()))),
                Some(Ok(Message::Binary(bytes))) => {
                    return Ok(Some(match std::str::from_utf8(&bytes) {
                        Ok(text) => decode_inbound(text),
                        Err(e) => Incoming::Malformed(format!("binary frame is not UTF-8: {e}")),
                    }));
                }
                // Control frames are answered by tungstenite itself.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed)) => {
                    return Ok(None);
                }
                Some(Err(e)) => return Err(LinkError::Transport(format!("receive: {e}"))),
            }
        }
    }

    async fn close(&self) {
        let close = async {
            let mut sink = self.sink.lock().await;
            sink.close().await
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, close).await {
            Ok(Ok(())) => debug!("websocket closed"),
            Ok(Err(e)) => debug!(error = %e, "websocket close returned error"),
            Err(_) => warn!("websocket close timed out"),
        }
    }
}
