//! `stagelink-middleware` – The Channel
//!
//! Moves messages between the station and the remote operator without caring
//! what they mean.
//!
//! # Modules
//!
//! - [`channel`] – the [`Channel`] and [`Connector`] traits the session
//!   manager is written against.
//! - [`codec`] – JSON encoding of outbound messages and tolerant decoding of
//!   inbound ones.
//! - [`ws`] – WebSocket transport over `tokio-tungstenite`.
//! - [`loopback`] – in-memory transport with failure injection, used by the
//!   test suites and for running without a server.

pub mod channel;
pub mod codec;
pub mod loopback;
pub mod ws;

pub use channel::{Channel, Connector, Incoming};
pub use loopback::{LoopbackAcceptor, LoopbackChannel, LoopbackConnector, LoopbackPeer};
pub use ws::{WsChannel, WsConnector};
