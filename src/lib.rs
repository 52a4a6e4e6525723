#![doc(html_root_url = "https://docs.rs/pushwire/latest")]
//! Public API for the `pushwire` library.
//!
//! This crate provides a long-lived client for a push gateway that delivers
//! application events over a WebSocket: connection-parameter negotiation,
//! heartbeats, chunked-event reassembly, acknowledgements and jittered
//! reconnection.

pub mod client;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod metrics;
pub mod reassembly;
pub mod reconnect;

pub use client::{ClientHandle, ConnectionState, StopReason, WsClient, WsClientBuilder};
pub use config::{ClientIdentity, Domain, RuntimeParams};
pub use dispatch::{DispatchError, EventContext, EventDispatcher, dispatch_fn};
pub use error::ConfigError;
pub use frame::{Frame, FrameMethod, MessageType};
pub use handshake::{Endpoint, Handshake, HandshakeError, HttpHandshake};
pub use metrics::Direction;
pub use reconnect::ReconnectPolicy;
