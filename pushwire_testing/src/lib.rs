//! Utilities for driving a [`WsClient`](pushwire::WsClient) against an
//! in-process gateway during tests.
//!
//! [`MockGateway`] is a real WebSocket server on a loopback port;
//! [`ScriptedHandshake`] replaces the HTTP negotiation step so tests decide
//! what each handshake returns.
//!
//! ```rust,no_run
//! use pushwire::{WsClient, dispatch_fn};
//! use pushwire_testing::{MockGateway, ScriptedHandshake};
//!
//! # async fn example() {
//! let mut gateway = MockGateway::start().await.expect("bind gateway");
//! let client = WsClient::builder("app", "secret")
//!     .handshake(ScriptedHandshake::accepting(gateway.endpoint()))
//!     .dispatcher(dispatch_fn(|_event, _ctx| async { Ok(None) }))
//!     .build()
//!     .expect("client builds")
//!     .spawn();
//! let _conn = gateway.accept().await;
//! client.shutdown();
//! # }
//! ```

pub mod frames;
pub mod gateway;
pub mod handshake;
pub mod logging;

pub use frames::{chunked_event, event_frame, pong_frame};
pub use gateway::{GatewayConnection, MockGateway, StalledGateway};
pub use handshake::{ScriptedHandshake, Step};
pub use logging::{LoggerHandle, logger};
