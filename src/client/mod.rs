//! Long-lived client for the gateway's event push channel.
//!
//! A [`WsClient`] negotiates connection parameters over HTTP, holds one
//! WebSocket open, answers the gateway's heartbeat protocol, reassembles
//! chunked events, hands them to an [`EventDispatcher`](crate::EventDispatcher)
//! and acknowledges each one. When the socket drops it reconnects according
//! to the policy the gateway negotiated.

mod builder;
mod heartbeat;
mod inbound;
mod runtime;
mod session;
mod state;

pub use builder::WsClientBuilder;
pub use inbound::{ACK_FAILED, ACK_OK, AckPayload, DataHeaders, HeaderError};
pub use runtime::{ClientHandle, WsClient};
pub use session::{CONNECT_TIMEOUT, ConnectError};
pub use state::{ConnectionState, StopReason};
