//! Observable lifecycle of the client.

use std::fmt;

/// Current phase of the connection supervisor.
///
/// Published through a `watch` channel; see
/// [`WsClient::state`](super::WsClient::state).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Built but not yet running.
    #[default]
    Idle,
    /// Asking the gateway for connection parameters.
    Handshaking,
    /// Opening the WebSocket.
    Connecting,
    /// A socket is live and frames are flowing.
    Connected,
    /// The live socket closed or failed.
    Closed,
    /// The last handshake was rejected or did not complete.
    HandshakeFailed,
    /// The last socket open failed or timed out.
    ConnectFailed,
    /// Waiting before the next attempt.
    Backoff,
    /// [`WsClient::run`](super::WsClient::run) has returned.
    Stopped,
}

impl ConnectionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Handshaking => "handshaking",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closed => "closed",
            Self::HandshakeFailed => "handshake_failed",
            Self::ConnectFailed => "connect_failed",
            Self::Backoff => "backoff",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Why [`WsClient::run`](super::WsClient::run) returned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Shutdown was requested.
    Shutdown,
    /// The socket closed and automatic reconnection is disabled.
    Disconnected,
    /// Every reconnect attempt allowed by the policy failed.
    ReconnectExhausted { attempts: u32 },
    /// The gateway refused the application's credentials or permissions.
    Rejected { code: i64, message: String },
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shutdown => f.write_str("shutdown requested"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::ReconnectExhausted { attempts } => {
                write!(f, "gave up after {attempts} reconnect attempts")
            }
            Self::Rejected { code, message } => {
                write!(f, "rejected by gateway: code={code}, msg={message}")
            }
        }
    }
}
