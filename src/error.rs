//! Canonical error types for the crate.
//!
//! Transport and protocol failures never escape the supervisor: they are
//! turned into log lines and reconnect decisions. The only errors an
//! application sees are construction-time [`ConfigError`]s; each module's own
//! error type is re-exported here for convenience.

use thiserror::Error;

pub use crate::{
    client::{ConnectError, HeaderError},
    codec::CodecError,
    dispatch::DispatchError,
    handshake::HandshakeError,
    reassembly::ReassemblyError,
};

/// Errors raised while building a client.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The application id was empty.
    #[error("app id must not be empty")]
    MissingAppId,
    /// The application secret was empty.
    #[error("app secret must not be empty")]
    MissingAppSecret,
    /// No event dispatcher was supplied.
    #[error("an event dispatcher is required")]
    MissingDispatcher,
    /// The domain string is neither a known environment nor an http(s) URL.
    #[error("invalid domain {0:?}: expected `feishu`, `lark`, or an http(s) URL")]
    InvalidDomain(String),
    /// The default HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
