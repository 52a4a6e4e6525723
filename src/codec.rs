//! Binary codec for [`Frame`] values.
//!
//! Frames travel as protobuf-encoded WebSocket binary messages. This module
//! is the only place that touches `prost` directly so the rest of the crate
//! deals purely in [`Frame`] values.

use bytes::Bytes;
use prost::Message as _;
use thiserror::Error;

use crate::frame::Frame;

/// Errors raised while decoding an inbound frame.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The bytes are not a valid protobuf frame.
    #[error("failed to decode frame: {0}")]
    Decode(#[from] prost::DecodeError),
    /// A text message arrived where a binary frame was expected.
    #[error("unexpected text message of {len} bytes")]
    UnexpectedText { len: usize },
}

/// Encode `frame` into an owned buffer ready to be written to the socket.
#[must_use]
pub fn encode(frame: &Frame) -> Bytes { Bytes::from(frame.encode_to_vec()) }

/// Decode a frame from a binary socket message.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] when the bytes do not form a valid frame.
pub fn decode(bytes: &[u8]) -> Result<Frame, CodecError> { Ok(Frame::decode(bytes)?) }
