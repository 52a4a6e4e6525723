//! Wire frame exchanged with the gateway.
//!
//! Every WebSocket message carries exactly one [`Frame`]. The schema is a
//! fixed protobuf layout with proto2 semantics: identifiers and routing
//! discriminators are always present, while the payload metadata fields are
//! optional and passed through unchanged.
//!
//! Frames are immutable once built. Builder-style helpers such as
//! [`Frame::with_header`] consume the value and return a new frame, which
//! keeps acknowledgement construction free of in-place mutation.

use std::fmt;

/// Header key carrying the frame type (`ping`, `pong`, `event`, `card`).
pub const HEADER_TYPE: &str = "type";
/// Header key carrying the logical message identifier of a data frame.
pub const HEADER_MESSAGE_ID: &str = "message_id";
/// Header key carrying the total number of parts of a chunked event.
pub const HEADER_SUM: &str = "sum";
/// Header key carrying the zero-based part index of a chunked event.
pub const HEADER_SEQ: &str = "seq";
/// Header key carrying the gateway trace identifier.
pub const HEADER_TRACE_ID: &str = "trace_id";
/// Header key appended to acknowledgements with the processing time in ms.
pub const HEADER_BIZ_RT: &str = "biz_rt";

/// One key/value pair in a frame's header list.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct Header {
    #[prost(string, required, tag = "1")]
    pub key: String,
    #[prost(string, required, tag = "2")]
    pub value: String,
}

impl Header {
    /// Build a header from any string-like key and value.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Routing discriminator stored in [`Frame::method`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameMethod {
    /// Liveness and negotiation traffic (ping/pong).
    Control,
    /// Application events, possibly split across several frames.
    Data,
}

impl FrameMethod {
    /// Numeric value used on the wire.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::Control => 0,
            Self::Data => 1,
        }
    }

    /// Map a wire value back to a method, if it is one we understand.
    #[must_use]
    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Control),
            1 => Some(Self::Data),
            _ => None,
        }
    }
}

/// Value of the `type` header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    /// Client heartbeat.
    Ping,
    /// Heartbeat reply, possibly carrying new session parameters.
    Pong,
    /// (Part of) an application event.
    Event,
    /// Interactive card callback; not dispatched.
    Card,
}

impl MessageType {
    /// Header value used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Event => "event",
            Self::Card => "card",
        }
    }

    /// Parse a header value; unknown types yield `None`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ping" => Some(Self::Ping),
            "pong" => Some(Self::Pong),
            "event" => Some(Self::Event),
            "card" => Some(Self::Card),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// A single wire frame.
///
/// # Examples
///
/// ```
/// use pushwire::frame::{Frame, FrameMethod, MessageType};
///
/// let ping = Frame::ping(7);
/// assert_eq!(ping.method(), Some(FrameMethod::Control));
/// assert_eq!(ping.message_type(), Some(MessageType::Ping));
/// assert!(ping.payload().is_empty());
/// ```
#[derive(Clone, PartialEq, prost::Message)]
pub struct Frame {
    #[prost(uint64, required, tag = "1")]
    sequence_id: u64,
    #[prost(uint64, required, tag = "2")]
    log_id: u64,
    #[prost(int32, required, tag = "3")]
    service: i32,
    #[prost(int32, required, tag = "4")]
    method: i32,
    #[prost(message, repeated, tag = "5")]
    headers: Vec<Header>,
    // Field names differ from the public accessors: prost derives its own
    // accessor for every optional field.
    #[prost(string, optional, tag = "6")]
    encoding: Option<String>,
    #[prost(string, optional, tag = "7")]
    content_type: Option<String>,
    #[prost(bytes = "vec", optional, tag = "8")]
    body: Option<Vec<u8>>,
    #[prost(string, optional, tag = "9")]
    alt_log_id: Option<String>,
}

impl Frame {
    /// Create an empty frame for `method` addressed to `service`.
    #[must_use]
    pub fn new(method: FrameMethod, service: i32) -> Self {
        Self {
            service,
            method: method.as_i32(),
            ..Self::default()
        }
    }

    /// Heartbeat frame sent by the client: a control frame with `type=ping`
    /// and no payload.
    #[must_use]
    pub fn ping(service: i32) -> Self {
        Self::new(FrameMethod::Control, service).with_header(HEADER_TYPE, MessageType::Ping.as_str())
    }

    /// Return a copy carrying the given correlation identifiers.
    #[must_use]
    pub fn with_ids(mut self, sequence_id: u64, log_id: u64) -> Self {
        self.sequence_id = sequence_id;
        self.log_id = log_id;
        self
    }

    /// Return a copy with `key=value` appended after the existing headers.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(key, value));
        self
    }

    /// Return a copy whose payload is replaced by `payload`.
    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.body = Some(payload.into());
        self
    }

    /// Return a copy with the optional payload metadata set.
    #[must_use]
    pub fn with_payload_metadata(
        mut self,
        payload_encoding: Option<String>,
        payload_type: Option<String>,
        alternate_log_id: Option<String>,
    ) -> Self {
        self.encoding = payload_encoding;
        self.content_type = payload_type;
        self.alt_log_id = alternate_log_id;
        self
    }

    #[must_use]
    pub const fn sequence_id(&self) -> u64 { self.sequence_id }

    #[must_use]
    pub const fn log_id(&self) -> u64 { self.log_id }

    #[must_use]
    pub const fn service(&self) -> i32 { self.service }

    /// Raw `method` discriminator as received.
    #[must_use]
    pub const fn raw_method(&self) -> i32 { self.method }

    /// Decoded method, or `None` for values outside the protocol.
    #[must_use]
    pub const fn method(&self) -> Option<FrameMethod> { FrameMethod::from_i32(self.method) }

    /// Headers in insertion order, duplicates included.
    #[must_use]
    pub fn headers(&self) -> &[Header] { &self.headers }

    /// Value of the first header named `key`.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|header| header.key == key)
            .map(|header| header.value.as_str())
    }

    /// Parsed `type` header.
    #[must_use]
    pub fn message_type(&self) -> Option<MessageType> {
        self.header(HEADER_TYPE).and_then(MessageType::parse)
    }

    /// Payload bytes; empty when the frame carries none.
    #[must_use]
    pub fn payload(&self) -> &[u8] { self.body.as_deref().unwrap_or_default() }

    #[must_use]
    pub fn payload_encoding(&self) -> Option<&str> { self.encoding.as_deref() }

    #[must_use]
    pub fn payload_type(&self) -> Option<&str> { self.content_type.as_deref() }

    #[must_use]
    pub fn alternate_log_id(&self) -> Option<&str> { self.alt_log_id.as_deref() }

    /// Build the acknowledgement for this frame.
    ///
    /// The response echoes every identifying field and header of `self`,
    /// appends `biz_rt` with the elapsed processing time, and replaces the
    /// payload with `payload`.
    #[must_use]
    pub fn acknowledge(&self, elapsed_ms: u128, payload: impl Into<Vec<u8>>) -> Self {
        self.clone()
            .with_header(HEADER_BIZ_RT, elapsed_ms.to_string())
            .with_payload(payload)
    }
}
