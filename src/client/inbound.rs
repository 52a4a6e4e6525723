//! Classification and handling of inbound frames.
//!
//! Control frames renegotiate session parameters; data frames carry event
//! parts that are merged, dispatched once complete, and acknowledged. Nothing
//! here returns an error to the receive loop: a bad frame is logged and
//! dropped without affecting the connection or other in-flight events.

use std::{any::Any, panic::AssertUnwindSafe};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use futures::FutureExt;
use log::{debug, error, warn};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;

use crate::{
    config::{SharedConfig, SocketHandle},
    dispatch::{EventContext, EventDispatcher},
    frame::{
        Frame,
        FrameMethod,
        HEADER_MESSAGE_ID,
        HEADER_SEQ,
        HEADER_SUM,
        HEADER_TRACE_ID,
        HEADER_TYPE,
        MessageType,
    },
    handshake::ClientConfigPayload,
    metrics::{self, Direction},
    reassembly::{Chunk, ChunkCache},
};

/// Status code acknowledging a successfully handled event.
pub const ACK_OK: u16 = 200;
/// Status code acknowledging an event the application failed to handle.
pub const ACK_FAILED: u16 = 500;

/// A data frame's routing headers are missing or unparsable.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("missing `{0}` header")]
    Missing(&'static str),
    #[error("invalid `{key}` header: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Routing headers of an `event` data frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataHeaders<'a> {
    pub message_id: &'a str,
    pub total: usize,
    pub index: usize,
    pub trace_id: &'a str,
}

impl<'a> DataHeaders<'a> {
    /// Read the routing headers of `frame`. A missing `trace_id` is
    /// tolerated and reported as empty.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError`] when `message_id`, `sum` or `seq` is absent or
    /// a count is not a non-negative integer.
    pub fn parse(frame: &'a Frame) -> Result<Self, HeaderError> {
        let required = move |key: &'static str| frame.header(key).ok_or(HeaderError::Missing(key));
        let number = move |key: &'static str| {
            let value = required(key)?;
            value.trim().parse::<usize>().map_err(|_| HeaderError::Invalid {
                key,
                value: value.to_owned(),
            })
        };

        Ok(Self {
            message_id: required(HEADER_MESSAGE_ID)?,
            total: number(HEADER_SUM)?,
            index: number(HEADER_SEQ)?,
            trace_id: frame.header(HEADER_TRACE_ID).unwrap_or_default(),
        })
    }
}

/// Payload of an acknowledgement frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AckPayload {
    pub code: u16,
    /// Base64 of the dispatcher's JSON result, when it returned one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl AckPayload {
    #[must_use]
    pub fn ok(result: Option<&Value>) -> Self {
        Self {
            code: ACK_OK,
            data: result.map(|value| STANDARD.encode(value.to_string())),
        }
    }

    #[must_use]
    pub const fn failed() -> Self {
        Self {
            code: ACK_FAILED,
            data: None,
        }
    }
}

/// Everything the receive loop needs to process one frame.
pub(crate) struct Inbound<'a> {
    pub config: &'a SharedConfig,
    pub cache: &'a ChunkCache,
    pub dispatcher: &'a dyn EventDispatcher,
    pub socket: &'a SocketHandle,
}

impl Inbound<'_> {
    /// Route one decoded frame.
    pub(crate) async fn handle(&self, frame: Frame) {
        metrics::inc_frames(Direction::Inbound);
        match frame.method() {
            Some(FrameMethod::Control) => self.handle_control(&frame),
            Some(FrameMethod::Data) => self.handle_data(&frame).await,
            None => debug!("ignoring frame: method={}", frame.raw_method()),
        }
    }

    fn handle_control(&self, frame: &Frame) {
        match frame.message_type() {
            Some(MessageType::Ping) => {}
            Some(MessageType::Pong) if !frame.payload().is_empty() => {
                match serde_json::from_slice::<ClientConfigPayload>(frame.payload()) {
                    Ok(payload) => {
                        let update = payload.into_update();
                        debug!("pong renegotiated parameters: update={update:?}");
                        self.config.update_runtime(update);
                    }
                    Err(e) => warn!("ignoring pong with malformed payload: error={e}"),
                }
            }
            Some(MessageType::Pong) => {}
            other => debug!("ignoring control frame: type={other:?}"),
        }
    }

    async fn handle_data(&self, frame: &Frame) {
        let received_at = Instant::now();
        if frame.message_type() != Some(MessageType::Event) {
            debug!("ignoring data frame: type={:?}", frame.header(HEADER_TYPE));
            return;
        }

        let headers = match DataHeaders::parse(frame) {
            Ok(headers) => headers,
            Err(e) => {
                warn!("dropping malformed data frame: error={e}, sequence_id={}", frame.sequence_id());
                return;
            }
        };

        let merged = self.cache.merge(Chunk {
            message_id: headers.message_id,
            total: headers.total,
            index: headers.index,
            trace_id: headers.trace_id,
            payload: frame.payload(),
        });
        let event = match merged {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(e) => {
                warn!("dropping event: error={e}, trace_id={}", headers.trace_id);
                return;
            }
        };

        let ctx = EventContext {
            message_id: event.message_id,
            trace_id: event.trace_id,
            connection_id: self.socket.id(),
        };
        let ack = self.dispatch(event.payload, ctx).await;
        self.acknowledge(frame, &ack, received_at).await;
    }

    async fn dispatch(&self, payload: Value, ctx: EventContext) -> AckPayload {
        let message_id = ctx.message_id.clone();
        let outcome = AssertUnwindSafe(self.dispatcher.invoke(payload, ctx))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => {
                metrics::inc_events(true);
                AckPayload::ok(result.as_ref())
            }
            Ok(Err(e)) => {
                metrics::inc_events(false);
                warn!("event dispatcher failed: message_id={message_id}, error={e}");
                AckPayload::failed()
            }
            Err(panic) => {
                metrics::inc_events(false);
                error!(
                    "event dispatcher panicked: message_id={message_id}, panic={}",
                    panic_message(panic.as_ref())
                );
                AckPayload::failed()
            }
        }
    }

    async fn acknowledge(&self, frame: &Frame, ack: &AckPayload, received_at: Instant) {
        let payload = match serde_json::to_vec(ack) {
            Ok(payload) => payload,
            Err(e) => {
                error!("failed to encode acknowledgement: error={e}");
                return;
            }
        };
        let response = frame.acknowledge(received_at.elapsed().as_millis(), payload);
        if let Err(e) = self.socket.send(response).await {
            warn!("acknowledgement not sent: error={e}, sequence_id={}", frame.sequence_id());
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&'static str>().copied())
        .unwrap_or("<non-string panic payload>")
}
