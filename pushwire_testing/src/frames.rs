//! Builders for frames the gateway sends.

use pushwire::{
    Frame,
    FrameMethod,
    MessageType,
    frame::{HEADER_MESSAGE_ID, HEADER_SEQ, HEADER_SUM, HEADER_TRACE_ID, HEADER_TYPE},
};
use serde_json::Value;

/// Service id used by every frame built here and by
/// [`MockGateway::url`](crate::MockGateway::url).
pub const SERVICE_ID: i32 = 7;

fn data_part(message_id: &str, total: usize, index: usize, seq_id: u64, payload: &[u8]) -> Frame {
    Frame::new(FrameMethod::Data, SERVICE_ID)
        .with_ids(seq_id, seq_id)
        .with_header(HEADER_TYPE, MessageType::Event.as_str())
        .with_header(HEADER_MESSAGE_ID, message_id)
        .with_header(HEADER_SUM, total.to_string())
        .with_header(HEADER_SEQ, index.to_string())
        .with_header(HEADER_TRACE_ID, format!("trace-{message_id}"))
        .with_payload(payload)
}

/// Single-part `event` data frame carrying `event` as JSON.
#[must_use]
pub fn event_frame(message_id: &str, event: &Value) -> Frame {
    data_part(message_id, 1, 0, 1, event.to_string().as_bytes())
}

/// Split `event` into `parts` data frames, in index order.
///
/// # Panics
///
/// Panics if `parts` is zero.
#[must_use]
pub fn chunked_event(message_id: &str, event: &Value, parts: usize) -> Vec<Frame> {
    assert!(parts > 0, "an event has at least one part");
    let body = event.to_string().into_bytes();
    let size = body.len().div_ceil(parts).max(1);
    let mut chunks: Vec<&[u8]> = body.chunks(size).collect();
    chunks.resize(parts, &[]);

    chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| data_part(message_id, parts, index, index as u64 + 1, chunk))
        .collect()
}

/// `pong` control frame carrying a `ClientConfig` document.
#[must_use]
pub fn pong_frame(client_config: &Value) -> Frame {
    Frame::new(FrameMethod::Control, SERVICE_ID)
        .with_header(HEADER_TYPE, MessageType::Pong.as_str())
        .with_payload(client_config.to_string().into_bytes())
}
