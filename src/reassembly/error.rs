//! Errors produced while merging event parts.

use thiserror::Error;

/// A part could not be merged; the affected message id has been dropped.
#[derive(Debug, Error)]
pub enum ReassemblyError {
    /// The frame declared zero parts.
    #[error("message {message_id}: total part count must be positive")]
    EmptyMessage { message_id: String },
    /// The frame declared more parts than the cache accepts.
    #[error("message {message_id}: {total} parts exceeds the limit of {max}")]
    TooManyParts {
        message_id: String,
        total: usize,
        max: usize,
    },
    /// The part index does not fit the declared total.
    #[error("message {message_id}: part index {index} outside 0..{total}")]
    IndexOutOfRange {
        message_id: String,
        index: usize,
        total: usize,
    },
    /// A later part declared a different total than the first one.
    #[error("message {message_id}: total changed from {expected} to {found}")]
    TotalMismatch {
        message_id: String,
        expected: usize,
        found: usize,
    },
    /// The merged bytes are not UTF-8.
    #[error("message {message_id}: payload is not valid UTF-8")]
    Utf8 {
        message_id: String,
        #[source]
        source: std::str::Utf8Error,
    },
    /// The merged text is not valid JSON.
    #[error("message {message_id}: payload is not valid JSON")]
    Json {
        message_id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ReassemblyError {
    /// Message id whose partial state was dropped.
    #[must_use]
    pub fn message_id(&self) -> &str {
        match self {
            Self::EmptyMessage { message_id }
            | Self::TooManyParts { message_id, .. }
            | Self::IndexOutOfRange { message_id, .. }
            | Self::TotalMismatch { message_id, .. }
            | Self::Utf8 { message_id, .. }
            | Self::Json { message_id, .. } => message_id,
        }
    }
}
