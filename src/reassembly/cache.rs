//! Keyed store of partially received events.

use dashmap::{DashMap, mapref::entry::Entry};
use serde_json::Value;
use tokio::time::{Duration, Instant};

use super::{MAX_PARTS, REASSEMBLY_TTL, ReassemblyError};

/// One part of a chunked event as read from a data frame.
#[derive(Clone, Copy, Debug)]
pub struct Chunk<'a> {
    pub message_id: &'a str,
    pub total: usize,
    pub index: usize,
    pub trace_id: &'a str,
    pub payload: &'a [u8],
}

/// A fully merged and decoded event.
#[derive(Clone, Debug, PartialEq)]
pub struct ReassembledEvent {
    pub message_id: String,
    pub trace_id: String,
    pub payload: Value,
}

/// Identifiers of a partial event dropped by an eviction sweep.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpiredEvent {
    pub message_id: String,
    pub trace_id: String,
    pub received_parts: usize,
    pub total_parts: usize,
}

#[derive(Debug)]
struct PartialEvent {
    trace_id: String,
    parts: Vec<Option<Vec<u8>>>,
    created_at: Instant,
}

impl PartialEvent {
    fn new(trace_id: &str, total: usize, created_at: Instant) -> Self {
        Self {
            trace_id: trace_id.to_owned(),
            parts: vec![None; total],
            created_at,
        }
    }

    fn place(&mut self, index: usize, payload: &[u8]) { self.parts[index] = Some(payload.to_vec()); }

    fn is_complete(&self) -> bool { self.parts.iter().all(Option::is_some) }

    fn received(&self) -> usize { self.parts.iter().filter(|p| p.is_some()).count() }

    fn concat(self) -> Vec<u8> { self.parts.into_iter().flatten().flatten().collect() }
}

/// Concurrent reassembly cache keyed by message id.
///
/// Parts may arrive in any order; a repeated index overwrites the earlier
/// bytes. The entry is removed the moment it completes or fails.
///
/// # Examples
///
/// ```
/// use pushwire::reassembly::{Chunk, ChunkCache};
///
/// let cache = ChunkCache::default();
/// let body = br#"{"data":"hello,world"}"#;
/// let (head, tail) = body.split_at(8);
///
/// let chunk = |index, payload| Chunk {
///     message_id: "m2",
///     total: 2,
///     index,
///     trace_id: "t",
///     payload,
/// };
/// assert!(cache.merge(chunk(1, tail)).expect("merge").is_none());
/// let event = cache.merge(chunk(0, head)).expect("merge").expect("complete");
/// assert_eq!(event.payload["data"], "hello,world");
/// assert!(cache.is_empty());
/// ```
#[derive(Debug)]
pub struct ChunkCache {
    entries: DashMap<String, PartialEvent>,
    ttl: Duration,
}

impl Default for ChunkCache {
    fn default() -> Self { Self::new(REASSEMBLY_TTL) }
}

impl ChunkCache {
    /// Create a cache whose partial entries expire after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Merge `chunk` using the current time.
    ///
    /// # Errors
    ///
    /// See [`merge_at`](Self::merge_at).
    pub fn merge(&self, chunk: Chunk<'_>) -> Result<Option<ReassembledEvent>, ReassemblyError> {
        self.merge_at(chunk, Instant::now())
    }

    /// Merge `chunk`, stamping a newly created entry with `now`.
    ///
    /// Returns `Ok(None)` while parts are missing and the decoded event once
    /// the last missing part arrives.
    ///
    /// # Errors
    ///
    /// Returns [`ReassemblyError`] when the chunk violates the protocol
    /// (zero or oversized total, index out of range, total changed between
    /// parts) or the merged payload is not UTF-8 JSON. The entry for the message id is
    /// dropped in every error case.
    pub fn merge_at(
        &self,
        chunk: Chunk<'_>,
        now: Instant,
    ) -> Result<Option<ReassembledEvent>, ReassemblyError> {
        let Chunk {
            message_id,
            total,
            index,
            trace_id,
            payload,
        } = chunk;

        if let Err(err) = Self::validate(message_id, total, index) {
            self.entries.remove(message_id);
            return Err(err);
        }

        let entry = match self.entries.entry(message_id.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let expected = occupied.get().parts.len();
                if expected != total {
                    occupied.remove();
                    return Err(ReassemblyError::TotalMismatch {
                        message_id: message_id.to_owned(),
                        expected,
                        found: total,
                    });
                }
                occupied.get_mut().place(index, payload);
                if !occupied.get().is_complete() {
                    return Ok(None);
                }
                occupied.remove()
            }
            Entry::Vacant(vacant) => {
                let mut partial = PartialEvent::new(trace_id, total, now);
                partial.place(index, payload);
                if !partial.is_complete() {
                    vacant.insert(partial);
                    return Ok(None);
                }
                partial
            }
        };

        Self::decode(message_id, entry).map(Some)
    }

    /// Remove partial entries older than the TTL using the current time.
    pub fn purge_expired(&self) -> Vec<ExpiredEvent> { self.purge_expired_at(Instant::now()) }

    /// Remove partial entries whose age at `now` exceeds the TTL.
    ///
    /// Returns the identifiers of the dropped entries.
    pub fn purge_expired_at(&self, now: Instant) -> Vec<ExpiredEvent> {
        let mut expired = Vec::new();
        let ttl = self.ttl;

        self.entries.retain(|message_id, partial| {
            let stale = now.saturating_duration_since(partial.created_at) > ttl;
            if stale {
                expired.push(ExpiredEvent {
                    message_id: message_id.clone(),
                    trace_id: partial.trace_id.clone(),
                    received_parts: partial.received(),
                    total_parts: partial.parts.len(),
                });
            }
            !stale
        });

        expired
    }

    /// Whether a partial entry exists for `message_id`.
    #[must_use]
    pub fn contains(&self, message_id: &str) -> bool { self.entries.contains_key(message_id) }

    /// Number of partial entries currently held.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    #[must_use]
    pub const fn ttl(&self) -> Duration { self.ttl }

    fn validate(message_id: &str, total: usize, index: usize) -> Result<(), ReassemblyError> {
        if total == 0 {
            return Err(ReassemblyError::EmptyMessage {
                message_id: message_id.to_owned(),
            });
        }
        if total > MAX_PARTS {
            return Err(ReassemblyError::TooManyParts {
                message_id: message_id.to_owned(),
                total,
                max: MAX_PARTS,
            });
        }
        if index >= total {
            return Err(ReassemblyError::IndexOutOfRange {
                message_id: message_id.to_owned(),
                index,
                total,
            });
        }
        Ok(())
    }

    fn decode(message_id: &str, partial: PartialEvent) -> Result<ReassembledEvent, ReassemblyError> {
        let trace_id = partial.trace_id.clone();
        let bytes = partial.concat();
        let text = std::str::from_utf8(&bytes).map_err(|source| ReassemblyError::Utf8 {
            message_id: message_id.to_owned(),
            source,
        })?;
        let payload = serde_json::from_str(text).map_err(|source| ReassemblyError::Json {
            message_id: message_id.to_owned(),
            source,
        })?;
        Ok(ReassembledEvent {
            message_id: message_id.to_owned(),
            trace_id,
            payload,
        })
    }
}
