//! Reassembly of events split across several data frames.
//!
//! The gateway may split one event into `sum` parts, each carried by its own
//! data frame tagged with the shared `message_id` and a part index `seq`.
//! [`ChunkCache`] collects the parts in any order, yields the decoded JSON
//! payload once every slot is filled, and forgets partial events that stall
//! for longer than [`REASSEMBLY_TTL`].

mod cache;
mod error;
mod eviction;

pub use cache::{Chunk, ChunkCache, ExpiredEvent, ReassembledEvent};
pub use error::ReassemblyError;
pub use eviction::spawn_eviction;

use std::time::Duration;

/// Maximum age of a partial event before it is evicted.
pub const REASSEMBLY_TTL: Duration = Duration::from_secs(10);
/// Period of the background eviction sweep.
pub const EVICTION_PERIOD: Duration = Duration::from_secs(10);
/// Largest part count a single event may declare.
pub const MAX_PARTS: usize = 1024;
