//! Reconnection policy negotiated with the gateway.
//!
//! After an established connection drops, the client waits a random delay in
//! `[0, nonce]` so that many clients losing the gateway at once do not return
//! in lock-step, then retries every `interval` until either a connection
//! succeeds or `count` attempts have failed. The first attempt is always
//! made, so a `count` of zero behaves like one. A negative `count` retries
//! forever.

use std::time::Duration;

use rand::Rng;

/// Default number of reconnect attempts (`-1` = unbounded).
pub const DEFAULT_RECONNECT_COUNT: i32 = -1;
/// Default wait between reconnect attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(120);
/// Default upper bound of the initial jitter delay.
pub const DEFAULT_RECONNECT_NONCE: Duration = Duration::from_secs(30);

/// Bounded, jittered retry policy.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use pushwire::reconnect::ReconnectPolicy;
///
/// let policy = ReconnectPolicy::new(3, Duration::from_secs(1), Duration::from_millis(500));
/// assert!(!policy.is_exhausted(2));
/// assert!(policy.is_exhausted(3));
/// assert!(policy.jitter_delay() <= Duration::from_millis(500));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    count: i32,
    interval: Duration,
    nonce: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            count: DEFAULT_RECONNECT_COUNT,
            interval: DEFAULT_RECONNECT_INTERVAL,
            nonce: DEFAULT_RECONNECT_NONCE,
        }
    }
}

impl ReconnectPolicy {
    #[must_use]
    pub const fn new(count: i32, interval: Duration, nonce: Duration) -> Self {
        Self {
            count,
            interval,
            nonce,
        }
    }

    /// Maximum number of failed attempts, `None` when unbounded.
    #[must_use]
    pub fn max_attempts(&self) -> Option<u32> { u32::try_from(self.count).ok() }

    /// Raw attempt cap as negotiated (`-1` = unbounded).
    #[must_use]
    pub const fn count(&self) -> i32 { self.count }

    #[must_use]
    pub const fn interval(&self) -> Duration { self.interval }

    #[must_use]
    pub const fn nonce(&self) -> Duration { self.nonce }

    #[must_use]
    pub const fn with_count(mut self, count: i32) -> Self {
        self.count = count;
        self
    }

    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub const fn with_nonce(mut self, nonce: Duration) -> Self {
        self.nonce = nonce;
        self
    }

    /// Whether `failed_attempts` consecutive failures end the retry loop.
    #[must_use]
    pub fn is_exhausted(&self, failed_attempts: u32) -> bool {
        self.max_attempts().is_some_and(|max| failed_attempts >= max)
    }

    /// Random delay in `[0, nonce]` observed before the first retry.
    #[must_use]
    pub fn jitter_delay(&self) -> Duration { self.jitter_delay_with(&mut rand::thread_rng()) }

    /// [`jitter_delay`](Self::jitter_delay) with a caller-supplied RNG.
    #[must_use]
    pub fn jitter_delay_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let bound = u64::try_from(self.nonce.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rng.gen_range(0..=bound))
    }
}
