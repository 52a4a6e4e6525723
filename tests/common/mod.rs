//! Shared utilities for integration tests.
//!
//! Provides a dispatcher that forwards every event to the test, a fast
//! reconnect policy, and a helper waiting for a lifecycle state.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use std::time::Duration;

use pushwire::{
    ConnectionState,
    DispatchError,
    EventContext,
    EventDispatcher,
    ReconnectPolicy,
    dispatch_fn,
};
use serde_json::Value;
use tokio::{
    sync::{mpsc, watch},
    time::timeout,
};

/// How long a test waits for something observable to happen.
pub const WAIT: Duration = Duration::from_secs(5);

pub type Delivered = mpsc::UnboundedReceiver<(Value, EventContext)>;

/// Dispatcher forwarding each event to the returned receiver and answering
/// with `reply`.
pub fn forwarding_dispatcher(reply: Option<Value>) -> (impl EventDispatcher, Delivered) {
    let (tx, rx) = mpsc::unbounded_channel();
    let dispatcher = dispatch_fn(move |event, ctx| {
        let tx = tx.clone();
        let reply = reply.clone();
        async move {
            // The receiver may already be gone when a test finishes early.
            let _ = tx.send((event, ctx));
            Ok::<Option<Value>, DispatchError>(reply)
        }
    });
    (dispatcher, rx)
}

/// Policy retrying `count` times, 20 ms apart, without jitter.
pub fn fast_policy(count: i32) -> ReconnectPolicy {
    ReconnectPolicy::new(count, Duration::from_millis(20), Duration::ZERO)
}

/// Wait until the client publishes `state`.
///
/// # Panics
///
/// Panics if `state` is not reached within [`WAIT`].
pub async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, state: ConnectionState) {
    timeout(WAIT, rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("client never reached {state}"))
        .expect("client state channel open");
}

/// Receive the next delivered event.
///
/// # Panics
///
/// Panics if nothing is delivered within [`WAIT`].
pub async fn next_event(rx: &mut Delivered) -> (Value, EventContext) {
    timeout(WAIT, rx.recv())
        .await
        .expect("event delivered in time")
        .expect("dispatcher alive")
}
