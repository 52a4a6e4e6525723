//! Hand-off of completed events to the application.
//!
//! The client does not interpret event payloads. Once every part of an event
//! has arrived, the decoded JSON is passed to an [`EventDispatcher`]; the
//! outcome decides the status code of the acknowledgement sent back to the
//! gateway.

use std::{error::Error, future::Future, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;

/// Error returned by a dispatcher; any error type may be boxed into it.
pub type DispatchError = Box<dyn Error + Send + Sync>;

/// Metadata accompanying a dispatched event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub message_id: String,
    pub trace_id: String,
    /// Connection the final part arrived on.
    pub connection_id: u64,
}

/// Application-side event handler.
#[async_trait]
pub trait EventDispatcher: Send + Sync {
    /// Handle one event.
    ///
    /// A returned value is attached to the acknowledgement; an error causes
    /// a failure acknowledgement.
    async fn invoke(&self, event: Value, ctx: EventContext) -> Result<Option<Value>, DispatchError>;
}

#[async_trait]
impl<D> EventDispatcher for Arc<D>
where
    D: EventDispatcher + ?Sized,
{
    async fn invoke(&self, event: Value, ctx: EventContext) -> Result<Option<Value>, DispatchError> {
        (**self).invoke(event, ctx).await
    }
}

/// [`EventDispatcher`] backed by an async closure; see [`dispatch_fn`].
#[derive(Clone)]
pub struct FnDispatcher<F>(F);

#[async_trait]
impl<F, Fut> EventDispatcher for FnDispatcher<F>
where
    F: Fn(Value, EventContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Value>, DispatchError>> + Send,
{
    async fn invoke(&self, event: Value, ctx: EventContext) -> Result<Option<Value>, DispatchError> {
        (self.0)(event, ctx).await
    }
}

/// Wrap an async closure as a dispatcher.
///
/// # Examples
///
/// ```
/// use pushwire::dispatch::{EventDispatcher, dispatch_fn};
///
/// let dispatcher = dispatch_fn(|event, ctx| async move {
///     println!("{}: {event}", ctx.message_id);
///     Ok(None)
/// });
/// # fn assert_dispatcher(_: &impl EventDispatcher) {}
/// # assert_dispatcher(&dispatcher);
/// ```
pub fn dispatch_fn<F, Fut>(f: F) -> FnDispatcher<F>
where
    F: Fn(Value, EventContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Value>, DispatchError>> + Send,
{
    FnDispatcher(f)
}
