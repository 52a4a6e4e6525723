//! Connection supervisor.
//!
//! [`WsClient::run`] drives the whole lifecycle: handshake, connect, receive,
//! and reconnect according to the negotiated [`ReconnectPolicy`]. Transport
//! and protocol failures never escape; the caller only learns why the client
//! stopped.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use log::{error, info, warn};
use tokio::{
    select,
    sync::watch,
    task::{JoinError, JoinHandle},
    time::{Duration, sleep},
};
use tokio_util::sync::CancellationToken;

use super::{
    ConnectionState,
    StopReason,
    WsClientBuilder,
    session::{Session, SessionEnd},
};
use crate::{
    config::{RuntimeParams, SharedConfig},
    dispatch::EventDispatcher,
    handshake::{Handshake, HandshakeError, codes},
    metrics,
    reassembly::{ChunkCache, EVICTION_PERIOD, spawn_eviction},
    reconnect::ReconnectPolicy,
};

/// Outcome of one handshake-and-connect attempt that produced no session.
enum Attempt {
    /// Worth retrying under the reconnect policy.
    Failed,
    /// The client must stop.
    Stop(StopReason),
}

/// Long-lived client for the gateway's event push channel.
///
/// # Examples
///
/// ```no_run
/// use pushwire::{WsClient, dispatch_fn};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), pushwire::ConfigError> {
/// let client = WsClient::builder("cli_app", "secret")
///     .dispatcher(dispatch_fn(|event, _ctx| async move {
///         println!("{event}");
///         Ok(None)
///     }))
///     .build()?;
/// let reason = client.run().await;
/// println!("stopped: {reason}");
/// # Ok(())
/// # }
/// ```
pub struct WsClient {
    pub(crate) config: SharedConfig,
    pub(crate) handshake: Arc<dyn Handshake>,
    pub(crate) dispatcher: Arc<dyn EventDispatcher>,
    pub(crate) cache: Arc<ChunkCache>,
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) connect_timeout: Duration,
    /// Source of connection ids; the first socket gets id 1.
    pub(crate) connection_counter: AtomicU64,
}

impl fmt::Debug for WsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsClient")
            .field("config", &self.config)
            .field("state", &*self.state.borrow())
            .field("pending_events", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl WsClient {
    /// Start configuring a client for the given application credentials.
    #[must_use]
    pub fn builder(app_id: impl Into<String>, app_secret: impl Into<String>) -> WsClientBuilder {
        WsClientBuilder::new(app_id, app_secret)
    }

    /// Subscribe to lifecycle state changes.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnectionState> { self.state.subscribe() }

    /// Token that stops the client when cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken { self.shutdown.clone() }

    /// Snapshot of the currently negotiated session parameters.
    #[must_use]
    pub fn runtime(&self) -> RuntimeParams { self.config.runtime() }

    /// Run the client on a background task.
    #[must_use]
    pub fn spawn(self) -> ClientHandle {
        let shutdown = self.shutdown.clone();
        let state = self.state();
        let config = self.config.clone();
        ClientHandle {
            shutdown,
            state,
            config,
            task: Some(tokio::spawn(self.run())),
        }
    }

    /// Connect and keep the client connected until it stops.
    ///
    /// The initial connection is retried without limit. After an
    /// established connection drops, reconnection follows the negotiated
    /// policy; with auto-reconnect disabled the client stops instead.
    pub async fn run(self) -> StopReason {
        let eviction = spawn_eviction(
            Arc::clone(&self.cache),
            EVICTION_PERIOD,
            self.shutdown.child_token(),
        );

        let reason = self.supervise().await;
        info!("client stopping: reason={reason}");

        self.shutdown.cancel();
        if let Err(e) = eviction.await {
            warn!("eviction task failed: error={e}");
        }
        self.set_state(ConnectionState::Stopped);
        reason
    }

    async fn supervise(&self) -> StopReason {
        let mut session = match self.connect_initial().await {
            Ok(session) => session,
            Err(reason) => return reason,
        };

        loop {
            let end = session
                .run(
                    &self.config,
                    &self.cache,
                    self.dispatcher.as_ref(),
                    &self.shutdown,
                )
                .await;
            if end == SessionEnd::Shutdown {
                return StopReason::Shutdown;
            }
            self.set_state(ConnectionState::Closed);

            if !self.config.lock().auto_reconnect() {
                info!("auto reconnect disabled; not reconnecting");
                return StopReason::Disconnected;
            }
            session = match self.reconnect().await {
                Ok(session) => session,
                Err(reason) => return reason,
            };
        }
    }

    async fn connect_initial(&self) -> Result<Session, StopReason> {
        loop {
            match self.establish().await {
                Ok(session) => return Ok(session),
                Err(Attempt::Stop(reason)) => return Err(reason),
                Err(Attempt::Failed) => {}
            }
            let interval = self.policy().interval();
            info!("initial connection failed; retrying: delay_ms={}", interval.as_millis());
            self.pause(interval).await?;
        }
    }

    async fn reconnect(&self) -> Result<Session, StopReason> {
        let jitter = self.policy().jitter_delay();
        info!("connection lost; reconnecting: jitter_ms={}", jitter.as_millis());
        self.pause(jitter).await?;

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            metrics::inc_reconnect_attempts();
            info!("reconnect attempt: attempt={attempts}, limit={}", self.policy().count());
            match self.establish().await {
                Ok(session) => return Ok(session),
                Err(Attempt::Stop(reason)) => return Err(reason),
                Err(Attempt::Failed) => {}
            }

            let policy = self.policy();
            if policy.is_exhausted(attempts) {
                error!("reconnect attempts exhausted: attempts={attempts}, limit={}", policy.count());
                return Err(StopReason::ReconnectExhausted { attempts });
            }
            self.pause(policy.interval()).await?;
        }
    }

    /// One handshake followed by one socket open.
    async fn establish(&self) -> Result<Session, Attempt> {
        self.set_state(ConnectionState::Handshaking);
        let identity = self.config.identity();
        let negotiated = select! {
            biased;

            () = self.shutdown.cancelled() => return Err(Attempt::Stop(StopReason::Shutdown)),
            result = self.handshake.negotiate(&identity) => result,
        };

        match negotiated {
            Ok(endpoint) => {
                info!(
                    "handshake succeeded: device_id={}, service_id={}",
                    endpoint.device_id(),
                    endpoint.service_id()
                );
                self.config.update_runtime(endpoint.into_update());
            }
            Err(HandshakeError::Rejected { code, msg }) if codes::is_fatal(code) => {
                error!("handshake rejected permanently: code={code}, msg={msg}");
                self.set_state(ConnectionState::HandshakeFailed);
                return Err(Attempt::Stop(StopReason::Rejected { code, message: msg }));
            }
            Err(e) => {
                warn!("handshake failed: error={e}");
                self.set_state(ConnectionState::HandshakeFailed);
                return Err(Attempt::Failed);
            }
        }

        self.set_state(ConnectionState::Connecting);
        let id = self.connection_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let opened = select! {
            biased;

            () = self.shutdown.cancelled() => return Err(Attempt::Stop(StopReason::Shutdown)),
            result = Session::open(&self.config, id, self.connect_timeout, &self.shutdown) => result,
        };

        match opened {
            Ok(session) => {
                self.set_state(ConnectionState::Connected);
                Ok(session)
            }
            Err(e) => {
                warn!("connect failed: connection_id={id}, error={e}");
                self.set_state(ConnectionState::ConnectFailed);
                Err(Attempt::Failed)
            }
        }
    }

    async fn pause(&self, delay: Duration) -> Result<(), StopReason> {
        self.set_state(ConnectionState::Backoff);
        select! {
            biased;

            () = self.shutdown.cancelled() => Err(StopReason::Shutdown),
            () = sleep(delay) => Ok(()),
        }
    }

    fn policy(&self) -> ReconnectPolicy { self.config.lock().runtime().reconnect_policy() }

    fn set_state(&self, state: ConnectionState) { self.state.send_replace(state); }
}

/// Handle to a client running on a background task; see [`WsClient::spawn`].
///
/// Dropping the handle without calling [`wait`](Self::wait) stops the client.
#[derive(Debug)]
pub struct ClientHandle {
    shutdown: CancellationToken,
    state: watch::Receiver<ConnectionState>,
    config: SharedConfig,
    task: Option<JoinHandle<StopReason>>,
}

impl ClientHandle {
    /// Ask the client to stop. Returns immediately; use [`wait`](Self::wait)
    /// to join.
    pub fn shutdown(&self) { self.shutdown.cancel(); }

    /// Subscribe to lifecycle state changes.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnectionState> { self.state.clone() }

    /// Snapshot of the currently negotiated session parameters.
    #[must_use]
    pub fn runtime(&self) -> RuntimeParams { self.config.runtime() }

    /// Wait for the client task to finish.
    ///
    /// # Errors
    ///
    /// Returns the [`JoinError`] if the client task panicked or was aborted.
    pub async fn wait(mut self) -> Result<StopReason, JoinError> {
        match self.task.take() {
            Some(task) => task.await,
            None => Ok(StopReason::Shutdown),
        }
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.shutdown.cancel();
        }
    }
}
