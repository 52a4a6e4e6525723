//! Builder for [`WsClient`].

use std::{
    fmt,
    sync::{Arc, atomic::AtomicU64},
    time::Duration,
};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{ConnectionState, WsClient, session::CONNECT_TIMEOUT};
use crate::{
    config::{ClientIdentity, ConnectionConfig, Domain, RuntimeParams, RuntimeUpdate, SharedConfig},
    dispatch::EventDispatcher,
    error::ConfigError,
    handshake::{DEFAULT_LOCALE, Handshake, HttpHandshake},
    reassembly::ChunkCache,
    reconnect::ReconnectPolicy,
};

/// Configures and validates a [`WsClient`].
///
/// Only the credentials and a dispatcher are required. The ping interval and
/// reconnect policy set here are starting values: every handshake and pong
/// may replace them with values chosen by the gateway.
///
/// # Examples
///
/// ```
/// use pushwire::{Domain, WsClient, dispatch_fn};
///
/// let client = WsClient::builder("cli_app", "secret")
///     .domain(Domain::Lark)
///     .auto_reconnect(false)
///     .dispatcher(dispatch_fn(|_event, _ctx| async { Ok(None) }))
///     .build();
/// assert!(client.is_ok());
/// ```
pub struct WsClientBuilder {
    app_id: String,
    app_secret: String,
    domain: Domain,
    auto_reconnect: bool,
    dispatcher: Option<Arc<dyn EventDispatcher>>,
    handshake: Option<Arc<dyn Handshake>>,
    ping_interval: Option<Duration>,
    reconnect_policy: Option<ReconnectPolicy>,
    locale: Option<String>,
    connect_timeout: Duration,
    shutdown: Option<CancellationToken>,
}

impl fmt::Debug for WsClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsClientBuilder")
            .field("app_id", &self.app_id)
            .field("domain", &self.domain)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("has_dispatcher", &self.dispatcher.is_some())
            .field("has_handshake", &self.handshake.is_some())
            .field("ping_interval", &self.ping_interval)
            .field("reconnect_policy", &self.reconnect_policy)
            .field("locale", &self.locale)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl WsClientBuilder {
    pub(crate) fn new(app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret: app_secret.into(),
            domain: Domain::default(),
            auto_reconnect: true,
            dispatcher: None,
            handshake: None,
            ping_interval: None,
            reconnect_policy: None,
            locale: None,
            connect_timeout: CONNECT_TIMEOUT,
            shutdown: None,
        }
    }

    #[must_use]
    pub fn domain(mut self, domain: Domain) -> Self {
        self.domain = domain;
        self
    }

    /// Whether to reconnect after an established connection drops.
    /// Defaults to `true`.
    #[must_use]
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Handler for completed events. Required.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: impl EventDispatcher + 'static) -> Self {
        self.dispatcher = Some(Arc::new(dispatcher));
        self
    }

    /// Replace the HTTP handshake, for example with a scripted one in tests.
    #[must_use]
    pub fn handshake(mut self, handshake: impl Handshake + 'static) -> Self {
        self.handshake = Some(Arc::new(handshake));
        self
    }

    /// Heartbeat interval used until the gateway negotiates one. A zero
    /// interval is ignored.
    #[must_use]
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = Some(interval).filter(|i| !i.is_zero());
        self
    }

    /// Reconnect policy used until the gateway negotiates one.
    #[must_use]
    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = Some(policy);
        self
    }

    /// `locale` header sent by the default HTTP handshake.
    #[must_use]
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// How long one socket open may take before the attempt counts as
    /// failed. Defaults to 10 seconds; zero is ignored.
    #[must_use]
    pub fn connect_timeout(mut self, limit: Duration) -> Self {
        if !limit.is_zero() {
            self.connect_timeout = limit;
        }
        self
    }

    /// Stop the client when `token` is cancelled.
    #[must_use]
    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Validate the configuration and build the client.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a credential is empty, no dispatcher was
    /// supplied, or the default HTTP client cannot be constructed.
    pub fn build(self) -> Result<WsClient, ConfigError> {
        let identity = ClientIdentity::new(self.app_id, self.app_secret, self.domain)?;
        let dispatcher = self.dispatcher.ok_or(ConfigError::MissingDispatcher)?;
        let handshake: Arc<dyn Handshake> = match self.handshake {
            Some(handshake) => handshake,
            None => Arc::new(
                HttpHandshake::new()?.locale(self.locale.unwrap_or_else(|| DEFAULT_LOCALE.to_owned())),
            ),
        };

        let mut runtime = RuntimeParams::default();
        if let Some(policy) = self.reconnect_policy {
            runtime.apply(RuntimeUpdate::from_policy(policy));
        }
        runtime.apply(RuntimeUpdate {
            ping_interval: self.ping_interval,
            ..RuntimeUpdate::default()
        });

        let (state, _) = watch::channel(ConnectionState::Idle);
        Ok(WsClient {
            config: SharedConfig::new(ConnectionConfig::new(identity, runtime, self.auto_reconnect)),
            handshake,
            dispatcher,
            cache: Arc::new(ChunkCache::default()),
            state,
            shutdown: self.shutdown.unwrap_or_default(),
            connect_timeout: self.connect_timeout,
            connection_counter: AtomicU64::new(0),
        })
    }
}
