//! Connection configuration store.
//!
//! [`ConnectionConfig`] holds everything one logical connection needs: the
//! immutable [`ClientIdentity`] fixed at construction, the [`RuntimeParams`]
//! renegotiated by every handshake and pong, and the single authoritative
//! [`SocketHandle`].
//!
//! The store itself is not synchronised. The supervisor shares it with the
//! heartbeat loop through [`SharedConfig`], which serialises access behind a
//! mutex and keeps every critical section to a copy or a merge.

use std::{
    fmt,
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{error::ConfigError, frame::Frame, reconnect::ReconnectPolicy};

/// Default heartbeat interval used until the gateway negotiates one.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

/// Base domain of the gateway.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Domain {
    /// Mainland environment, `https://open.feishu.cn`.
    #[default]
    Feishu,
    /// International environment, `https://open.larksuite.com`.
    Lark,
    /// Explicit base URL, for private deployments and tests.
    Custom(String),
}

impl Domain {
    /// Base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        match self {
            Self::Feishu => "https://open.feishu.cn",
            Self::Lark => "https://open.larksuite.com",
            Self::Custom(url) => url.trim_end_matches('/'),
        }
    }
}

impl FromStr for Domain {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "feishu" => Ok(Self::Feishu),
            "lark" => Ok(Self::Lark),
            url if url.starts_with("http://") || url.starts_with("https://") => {
                Ok(Self::Custom(url.to_owned()))
            }
            other => Err(ConfigError::InvalidDomain(other.to_owned())),
        }
    }
}

/// Static application identity presented on every handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    app_id: String,
    app_secret: String,
    domain: Domain,
}

impl ClientIdentity {
    /// Validate and build an identity.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingAppId`] or [`ConfigError::MissingAppSecret`]
    /// when either credential is empty.
    pub fn new(
        app_id: impl Into<String>,
        app_secret: impl Into<String>,
        domain: Domain,
    ) -> Result<Self, ConfigError> {
        let app_id = app_id.into();
        let app_secret = app_secret.into();
        if app_id.trim().is_empty() {
            return Err(ConfigError::MissingAppId);
        }
        if app_secret.trim().is_empty() {
            return Err(ConfigError::MissingAppSecret);
        }
        Ok(Self {
            app_id,
            app_secret,
            domain,
        })
    }

    #[must_use]
    pub fn app_id(&self) -> &str { &self.app_id }

    #[must_use]
    pub fn app_secret(&self) -> &str { &self.app_secret }

    #[must_use]
    pub fn domain(&self) -> &Domain { &self.domain }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("app_id", &self.app_id)
            .field("app_secret", &"<redacted>")
            .field("domain", &self.domain)
            .finish()
    }
}

/// Session parameters negotiated with the gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeParams {
    connect_url: Option<String>,
    device_id: Option<String>,
    service_id: Option<i32>,
    ping_interval: Duration,
    reconnect: ReconnectPolicy,
}

impl Default for RuntimeParams {
    fn default() -> Self {
        Self {
            connect_url: None,
            device_id: None,
            service_id: None,
            ping_interval: DEFAULT_PING_INTERVAL,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl RuntimeParams {
    #[must_use]
    pub fn connect_url(&self) -> Option<&str> { self.connect_url.as_deref() }

    #[must_use]
    pub fn device_id(&self) -> Option<&str> { self.device_id.as_deref() }

    #[must_use]
    pub const fn service_id(&self) -> Option<i32> { self.service_id }

    #[must_use]
    pub const fn ping_interval(&self) -> Duration { self.ping_interval }

    #[must_use]
    pub const fn reconnect_policy(&self) -> ReconnectPolicy { self.reconnect }

    /// Merge `update` into these parameters; absent fields keep their value.
    pub fn apply(&mut self, update: RuntimeUpdate) {
        let RuntimeUpdate {
            connect_url,
            device_id,
            service_id,
            ping_interval,
            reconnect_count,
            reconnect_interval,
            reconnect_nonce,
        } = update;

        if let Some(url) = connect_url {
            self.connect_url = Some(url);
        }
        if let Some(device_id) = device_id {
            self.device_id = Some(device_id);
        }
        if let Some(service_id) = service_id {
            self.service_id = Some(service_id);
        }
        if let Some(interval) = ping_interval {
            self.ping_interval = interval;
        }
        if let Some(count) = reconnect_count {
            self.reconnect = self.reconnect.with_count(count);
        }
        if let Some(interval) = reconnect_interval {
            self.reconnect = self.reconnect.with_interval(interval);
        }
        if let Some(nonce) = reconnect_nonce {
            self.reconnect = self.reconnect.with_nonce(nonce);
        }
    }
}

/// Partial update of [`RuntimeParams`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeUpdate {
    pub connect_url: Option<String>,
    pub device_id: Option<String>,
    pub service_id: Option<i32>,
    pub ping_interval: Option<Duration>,
    pub reconnect_count: Option<i32>,
    pub reconnect_interval: Option<Duration>,
    pub reconnect_nonce: Option<Duration>,
}

impl RuntimeUpdate {
    /// Update carrying every field of `policy`.
    #[must_use]
    pub fn from_policy(policy: ReconnectPolicy) -> Self {
        Self {
            reconnect_count: Some(policy.count()),
            reconnect_interval: Some(policy.interval()),
            reconnect_nonce: Some(policy.nonce()),
            ..Self::default()
        }
    }

    /// Whether the update would change nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool { *self == Self::default() }
}

/// The socket write side of a live connection is gone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("socket {connection_id} is closed")]
pub struct SocketClosed {
    pub connection_id: u64,
}

/// Handle to the live socket.
///
/// Frames sent through the handle are written by the connection's writer
/// task. Cancelling the handle's token tears down the writer and the
/// heartbeat loop bound to the same connection.
#[derive(Clone, Debug)]
pub struct SocketHandle {
    id: u64,
    outbound: mpsc::Sender<Frame>,
    token: CancellationToken,
}

impl SocketHandle {
    #[must_use]
    pub fn new(id: u64, outbound: mpsc::Sender<Frame>, token: CancellationToken) -> Self {
        Self {
            id,
            outbound,
            token,
        }
    }

    /// Connection identifier, unique per client instance.
    #[must_use]
    pub const fn id(&self) -> u64 { self.id }

    /// Token cancelled when this connection is torn down.
    #[must_use]
    pub fn token(&self) -> &CancellationToken { &self.token }

    #[must_use]
    pub fn is_open(&self) -> bool { !self.token.is_cancelled() && !self.outbound.is_closed() }

    /// Queue `frame` for the writer task.
    ///
    /// # Errors
    ///
    /// Returns [`SocketClosed`] once the connection has been torn down.
    pub async fn send(&self, frame: Frame) -> Result<(), SocketClosed> {
        if self.token.is_cancelled() {
            return Err(SocketClosed {
                connection_id: self.id,
            });
        }
        self.outbound.send(frame).await.map_err(|_| SocketClosed {
            connection_id: self.id,
        })
    }

    /// Tear the connection down.
    pub fn close(&self) { self.token.cancel(); }
}

/// All state of one logical connection.
#[derive(Debug)]
pub struct ConnectionConfig {
    identity: ClientIdentity,
    runtime: RuntimeParams,
    auto_reconnect: bool,
    socket: Option<SocketHandle>,
}

impl ConnectionConfig {
    #[must_use]
    pub fn new(identity: ClientIdentity, runtime: RuntimeParams, auto_reconnect: bool) -> Self {
        Self {
            identity,
            runtime,
            auto_reconnect,
            socket: None,
        }
    }

    #[must_use]
    pub fn identity(&self) -> &ClientIdentity { &self.identity }

    #[must_use]
    pub fn runtime(&self) -> &RuntimeParams { &self.runtime }

    #[must_use]
    pub const fn auto_reconnect(&self) -> bool { self.auto_reconnect }

    pub fn update_runtime(&mut self, update: RuntimeUpdate) { self.runtime.apply(update); }

    #[must_use]
    pub fn socket(&self) -> Option<&SocketHandle> { self.socket.as_ref() }

    /// Install `socket` as the authoritative handle, closing any previous one.
    pub fn install_socket(&mut self, socket: SocketHandle) {
        if let Some(previous) = self.socket.replace(socket) {
            previous.close();
        }
    }

    /// Clear the handle if it still refers to `connection_id`.
    ///
    /// Returns the removed handle, already closed.
    pub fn clear_socket(&mut self, connection_id: u64) -> Option<SocketHandle> {
        if self.socket.as_ref().is_some_and(|s| s.id() == connection_id) {
            let socket = self.socket.take()?;
            socket.close();
            return Some(socket);
        }
        None
    }
}

/// [`ConnectionConfig`] shared between the supervisor and its helper tasks.
#[derive(Clone, Debug)]
pub struct SharedConfig(Arc<Mutex<ConnectionConfig>>);

impl SharedConfig {
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self { Self(Arc::new(Mutex::new(config))) }

    /// Lock the store. A poisoned lock is recovered: every mutation is a
    /// single assignment, so the data is never left half-written.
    pub fn lock(&self) -> MutexGuard<'_, ConnectionConfig> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn identity(&self) -> ClientIdentity { self.lock().identity().clone() }

    #[must_use]
    pub fn runtime(&self) -> RuntimeParams { self.lock().runtime().clone() }

    pub fn update_runtime(&self, update: RuntimeUpdate) { self.lock().update_runtime(update); }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn identity() -> ClientIdentity {
        ClientIdentity::new("cli_app", "secret", Domain::Feishu).expect("valid identity")
    }

    fn socket(id: u64) -> (SocketHandle, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(4);
        (SocketHandle::new(id, tx, CancellationToken::new()), rx)
    }

    #[rstest]
    #[case("feishu", Domain::Feishu)]
    #[case("lark", Domain::Lark)]
    #[case("http://127.0.0.1:8080/", Domain::Custom("http://127.0.0.1:8080/".into()))]
    fn domain_parsing(#[case] raw: &str, #[case] expected: Domain) {
        assert_eq!(raw.parse::<Domain>().expect("domain parses"), expected);
    }

    #[test]
    fn custom_domain_strips_trailing_slash() {
        let domain = Domain::Custom("https://gateway.example/".into());
        assert_eq!(domain.base_url(), "https://gateway.example");
    }

    #[test]
    fn unknown_domain_is_rejected() {
        let err = "moon".parse::<Domain>().expect_err("unknown domain");
        assert!(matches!(err, ConfigError::InvalidDomain(d) if d == "moon"));
    }

    #[rstest]
    #[case("", "secret")]
    #[case("  ", "secret")]
    fn empty_app_id_fails_fast(#[case] app_id: &str, #[case] secret: &str) {
        let err = ClientIdentity::new(app_id, secret, Domain::Lark).expect_err("must fail");
        assert!(matches!(err, ConfigError::MissingAppId));
    }

    #[test]
    fn empty_secret_fails_fast() {
        let err = ClientIdentity::new("app", "", Domain::Lark).expect_err("must fail");
        assert!(matches!(err, ConfigError::MissingAppSecret));
    }

    #[test]
    fn debug_output_redacts_secret() {
        let rendered = format!("{:?}", identity());
        assert!(rendered.contains("cli_app"));
        assert!(!rendered.contains("secret\""));
    }

    #[test]
    fn defaults_bound_behaviour_before_handshake() {
        let params = RuntimeParams::default();
        assert_eq!(params.ping_interval(), DEFAULT_PING_INTERVAL);
        assert_eq!(params.reconnect_policy(), ReconnectPolicy::default());
        assert_eq!(params.connect_url(), None);
        assert_eq!(params.service_id(), None);
    }

    #[test]
    fn updates_are_partial_merges() {
        let mut params = RuntimeParams::default();
        params.apply(RuntimeUpdate {
            connect_url: Some("wss://gw/ws".into()),
            service_id: Some(3),
            reconnect_count: Some(5),
            ..RuntimeUpdate::default()
        });
        params.apply(RuntimeUpdate {
            ping_interval: Some(Duration::from_secs(30)),
            ..RuntimeUpdate::default()
        });

        assert_eq!(params.connect_url(), Some("wss://gw/ws"));
        assert_eq!(params.service_id(), Some(3));
        assert_eq!(params.ping_interval(), Duration::from_secs(30));
        assert_eq!(params.reconnect_policy().count(), 5);
        assert_eq!(
            params.reconnect_policy().interval(),
            ReconnectPolicy::default().interval()
        );
    }

    #[test]
    fn installing_a_socket_closes_the_previous_one() {
        let mut config = ConnectionConfig::new(identity(), RuntimeParams::default(), true);
        let (first, _rx1) = socket(1);
        let (second, _rx2) = socket(2);

        config.install_socket(first.clone());
        config.install_socket(second.clone());

        assert!(!first.is_open());
        assert!(second.is_open());
        assert_eq!(config.socket().map(SocketHandle::id), Some(2));
    }

    #[test]
    fn clearing_a_stale_id_keeps_the_current_socket() {
        let mut config = ConnectionConfig::new(identity(), RuntimeParams::default(), true);
        let (current, _rx) = socket(7);
        config.install_socket(current.clone());

        assert!(config.clear_socket(6).is_none());
        assert!(current.is_open());

        let cleared = config.clear_socket(7).expect("current socket cleared");
        assert!(!cleared.is_open());
        assert!(config.socket().is_none());
    }

    #[tokio::test]
    async fn closed_socket_rejects_frames() {
        let (handle, mut rx) = socket(9);
        handle.send(Frame::ping(1)).await.expect("open socket accepts frames");
        assert!(rx.recv().await.is_some());

        handle.close();
        let err = handle.send(Frame::ping(1)).await.expect_err("closed socket");
        assert_eq!(err.connection_id, 9);
    }
}
