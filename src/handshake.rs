//! Connection-parameter negotiation with the gateway.
//!
//! Before every socket is opened the client asks the gateway where to
//! connect. The answer carries the WebSocket URL, whose query string names
//! the device and service ids of the session, plus the heartbeat and
//! reconnect parameters the gateway wants the client to observe.
//!
//! [`Handshake`] is the seam: [`HttpHandshake`] talks to the real endpoint,
//! while tests plug in scripted implementations.

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Duration;
use url::Url;

use crate::config::{ClientIdentity, RuntimeUpdate};

/// Path of the connection-config endpoint below the domain's base URL.
pub const ENDPOINT_PATH: &str = "/callback/ws/endpoint";
/// Default value of the `locale` request header.
pub const DEFAULT_LOCALE: &str = "zh";
/// Upper bound on one handshake request, connect to body.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Response codes returned by the endpoint.
pub mod codes {
    pub const OK: i64 = 0;
    /// The gateway is overloaded; retry later.
    pub const SYSTEM_BUSY: i64 = 1;
    /// The application may not use long connections.
    pub const FORBIDDEN: i64 = 403;
    /// The app id/secret pair was rejected.
    pub const AUTH_FAILED: i64 = 514;
    /// The gateway failed internally; retry later.
    pub const INTERNAL_ERROR: i64 = 1_000_040_343;
    /// Too many concurrent connections for this application.
    pub const EXCEED_CONN_LIMIT: i64 = 1_000_040_350;

    /// Whether `code` rejects the application outright.
    #[must_use]
    pub const fn is_fatal(code: i64) -> bool { matches!(code, FORBIDDEN | AUTH_FAILED) }
}

/// Errors produced while negotiating connection parameters.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The HTTP request failed before a response body was read.
    #[error("handshake request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// A non-HTTP transport reported failure.
    #[error("handshake transport unavailable: {0}")]
    Unavailable(String),
    /// The gateway answered with a non-zero code.
    #[error("gateway rejected handshake: code={code}, msg={msg}")]
    Rejected { code: i64, msg: String },
    /// The body is not the expected JSON document.
    #[error("malformed handshake response: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A successful response carried no connect URL.
    #[error("handshake response carried no connect url")]
    MissingUrl,
    /// The connect URL does not parse.
    #[error("invalid connect url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    /// The connect URL lacks a required query parameter.
    #[error("connect url is missing or has an invalid `{param}` parameter")]
    MissingQueryParam { param: &'static str },
}

impl HandshakeError {
    /// Whether retrying can never succeed.
    ///
    /// Only explicit permission and credential rejections are fatal; busy
    /// and internal-error codes, unknown codes, transport failures and
    /// malformed answers are all retried by the reconnect policy.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Rejected { code, .. } if codes::is_fatal(*code))
    }

    /// Whether the gateway explicitly asked the client to back off.
    #[must_use]
    pub fn is_transient_code(&self) -> bool {
        matches!(
            self,
            Self::Rejected {
                code: codes::SYSTEM_BUSY | codes::INTERNAL_ERROR | codes::EXCEED_CONN_LIMIT,
                ..
            }
        )
    }
}

/// Heartbeat and reconnect parameters as sent by the gateway.
///
/// Durations are whole seconds on the wire. The same document is carried by
/// the handshake response and by `pong` control frames.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfigPayload {
    #[serde(rename = "PingInterval", alias = "ping_interval", default, skip_serializing_if = "Option::is_none")]
    pub ping_interval: Option<u64>,
    #[serde(rename = "ReconnectCount", alias = "reconnect_count", default, skip_serializing_if = "Option::is_none")]
    pub reconnect_count: Option<i32>,
    #[serde(rename = "ReconnectInterval", alias = "reconnect_interval", default, skip_serializing_if = "Option::is_none")]
    pub reconnect_interval: Option<u64>,
    #[serde(rename = "ReconnectNonce", alias = "reconnect_nonce", default, skip_serializing_if = "Option::is_none")]
    pub reconnect_nonce: Option<u64>,
}

impl ClientConfigPayload {
    /// Convert to a partial runtime update. A zero ping interval is ignored
    /// so a bad value can never turn the heartbeat into a busy loop.
    #[must_use]
    pub fn into_update(self) -> RuntimeUpdate {
        RuntimeUpdate {
            ping_interval: self
                .ping_interval
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            reconnect_count: self.reconnect_count,
            reconnect_interval: self.reconnect_interval.map(Duration::from_secs),
            reconnect_nonce: self.reconnect_nonce.map(Duration::from_secs),
            ..RuntimeUpdate::default()
        }
    }
}

/// Parameters of one negotiated session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    url: String,
    device_id: String,
    service_id: i32,
    client_config: ClientConfigPayload,
}

impl Endpoint {
    /// Build an endpoint from a connect URL, extracting `device_id` and
    /// `service_id` from its query string.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::InvalidUrl`] or
    /// [`HandshakeError::MissingQueryParam`] when the URL is unusable.
    ///
    /// # Examples
    ///
    /// ```
    /// use pushwire::handshake::{ClientConfigPayload, Endpoint};
    ///
    /// let endpoint = Endpoint::parse(
    ///     "wss://gw.example/ws?device_id=d1&service_id=42",
    ///     ClientConfigPayload::default(),
    /// )
    /// .expect("valid endpoint");
    /// assert_eq!(endpoint.device_id(), "d1");
    /// assert_eq!(endpoint.service_id(), 42);
    /// ```
    pub fn parse(
        url: impl Into<String>,
        client_config: ClientConfigPayload,
    ) -> Result<Self, HandshakeError> {
        let url = url.into();
        let parsed = Url::parse(&url).map_err(|source| HandshakeError::InvalidUrl {
            url: url.clone(),
            source,
        })?;
        let query = |param: &'static str| {
            parsed
                .query_pairs()
                .find(|(key, _)| key == param)
                .map(|(_, value)| value.into_owned())
                .filter(|value| !value.is_empty())
                .ok_or(HandshakeError::MissingQueryParam { param })
        };
        let device_id = query("device_id")?;
        let service_id = query("service_id")?
            .parse()
            .map_err(|_| HandshakeError::MissingQueryParam {
                param: "service_id",
            })?;

        Ok(Self {
            url,
            device_id,
            service_id,
            client_config,
        })
    }

    #[must_use]
    pub fn url(&self) -> &str { &self.url }

    #[must_use]
    pub fn device_id(&self) -> &str { &self.device_id }

    #[must_use]
    pub const fn service_id(&self) -> i32 { self.service_id }

    #[must_use]
    pub fn client_config(&self) -> &ClientConfigPayload { &self.client_config }

    /// Runtime update installing this endpoint and its parameters.
    #[must_use]
    pub fn into_update(self) -> RuntimeUpdate {
        RuntimeUpdate {
            connect_url: Some(self.url),
            device_id: Some(self.device_id),
            service_id: Some(self.service_id),
            ..self.client_config.into_update()
        }
    }
}

/// Source of per-session connection parameters.
#[async_trait]
pub trait Handshake: Send + Sync {
    /// Ask the gateway for a connect URL and session parameters.
    async fn negotiate(&self, identity: &ClientIdentity) -> Result<Endpoint, HandshakeError>;
}

#[derive(Serialize)]
struct EndpointRequest<'a> {
    #[serde(rename = "AppID")]
    app_id: &'a str,
    #[serde(rename = "AppSecret")]
    app_secret: &'a str,
}

#[derive(Deserialize)]
struct EndpointResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<EndpointData>,
}

#[derive(Deserialize)]
struct EndpointData {
    #[serde(rename = "URL", alias = "url", default)]
    url: Option<String>,
    #[serde(rename = "ClientConfig", alias = "client_config", default)]
    client_config: Option<ClientConfigPayload>,
}

/// Interpret the raw body of an endpoint response.
///
/// # Errors
///
/// Returns [`HandshakeError::Rejected`] for non-zero codes and the
/// URL-related variants when a successful response is unusable.
pub fn parse_response(body: &[u8]) -> Result<Endpoint, HandshakeError> {
    let response: EndpointResponse = serde_json::from_slice(body)?;
    if response.code != codes::OK {
        return Err(HandshakeError::Rejected {
            code: response.code,
            msg: response.msg,
        });
    }
    let data = response.data.ok_or(HandshakeError::MissingUrl)?;
    let url = data
        .url
        .filter(|url| !url.is_empty())
        .ok_or(HandshakeError::MissingUrl)?;
    Endpoint::parse(url, data.client_config.unwrap_or_default())
}

/// [`Handshake`] over HTTP with `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpHandshake {
    client: reqwest::Client,
    locale: String,
}

impl HttpHandshake {
    /// Build a handshake client with a fresh connection pool whose requests
    /// give up after [`REQUEST_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` error if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self, reqwest::Error> { Self::with_timeout(REQUEST_TIMEOUT) }

    /// Like [`new`](Self::new) with a custom request timeout.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` error if the TLS backend cannot be initialised.
    pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client))
    }

    /// Reuse an existing `reqwest` client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            locale: DEFAULT_LOCALE.to_owned(),
        }
    }

    /// Override the `locale` header.
    #[must_use]
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }
}

#[async_trait]
impl Handshake for HttpHandshake {
    async fn negotiate(&self, identity: &ClientIdentity) -> Result<Endpoint, HandshakeError> {
        let url = format!("{}{ENDPOINT_PATH}", identity.domain().base_url());
        debug!("handshake request: url={url}, app_id={}", identity.app_id());

        let body = self
            .client
            .post(&url)
            .header("locale", &self.locale)
            .json(&EndpointRequest {
                app_id: identity.app_id(),
                app_secret: identity.app_secret(),
            })
            .send()
            .await?
            .bytes()
            .await?;

        parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn body(value: &serde_json::Value) -> Vec<u8> { serde_json::to_vec(value).expect("json") }

    #[test]
    fn successful_response_yields_endpoint_and_parameters() {
        let endpoint = parse_response(&body(&json!({
            "code": 0,
            "msg": "ok",
            "data": {
                "URL": "wss://gw.example/ws?device_id=dev-9&service_id=33&ticket=x",
                "ClientConfig": {
                    "PingInterval": 90,
                    "ReconnectCount": 4,
                    "ReconnectInterval": 60,
                    "ReconnectNonce": 15
                }
            }
        })))
        .expect("endpoint parses");

        assert_eq!(endpoint.device_id(), "dev-9");
        assert_eq!(endpoint.service_id(), 33);

        let update = endpoint.into_update();
        assert_eq!(
            update.connect_url.as_deref(),
            Some("wss://gw.example/ws?device_id=dev-9&service_id=33&ticket=x")
        );
        assert_eq!(update.ping_interval, Some(Duration::from_secs(90)));
        assert_eq!(update.reconnect_count, Some(4));
        assert_eq!(update.reconnect_interval, Some(Duration::from_secs(60)));
        assert_eq!(update.reconnect_nonce, Some(Duration::from_secs(15)));
    }

    #[test]
    fn snake_case_fields_are_accepted() {
        let endpoint = parse_response(&body(&json!({
            "code": 0,
            "data": {
                "url": "wss://gw/ws?device_id=a&service_id=1",
                "client_config": { "ping_interval": 5 }
            }
        })))
        .expect("endpoint parses");

        assert_eq!(endpoint.client_config().ping_interval, Some(5));
        assert_eq!(endpoint.client_config().reconnect_count, None);
    }

    #[rstest]
    #[case(codes::SYSTEM_BUSY, false, true)]
    #[case(codes::INTERNAL_ERROR, false, true)]
    #[case(codes::EXCEED_CONN_LIMIT, false, true)]
    #[case(codes::FORBIDDEN, true, false)]
    #[case(codes::AUTH_FAILED, true, false)]
    #[case(42, false, false)]
    fn rejection_classification(#[case] code: i64, #[case] fatal: bool, #[case] transient: bool) {
        let err = parse_response(&body(&json!({"code": code, "msg": "nope"})))
            .expect_err("non-zero code rejected");

        assert!(matches!(&err, HandshakeError::Rejected { code: c, msg } if *c == code && msg == "nope"));
        assert_eq!(err.is_fatal(), fatal);
        assert_eq!(err.is_transient_code(), transient);
    }

    #[rstest]
    #[case::no_data(json!({"code": 0}))]
    #[case::empty_url(json!({"code": 0, "data": {"URL": ""}}))]
    fn missing_url_is_an_error(#[case] response: serde_json::Value) {
        let err = parse_response(&body(&response)).expect_err("no url");
        assert!(matches!(err, HandshakeError::MissingUrl));
        assert!(!err.is_fatal());
    }

    #[rstest]
    #[case("wss://gw/ws?service_id=1", "device_id")]
    #[case("wss://gw/ws?device_id=d", "service_id")]
    #[case("wss://gw/ws?device_id=d&service_id=abc", "service_id")]
    fn connect_url_requires_session_ids(#[case] url: &str, #[case] missing: &str) {
        let err = Endpoint::parse(url, ClientConfigPayload::default()).expect_err("bad url");
        assert!(matches!(err, HandshakeError::MissingQueryParam { param } if param == missing));
    }

    #[test]
    fn unparseable_url_is_reported() {
        let err = Endpoint::parse("not a url", ClientConfigPayload::default()).expect_err("bad url");
        assert!(matches!(err, HandshakeError::InvalidUrl { .. }));
    }

    #[test]
    fn malformed_body_is_not_fatal() {
        let err = parse_response(b"<html>").expect_err("not json");
        assert!(matches!(err, HandshakeError::Malformed(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn zero_ping_interval_is_ignored() {
        let update = ClientConfigPayload {
            ping_interval: Some(0),
            ..ClientConfigPayload::default()
        }
        .into_update();
        assert_eq!(update.ping_interval, None);
    }

    #[test]
    fn payload_serialises_with_gateway_field_names() {
        let payload = ClientConfigPayload {
            ping_interval: Some(10),
            ..ClientConfigPayload::default()
        };
        assert_eq!(
            serde_json::to_value(&payload).expect("serialise"),
            json!({"PingInterval": 10})
        );
    }

    #[tokio::test]
    async fn stalled_endpoint_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        // Accept connections and never answer.
        let stall = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let identity =
            ClientIdentity::new("app", "secret", crate::config::Domain::Custom(format!("http://{addr}")))
                .expect("identity");
        let handshake = HttpHandshake::with_timeout(Duration::from_millis(100)).expect("http client");

        let err = tokio::time::timeout(Duration::from_secs(5), handshake.negotiate(&identity))
            .await
            .expect("request bounded by its own timeout")
            .expect_err("nothing answers");

        assert!(matches!(&err, HandshakeError::Transport(e) if e.is_timeout()), "unexpected error: {err}");
        assert!(!err.is_fatal());
        stall.abort();
    }
}
