//! Lifecycle states, shutdown and construction of the client.

mod common;

use std::time::Duration;

use common::{WAIT, forwarding_dispatcher, wait_for_state};
use pushwire::{ConfigError, ConnectionState, Domain, ReconnectPolicy, StopReason, WsClient};
use pushwire_testing::{MockGateway, ScriptedHandshake, Step};
use rstest::rstest;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn shutdown_while_connected_stops_cleanly() {
    let mut gateway = MockGateway::start().await.expect("bind gateway");
    let (dispatcher, _delivered) = forwarding_dispatcher(None);
    let client = WsClient::builder("app", "secret")
        .handshake(ScriptedHandshake::accepting(gateway.endpoint()))
        .dispatcher(dispatcher)
        .build()
        .expect("client builds")
        .spawn();
    let mut state = client.state();

    let mut conn = gateway.accept().await;
    wait_for_state(&mut state, ConnectionState::Connected).await;
    assert_eq!(client.runtime().device_id(), Some("dev-1"));
    assert_eq!(client.runtime().service_id(), Some(7));

    client.shutdown();
    let reason = timeout(WAIT, client.wait())
        .await
        .expect("client stopped in time")
        .expect("client task joined");
    assert_eq!(reason, StopReason::Shutdown);
    assert_eq!(*state.borrow(), ConnectionState::Stopped);

    // The socket is closed from the client side; only pings preceded it.
    while let Some(frame) = conn.next_frame().await {
        assert_eq!(frame.message_type(), Some(pushwire::MessageType::Ping));
    }
}

#[tokio::test]
async fn shutdown_interrupts_backoff() {
    let (dispatcher, _delivered) = forwarding_dispatcher(None);
    let token = CancellationToken::new();
    let client = WsClient::builder("app", "secret")
        .handshake(ScriptedHandshake::new([], Step::Unavailable))
        .dispatcher(dispatcher)
        .reconnect_policy(ReconnectPolicy::new(-1, Duration::from_secs(3600), Duration::ZERO))
        .shutdown_token(token.clone())
        .build()
        .expect("client builds");
    let mut state = client.state();
    let run = tokio::spawn(client.run());

    wait_for_state(&mut state, ConnectionState::Backoff).await;
    token.cancel();

    let reason = timeout(WAIT, run)
        .await
        .expect("client stopped in time")
        .expect("client task joined");
    assert_eq!(reason, StopReason::Shutdown);
}

#[tokio::test]
async fn dropping_the_handle_stops_the_client() {
    let mut gateway = MockGateway::start().await.expect("bind gateway");
    let (dispatcher, _delivered) = forwarding_dispatcher(None);
    let client = WsClient::builder("app", "secret")
        .handshake(ScriptedHandshake::accepting(gateway.endpoint()))
        .dispatcher(dispatcher)
        .build()
        .expect("client builds")
        .spawn();
    let mut conn = gateway.accept().await;

    drop(client);

    let closed = timeout(WAIT, async {
        while conn.next_frame().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "socket closed after the handle was dropped");
}

#[rstest]
#[case::missing_app_id("", "secret")]
#[case::blank_secret("app", "   ")]
fn empty_credentials_fail_fast(#[case] app_id: &str, #[case] secret: &str) {
    let (dispatcher, _delivered) = forwarding_dispatcher(None);
    let result = WsClient::builder(app_id, secret)
        .domain(Domain::Lark)
        .dispatcher(dispatcher)
        .build();
    assert!(matches!(
        result,
        Err(ConfigError::MissingAppId | ConfigError::MissingAppSecret)
    ));
}

#[test]
fn default_http_handshake_builds_without_a_runtime() {
    let (dispatcher, _delivered) = forwarding_dispatcher(None);
    let client = WsClient::builder("app", "secret")
        .domain("https://open.example.test".parse().expect("custom domain"))
        .locale("en")
        .dispatcher(dispatcher)
        .build()
        .expect("client builds");
    assert_eq!(*client.state().borrow(), ConnectionState::Idle);
}
