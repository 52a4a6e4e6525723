//! Reconnection after drops and handshake failures.

mod common;

use common::{WAIT, fast_policy, forwarding_dispatcher, next_event};
use pushwire::{StopReason, WsClient, handshake::codes};
use pushwire_testing::{MockGateway, ScriptedHandshake, StalledGateway, Step, event_frame};
use rstest::rstest;
use serde_json::json;
use tokio::time::{Duration, timeout};

fn client(handshake: ScriptedHandshake, count: i32, auto_reconnect: bool) -> pushwire::ClientHandle {
    let (dispatcher, _delivered) = forwarding_dispatcher(None);
    WsClient::builder("app", "secret")
        .handshake(handshake)
        .dispatcher(dispatcher)
        .reconnect_policy(fast_policy(count))
        .auto_reconnect(auto_reconnect)
        .build()
        .expect("client builds")
        .spawn()
}

async fn stop_reason(client: pushwire::ClientHandle) -> StopReason {
    timeout(WAIT, client.wait())
        .await
        .expect("client stopped in time")
        .expect("client task joined")
}

#[tokio::test]
async fn reconnects_with_a_fresh_handshake_after_the_socket_closes() {
    let mut gateway = MockGateway::start().await.expect("bind gateway");
    let handshake = ScriptedHandshake::accepting(gateway.endpoint());
    let (dispatcher, mut delivered) = forwarding_dispatcher(None);
    let client = WsClient::builder("app", "secret")
        .handshake(handshake.clone())
        .dispatcher(dispatcher)
        .reconnect_policy(fast_policy(-1))
        .build()
        .expect("client builds")
        .spawn();

    gateway.accept().await.close().await;
    let mut second = gateway.accept().await;
    assert_eq!(handshake.calls(), 2);

    second.send_frame(&event_frame("after", &json!({"n": 2}))).await;
    let (_, ctx) = next_event(&mut delivered).await;
    assert_eq!(ctx.connection_id, 2);

    client.shutdown();
    assert_eq!(stop_reason(client).await, StopReason::Shutdown);
}

#[rstest]
#[case::two_attempts(2, 2)]
#[case::one_attempt(1, 1)]
#[case::zero_still_tries_once(0, 1)]
#[tokio::test]
async fn bounded_policy_gives_up(#[case] count: i32, #[case] attempts: u32) {
    let mut gateway = MockGateway::start().await.expect("bind gateway");
    let handshake = ScriptedHandshake::new([Step::Accept(gateway.endpoint())], Step::Unavailable);
    let client = client(handshake.clone(), count, true);

    gateway.accept().await.close().await;

    assert_eq!(
        stop_reason(client).await,
        StopReason::ReconnectExhausted { attempts }
    );
    // One initial handshake plus one per reconnect attempt.
    assert_eq!(handshake.calls(), 1 + attempts as usize);
}

#[tokio::test]
async fn zero_count_reconnect_succeeds_on_its_single_attempt() {
    let mut gateway = MockGateway::start().await.expect("bind gateway");
    let handshake = ScriptedHandshake::accepting(gateway.endpoint());
    let (dispatcher, mut delivered) = forwarding_dispatcher(None);
    let client = WsClient::builder("app", "secret")
        .handshake(handshake.clone())
        .dispatcher(dispatcher)
        .reconnect_policy(fast_policy(0))
        .build()
        .expect("client builds")
        .spawn();

    gateway.accept().await.close().await;
    let mut second = gateway.accept().await;
    second.send_frame(&event_frame("again", &json!({"n": 1}))).await;
    let (_, ctx) = next_event(&mut delivered).await;

    assert_eq!(ctx.connection_id, 2);
    assert_eq!(handshake.calls(), 2);
    client.shutdown();
    assert_eq!(stop_reason(client).await, StopReason::Shutdown);
}

#[tokio::test]
async fn disabled_auto_reconnect_stops_after_the_first_drop() {
    let mut gateway = MockGateway::start().await.expect("bind gateway");
    let handshake = ScriptedHandshake::accepting(gateway.endpoint());
    let client = client(handshake.clone(), -1, false);

    gateway.accept().await.close().await;

    assert_eq!(stop_reason(client).await, StopReason::Disconnected);
    assert_eq!(handshake.calls(), 1);
}

#[rstest]
#[case::forbidden(codes::FORBIDDEN)]
#[case::auth_failed(codes::AUTH_FAILED)]
#[tokio::test]
async fn fatal_rejection_stops_the_client(#[case] code: i64) {
    let handshake = ScriptedHandshake::new(
        [],
        Step::Reject {
            code,
            msg: "denied".into(),
        },
    );
    let client = client(handshake.clone(), -1, true);

    assert_eq!(
        stop_reason(client).await,
        StopReason::Rejected {
            code,
            message: "denied".into()
        }
    );
    assert_eq!(handshake.calls(), 1);
}

#[tokio::test]
async fn transient_initial_failures_are_retried() {
    let mut gateway = MockGateway::start().await.expect("bind gateway");
    let handshake = ScriptedHandshake::new(
        [
            Step::Reject {
                code: codes::SYSTEM_BUSY,
                msg: "busy".into(),
            },
            Step::Reject {
                code: codes::EXCEED_CONN_LIMIT,
                msg: "too many".into(),
            },
            Step::Unavailable,
        ],
        Step::Accept(gateway.endpoint()),
    );
    // A bounded policy does not cap the initial connection.
    let client = client(handshake.clone(), 1, true);

    let _conn = gateway.accept().await;
    assert_eq!(handshake.calls(), 4);

    client.shutdown();
    assert_eq!(stop_reason(client).await, StopReason::Shutdown);
}

#[tokio::test]
async fn unreachable_socket_counts_as_a_failed_attempt() {
    let gateway = MockGateway::start().await.expect("bind gateway");
    let mut live = MockGateway::start().await.expect("bind second gateway");
    let dead = gateway.endpoint();
    drop(gateway);

    let handshake = ScriptedHandshake::new(
        [Step::Accept(live.endpoint()), Step::Accept(dead)],
        Step::Unavailable,
    );
    let client = client(handshake.clone(), 1, true);

    live.accept().await.close().await;

    assert_eq!(
        stop_reason(client).await,
        StopReason::ReconnectExhausted { attempts: 1 }
    );
    assert_eq!(handshake.calls(), 2);
}

#[tokio::test]
async fn stalled_upgrade_times_out_as_a_failed_attempt() {
    let mut live = MockGateway::start().await.expect("bind gateway");
    let stalled = StalledGateway::start().await.expect("bind stalled listener");
    let handshake = ScriptedHandshake::new([Step::Accept(live.endpoint())], Step::Accept(stalled.endpoint()));
    let (dispatcher, _delivered) = forwarding_dispatcher(None);
    let client = WsClient::builder("app", "secret")
        .handshake(handshake.clone())
        .dispatcher(dispatcher)
        .reconnect_policy(fast_policy(2))
        .connect_timeout(Duration::from_millis(200))
        .build()
        .expect("client builds")
        .spawn();

    live.accept().await.close().await;

    assert_eq!(
        stop_reason(client).await,
        StopReason::ReconnectExhausted { attempts: 2 }
    );
    assert_eq!(handshake.calls(), 3);
    assert_eq!(stalled.accepted(), 2);
}
