//! Heartbeat loop for one connection.

use log::debug;
use tokio::{select, time::sleep};

use crate::{
    config::{SharedConfig, SocketHandle},
    frame::Frame,
};

/// Send `type=ping` control frames on `socket` until its token is cancelled.
///
/// The first ping goes out immediately. The interval and service id are
/// re-read from `config` before every wait, so a renegotiated interval takes
/// effect from the next tick without restarting the loop.
pub(crate) async fn heartbeat_loop(config: SharedConfig, socket: SocketHandle) {
    let token = socket.token().clone();
    loop {
        let (service_id, interval) = {
            let cfg = config.lock();
            let runtime = cfg.runtime();
            (runtime.service_id().unwrap_or_default(), runtime.ping_interval())
        };

        if socket.send(Frame::ping(service_id)).await.is_err() {
            debug!("heartbeat stopped: connection_id={}, reason=socket closed", socket.id());
            return;
        }

        select! {
            biased;

            () = token.cancelled() => {
                debug!("heartbeat stopped: connection_id={}, reason=cancelled", socket.id());
                return;
            }
            () = sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::{fixture, rstest};
    use tokio::{
        sync::mpsc,
        time::{Instant, advance},
    };
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        config::{ClientIdentity, ConnectionConfig, Domain, RuntimeParams, RuntimeUpdate},
        frame::{FrameMethod, MessageType},
    };

    #[fixture]
    fn config() -> SharedConfig {
        let identity = ClientIdentity::new("app", "secret", Domain::Lark).expect("identity");
        let shared = SharedConfig::new(ConnectionConfig::new(identity, RuntimeParams::default(), true));
        shared.update_runtime(RuntimeUpdate {
            service_id: Some(17),
            ping_interval: Some(Duration::from_secs(10)),
            ..RuntimeUpdate::default()
        });
        shared
    }

    fn socket() -> (SocketHandle, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(16);
        (SocketHandle::new(1, tx, CancellationToken::new()), rx)
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn pings_immediately_then_every_interval(config: SharedConfig) {
        let (socket, mut rx) = socket();
        let task = tokio::spawn(heartbeat_loop(config, socket.clone()));
        let start = Instant::now();

        let first = rx.recv().await.expect("first ping");
        assert_eq!(first.method(), Some(FrameMethod::Control));
        assert_eq!(first.message_type(), Some(MessageType::Ping));
        assert_eq!(first.service(), 17);
        assert!(first.payload().is_empty());
        assert_eq!(start.elapsed(), Duration::ZERO);

        rx.recv().await.expect("second ping");
        assert_eq!(start.elapsed(), Duration::from_secs(10));

        socket.close();
        task.await.expect("heartbeat joins");
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn renegotiated_interval_applies_without_restart(config: SharedConfig) {
        let (socket, mut rx) = socket();
        let task = tokio::spawn(heartbeat_loop(config.clone(), socket.clone()));

        rx.recv().await.expect("first ping");
        advance(Duration::from_secs(1)).await;
        config.update_runtime(RuntimeUpdate {
            ping_interval: Some(Duration::from_secs(3)),
            ..RuntimeUpdate::default()
        });

        // The wait already in progress keeps its original length.
        rx.recv().await.expect("second ping");
        let second = Instant::now();

        rx.recv().await.expect("third ping");
        assert_eq!(second.elapsed(), Duration::from_secs(3));

        socket.close();
        task.await.expect("heartbeat joins");
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_loop(config: SharedConfig) {
        let (socket, mut rx) = socket();
        let task = tokio::spawn(heartbeat_loop(config, socket.clone()));
        rx.recv().await.expect("first ping");

        socket.close();
        task.await.expect("heartbeat joins");

        advance(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err(), "no ping after cancellation");
    }
}
