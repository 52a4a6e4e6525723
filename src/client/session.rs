//! One live WebSocket connection.
//!
//! [`Session::open`] is the only place a socket handle is installed. The
//! session owns the read half of the socket and two helper tasks bound to a
//! per-connection cancellation token: the writer, which is the sole owner of
//! the write half, and the heartbeat loop. [`Session::run`] is the receive
//! loop; when it returns the token is cancelled and both helpers are joined
//! before the caller may open another connection.

use futures::{SinkExt, StreamExt, stream::SplitStream};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::{
    net::TcpStream,
    select,
    sync::mpsc,
    task::JoinHandle,
    time::{Duration, timeout},
};
use tokio_tungstenite::{
    MaybeTlsStream,
    WebSocketStream,
    connect_async,
    tungstenite::{self, Message},
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{heartbeat::heartbeat_loop, inbound::Inbound};
use crate::{
    codec::{self, CodecError},
    config::{SharedConfig, SocketHandle},
    dispatch::EventDispatcher,
    frame::Frame,
    metrics::{self, Direction},
    reassembly::ChunkCache,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capacity of the queue between frame producers and the writer task.
const OUTBOUND_CAPACITY: usize = 64;
/// Default upper bound on opening the socket, TCP through WebSocket upgrade.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opening the socket failed.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// No handshake has stored a connect URL yet.
    #[error("no connect url negotiated")]
    NoUrl,
    /// The WebSocket could not be opened.
    #[error("websocket connect failed: {0}")]
    WebSocket(#[from] tungstenite::Error),
    /// The upgrade did not complete in time.
    #[error("websocket connect timed out after {0:?}")]
    Timeout(Duration),
}

/// Why a session's receive loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    /// The client is shutting down.
    Shutdown,
    /// The peer closed the socket, the stream ended, or it failed.
    Disconnected,
}

pub(crate) struct Session {
    socket: SocketHandle,
    inbound: SplitStream<WsStream>,
    writer: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

impl Session {
    /// Open a socket to the stored connect URL and start its helper tasks.
    pub(crate) async fn open(
        config: &SharedConfig,
        connection_id: u64,
        connect_timeout: Duration,
        shutdown: &CancellationToken,
    ) -> Result<Self, ConnectError> {
        let url = config
            .runtime()
            .connect_url()
            .map(str::to_owned)
            .ok_or(ConnectError::NoUrl)?;

        let (ws, _response) = timeout(connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| ConnectError::Timeout(connect_timeout))??;
        let (sink, inbound) = ws.split();

        let token = shutdown.child_token();
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let socket = SocketHandle::new(connection_id, tx, token.clone());
        config.lock().install_socket(socket.clone());

        let writer = tokio::spawn(write_loop(sink, rx, token));
        let heartbeat = tokio::spawn(heartbeat_loop(config.clone(), socket.clone()));
        metrics::inc_connections();
        info!("connected: connection_id={connection_id}");

        Ok(Self {
            socket,
            inbound,
            writer,
            heartbeat,
        })
    }

    /// Receive frames until the socket closes or `shutdown` fires, then tear
    /// the connection down.
    pub(crate) async fn run(
        mut self,
        config: &SharedConfig,
        cache: &ChunkCache,
        dispatcher: &dyn EventDispatcher,
        shutdown: &CancellationToken,
    ) -> SessionEnd {
        let span = tracing::info_span!(
            "ws.session",
            connection.id = self.socket.id(),
            device.id = config.runtime().device_id().unwrap_or_default()
        );
        let end = self
            .receive(config, cache, dispatcher, shutdown)
            .instrument(span)
            .await;
        self.teardown(config).await;
        end
    }

    async fn receive(
        &mut self,
        config: &SharedConfig,
        cache: &ChunkCache,
        dispatcher: &dyn EventDispatcher,
        shutdown: &CancellationToken,
    ) -> SessionEnd {
        let inbound = Inbound {
            config,
            cache,
            dispatcher,
            socket: &self.socket,
        };
        let token = self.socket.token().clone();

        loop {
            let message = select! {
                biased;

                () = shutdown.cancelled() => return SessionEnd::Shutdown,
                () = token.cancelled() => {
                    info!("connection torn down: connection_id={}", self.socket.id());
                    return SessionEnd::Disconnected;
                }
                message = self.inbound.next() => message,
            };

            match message {
                Some(Ok(Message::Binary(data))) => match codec::decode(&data) {
                    Ok(frame) => inbound.handle(frame).await,
                    Err(e) => warn!("dropping undecodable frame: error={e}, bytes={}", data.len()),
                },
                Some(Ok(Message::Text(text))) => {
                    let e = CodecError::UnexpectedText { len: text.len() };
                    warn!("dropping frame: error={e}");
                }
                Some(Ok(Message::Close(close))) => {
                    info!("socket closed by gateway: connection_id={}, frame={close:?}", self.socket.id());
                    return SessionEnd::Disconnected;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("socket error: connection_id={}, error={e}", self.socket.id());
                    return SessionEnd::Disconnected;
                }
                None => {
                    info!("socket stream ended: connection_id={}", self.socket.id());
                    return SessionEnd::Disconnected;
                }
            }
        }
    }

    async fn teardown(self, config: &SharedConfig) {
        let Self {
            socket,
            inbound,
            writer,
            heartbeat,
        } = self;
        socket.close();
        config.lock().clear_socket(socket.id());
        drop(inbound);

        for (name, task) in [("writer", writer), ("heartbeat", heartbeat)] {
            if let Err(e) = task.await {
                warn!("{name} task failed: connection_id={}, error={e}", socket.id());
            }
        }
        metrics::dec_connections();
        debug!("connection released: connection_id={}", socket.id());
    }
}

/// Drain `rx` into the socket until `token` is cancelled or a write fails.
async fn write_loop(
    mut sink: futures::stream::SplitSink<WsStream, Message>,
    mut rx: mpsc::Receiver<Frame>,
    token: CancellationToken,
) {
    loop {
        let frame = select! {
            biased;

            () = token.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        if let Err(e) = sink.send(Message::Binary(codec::encode(&frame).into())).await {
            warn!("socket write failed: error={e}");
            token.cancel();
            return;
        }
        metrics::inc_frames(Direction::Outbound);
    }

    if let Err(e) = sink.close().await {
        debug!("socket close failed: error={e}");
    }
}
