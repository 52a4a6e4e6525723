//! In-process WebSocket gateway.

use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use pushwire::{
    Endpoint,
    Frame,
    MessageType,
    codec,
    handshake::ClientConfigPayload,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
    time::timeout,
};
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message};

use crate::frames::SERVICE_ID;

/// Device id embedded in [`MockGateway::url`].
pub const DEVICE_ID: &str = "dev-1";

/// How long [`MockGateway::accept`] and the frame readers wait.
const WAIT: Duration = Duration::from_secs(5);

/// WebSocket server on a loopback port that hands each accepted socket to
/// the test.
pub struct MockGateway {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    incoming: mpsc::UnboundedReceiver<GatewayConnection>,
    task: JoinHandle<()>,
}

impl MockGateway {
    /// Bind `127.0.0.1:0` and start accepting.
    ///
    /// # Errors
    ///
    /// Returns the bind error.
    pub async fn start() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let accepted = Arc::new(AtomicUsize::new(0));
        let (tx, incoming) = mpsc::unbounded_channel();

        let counter = Arc::clone(&accepted);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = accept_async(stream).await else {
                    continue;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                if tx.send(GatewayConnection { ws }).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            addr,
            accepted,
            incoming,
            task,
        })
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr { self.addr }

    /// Connect URL naming [`DEVICE_ID`] and [`SERVICE_ID`].
    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}/ws?device_id={DEVICE_ID}&service_id={SERVICE_ID}", self.addr)
    }

    /// Endpoint pointing at this gateway with default parameters.
    ///
    /// # Panics
    ///
    /// Never in practice: [`url`](Self::url) is always well formed.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint { self.endpoint_with(ClientConfigPayload::default()) }

    /// Endpoint pointing at this gateway carrying `client_config`.
    ///
    /// # Panics
    ///
    /// Never in practice: [`url`](Self::url) is always well formed.
    #[must_use]
    pub fn endpoint_with(&self, client_config: ClientConfigPayload) -> Endpoint {
        Endpoint::parse(self.url(), client_config).expect("gateway url is a valid endpoint")
    }

    /// Number of WebSocket connections accepted so far.
    #[must_use]
    pub fn accepted(&self) -> usize { self.accepted.load(Ordering::SeqCst) }

    /// Wait for the next client connection.
    ///
    /// # Panics
    ///
    /// Panics if no client connects within five seconds.
    pub async fn accept(&mut self) -> GatewayConnection {
        timeout(WAIT, self.incoming.recv())
            .await
            .expect("client connected in time")
            .expect("gateway accept loop running")
    }

    /// Stop accepting new connections. Established ones stay open.
    pub fn stop(&self) { self.task.abort(); }
}

impl Drop for MockGateway {
    fn drop(&mut self) { self.task.abort(); }
}

/// TCP listener that accepts sockets but never completes the WebSocket
/// upgrade, for exercising connect timeouts.
pub struct StalledGateway {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl StalledGateway {
    /// Bind `127.0.0.1:0` and start holding connections open.
    ///
    /// # Errors
    ///
    /// Returns the bind error.
    pub async fn start() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&accepted);
        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(stream);
            }
        });

        Ok(Self { addr, accepted, task })
    }

    /// Endpoint pointing at this listener.
    ///
    /// # Panics
    ///
    /// Never in practice: the URL is always well formed.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        let url = format!("ws://{}/ws?device_id={DEVICE_ID}&service_id={SERVICE_ID}", self.addr);
        Endpoint::parse(url, ClientConfigPayload::default()).expect("listener url is a valid endpoint")
    }

    /// Number of TCP connections accepted so far.
    #[must_use]
    pub fn accepted(&self) -> usize { self.accepted.load(Ordering::SeqCst) }
}

impl Drop for StalledGateway {
    fn drop(&mut self) { self.task.abort(); }
}

/// Gateway side of one client socket.
pub struct GatewayConnection {
    ws: WebSocketStream<TcpStream>,
}

impl GatewayConnection {
    /// Send `frame` as a binary message.
    ///
    /// # Panics
    ///
    /// Panics if the socket is gone.
    pub async fn send_frame(&mut self, frame: &Frame) {
        self.ws
            .send(Message::Binary(codec::encode(frame).into()))
            .await
            .expect("frame sent to client");
    }

    /// Send a raw message, for exercising malformed input.
    ///
    /// # Panics
    ///
    /// Panics if the socket is gone.
    pub async fn send_raw(&mut self, message: Message) {
        self.ws.send(message).await.expect("message sent to client");
    }

    /// Next frame from the client, or `None` once the socket closes.
    ///
    /// # Panics
    ///
    /// Panics if nothing arrives within five seconds or a binary message
    /// does not decode.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let message = timeout(WAIT, self.ws.next())
                .await
                .expect("client frame arrived in time");
            match message {
                Some(Ok(Message::Binary(data))) => {
                    return Some(codec::decode(&data).expect("client frame decodes"));
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => return None,
                Some(Ok(_)) => {}
            }
        }
    }

    /// Next frame that is not a heartbeat ping.
    pub async fn next_non_ping(&mut self) -> Option<Frame> {
        loop {
            let frame = self.next_frame().await?;
            if frame.message_type() != Some(MessageType::Ping) {
                return Some(frame);
            }
        }
    }

    /// Close the socket with a close handshake.
    pub async fn close(mut self) {
        // The client may already be gone; either way the socket is done.
        let _ = self.ws.close(None).await;
    }
}
