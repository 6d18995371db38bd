//! WebSocket hub.
//!
//! Accepts browser connections on a single path, performs the hub
//! handshake and then forwards every broadcast frame to each client.
//! The set of connected clients lives here and nowhere else; the rest of
//! the system only ever talks to "all clients" through [`HubHandle`].

use crate::broadcast::{BroadcastError, Broadcaster};
use crate::protocol::{self, HandshakeRequest, HandshakeResponse, HubMessage};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use guestbook_core::{LiveRefreshSettings, DEFAULT_HUB_PATH};
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Errors that stop the hub itself.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address to listen on.
    pub addr: SocketAddr,

    /// Only upgrades on this path are accepted.
    pub path: String,

    /// Interval between server pings.
    pub keep_alive: Duration,

    /// Time a client gets to send its handshake.
    pub handshake_timeout: Duration,

    /// Frames buffered per client before it starts losing events.
    pub buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 5000)),
            path: DEFAULT_HUB_PATH.to_string(),
            keep_alive: Duration::from_secs(15),
            handshake_timeout: Duration::from_secs(15),
            buffer: 64,
        }
    }
}

impl HubConfig {
    pub fn from_settings(settings: &LiveRefreshSettings) -> Self {
        Self {
            addr: settings.listen,
            path: settings.hub_path.clone(),
            keep_alive: settings.keep_alive(),
            handshake_timeout: settings.handshake_timeout(),
            ..Self::default()
        }
    }
}

struct Shared {
    frames: broadcast::Sender<Arc<str>>,
    shutdown: watch::Sender<bool>,
    clients: AtomicUsize,
}

/// Cheap, cloneable handle for pushing events into the hub.
#[derive(Clone)]
pub struct HubHandle {
    shared: Arc<Shared>,
}

impl HubHandle {
    /// Number of clients that completed the handshake and are still connected.
    pub fn client_count(&self) -> usize {
        self.shared.clients.load(Ordering::SeqCst)
    }

    /// Whether the hub has been shut down.
    pub fn is_closed(&self) -> bool {
        *self.shared.shutdown.borrow()
    }

    /// Queues `message` for every connected client.
    ///
    /// Returns how many clients it was queued for. Zero clients is fine.
    pub fn send(&self, message: &HubMessage) -> Result<usize, BroadcastError> {
        if self.is_closed() {
            return Err(BroadcastError::Closed);
        }
        let frame: Arc<str> = Arc::from(message.encode()?);
        // An error only means nobody is subscribed right now.
        Ok(self.shared.frames.send(frame).unwrap_or(0))
    }
}

impl Broadcaster for HubHandle {
    fn broadcast_all(&self, event: &str) -> Result<(), BroadcastError> {
        let queued = self.send(&HubMessage::invocation(event))?;
        if queued == 0 {
            debug!("No clients connected, {} not delivered", event);
        } else {
            debug!("Queued {} for {} client(s)", event, queued);
        }
        Ok(())
    }
}

/// The real-time endpoint.
pub struct HubServer {
    listener: TcpListener,
    config: Arc<HubConfig>,
    handle: HubHandle,
}

impl HubServer {
    /// Binds the listener. Use port 0 to let the OS pick one.
    pub async fn bind(config: HubConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.addr,
                source,
            })?;

        let (frames, _) = broadcast::channel(config.buffer.max(1));
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            listener,
            config: Arc::new(config),
            handle: HubHandle {
                shared: Arc::new(Shared {
                    frames,
                    shutdown,
                    clients: AtomicUsize::new(0),
                }),
            },
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> HubHandle {
        self.handle.clone()
    }

    /// Serves clients forever.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Serves clients until `shutdown` completes, then asks every open
    /// connection to close.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        info!("Hub listening on ws://{}{}", addr, self.config.path);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let config = self.config.clone();
                        let shared = self.handle.shared.clone();
                        tokio::spawn(serve_connection(stream, peer, config, shared));
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
            }
        }

        self.handle.shared.shutdown.send_replace(true);
        info!("Hub stopped");
        Ok(())
    }
}

/// Decrements the client count however the connection ends.
struct ClientGuard(Arc<Shared>);

impl ClientGuard {
    fn register(shared: Arc<Shared>) -> Self {
        shared.clients.fetch_add(1, Ordering::SeqCst);
        Self(shared)
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.0.clients.fetch_sub(1, Ordering::SeqCst);
    }
}

enum HandshakeFailure {
    /// Client went away before saying anything useful.
    Closed,
    /// Client said something we can't accept.
    Rejected(String),
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<HubConfig>,
    shared: Arc<Shared>,
) {
    let id = Uuid::new_v4();
    let hub_path = config.path.as_str();

    let upgrade = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        if req.uri().path() == hub_path {
            Ok(resp)
        } else {
            let mut refusal = ErrorResponse::new(Some(format!("no hub at {}", req.uri().path())));
            *refusal.status_mut() = StatusCode::NOT_FOUND;
            Err(refusal)
        }
    })
    .await;

    let ws = match upgrade {
        Ok(ws) => ws,
        Err(e) => {
            debug!("Rejected connection from {}: {}", peer, e);
            return;
        }
    };
    let (mut sink, mut source) = ws.split();

    match timeout(config.handshake_timeout, read_handshake(&mut source)).await {
        Ok(Ok(request)) => debug!(
            "Client {} negotiated {} v{}",
            id, request.protocol, request.version
        ),
        Ok(Err(HandshakeFailure::Closed)) => {
            debug!("Client {} left before the handshake", id);
            return;
        }
        Ok(Err(HandshakeFailure::Rejected(reason))) => {
            warn!("Client {} handshake rejected: {}", id, reason);
            refuse(&mut sink, reason).await;
            return;
        }
        Err(_) => {
            warn!("Client {} did not complete the handshake in time", id);
            refuse(&mut sink, "handshake timed out".to_string()).await;
            return;
        }
    }

    // Subscribe before acknowledging, so nothing sent after the client
    // sees the acknowledgement can be missed.
    let mut frames = shared.frames.subscribe();
    let mut shutdown = shared.shutdown.subscribe();
    let _guard = ClientGuard::register(shared.clone());

    if send_text(&mut sink, HandshakeResponse::ok().encode())
        .await
        .is_err()
    {
        return;
    }
    info!("Client {} connected from {}", id, peer);

    if *shutdown.borrow_and_update() {
        close(&mut sink).await;
        return;
    }

    let period = config.keep_alive.max(Duration::from_millis(10));
    let mut keep_alive = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    if sink.send(Message::Text(frame.to_string())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Client {} missed {} notification(s)", id, missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if wants_close(&text) {
                        debug!("Client {} sent close", id);
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Client {} read error: {}", id, e);
                    break;
                }
            },
            _ = keep_alive.tick() => {
                if send_text(&mut sink, HubMessage::Ping.encode()).await.is_err() {
                    break;
                }
            }
            _ = shutdown.changed() => {
                close(&mut sink).await;
                break;
            }
        }
    }

    let _ = sink.close().await;
    info!("Client {} disconnected", id);
}

async fn read_handshake(source: &mut WsSource) -> Result<HandshakeRequest, HandshakeFailure> {
    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let frame = protocol::frames(&text)
                    .next()
                    .ok_or_else(|| HandshakeFailure::Rejected("empty handshake".to_string()))?;
                return HandshakeRequest::decode(frame)
                    .map_err(|e| HandshakeFailure::Rejected(e.to_string()));
            }
            Ok(Message::Binary(_)) => {
                return Err(HandshakeFailure::Rejected(
                    "binary frames are not supported".to_string(),
                ))
            }
            Ok(Message::Close(_)) | Err(_) => return Err(HandshakeFailure::Closed),
            Ok(_) => continue,
        }
    }
    Err(HandshakeFailure::Closed)
}

fn wants_close(payload: &str) -> bool {
    protocol::frames(payload).any(|frame| match HubMessage::decode(frame) {
        Ok(HubMessage::Close { .. }) => true,
        Ok(_) => false,
        Err(e) => {
            debug!("Ignoring malformed client frame: {}", e);
            false
        }
    })
}

async fn send_text(
    sink: &mut WsSink,
    frame: Result<String, serde_json::Error>,
) -> Result<(), ()> {
    let frame = frame.map_err(|e| warn!("Failed to encode frame: {}", e))?;
    sink.send(Message::Text(frame))
        .await
        .map_err(|e| debug!("Send failed: {}", e))
}

async fn refuse(sink: &mut WsSink, reason: String) {
    let _ = send_text(sink, HandshakeResponse::error(reason).encode()).await;
    let _ = sink.close().await;
}

async fn close(sink: &mut WsSink) {
    let _ = send_text(sink, HubMessage::Close { error: None }.encode()).await;
}
