//! WebSocket server.
//!
//! Listens on a TCP port, performs the opening handshake on every accepted
//! socket, and runs each upgraded connection on its own task until it
//! closes or the server shuts down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use wsline_protocol::constants::{
    WS_HANDSHAKE_WAIT, WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD, WS_PONG_WAIT, WS_READ_BUFFER_SIZE,
    WS_WRITE_WAIT,
};
use wsline_protocol::handshake::{self, HandshakeRequest};
use wsline_protocol::{CloseCode, MessageKind, frame};

use crate::ServerError;
use crate::connection::{self, Connection, ConnectionId};
use crate::handler::Callbacks;
use crate::registry::ConnectionRegistry;

/// Pause after a failed `accept()` so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Default number of frames queued per connection before sends are dropped.
pub const SEND_BUFFER_SIZE: usize = 256;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// Time between heartbeat pings.
    pub heartbeat_interval: Duration,
    /// A connection with no incoming data for this long is closed.
    /// Must exceed `heartbeat_interval`.
    pub pong_wait: Duration,
    /// Size of a single socket read.
    pub read_buffer_size: usize,
    /// Largest accepted frame payload.
    pub max_message_size: usize,
    /// Outgoing frames queued per connection.
    pub send_buffer: usize,
    pub write_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            heartbeat_interval: WS_PING_PERIOD,
            pong_wait: WS_PONG_WAIT,
            read_buffer_size: WS_READ_BUFFER_SIZE,
            max_message_size: WS_MAX_MESSAGE_SIZE,
            send_buffer: SEND_BUFFER_SIZE,
            write_timeout: WS_WRITE_WAIT,
            handshake_timeout: WS_HANDSHAKE_WAIT,
        }
    }
}

impl ServerConfig {
    /// Rejects settings the connection tasks cannot run with.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ServerError::InvalidConfig("heartbeat_interval must be non-zero"));
        }
        if self.pong_wait <= self.heartbeat_interval {
            return Err(ServerError::InvalidConfig(
                "pong_wait must exceed heartbeat_interval",
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(ServerError::InvalidConfig("read_buffer_size must be non-zero"));
        }
        if self.send_buffer == 0 {
            return Err(ServerError::InvalidConfig("send_buffer must be non-zero"));
        }
        Ok(())
    }
}

/// State shared between the server and its connection tasks.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) callbacks: Callbacks,
    pub(crate) registry: ConnectionRegistry,
}

/// The WebSocket server.
///
/// Dispatches connection events to the [`Callbacks`] it was created with.
pub struct Server {
    config: ServerConfig,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Server {
    pub fn new(config: ServerConfig, callbacks: Callbacks) -> Arc<Self> {
        Arc::new(Self {
            config,
            shared: Arc::new(Shared {
                callbacks,
                registry: ConnectionRegistry::new(),
            }),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            local_addr: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Snapshot of the live connections.
    pub fn connections(&self) -> Vec<Connection> {
        self.shared.registry.snapshot()
    }

    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Connection> {
        self.shared.registry.get(id)
    }

    /// Queues a text message to every open connection.
    ///
    /// Returns the number of connections the message was queued to.
    pub fn broadcast_text(&self, text: &str) -> usize {
        self.broadcast(frame::encode(text.as_bytes(), MessageKind::Text))
    }

    /// Queues a binary message to every open connection.
    pub fn broadcast_binary(&self, data: &[u8]) -> usize {
        self.broadcast(frame::encode(data, MessageKind::Binary))
    }

    fn broadcast(&self, bytes: Vec<u8>) -> usize {
        self.shared
            .registry
            .snapshot()
            .iter()
            .filter(|conn| conn.send_frame(bytes.clone()).is_ok())
            .count()
    }

    /// Gracefully shuts down the server.
    ///
    /// Every live connection is closed with GoingAway and the accept loop
    /// stops; [`run`](Self::run) returns once connection tasks have drained.
    pub fn shutdown(&self) {
        for conn in self.shared.registry.snapshot() {
            conn.close_with(CloseCode::GoingAway, "server shutting down");
        }
        self.cancel.cancel();
    }

    /// Runs the server until [`shutdown`](Self::shutdown).
    ///
    /// Only a configuration or bind failure is returned; errors on individual
    /// sockets are logged and end that socket alone.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        self.config.validate()?;

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(addr.as_str())
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("WebSocket server listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("server shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            self.tasks.spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::warn!(peer = %peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
            }
        }

        drop(listener);
        self.tasks.close();
        let drain = self.config.write_timeout + self.config.handshake_timeout;
        if tokio::time::timeout(drain, self.tasks.wait()).await.is_err() {
            tracing::warn!(
                remaining = self.tasks.len(),
                "connection tasks still running after shutdown"
            );
        }
        Ok(())
    }

    /// Upgrades one TCP connection and serves it until it closes.
    async fn handle_connection(
        self: Arc<Self>,
        mut stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let _ = stream.set_nodelay(true);

        let upgrade = tokio::time::timeout(
            self.config.handshake_timeout,
            read_request(&mut stream),
        )
        .await
        .unwrap_or(Err(ServerError::HandshakeTimeout));

        let (request, leftover) = match upgrade {
            Ok(upgrade) => upgrade,
            Err(e) => {
                if matches!(e, ServerError::Handshake(_)) {
                    let _ = tokio::time::timeout(
                        self.config.write_timeout,
                        stream.write_all(handshake::rejection_response()),
                    )
                    .await;
                }
                let _ = stream.shutdown().await;
                return Err(e);
            }
        };

        tokio::time::timeout(self.config.write_timeout, stream.write_all(&request.response()))
            .await
            .map_err(|_| ServerError::HandshakeTimeout)??;
        tracing::debug!(peer = %peer_addr, path = %request.path, "handshake complete");

        connection::serve(
            stream,
            peer_addr,
            leftover,
            &self.shared,
            &self.config,
            &self.cancel,
        )
        .await;
        Ok(())
    }
}

/// Reads until a complete opening request has arrived.
///
/// Returns the parsed request and any bytes that followed its head.
async fn read_request(
    stream: &mut TcpStream,
) -> Result<(HandshakeRequest, Vec<u8>), ServerError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ServerError::ConnectionClosed);
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(request) = handshake::parse_request(&buf)? {
            let leftover = buf.split_off(request.head_len);
            return Ok((request, leftover));
        }
    }
}
