//! Connection handle and lifecycle: Open → Closing → Closed.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use wsline_protocol::frame;
use wsline_protocol::{CloseCode, MessageKind, OpCode};

use crate::pumps::{ReadLimits, ping_pump, read_pump, write_pump};
use crate::server::{ServerConfig, Shared};

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// Unique identity of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake complete, pumps running.
    Open,
    /// Close requested or detected, teardown in progress.
    Closing,
    /// Socket closed, disconnect callback fired, removed from the registry.
    Closed,
}

/// Error returned when a frame cannot be queued for sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("send failed: connection closed")]
    Closed,

    #[error("send failed: send buffer full")]
    BufferFull,
}

/// Handle to one established WebSocket session.
///
/// Cloneable and cheap. All operations are synchronous and may be called
/// from inside callbacks: frames are queued and written by the
/// connection's write pump, so a slow peer never blocks the caller.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    id: ConnectionId,
    peer_addr: SocketAddr,
    tx: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
    state: AtomicU8,
    started: Instant,
    /// Nanoseconds since `started` at which the last ping was queued, plus one.
    /// Zero means no ping is outstanding.
    last_ping: AtomicU64,
    latency_nanos: AtomicU64,
    /// Non-owning back-reference for callback lookup and registry removal.
    shared: Weak<Shared>,
}

impl Connection {
    pub(crate) fn new(
        peer_addr: SocketAddr,
        tx: mpsc::Sender<Vec<u8>>,
        cancel: CancellationToken,
        shared: Weak<Shared>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: ConnectionId::new(),
                peer_addr,
                tx,
                cancel,
                state: AtomicU8::new(OPEN),
                started: Instant::now(),
                last_ping: AtomicU64::new(0),
                latency_nanos: AtomicU64::new(0),
                shared,
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// Last measured ping → pong round trip. Zero until the first pong.
    pub fn latency(&self) -> Duration {
        Duration::from_nanos(self.inner.latency_nanos.load(Ordering::Acquire))
    }

    pub fn state(&self) -> ConnectionState {
        match self.inner.state.load(Ordering::Acquire) {
            OPEN => ConnectionState::Open,
            CLOSING => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == OPEN
    }

    /// Queues a text message.
    pub fn send_text(&self, text: &str) -> Result<(), SendError> {
        self.send_frame(frame::encode(text.as_bytes(), MessageKind::Text))
    }

    /// Queues a binary message.
    pub fn send_binary(&self, data: &[u8]) -> Result<(), SendError> {
        self.send_frame(frame::encode(data, MessageKind::Binary))
    }

    /// Queues an empty ping and records its send time for latency measurement.
    ///
    /// A ping sent while another is unanswered replaces it. A ping that
    /// could not be queued leaves the outstanding one in place.
    pub fn send_ping(&self) -> Result<(), SendError> {
        // Stamp before queueing so the pong can never observe an older ping.
        let sent = self.elapsed_nanos().saturating_add(1);
        let prev = self.inner.last_ping.swap(sent, Ordering::AcqRel);
        let result = self.send_frame(frame::encode_frame(OpCode::Ping, &[]));
        if result.is_err() {
            // Only undo our own stamp; a pong may have consumed it meanwhile.
            let _ = self.inner.last_ping.compare_exchange(
                sent,
                prev,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        result
    }

    /// Closes the connection with a normal closure status.
    ///
    /// Idempotent: only the first close (of any kind) sends a Close frame.
    pub fn close(&self) {
        self.close_with(CloseCode::NormalClosure, "");
    }

    /// Closes the connection with the given status code and reason.
    pub fn close_with(&self, code: CloseCode, reason: &str) {
        let code = code.is_sendable().then_some(code);
        self.close_sending(frame::encode_close(code, reason));
    }

    /// Answers a peer's Close frame, echoing its status code when it sent one.
    pub(crate) fn acknowledge_close(&self, code: Option<CloseCode>) {
        let code = code.filter(|c| c.is_sendable());
        self.close_sending(frame::encode_close(code, ""));
    }

    /// Moves to Closing without a Close frame (socket already unusable).
    pub(crate) fn abort(&self) {
        self.begin_closing();
        self.inner.cancel.cancel();
    }

    fn close_sending(&self, close_frame: Vec<u8>) {
        if self.begin_closing() && self.inner.tx.try_send(close_frame).is_err() {
            tracing::debug!(conn = %self.id(), "close frame not queued, dropping socket");
        }
        self.inner.cancel.cancel();
    }

    fn begin_closing(&self) -> bool {
        self.inner
            .state
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Queues an encoded frame while the connection is open.
    pub(crate) fn send_frame(&self, bytes: Vec<u8>) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }
        self.inner.tx.try_send(bytes).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                tracing::warn!(conn = %self.id(), "send buffer full, dropping frame");
                SendError::BufferFull
            }
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Consumes the outstanding ping timestamp and updates the latency.
    ///
    /// Returns `None` for an unsolicited pong; the latency is left unchanged.
    pub(crate) fn record_pong(&self) -> Option<Duration> {
        let sent = self.inner.last_ping.swap(0, Ordering::AcqRel);
        if sent == 0 {
            return None;
        }
        let rtt = self.elapsed_nanos().saturating_sub(sent - 1);
        self.inner.latency_nanos.store(rtt, Ordering::Release);
        Some(Duration::from_nanos(rtt))
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub(crate) fn shared(&self) -> Option<Arc<Shared>> {
        self.inner.shared.upgrade()
    }

    /// Final transition to Closed. Runs its effects at most once.
    pub(crate) fn finish(&self) {
        if self.inner.state.swap(CLOSED, Ordering::AcqRel) == CLOSED {
            return;
        }
        if let Some(shared) = self.shared() {
            shared.registry.remove(self.id());
            shared.callbacks.fire_disconnected(self);
        }
        tracing::info!(conn = %self.id(), peer = %self.peer_addr(), "connection closed");
    }

    fn elapsed_nanos(&self) -> u64 {
        u64::try_from(self.inner.started.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("peer_addr", &self.peer_addr())
            .field("state", &self.state())
            .field("latency", &self.latency())
            .finish()
    }
}

/// Runs an upgraded connection until it is closed.
///
/// Registers it, fires the connected callback, spawns the write and ping
/// pumps, and runs the read pump on the calling task. Once the read pump
/// returns, waits for the other pumps and performs the Closed transition.
pub(crate) async fn serve<S>(
    stream: S,
    peer_addr: SocketAddr,
    buffered: Vec<u8>,
    shared: &Arc<Shared>,
    config: &ServerConfig,
    server_cancel: &CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Vec<u8>>(config.send_buffer);
    let cancel = server_cancel.child_token();
    let conn = Connection::new(peer_addr, tx, cancel.clone(), Arc::downgrade(shared));
    let (reader, writer) = tokio::io::split(stream);

    shared.registry.insert(conn.clone());
    tracing::info!(conn = %conn.id(), peer = %peer_addr, "connection established");
    shared.callbacks.fire_connected(&conn);

    let write = tokio::spawn(write_pump(writer, rx, cancel.clone(), config.write_timeout));
    let ping = tokio::spawn(ping_pump(conn.clone(), config.heartbeat_interval, cancel));

    let limits = ReadLimits::from(config);
    read_pump(reader, buffered, &conn, &limits).await;

    // When the read pump exits, stop the other pumps too.
    conn.abort();
    let _ = ping.await;
    let _ = write.await;
    conn.finish();
}
