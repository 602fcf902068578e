//! Server side of the WebSocket protocol over tokio.
//!
//! Accepts TCP connections, performs the opening handshake, and runs each
//! connection with its own read, write and heartbeat pumps. Events are
//! delivered to the closures registered in [`Callbacks`].

mod connection;
mod handler;
mod pumps;
mod registry;
mod server;

pub use connection::{Connection, ConnectionId, ConnectionState, SendError};
pub use handler::{BinaryCallback, Callbacks, ConnectionCallback, TextCallback};
pub use registry::ConnectionRegistry;
pub use server::{SEND_BUFFER_SIZE, Server, ServerConfig};

pub use wsline_protocol::{CloseCode, MessageKind, OpCode};

/// Errors produced by the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("handshake failed: {0}")]
    Handshake(#[from] wsline_protocol::HandshakeError),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
