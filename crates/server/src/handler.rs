//! Callback table for connection events.
//!
//! The embedding application registers plain closures; every slot is
//! optional and an empty slot is a no-op. Callbacks run synchronously on
//! the connection's own task, so a slow callback stalls that connection
//! only. Callbacks for different connections may run concurrently.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use wsline_protocol::CloseCode;

use crate::connection::Connection;

/// Callback receiving only the connection (connected, disconnected, pong).
pub type ConnectionCallback = Box<dyn Fn(&Connection) + Send + Sync>;

/// Callback receiving a text message.
pub type TextCallback = Box<dyn Fn(&Connection, &str) + Send + Sync>;

/// Callback receiving a binary message.
pub type BinaryCallback = Box<dyn Fn(&Connection, &[u8]) + Send + Sync>;

/// The five optional event callbacks of a server.
///
/// ```
/// use wsline_server::Callbacks;
///
/// let callbacks = Callbacks::new()
///     .on_text(|conn, text| {
///         let _ = conn.send_text(text);
///     })
///     .on_disconnected(|conn| println!("{} left", conn.id()));
/// # drop(callbacks);
/// ```
#[derive(Default)]
pub struct Callbacks {
    connected: Option<ConnectionCallback>,
    disconnected: Option<ConnectionCallback>,
    text: Option<TextCallback>,
    binary: Option<BinaryCallback>,
    pong: Option<ConnectionCallback>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once the handshake succeeded and the connection is registered.
    pub fn on_connected<F>(mut self, f: F) -> Self
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.connected = Some(Box::new(f));
        self
    }

    /// Called exactly once per connection, after it left the registry.
    pub fn on_disconnected<F>(mut self, f: F) -> Self
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.disconnected = Some(Box::new(f));
        self
    }

    /// Called for every complete text message.
    pub fn on_text<F>(mut self, f: F) -> Self
    where
        F: Fn(&Connection, &str) + Send + Sync + 'static,
    {
        self.text = Some(Box::new(f));
        self
    }

    /// Called for every complete binary message.
    pub fn on_binary<F>(mut self, f: F) -> Self
    where
        F: Fn(&Connection, &[u8]) + Send + Sync + 'static,
    {
        self.binary = Some(Box::new(f));
        self
    }

    /// Called for every pong, after the connection's latency was updated.
    pub fn on_pong<F>(mut self, f: F) -> Self
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.pong = Some(Box::new(f));
        self
    }

    pub(crate) fn fire_connected(&self, conn: &Connection) {
        if let Some(cb) = &self.connected {
            guard(conn, "on_connected", || cb(conn));
        }
    }

    pub(crate) fn fire_disconnected(&self, conn: &Connection) {
        if let Some(cb) = &self.disconnected {
            guard(conn, "on_disconnected", || cb(conn));
        }
    }

    pub(crate) fn fire_text(&self, conn: &Connection, text: &str) {
        if let Some(cb) = &self.text {
            guard(conn, "on_text", || cb(conn, text));
        }
    }

    pub(crate) fn fire_binary(&self, conn: &Connection, data: &[u8]) {
        if let Some(cb) = &self.binary {
            guard(conn, "on_binary", || cb(conn, data));
        }
    }

    pub(crate) fn fire_pong(&self, conn: &Connection) {
        if let Some(cb) = &self.pong {
            guard(conn, "on_pong", || cb(conn));
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("connected", &self.connected.is_some())
            .field("disconnected", &self.disconnected.is_some())
            .field("text", &self.text.is_some())
            .field("binary", &self.binary.is_some())
            .field("pong", &self.pong.is_some())
            .finish()
    }
}

/// Runs a user callback, confining a panic to its own connection.
fn guard(conn: &Connection, name: &'static str, f: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!(conn = %conn.id(), callback = name, "callback panicked, closing connection");
        conn.close_with(CloseCode::InternalServerErr, "internal error");
    }
}
