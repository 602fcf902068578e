//! RFC 6455 wire protocol: frame codec, opening handshake, opcodes and close codes.
//!
//! Everything here is pure and free of I/O; `wsline-server` drives it over
//! tokio sockets.

pub mod constants;
pub mod frame;
pub mod handshake;

// Re-export primary types for convenience.
pub use constants::{CloseCode, MessageKind, OpCode};
pub use frame::{Frame, FrameError, FrameHeader};
pub use handshake::{HandshakeError, HandshakeRequest};
