//! Read pump: cuts frames out of the socket stream and dispatches them.

use std::ops::ControlFlow;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use wsline_protocol::constants::MAX_CONTROL_PAYLOAD;
use wsline_protocol::frame::{self, Frame, FrameError, FrameHeader};
use wsline_protocol::{CloseCode, OpCode};

use crate::connection::Connection;
use crate::server::ServerConfig;

/// Read-side limits taken from the server configuration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReadLimits {
    pub read_buffer_size: usize,
    pub max_message_size: usize,
    pub pong_wait: Duration,
}

impl From<&ServerConfig> for ReadLimits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            read_buffer_size: config.read_buffer_size,
            max_message_size: config.max_message_size,
            pong_wait: config.pong_wait,
        }
    }
}

/// Reads from the socket until the connection closes.
///
/// `buffered` holds bytes that arrived together with the handshake. Any
/// incoming data resets the idle deadline; if nothing arrives within
/// `pong_wait` the peer is considered dead.
pub(crate) async fn read_pump<R>(
    mut reader: R,
    buffered: Vec<u8>,
    conn: &Connection,
    limits: &ReadLimits,
) where
    R: AsyncRead + Unpin,
{
    let cancel = conn.cancel_token().clone();
    let mut buf = buffered;
    let mut scratch = vec![0u8; limits.read_buffer_size];

    let idle_deadline = tokio::time::sleep(limits.pong_wait);
    tokio::pin!(idle_deadline);

    loop {
        if drain_frames(&mut buf, conn, limits).is_break() {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut idle_deadline => {
                warn!(conn = %conn.id(), "no data within {:?}, closing", limits.pong_wait);
                conn.close_with(CloseCode::GoingAway, "idle timeout");
                break;
            }

            read = reader.read(&mut scratch) => {
                match read {
                    Ok(0) => {
                        debug!(conn = %conn.id(), "peer closed the stream");
                        break;
                    }
                    Ok(n) => {
                        idle_deadline.as_mut().reset(Instant::now() + limits.pong_wait);
                        buf.extend_from_slice(&scratch[..n]);
                    }
                    Err(e) => {
                        warn!(conn = %conn.id(), "WebSocket read error: {e}");
                        break;
                    }
                }
            }
        }
    }
}

/// Dispatches every complete frame at the front of `buf` and drops the
/// consumed bytes. Breaks once the connection must stop reading.
fn drain_frames(buf: &mut Vec<u8>, conn: &Connection, limits: &ReadLimits) -> ControlFlow<()> {
    let mut consumed = 0;

    let flow = loop {
        if !conn.is_open() {
            break ControlFlow::Break(());
        }

        let pending = &buf[consumed..];
        let header = match frame::parse_header(pending) {
            Ok(header) => header,
            Err(FrameError::FrameTooShort) => break ControlFlow::Continue(()),
            Err(e) => {
                warn!(conn = %conn.id(), "malformed frame header: {e}");
                conn.close_with(CloseCode::ProtocolError, "malformed frame header");
                break ControlFlow::Break(());
            }
        };

        if let Err(reason) = check_client_header(&header) {
            warn!(conn = %conn.id(), "protocol violation: {reason}");
            conn.close_with(CloseCode::ProtocolError, reason);
            break ControlFlow::Break(());
        }

        if header.payload_len > limits.max_message_size as u64 {
            warn!(
                conn = %conn.id(),
                "message exceeds max size ({} > {})",
                header.payload_len,
                limits.max_message_size
            );
            conn.close_with(CloseCode::MessageTooBig, "message too big");
            break ControlFlow::Break(());
        }

        // Bounded by max_message_size, so it fits in usize.
        let frame_len = header.frame_len() as usize;
        if pending.len() < frame_len {
            break ControlFlow::Continue(());
        }

        let decoded = frame::decode(&pending[..frame_len]);
        consumed += frame_len;

        match decoded {
            Ok(frame) => {
                if dispatch(frame, conn).is_break() {
                    break ControlFlow::Break(());
                }
            }
            Err(e) => warn!(conn = %conn.id(), "discarding frame: {e}"),
        }
    };

    buf.drain(..consumed);
    flow
}

/// Header rules every client frame must satisfy (RFC 6455 §5.1, §5.5).
fn check_client_header(header: &FrameHeader) -> Result<(), &'static str> {
    if !header.masked {
        return Err("client frames must be masked");
    }
    if OpCode::from_nibble(header.opcode).is_some_and(OpCode::is_control) {
        if !header.fin {
            return Err("fragmented control frame");
        }
        if header.payload_len > MAX_CONTROL_PAYLOAD as u64 {
            return Err("control frame payload too long");
        }
    }
    Ok(())
}

/// Routes one frame by opcode.
fn dispatch(frame: Frame, conn: &Connection) -> ControlFlow<()> {
    if !frame.fin {
        return reject_fragment(conn);
    }

    match frame.opcode {
        OpCode::Continuation => return reject_fragment(conn),
        OpCode::Close => {
            let code = frame::close_code(&frame.payload);
            debug!(conn = %conn.id(), ?code, "received close frame");
            conn.acknowledge_close(code);
            return ControlFlow::Break(());
        }
        OpCode::Text => match String::from_utf8(frame.payload) {
            Ok(text) => {
                if let Some(shared) = conn.shared() {
                    shared.callbacks.fire_text(conn, &text);
                }
            }
            Err(e) => warn!(conn = %conn.id(), "invalid UTF-8 in text frame: {e}"),
        },
        OpCode::Binary => {
            if let Some(shared) = conn.shared() {
                shared.callbacks.fire_binary(conn, &frame.payload);
            }
        }
        OpCode::Ping => {
            trace!(conn = %conn.id(), "received ping, sending pong");
            let _ = conn.send_frame(frame::encode_frame(OpCode::Pong, &frame.payload));
        }
        OpCode::Pong => {
            let rtt = conn.record_pong();
            trace!(conn = %conn.id(), ?rtt, "received pong");
            if let Some(shared) = conn.shared() {
                shared.callbacks.fire_pong(conn);
            }
        }
    }

    ControlFlow::Continue(())
}

fn reject_fragment(conn: &Connection) -> ControlFlow<()> {
    warn!(conn = %conn.id(), "fragmented messages are not supported");
    conn.close_with(CloseCode::UnsupportedData, "fragmented messages are not supported");
    ControlFlow::Break(())
}
