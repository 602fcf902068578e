//! Heartbeat pump: periodic pings for liveness and latency measurement.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::connection::{Connection, SendError};

/// Pings the peer every `period` until cancelled or the connection closes.
pub(crate) async fn ping_pump(conn: Connection, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                match conn.send_ping() {
                    Ok(()) => trace!(conn = %conn.id(), "sent ping"),
                    // A full queue is transient; the next tick tries again.
                    Err(SendError::BufferFull) => {}
                    Err(SendError::Closed) => break,
                }
            }
        }
    }
}
