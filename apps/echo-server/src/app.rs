//! Application orchestrator: runs the server with echo callbacks.

use std::sync::Arc;
use std::time::Duration;

use wsline_server::{Callbacks, Server};

use crate::config::Config;

/// Runs the echo server until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let server = Server::new(config.server_config(), echo_callbacks(config.log_messages));

    let server_run = Arc::clone(&server);
    let mut handle = tokio::spawn(async move { server_run.run().await });

    // Wait for the server to bind, or fail.
    let port = loop {
        if handle.is_finished() {
            handle.await??;
            anyhow::bail!("server stopped before binding");
        }
        let p = server.port().await;
        if p > 0 {
            break p;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    tracing::info!(port, "echo server ready");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
        }
        result = &mut handle => {
            result??;
            return Ok(());
        }
    }

    server.shutdown();
    handle.await??;
    Ok(())
}

/// Callbacks that send every message back to its sender.
fn echo_callbacks(log_messages: bool) -> Callbacks {
    Callbacks::new()
        .on_connected(|conn| {
            tracing::info!(conn = %conn.id(), peer = %conn.peer_addr(), "client connected");
        })
        .on_disconnected(|conn| {
            tracing::info!(conn = %conn.id(), latency = ?conn.latency(), "client disconnected");
        })
        .on_text(move |conn, text| {
            if log_messages {
                tracing::info!(conn = %conn.id(), len = text.len(), "text: {text}");
            } else {
                tracing::debug!(conn = %conn.id(), len = text.len(), "text message");
            }
            if let Err(e) = conn.send_text(text) {
                tracing::warn!(conn = %conn.id(), "echo failed: {e}");
            }
        })
        .on_binary(move |conn, data| {
            if log_messages {
                tracing::info!(conn = %conn.id(), len = data.len(), "binary message");
            }
            if let Err(e) = conn.send_binary(data) {
                tracing::warn!(conn = %conn.id(), "echo failed: {e}");
            }
        })
        .on_pong(|conn| {
            tracing::trace!(conn = %conn.id(), latency = ?conn.latency(), "pong");
        })
}
