//! Write pump: serialises queued frames onto the socket.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Writes queued frames in order until cancelled, then shuts the socket down.
///
/// A failed or timed-out write cancels the connection. Frames queued before
/// cancellation (typically the Close frame) are still flushed.
pub(crate) async fn write_pump<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
    write_wait: Duration,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;

            msg = rx.recv() => {
                match msg {
                    Some(bytes) => {
                        if let Err(e) = write_frame(&mut writer, &bytes, write_wait).await {
                            error!("WebSocket write error: {e}");
                            cancel.cancel();
                            return;
                        }
                    }
                    None => break,
                }
            }

            _ = cancel.cancelled() => break,
        }
    }

    while let Ok(bytes) = rx.try_recv() {
        if write_frame(&mut writer, &bytes, write_wait).await.is_err() {
            break;
        }
    }

    let _ = tokio::time::timeout(write_wait, writer.shutdown()).await;
}

async fn write_frame<W>(writer: &mut W, bytes: &[u8], write_wait: Duration) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match tokio::time::timeout(write_wait, writer.write_all(bytes)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out")),
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn writes_in_order_and_flushes_on_cancel() {
        let (client, server) = tokio::io::duplex(1024);
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        tx.send(vec![1, 2]).await.unwrap();
        tx.send(vec![3]).await.unwrap();
        tx.send(vec![0x88, 0x00]).await.unwrap();
        cancel.cancel();

        let handle = tokio::spawn(write_pump(
            server,
            rx,
            cancel.clone(),
            Duration::from_secs(1),
        ));

        let mut client = client;
        let mut received = Vec::new();
        // Reads to EOF: the pump shuts its side down when done.
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, vec![1, 2, 3, 0x88, 0x00]);

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stops_when_queue_closes() {
        let (mut client, server) = tokio::io::duplex(64);
        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(write_pump(
            server,
            rx,
            CancellationToken::new(),
            Duration::from_secs(1),
        ));

        tx.send(b"abc".to_vec()).await.unwrap();
        drop(tx);

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"abc");
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_peer_times_out_and_cancels() {
        // Tiny pipe that nobody reads from: the second write blocks forever.
        let (_client, server) = tokio::io::duplex(4);
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        tx.send(vec![0u8; 64]).await.unwrap();
        let handle = tokio::spawn(write_pump(
            server,
            rx,
            cancel.clone(),
            Duration::from_secs(10),
        ));

        tokio::time::timeout(Duration::from_secs(30), handle)
            .await
            .expect("write timeout should end the pump")
            .unwrap();
        assert!(cancel.is_cancelled());
    }
}
