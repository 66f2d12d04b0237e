//! Outbound write pump.
//!
//! Every session gets one writer task. Broadcasts, replies and share
//! payloads all queue through it, so two tasks can never interleave
//! bytes on the same stream. Writes go out in buffer-sized chunks with
//! a short pause after each, which keeps distinct messages from fusing
//! into one read on slow clients.

use bytes::Bytes;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::SessionError;

/// Outbound queue depth per session.
const OUTBOUND_QUEUE: usize = 64;

/// Sending half of a session's outbound queue.
#[derive(Clone)]
pub struct Outbound {
    tx: mpsc::Sender<Bytes>,
}

impl Outbound {
    pub(crate) fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }

    /// Queues raw bytes for the peer.
    pub async fn send(&self, data: Bytes) -> Result<(), SessionError> {
        self.tx
            .send(data)
            .await
            .map_err(|_| SessionError::Disconnected)
    }

    /// Queues a text message for the peer.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send(Bytes::from(text.into())).await
    }
}

/// Spawns the write pump for one session stream.
pub(crate) fn spawn_writer<W>(
    writer: W,
    chunk_size: usize,
    pause: Duration,
    cancel: CancellationToken,
) -> (Outbound, JoinHandle<()>)
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
    let handle = tokio::spawn(write_pump(writer, rx, chunk_size, pause, cancel));
    (Outbound::new(tx), handle)
}

async fn write_pump<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut rx: mpsc::Receiver<Bytes>,
    chunk_size: usize,
    pause: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // Flush what was queued before the shutdown notice so
                // final messages still reach the peer.
                while let Ok(data) = rx.try_recv() {
                    if write_chunked(&mut writer, &data, chunk_size, pause).await.is_err() {
                        break;
                    }
                }
                break;
            }
            item = rx.recv() => {
                let Some(data) = item else { break };
                if let Err(e) = write_chunked(&mut writer, &data, chunk_size, pause).await {
                    debug!("write pump stopping: {e}");
                    break;
                }
            }
        }
    }
    let _ = writer.shutdown().await;
}

/// Writes `data` in `chunk_size` pieces, flushing and pausing after
/// each so the peer sees the message promptly and the next one apart.
async fn write_chunked<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
    chunk_size: usize,
    pause: Duration,
) -> io::Result<()> {
    for chunk in data.chunks(chunk_size.max(1)) {
        writer.write_all(chunk).await?;
        writer.flush().await?;
        tokio::time::sleep(pause).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    const PAUSE: Duration = Duration::from_millis(1);

    #[tokio::test]
    async fn queued_messages_arrive_in_order() {
        let (mut client, server) = tokio::io::duplex(4096);
        let cancel = CancellationToken::new();
        let (outbound, handle) = spawn_writer(server, 65535, PAUSE, cancel.clone());

        outbound.send_text("first").await.unwrap();
        outbound.send_text("second").await.unwrap();
        drop(outbound);

        handle.await.unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"firstsecond");
    }

    #[tokio::test]
    async fn large_payloads_survive_chunking() {
        let (mut client, server) = tokio::io::duplex(256);
        let cancel = CancellationToken::new();
        let (outbound, handle) = spawn_writer(server, 64, PAUSE, cancel.clone());

        let payload: Vec<u8> = (0..=255u8).cycle().take(5000).collect();
        let expected = payload.clone();
        outbound.send(Bytes::from(payload)).await.unwrap();
        drop(outbound);

        let reader = tokio::spawn(async move {
            let mut received = Vec::new();
            client.read_to_end(&mut received).await.unwrap();
            received
        });

        handle.await.unwrap();
        assert_eq!(reader.await.unwrap(), expected);
    }

    #[tokio::test]
    async fn cancel_flushes_queued_messages() {
        let (mut client, server) = tokio::io::duplex(4096);
        let cancel = CancellationToken::new();
        let (outbound, handle) = spawn_writer(server, 65535, PAUSE, cancel.clone());

        outbound.send_text("goodbye all").await.unwrap();
        cancel.cancel();
        handle.await.unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"goodbye all");
    }

    #[tokio::test]
    async fn send_after_pump_death_reports_disconnected() {
        let (client, server) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let (outbound, handle) = spawn_writer(server, 65535, PAUSE, cancel.clone());

        drop(client);
        // First write may still succeed into the pipe's grave; the pump
        // exits on the write error soon after.
        let _ = outbound.send_text("into the void").await;
        handle.await.unwrap();

        let result = outbound.send_text("again").await;
        assert!(matches!(result, Err(SessionError::Disconnected)));
    }
}
