//! Message recovery over a raw byte stream.
//!
//! The wire carries no length prefixes and no delimiters: a logical
//! message is whatever the peer's write delivered together. The channel
//! reads a burst into a replay buffer so dispatch can preview it,
//! classify it, and only then decide to consume or discard. Share
//! payloads are the exception; their size is announced in the header
//! and read with [`FramedChannel::consume_exact`].
//!
//! Some transports deliver the first byte of a burst on its own. A
//! one-byte first read therefore triggers short follow-up reads that
//! glue the fragments back together before anything is returned.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{Duration, timeout};

use crate::error::SessionError;

/// Cap on `skip_pending` poll rounds so a peer streaming garbage
/// cannot pin a session in its drain loop.
const MAX_DRAIN_ROUNDS: u32 = 256;

/// Consecutive quiet poll rounds before `skip_pending` gives up.
const QUIET_ROUNDS_TO_STOP: u32 = 2;

/// Tuning for one channel.
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    /// Hard cap for one buffered message.
    pub buffer_size: usize,
    /// Follow-up window while gluing a fragmented burst.
    pub coalesce_timeout: Duration,
    /// Poll window for each `skip_pending` round.
    pub drain_timeout: Duration,
}

/// Read side of a session stream, with preview and replay.
pub struct FramedChannel<R> {
    reader: R,
    buffer: BytesMut,
    config: ChannelConfig,
}

impl<R: AsyncRead + Unpin> FramedChannel<R> {
    pub fn new(reader: R, config: ChannelConfig) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(config.buffer_size.min(8 * 1024)),
            config,
        }
    }

    /// Previews up to `max_bytes` of the next message without consuming
    /// anything. Repeated calls see the same bytes. `Ok(None)` when the
    /// stream stays quiet for `wait`.
    pub async fn peek(
        &mut self,
        max_bytes: usize,
        wait: Duration,
    ) -> Result<Option<Bytes>, SessionError> {
        self.fill(wait).await?;
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let end = self.buffer.len().min(max_bytes);
        Ok(Some(Bytes::copy_from_slice(&self.buffer[..end])))
    }

    /// Takes up to `max_bytes` of the next message. Anything beyond the
    /// cap stays buffered for the next call.
    pub async fn consume(
        &mut self,
        max_bytes: usize,
        wait: Duration,
    ) -> Result<Option<Bytes>, SessionError> {
        self.fill(wait).await?;
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let end = self.buffer.len().min(max_bytes);
        Ok(Some(self.buffer.split_to(end).freeze()))
    }

    /// Reads exactly `len` bytes, serving buffered bytes first. Used
    /// for share payloads whose size the header announced. A stream
    /// that ends early is a length mismatch, not a short read.
    pub async fn consume_exact(&mut self, len: usize) -> Result<Bytes, SessionError> {
        let mut out = BytesMut::with_capacity(len);
        let buffered = len.min(self.buffer.len());
        out.extend_from_slice(&self.buffer.split_to(buffered));
        while out.len() < len {
            let n = (&mut self.reader)
                .take((len - out.len()) as u64)
                .read_buf(&mut out)
                .await?;
            if n == 0 {
                return Err(SessionError::LengthMismatch {
                    expected: len,
                    received: out.len(),
                });
            }
        }
        Ok(out.freeze())
    }

    /// Best-effort discard of whatever is left of the current message:
    /// clears the replay buffer, then keeps dropping stream bytes until
    /// the peer stays quiet for two poll rounds. Read errors are left
    /// for the next real read to surface.
    pub async fn skip_pending(&mut self) {
        self.buffer.clear();
        let mut scratch = [0u8; 4096];
        let mut quiet = 0;
        let mut rounds = 0;
        while quiet < QUIET_ROUNDS_TO_STOP && rounds < MAX_DRAIN_ROUNDS {
            rounds += 1;
            match timeout(self.config.drain_timeout, self.reader.read(&mut scratch)).await {
                Ok(Ok(0)) | Ok(Err(_)) => break,
                Ok(Ok(_)) => quiet = 0,
                Err(_) => quiet += 1,
            }
        }
    }

    /// Buffers one message burst. No-op when bytes are already waiting.
    ///
    /// A quiet stream leaves the buffer empty. End of stream on the
    /// first read reports the peer gone; during follow-up reads it just
    /// ends the burst, and the next call reports it instead.
    async fn fill(&mut self, wait: Duration) -> Result<(), SessionError> {
        if !self.buffer.is_empty() {
            return Ok(());
        }
        match self.read_capped(wait).await? {
            None => return Ok(()),
            Some(0) => return Err(SessionError::Disconnected),
            Some(1) => {}
            Some(_) => return Ok(()),
        }
        while self.buffer.len() < self.config.buffer_size {
            match self.read_capped(self.config.coalesce_timeout).await? {
                Some(n) if n > 0 => {}
                _ => break,
            }
        }
        Ok(())
    }

    /// One timeout-bounded read appended to the buffer, capped so the
    /// buffer never exceeds its limit. `Ok(None)` on timeout,
    /// `Ok(Some(0))` on end of stream.
    async fn read_capped(&mut self, wait: Duration) -> Result<Option<usize>, SessionError> {
        let room = self.config.buffer_size.saturating_sub(self.buffer.len());
        if room == 0 {
            return Ok(None);
        }
        let mut capped = (&mut self.reader).take(room as u64);
        let read = capped.read_buf(&mut self.buffer);
        match timeout(wait, read).await {
            Ok(Ok(n)) => Ok(Some(n)),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn config() -> ChannelConfig {
        ChannelConfig {
            buffer_size: 65535,
            coalesce_timeout: Duration::from_millis(100),
            drain_timeout: Duration::from_millis(10),
        }
    }

    const WAIT: Duration = Duration::from_millis(500);

    #[tokio::test]
    async fn peek_is_idempotent_and_consume_matches() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut channel = FramedChannel::new(server, config());

        client.write_all(b"hello there").await.unwrap();

        let first = channel.peek(500, WAIT).await.unwrap().unwrap();
        let second = channel.peek(500, WAIT).await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(&first[..], b"hello there");

        let consumed = channel.consume(65535, WAIT).await.unwrap().unwrap();
        assert_eq!(consumed, first);
    }

    #[tokio::test]
    async fn peek_caps_but_consume_still_sees_everything() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut channel = FramedChannel::new(server, config());

        client.write_all(b"abcdefghij").await.unwrap();

        let preview = channel.peek(4, WAIT).await.unwrap().unwrap();
        assert_eq!(&preview[..], b"abcd");

        let consumed = channel.consume(65535, WAIT).await.unwrap().unwrap();
        assert_eq!(&consumed[..], b"abcdefghij");
    }

    #[tokio::test]
    async fn quiet_stream_peeks_none() {
        let (_client, server) = tokio::io::duplex(1024);
        let mut channel = FramedChannel::new(server, config());

        let peeked = channel.peek(500, Duration::from_millis(20)).await.unwrap();
        assert!(peeked.is_none());
    }

    #[tokio::test]
    async fn closed_stream_is_a_disconnect() {
        let (client, server) = tokio::io::duplex(1024);
        let mut channel = FramedChannel::new(server, config());
        drop(client);

        let result = channel.peek(500, WAIT).await;
        assert!(matches!(result, Err(SessionError::Disconnected)));
    }

    #[tokio::test]
    async fn lone_first_byte_is_glued_to_its_tail() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut channel = FramedChannel::new(server, config());

        let writer = tokio::spawn(async move {
            client.write_all(b"h").await.unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
            client.write_all(b"ello everyone").await.unwrap();
            client
        });

        let peeked = channel.peek(500, WAIT).await.unwrap().unwrap();
        assert_eq!(&peeked[..], b"hello everyone");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn multi_byte_first_read_returns_immediately() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut channel = FramedChannel::new(server, config());

        client.write_all(b"hi").await.unwrap();

        let started = tokio::time::Instant::now();
        let peeked = channel.peek(500, WAIT).await.unwrap().unwrap();
        assert_eq!(&peeked[..], b"hi");
        // No coalescing pass for a multi-byte burst.
        assert!(started.elapsed() < Duration::from_millis(90));
    }

    #[tokio::test]
    async fn consume_exact_reassembles_fragments() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut channel = FramedChannel::new(server, config());

        let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            for chunk in payload.chunks(96) {
                client.write_all(chunk).await.unwrap();
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            client
        });

        let got = channel.consume_exact(1000).await.unwrap();
        assert_eq!(&got[..], &expected[..]);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn consume_exact_drains_the_replay_buffer_first() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut channel = FramedChannel::new(server, config());

        client.write_all(b"head-and-body").await.unwrap();
        let peeked = channel.peek(500, WAIT).await.unwrap().unwrap();
        assert_eq!(&peeked[..], b"head-and-body");

        let got = channel.consume_exact(13).await.unwrap();
        assert_eq!(&got[..], b"head-and-body");
    }

    #[tokio::test]
    async fn short_stream_is_a_length_mismatch() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut channel = FramedChannel::new(server, config());

        client.write_all(b"only9byte").await.unwrap();
        drop(client);

        let result = channel.consume_exact(20).await;
        match result {
            Err(SessionError::LengthMismatch { expected, received }) => {
                assert_eq!(expected, 20);
                assert_eq!(received, 9);
            }
            other => panic!("expected length mismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn skip_pending_discards_the_current_message() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut channel = FramedChannel::new(server, config());

        client.write_all(b"stale bytes").await.unwrap();
        let _ = channel.peek(500, WAIT).await.unwrap();

        channel.skip_pending().await;

        client.write_all(b"fresh").await.unwrap();
        let peeked = channel.peek(500, WAIT).await.unwrap().unwrap();
        assert_eq!(&peeked[..], b"fresh");
    }

    #[tokio::test]
    async fn leftover_beyond_consume_cap_stays_buffered() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut channel = FramedChannel::new(server, config());

        client.write_all(b"0123456789").await.unwrap();

        let head = channel.consume(4, WAIT).await.unwrap().unwrap();
        assert_eq!(&head[..], b"0123");

        let tail = channel.consume(65535, WAIT).await.unwrap().unwrap();
        assert_eq!(&tail[..], b"456789");
    }

    #[tokio::test]
    async fn buffer_limit_caps_a_burst() {
        let mut small = config();
        small.buffer_size = 8;
        let (mut client, server) = tokio::io::duplex(1024);
        let mut channel = FramedChannel::new(server, small);

        client.write_all(b"abcdefghij").await.unwrap();

        let got = channel.consume(65535, WAIT).await.unwrap().unwrap();
        assert_eq!(&got[..], b"abcdefgh");

        let rest = channel.consume(65535, WAIT).await.unwrap().unwrap();
        assert_eq!(&rest[..], b"ij");
    }
}
