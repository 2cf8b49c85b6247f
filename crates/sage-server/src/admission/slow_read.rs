//! Slow-read protection.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Stream wrapper that fails reads falling below a minimum byte rate.
///
/// The guard accumulates bytes read since it wrapped the stream; once the
/// cumulative rate drops under `min_rate` bytes per second the next read
/// fails, which tears the connection down. Writes pass through untouched.
/// Per-read deadlines are the caller's job (the handler wraps each read in a
/// timeout), the guard only watches throughput.
#[derive(Debug)]
pub struct SlowReadGuard<S> {
    inner: S,
    min_rate: u64,
    started: Instant,
    bytes_read: u64,
}

impl<S> SlowReadGuard<S> {
    /// Wrap a stream.
    pub fn new(inner: S, min_rate: u64) -> Self {
        Self {
            inner,
            min_rate,
            started: Instant::now(),
            bytes_read: 0,
        }
    }

    /// Total bytes read through the guard.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Unwrap the inner stream.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for SlowReadGuard<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        match Pin::new(&mut self.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let filled = buf.filled().len() - before;
                if filled == 0 {
                    // EOF: nothing to rate-check
                    return Poll::Ready(Ok(()));
                }

                self.bytes_read += filled as u64;

                let elapsed = self.started.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    let rate = self.bytes_read as f64 / elapsed;
                    if rate < self.min_rate as f64 {
                        return Poll::Ready(Err(io::Error::other(
                            "connection below minimum read rate",
                        )));
                    }
                }

                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for SlowReadGuard<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_fast_reads_pass() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut guard = SlowReadGuard::new(rx, 1);

        tx.write_all(b"hello").await.unwrap();

        let mut buf = [0u8; 5];
        guard.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(guard.bytes_read(), 5);
    }

    #[tokio::test]
    async fn test_slow_read_fails() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut guard = SlowReadGuard::new(rx, 1_000_000);

        // A handful of bytes after a real delay cannot reach 1 MB/s
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.write_all(b"drip").await.unwrap();

        let mut buf = [0u8; 4];
        let err = guard.read_exact(&mut buf).await.unwrap_err();
        assert!(err.to_string().contains("minimum read rate"));
    }

    #[tokio::test]
    async fn test_eof_passes_through() {
        let (tx, rx) = tokio::io::duplex(64);
        drop(tx);

        let mut guard = SlowReadGuard::new(rx, 1_000_000);
        let mut buf = Vec::new();
        let n = guard.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_writes_pass_through() {
        let (tx, mut rx) = tokio::io::duplex(64);
        let mut guard = SlowReadGuard::new(tx, 1);

        guard.write_all(b"pong").await.unwrap();
        guard.flush().await.unwrap();

        let mut buf = [0u8; 4];
        rx.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }
}
