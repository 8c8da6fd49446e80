//! Frame I/O over a dialed stream.
//!
//! The stream is split once per connection: the reader half goes to the
//! reader task, the writer half to the processor task. Every read and write
//! carries its own deadline.

use std::future::Future;
use std::time::Duration;

use backhaul_wire::{Decoded, Frame, FrameCodec};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::time::timeout;

use crate::error::{ReverseError, ReverseResult, TimeoutKind};
use crate::tls::BrokerTarget;

/// Initial read buffer capacity.
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Bound on sending close_notify to a peer that may be gone.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Opens a byte stream to the broker.
///
/// [`TlsDialer`](crate::TlsDialer) is the production implementation; tests
/// substitute in-memory streams.
pub trait Dialer: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Connects to `target`, failing with
    /// [`ReverseError::Timeout`]`(`[`TimeoutKind::Dial`]`)` once `timeout`
    /// elapses.
    fn dial(
        &self,
        target: &BrokerTarget,
        timeout: Duration,
    ) -> impl Future<Output = ReverseResult<Self::Stream>> + Send;
}

/// Splits a stream into independently owned frame reader and writer.
pub fn split<S>(stream: S, max_payload: usize) -> (FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite,
{
    let (read, write) = tokio::io::split(stream);
    (FrameReader::new(read, max_payload), FrameWriter::new(write))
}

/// Reads frames from the inbound half.
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    codec: FrameCodec,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_payload: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            codec: FrameCodec::new(max_payload),
        }
    }

    /// Waits for the next frame.
    ///
    /// Fails with `Timeout(Idle)` if no complete frame arrives within
    /// `deadline`, `ConnectionClosed` on EOF, and `Protocol` if the stream
    /// is no longer framed.
    pub async fn next(&mut self, deadline: Duration) -> ReverseResult<Decoded> {
        timeout(deadline, self.read_frame())
            .await
            .map_err(|_| ReverseError::Timeout(TimeoutKind::Idle))?
    }

    async fn read_frame(&mut self) -> ReverseResult<Decoded> {
        loop {
            if let Some(decoded) = self.codec.decode(&mut self.buf)? {
                return Ok(decoded);
            }

            if self.buf.capacity() - self.buf.len() < READ_BUFFER_SIZE / 4 {
                self.buf.reserve(READ_BUFFER_SIZE);
            }
            let n = self
                .inner
                .read_buf(&mut self.buf)
                .await
                .map_err(ReverseError::Read)?;
            if n == 0 {
                return Err(ReverseError::ConnectionClosed);
            }
        }
    }
}

/// Writes frames to the outbound half.
pub struct FrameWriter<W> {
    inner: Option<W>,
    buf: BytesMut,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: Some(inner),
            buf: BytesMut::new(),
        }
    }

    /// Writes and flushes one frame within `deadline`.
    pub async fn send(&mut self, frame: &Frame, deadline: Duration) -> ReverseResult<()> {
        let Self { inner, buf } = self;
        let inner = inner.as_mut().ok_or(ReverseError::ConnectionClosed)?;

        buf.clear();
        frame.encode(buf);

        let write = async {
            inner.write_all(buf).await?;
            inner.flush().await
        };
        timeout(deadline, write)
            .await
            .map_err(|_| ReverseError::Timeout(TimeoutKind::Command))?
            .map_err(ReverseError::Write)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Shuts the outbound half down. Safe to call repeatedly; errors from a
    /// peer that already went away are only logged.
    pub async fn close(&mut self) {
        let Some(mut inner) = self.inner.take() else {
            return;
        };
        match timeout(CLOSE_TIMEOUT, inner.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "error closing transport"),
            Err(_) => tracing::debug!("timed out closing transport"),
        }
    }
}
