//! Chunked transfer loops
//!
//! Both directions move a file of known size in strict file order, one chunk
//! at a time, taking the pause gate around each chunk's network I/O. The
//! loops are generic over the byte source and sink so the same code drives
//! client and server ends of a connection.

use crate::error::{Result, TransferError};
use crate::observer::TransferObserver;
use crate::pause::PauseGate;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Byte accounting for a single transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferState {
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub chunks: u64,
    /// Sticky: set once any chunk had to wait for a resume
    pub paused: bool,
}

impl TransferState {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            transferred_bytes: 0,
            chunks: 0,
            paused: false,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.total_bytes - self.transferred_bytes
    }

    pub fn is_complete(&self) -> bool {
        self.transferred_bytes == self.total_bytes
    }

    /// An empty file counts as fully transferred
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        self.transferred_bytes as f64 / self.total_bytes as f64
    }

    fn record(&mut self, n: usize) {
        self.transferred_bytes += n as u64;
        self.chunks += 1;
        debug_assert!(self.transferred_bytes <= self.total_bytes);
    }
}

fn chunk_len(buf_len: usize, remaining: u64) -> usize {
    remaining.min(buf_len as u64) as usize
}

/// Fill `buf` from a local file, stopping early only at end of input
async fn fill_chunk<R>(source: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Upload direction: local source → network sink.
///
/// Exactly `total` bytes are sent; a source that runs dry first is an I/O
/// failure, and anything past `total` is left unread.
pub async fn send_chunks<R, W>(
    source: &mut R,
    sink: &mut W,
    total: u64,
    chunk_size: usize,
    gate: &PauseGate,
    observer: &dyn TransferObserver,
) -> Result<TransferState>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut state = TransferState::new(total);
    let mut buf = vec![0u8; chunk_size.max(1)];

    while state.remaining() > 0 {
        let want = chunk_len(buf.len(), state.remaining());
        let n = fill_chunk(source, &mut buf[..want]).await?;
        if n == 0 {
            return Err(TransferError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "source ended after {} of {} bytes",
                    state.transferred_bytes, total
                ),
            )));
        }

        let chunk = match gate.try_enter() {
            Some(chunk) => chunk,
            None => {
                state.paused = true;
                tracing::debug!(sent = state.transferred_bytes, "upload waiting on pause gate");
                gate.enter().await?
            }
        };
        sink.write_all(&buf[..n]).await?;
        state.record(n);
        observer.on_progress(state.fraction());
        drop(chunk);
    }
    sink.flush().await?;

    if total == 0 {
        observer.on_progress(1.0);
    }
    Ok(state)
}

/// Download direction: network source → local sink.
///
/// Each read asks for at most `min(chunk_size, remaining)` bytes, so nothing
/// after the declared size is consumed from the stream. A stream that closes
/// early is a protocol error.
pub async fn receive_chunks<R, W>(
    source: &mut R,
    sink: &mut W,
    total: u64,
    chunk_size: usize,
    gate: &PauseGate,
    observer: &dyn TransferObserver,
) -> Result<TransferState>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut state = TransferState::new(total);
    let mut buf = vec![0u8; chunk_size.max(1)];

    while state.remaining() > 0 {
        let want = chunk_len(buf.len(), state.remaining());

        let chunk = match gate.try_enter() {
            Some(chunk) => chunk,
            None => {
                state.paused = true;
                tracing::debug!(received = state.transferred_bytes, "download waiting on pause gate");
                gate.enter().await?
            }
        };
        let n = source.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(TransferError::protocol(format!(
                "connection closed after {} of {} bytes",
                state.transferred_bytes, total
            )));
        }
        sink.write_all(&buf[..n]).await?;
        state.record(n);
        observer.on_progress(state.fraction());
        drop(chunk);
    }
    sink.flush().await?;

    if total == 0 {
        observer.on_progress(1.0);
    }
    Ok(state)
}
