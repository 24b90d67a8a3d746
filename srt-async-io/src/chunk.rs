//! MTU-sized chunking over a facade endpoint

use bytes::Bytes;
use srt_async_core::{AsyncSrt, FacadeError, ReadResult, Request, Value};
use srt_async_native::NativeError;
use std::time::Duration;
use thiserror::Error;

/// Timer delay between yielding-loop batches.
const TICK_DELAY: Duration = Duration::from_millis(1);

/// How the writer yields control back to the host runtime between batches.
///
/// Both strategies preserve slice order; they differ in how the pause
/// between batches is expressed. A yielding-loop pause goes through the
/// runtime's timer (one [`TICK_DELAY`] per batch); an explicit-scheduling
/// pause re-queues the task without touching the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Reschedule through a minimum-delay timer after every
    /// `writes_per_tick` submissions.
    YieldingLoop,
    /// Submit exactly `writes_per_tick` chunks per runtime turn, queueing
    /// the next batch behind whatever else is runnable.
    ExplicitScheduling,
}

/// Chunked I/O failures.
#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("mtu must be non-zero")]
    ZeroMtu,

    #[error("facade error: {0}")]
    Facade(#[from] FacadeError),

    #[error("chunk {index} was rejected by the transport")]
    WriteRejected {
        index: usize,
        error: Option<NativeError>,
    },
}

/// Slice a buffer into MTU-sized chunks; the last one may be short. The
/// slices share the input's storage.
pub fn split_mtu(data: &Bytes, mtu: usize) -> Vec<Bytes> {
    if mtu == 0 || data.is_empty() {
        return Vec::new();
    }
    let mut chunks = Vec::with_capacity(data.len().div_ceil(mtu));
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + mtu).min(data.len());
        chunks.push(data.slice(offset..end));
        offset = end;
    }
    chunks
}

/// Stateless chunked reader/writer bound to one (facade, fd) pair.
#[derive(Clone)]
pub struct ChunkIo {
    facade: AsyncSrt,
    fd: i32,
}

impl ChunkIo {
    pub fn new(facade: AsyncSrt, fd: i32) -> Self {
        ChunkIo { facade, fd }
    }

    pub fn fd(&self) -> i32 {
        self.fd
    }

    /// Write `data` as a sequence of MTU-sized messages, pacing
    /// submissions so the host runtime keeps breathing.
    ///
    /// The buffer is consumed: every slice is moved into the runner at
    /// submission. Completes once every slice has its reply, returning the
    /// total bytes acknowledged.
    pub async fn write_chunks(
        &self,
        data: Bytes,
        mtu: usize,
        writes_per_tick: usize,
        pacing: Pacing,
    ) -> Result<usize, ChunkError> {
        if mtu == 0 {
            return Err(ChunkError::ZeroMtu);
        }
        let chunks = split_mtu(&data, mtu);
        drop(data);
        let per_tick = writes_per_tick.max(1);

        let mut submitted = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.into_iter().enumerate() {
            submitted.push(self.facade.submit(Request::Write {
                fd: self.fd,
                payload: chunk,
            })?);
            if (index + 1) % per_tick == 0 {
                match pacing {
                    Pacing::YieldingLoop => tokio::time::sleep(TICK_DELAY).await,
                    Pacing::ExplicitScheduling => tokio::task::yield_now().await,
                }
            }
        }

        let mut total = 0;
        for (index, pending) in submitted.into_iter().enumerate() {
            match pending.recv().await?.value {
                Value::Size(n) => total += n,
                Value::Error => {
                    return Err(ChunkError::WriteRejected {
                        index,
                        error: self.facade.last_error(),
                    })
                }
                _ => return Err(FacadeError::UnexpectedReply("write").into()),
            }
        }
        Ok(total)
    }

    /// Read messages of up to `read_buf_size` bytes until at least
    /// `min_bytes` have been collected, or the stream ends.
    ///
    /// `on_read` runs for every non-empty buffer as it arrives; `on_error`
    /// runs once for a terminal `Eof`/`Error` result. Returns the buffers
    /// collected so far in arrival order.
    pub async fn read_chunks(
        &self,
        min_bytes: usize,
        read_buf_size: usize,
        mut on_read: impl FnMut(&Bytes),
        mut on_error: impl FnMut(&ReadResult),
    ) -> Result<Vec<Bytes>, ChunkError> {
        let mut collected = Vec::new();
        let mut seen = 0;
        while seen < min_bytes {
            match self.facade.read(self.fd, read_buf_size).await? {
                ReadResult::Data(buf) if !buf.is_empty() => {
                    seen += buf.len();
                    on_read(&buf);
                    collected.push(buf);
                }
                // Nothing pending yet; let other tasks (and the sender)
                // make progress.
                ReadResult::Data(_) => tokio::task::yield_now().await,
                terminal @ (ReadResult::Eof | ReadResult::Error) => {
                    on_error(&terminal);
                    break;
                }
            }
        }
        Ok(collected)
    }
}
