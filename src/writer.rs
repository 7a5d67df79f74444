//! Dedicated writer task for the connection's socket.
//!
//! Callers never touch the socket's write half. They pack a request into a
//! pooled buffer and hand it to the writer task through an mpsc channel. The
//! task owns the write half, so frames of different requests never
//! interleave, and it batches whatever is queued into a single vectored
//! write.
//!
//! # Architecture
//!
//! ```text
//! execute 1 ─┐
//! execute 2 ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Socket
//! execute N ─┘
//! ```
//!
//! Buffers are returned to their pool as soon as the batch holding them has
//! been written (or the write failed).

use std::io::{self, IoSlice};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::PooledBuffer;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum frames to batch in a single write operation.
pub const DEFAULT_MAX_BATCH: usize = 64;

/// A packed request ready to be written.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Sync id of the request, for logging.
    pub sync: u64,
    /// Complete frame bytes, length prefix included.
    pub buffer: PooledBuffer,
}

impl OutboundFrame {
    #[inline]
    pub fn new(sync: u64, buffer: PooledBuffer) -> Self {
        Self { sync, buffer }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.buffer.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
    /// Frames collected into one vectored write.
    pub max_batch: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_batch: DEFAULT_MAX_BATCH,
        }
    }
}

/// Handle for queueing frames on the writer task.
///
/// Cheaply cloneable.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
}

impl WriterHandle {
    /// Queue a frame, waiting while the channel is full.
    ///
    /// Fails with `BrokenPipe` once the writer task has stopped; the frame's
    /// buffer is released in that case.
    pub async fn send(&self, frame: OutboundFrame) -> io::Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "writer task stopped"))
    }

    /// Has the writer task stopped accepting frames?
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task ends with `Ok(())` when every handle is dropped, or with the
/// first write error.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<io::Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let task = tokio::spawn(writer_loop(rx, writer, config.max_batch.max(1)));
    (WriterHandle { tx }, task)
}

/// Receives frames and writes them out in batches.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    max_batch: usize,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(max_batch);

    loop {
        let Some(first) = rx.recv().await else {
            tracing::debug!("writer channel closed, shutting down");
            let _ = writer.shutdown().await;
            return Ok(());
        };
        batch.push(first);

        while batch.len() < max_batch {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let written = write_batch(&mut writer, &batch).await;
        if let Err(err) = &written {
            tracing::error!(
                frames = batch.len(),
                first_sync = batch[0].sync,
                "write failed: {}",
                err
            );
        }
        // release buffers before reporting
        batch.clear();
        written?;
    }
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            ));
        }
        total_written += written;
    }

    writer.flush().await
}

/// Build IoSlice array for the data not yet written.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;

    for frame in batch {
        let end = offset + frame.size();
        if skip_bytes < end && frame.size() > 0 {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame.buffer[start..]));
        }
        offset = end;
    }

    slices
}
