#[cfg(test)]
mod chunk_writer_test;

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use waitgroup::WaitGroup;

use crate::error::Error;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(2);

/// Receives every non-empty chunk, in write order.
pub type OnChunkHdlrFn = Box<
    dyn (FnMut(Bytes) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>)
        + Send
        + Sync
        + 'static,
>;

/// ChunkWriterBuilder configures a ChunkWriter.
pub struct ChunkWriterBuilder {
    interval: Duration,
}

impl Default for ChunkWriterBuilder {
    fn default() -> Self {
        ChunkWriterBuilder {
            interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

impl ChunkWriterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// with_interval sets how often accumulated bytes are handed to the
    /// chunk handler.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// build starts the flush timer. It must be called within a tokio runtime.
    pub fn build(self, on_chunk: OnChunkHdlrFn) -> ChunkWriter {
        let (close_tx, close_rx) = mpsc::channel(1);
        let internal = Arc::new(ChunkWriterInternal::default());
        let wg = WaitGroup::new();

        let w = wg.worker();
        let internal2 = Arc::clone(&internal);
        let interval = self.interval;
        tokio::spawn(async move {
            let _d = w;
            ChunkWriter::run(internal2, on_chunk, interval, close_rx).await;
        });

        ChunkWriter {
            internal,
            close_tx: Arc::new(Mutex::new(Some(close_tx))),
            wg: Arc::new(Mutex::new(Some(wg))),
        }
    }
}

#[derive(Default)]
struct ChunkBuffer {
    data: BytesMut,
    closed: bool,
}

#[derive(Default)]
struct ChunkWriterInternal {
    buffer: std::sync::Mutex<ChunkBuffer>,
    bytes_flushed: AtomicUsize,
    chunks_flushed: AtomicUsize,
}

impl ChunkWriterInternal {
    fn take(&self) -> Option<Bytes> {
        let mut buffer = match self.buffer.lock() {
            Ok(buffer) => buffer,
            Err(poisoned) => poisoned.into_inner(),
        };
        if buffer.data.is_empty() {
            None
        } else {
            Some(buffer.data.split().freeze())
        }
    }
}

/// ChunkWriter accumulates bytes in memory and hands them to a handler in
/// fixed time windows. Writes never touch the disk, so encoders running on
/// the packet path are never held up by I/O.
///
/// The handle is cheap to clone; all clones share the same buffer.
#[derive(Clone)]
pub struct ChunkWriter {
    internal: Arc<ChunkWriterInternal>,
    close_tx: Arc<Mutex<Option<mpsc::Sender<()>>>>,
    wg: Arc<Mutex<Option<WaitGroup>>>,
}

impl ChunkWriter {
    pub fn builder() -> ChunkWriterBuilder {
        ChunkWriterBuilder::default()
    }

    async fn run(
        internal: Arc<ChunkWriterInternal>,
        mut on_chunk: OnChunkHdlrFn,
        interval: Duration,
        mut close_rx: mpsc::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    ChunkWriter::flush(&internal, &mut on_chunk).await;
                }
                _ = close_rx.recv() => {
                    ChunkWriter::flush(&internal, &mut on_chunk).await;
                    log::trace!("chunk writer stopped");
                    return;
                }
            }
        }
    }

    async fn flush(internal: &ChunkWriterInternal, on_chunk: &mut OnChunkHdlrFn) {
        if let Some(chunk) = internal.take() {
            internal
                .bytes_flushed
                .fetch_add(chunk.len(), Ordering::SeqCst);
            internal.chunks_flushed.fetch_add(1, Ordering::SeqCst);
            on_chunk(chunk).await;
        }
    }

    /// bytes_flushed is the total number of bytes handed to the handler so far.
    pub fn bytes_flushed(&self) -> usize {
        self.internal.bytes_flushed.load(Ordering::SeqCst)
    }

    pub fn chunks_flushed(&self) -> usize {
        self.internal.chunks_flushed.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        match self.internal.buffer.lock() {
            Ok(buffer) => buffer.closed,
            Err(poisoned) => poisoned.into_inner().closed,
        }
    }

    /// close stops the timer and flushes whatever is still buffered. It
    /// returns once the final chunk has been handled. Closing twice is a no-op.
    pub async fn close(&self) {
        {
            let mut buffer = match self.internal.buffer.lock() {
                Ok(buffer) => buffer,
                Err(poisoned) => poisoned.into_inner(),
            };
            buffer.closed = true;
        }
        {
            let mut close_tx = self.close_tx.lock().await;
            close_tx.take();
        }

        let wg = {
            let mut wg = self.wg.lock().await;
            wg.take()
        };
        if let Some(wg) = wg {
            wg.wait().await;
        }
    }
}

impl io::Write for ChunkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut buffer = match self.internal.buffer.lock() {
            Ok(buffer) => buffer,
            Err(poisoned) => poisoned.into_inner(),
        };
        if buffer.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                Error::ErrChunkWriterClosed.to_string(),
            ));
        }
        buffer.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    /// Bytes only leave the buffer on the timer or on close.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
