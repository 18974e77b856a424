//! Receiver side of a transfer: writes chunks out strictly in order.

use std::collections::BTreeMap;
use std::path::Path;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::model::{FileChunk, TransferKey};

/// What [`Reassembler::accept_chunk`] did with a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// The chunk and `chunks - 1` buffered successors were written
    Written {
        /// Number of chunks written by this call
        chunks: usize,
    },
    /// Arrived early; held until its predecessors show up
    Buffered,
    /// Already written or already buffered
    Duplicate,
    /// The sink refused the write; the chunk is lost
    Dropped,
    /// The transfer is already complete
    Ignored,
}

/// Reassembles one transfer into an async sink.
///
/// Chunks are written in sequence order regardless of arrival order. When
/// the last chunk has been written the sink is flushed and shut down, and
/// the reassembler is closed for good.
#[derive(Debug)]
pub struct Reassembler<W> {
    key: TransferKey,
    sink: W,
    expected_next: u32,
    written: u64,
    closed: bool,
    pending: BTreeMap<u32, FileChunk>,
}

impl<W: AsyncWrite + Unpin> Reassembler<W> {
    /// Create a reassembler for `key` writing into `sink`.
    pub const fn new(key: TransferKey, sink: W) -> Self {
        Self {
            key,
            sink,
            expected_next: 0,
            written: 0,
            closed: false,
            pending: BTreeMap::new(),
        }
    }

    /// Feed one chunk.
    pub async fn accept_chunk(&mut self, chunk: FileChunk) -> AcceptOutcome {
        if self.closed {
            return AcceptOutcome::Ignored;
        }

        if chunk.sequence < self.expected_next || self.pending.contains_key(&chunk.sequence) {
            tracing::debug!(
                transfer = %self.key,
                sequence = chunk.sequence,
                "Duplicate chunk dropped"
            );
            return AcceptOutcome::Duplicate;
        }

        if chunk.sequence > self.expected_next {
            self.pending.insert(chunk.sequence, chunk);
            return AcceptOutcome::Buffered;
        }

        if let Err(e) = self.write_chunk(&chunk).await {
            tracing::warn!(
                transfer = %self.key,
                sequence = chunk.sequence,
                "Failed to write chunk, dropping it: {}",
                e
            );
            return AcceptOutcome::Dropped;
        }

        let mut chunks = 1;
        while !self.closed {
            let Some(next) = self.pending.remove(&self.expected_next) else {
                break;
            };
            if let Err(e) = self.write_chunk(&next).await {
                tracing::warn!(
                    transfer = %self.key,
                    sequence = next.sequence,
                    "Failed to write buffered chunk, dropping it: {}",
                    e
                );
                break;
            }
            chunks += 1;
        }

        AcceptOutcome::Written { chunks }
    }

    async fn write_chunk(&mut self, chunk: &FileChunk) -> Result<()> {
        self.sink.write_all(&chunk.payload).await?;
        self.expected_next += 1;
        self.written += chunk.payload.len() as u64;

        if chunk.is_last() {
            self.closed = true;
            self.pending.clear();
            if let Err(e) = self.finish().await {
                tracing::warn!(transfer = %self.key, "Failed to close sink: {}", e);
            }
            tracing::debug!(
                transfer = %self.key,
                bytes = self.written,
                "Transfer complete"
            );
        }

        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.sink.flush().await?;
        self.sink.shutdown().await?;
        Ok(())
    }

    /// The transfer this reassembler belongs to.
    #[must_use]
    pub const fn key(&self) -> &TransferKey {
        &self.key
    }

    /// Bytes written to the sink so far.
    #[must_use]
    pub const fn written_bytes(&self) -> u64 {
        self.written
    }

    /// Whether the last chunk has been written.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Sequence number the next write needs.
    #[must_use]
    pub const fn expected_next(&self) -> u32 {
        self.expected_next
    }

    /// Chunks waiting for their predecessors.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Give back the sink.
    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl Reassembler<tokio::fs::File> {
    /// Create a reassembler writing to a new file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub async fn create(path: &Path, key: TransferKey) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(path).await?;
        Ok(Self::new(key, file))
    }
}
