//! Sender side of a transfer: turns a byte source into ordered chunks.

use std::path::Path;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};

use crate::error::{Error, Result};
use crate::model::FileChunk;

/// Pull-based chunk producer over an async byte source.
///
/// Each call to [`ChunkSequencer::next_chunk`] reads only the bytes of one
/// chunk, so memory use is bounded by the preferred chunk size no matter
/// how large the transfer is.
#[derive(Debug)]
pub struct ChunkSequencer<R> {
    source: R,
    file_name: String,
    total_bytes: u64,
    preferred: usize,
    minimum: usize,
    offset: u64,
    sequence: u32,
    finished: bool,
}

impl<R: AsyncRead + Unpin> ChunkSequencer<R> {
    /// Create a sequencer that will emit exactly `total_bytes` from `source`.
    ///
    /// Each chunk holds at most `preferred` bytes and, unless the transfer
    /// ends sooner, at least `minimum` bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::TransferTooLarge` if chunk offsets would not fit the
    /// wire format.
    pub fn new(
        source: R,
        file_name: impl Into<String>,
        total_bytes: u64,
        preferred: usize,
        minimum: usize,
    ) -> Result<Self> {
        if total_bytes > u64::from(u32::MAX) {
            return Err(Error::TransferTooLarge(total_bytes));
        }

        let minimum = minimum.max(1);
        Ok(Self {
            source,
            file_name: file_name.into(),
            total_bytes,
            preferred: preferred.max(minimum),
            minimum,
            offset: 0,
            sequence: 0,
            finished: false,
        })
    }

    /// Name carried by every chunk.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Total number of bytes the sequence covers.
    #[must_use]
    pub const fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Bytes emitted so far.
    #[must_use]
    pub const fn bytes_sent(&self) -> u64 {
        self.offset
    }

    /// Produce the next chunk, or `None` once the last one was emitted.
    ///
    /// # Errors
    ///
    /// Returns `Error::TruncatedSource` if the source ends early, or the
    /// underlying read error.
    pub async fn next_chunk(&mut self) -> Result<Option<FileChunk>> {
        if self.finished {
            return Ok(None);
        }

        let remaining = self.total_bytes - self.offset;
        let upper = usize::try_from(remaining).map_or(self.preferred, |r| r.min(self.preferred));
        let lower = self.minimum.min(upper);

        let mut payload = vec![0u8; upper];
        let mut filled = 0;
        while filled < lower {
            let n = self.source.read(&mut payload[filled..]).await?;
            if n == 0 {
                return Err(Error::TruncatedSource {
                    file: self.file_name.clone(),
                    read: self.offset + filled as u64,
                    expected: self.total_bytes,
                });
            }
            filled += n;
        }
        payload.truncate(filled);

        #[allow(clippy::cast_possible_truncation)]
        let chunk = FileChunk {
            file_name: self.file_name.clone(),
            payload,
            offset: self.offset as u32,
            sequence: self.sequence,
            total_bytes: self.total_bytes,
        };

        self.offset = chunk.end_offset();
        self.sequence += 1;
        self.finished = chunk.is_last();

        Ok(Some(chunk))
    }
}

impl ChunkSequencer<tokio::io::Take<tokio::fs::File>> {
    /// Sequence a whole file from disk.
    ///
    /// # Errors
    ///
    /// Returns `Error::FileNotFound` if the file does not exist, or the
    /// underlying I/O error.
    pub async fn open(path: &Path, preferred: usize, minimum: usize) -> Result<Self> {
        Self::open_range(path, 0, 0, preferred, minimum).await
    }

    /// Sequence the bytes `start..end` of a file; `0, 0` means the whole file.
    ///
    /// The range is clamped to the file length. Offsets in the produced
    /// chunks are relative to `start`.
    ///
    /// # Errors
    ///
    /// Returns `Error::FileNotFound` if the file does not exist, or the
    /// underlying I/O error.
    pub async fn open_range(
        path: &Path,
        start: u64,
        end: u64,
        preferred: usize,
        minimum: usize,
    ) -> Result<Self> {
        let mut file = tokio::fs::File::open(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound(path.display().to_string())
            } else {
                Error::Io(e)
            }
        })?;
        let length = file.metadata().await?.len();

        let (start, end) = if start == 0 && end == 0 {
            (0, length)
        } else {
            let end = end.min(length);
            (start.min(end), end)
        };

        if start > 0 {
            file.seek(std::io::SeekFrom::Start(start)).await?;
        }

        let file_name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());

        Self::new(file.take(end - start), file_name, end - start, preferred, minimum)
    }
}

/// Split an in-memory payload into chunks of `chunk_size` bytes.
///
/// Produces the same boundaries as a [`ChunkSequencer`] whose source always
/// fills a whole chunk; an empty payload yields one empty, final chunk.
#[must_use]
pub fn split_payload(file_name: &str, bytes: &[u8], chunk_size: usize) -> Vec<FileChunk> {
    let chunk_size = chunk_size.max(1);
    let total = bytes.len() as u64;
    let mut pieces = bytes.chunks(chunk_size);

    let mut chunks = vec![FileChunk::first(
        file_name,
        pieces.next().map(<[u8]>::to_vec).unwrap_or_default(),
        total,
    )];

    for piece in pieces {
        let Some(next) = chunks.last().and_then(|prev| prev.next_chunk(piece.to_vec())) else {
            break;
        };
        chunks.push(next);
    }

    chunks
}
