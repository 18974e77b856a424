//! File chunks and transfer keys.

use serde::{Deserialize, Serialize};

use super::base64_bytes;

/// One slice of a file in transit.
///
/// A chunk is the last one of its transfer iff
/// `total_bytes == offset + payload.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunk {
    /// Name of the file being transferred
    pub file_name: String,
    /// Chunk contents
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    /// Byte offset of the first payload byte within the file
    pub offset: u32,
    /// Zero-based position of this chunk in the transfer
    pub sequence: u32,
    /// Total size of the file
    pub total_bytes: u64,
}

impl FileChunk {
    /// The first chunk of a transfer.
    pub fn first(file_name: impl Into<String>, payload: Vec<u8>, total_bytes: u64) -> Self {
        Self {
            file_name: file_name.into(),
            payload,
            offset: 0,
            sequence: 0,
            total_bytes,
        }
    }

    /// Build the chunk that follows this one.
    ///
    /// Returns `None` when this chunk is the last one, or when the next
    /// offset would not fit the wire format.
    #[must_use]
    pub fn next_chunk(&self, payload: Vec<u8>) -> Option<Self> {
        if self.is_last() {
            return None;
        }
        let offset = u32::try_from(self.end_offset()).ok()?;
        Some(Self {
            file_name: self.file_name.clone(),
            payload,
            offset,
            sequence: self.sequence + 1,
            total_bytes: self.total_bytes,
        })
    }

    /// Offset one past the last payload byte.
    #[must_use]
    pub fn end_offset(&self) -> u64 {
        u64::from(self.offset) + self.payload.len() as u64
    }

    /// Whether this chunk completes the transfer.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.total_bytes == self.end_offset()
    }
}

/// Identifies one transfer: who sends which file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferKey {
    /// Id of the sending identity
    pub sender_id: String,
    /// Name of the file
    pub file_name: String,
}

impl TransferKey {
    /// Create a transfer key.
    pub fn new(sender_id: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            file_name: file_name.into(),
        }
    }
}

impl std::fmt::Display for TransferKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.sender_id, self.file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_chunk_is_last() {
        let chunk = FileChunk::first("a.txt", vec![1, 2, 3], 3);
        assert!(chunk.is_last());
        assert!(chunk.next_chunk(vec![4]).is_none());
    }

    #[test]
    fn test_empty_file_chunk_is_last() {
        let chunk = FileChunk::first("empty", Vec::new(), 0);
        assert!(chunk.is_last());
        assert_eq!(chunk.end_offset(), 0);
    }

    #[test]
    fn test_next_chunk_advances() {
        let first = FileChunk::first("a.bin", vec![0; 4], 10);
        assert!(!first.is_last());

        let second = first.next_chunk(vec![0; 4]).unwrap();
        assert_eq!(second.sequence, 1);
        assert_eq!(second.offset, 4);
        assert!(!second.is_last());

        let third = second.next_chunk(vec![0; 2]).unwrap();
        assert_eq!(third.sequence, 2);
        assert_eq!(third.offset, 8);
        assert!(third.is_last());
    }

    #[test]
    fn test_payload_serializes_as_base64() {
        let chunk = FileChunk::first("a.bin", b"hello".to_vec(), 5);
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(json.contains("\"aGVsbG8=\""));

        let decoded: FileChunk = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, chunk);
    }
}
