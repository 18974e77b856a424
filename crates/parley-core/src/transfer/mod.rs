//! Chunked file transfer.
//!
//! A file travels as a sequence of [`FileChunk`](crate::model::FileChunk)
//! messages. The sending side pulls chunks from a [`ChunkSequencer`] one at a
//! time; the receiving side feeds them, in whatever order they arrive, into a
//! [`Reassembler`] that writes them out strictly in sequence.
//!
//! There is no retransmission: a chunk lost on the way leaves its transfer
//! incomplete.

mod reassembler;
mod sequencer;

use std::path::{Component, Path, PathBuf};

pub use reassembler::{AcceptOutcome, Reassembler};
pub use sequencer::{split_payload, ChunkSequencer};

/// Join a remote file name onto a local directory.
///
/// Only the final path component of `file_name` is used, so names such as
/// `../../etc/passwd` or `/tmp/x` cannot escape `base`. Returns `None` when
/// nothing usable remains.
#[must_use]
pub fn download_path(base: &Path, file_name: &str) -> Option<PathBuf> {
    let name = Path::new(file_name)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .last()?;

    Some(base.join(name))
}
