//! Client side of the relay.
//!
//! A [`Backend`] owns one connection to the relay and exposes a
//! non-blocking sending API. What arrives is handed to a
//! [`PresentationSink`], typically a [`ChannelSink`] whose events are
//! consumed by a UI loop.

mod backend;
mod sink;

use std::path::PathBuf;
use std::time::Duration;

pub use backend::{Backend, BackendState, MAX_BATCH_MESSAGES, OUTBOUND_HIGH_WATER};
pub use sink::{ChannelSink, ClientEvent, PresentationSink};

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay address (`IP`, `IP:PORT`, `[IPv6]:PORT` or a host name)
    pub server: String,
    /// Name to announce right after joining
    pub display_name: Option<String>,
    /// Where downloads are written
    pub download_dir: PathBuf,
    /// Preferred size of outgoing file chunks
    pub chunk_size: usize,
    /// Smallest outgoing chunk unless the file ends sooner
    pub min_chunk_size: usize,
    /// Bounded wait of the network loop and of file senders
    pub poll_interval: Duration,
    /// Limit for each handshake frame
    pub handshake_timeout: Duration,
    /// Limit for the TCP connect
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: format!("127.0.0.1:{}", crate::DEFAULT_PORT),
            display_name: None,
            download_dir: PathBuf::from("."),
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            min_chunk_size: crate::MIN_CHUNK_SIZE,
            poll_interval: crate::DEFAULT_POLL_INTERVAL,
            handshake_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
        }
    }
}
