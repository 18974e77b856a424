//! # Parley Core Library
//!
//! `parley-core` provides the core functionality for Parley, a small
//! real-time chat relay with chunked file transfer.
//!
//! ## Features
//!
//! - **Relay**: one server fans chat events out to every client or to an
//!   explicit recipient set
//! - **Presence**: clients learn who is online and see joins, leaves and renames
//! - **File transfer**: files travel as sequenced chunks and are reassembled
//!   on arrival, in any order
//!
//! ## Modules
//!
//! - [`client`] - Client backend and presentation hooks
//! - [`config`] - Configuration management
//! - [`connection`] - Address parsing and TCP helpers
//! - [`model`] - Identities, messages and file chunks
//! - [`protocol`] - PRLY wire protocol implementation
//! - [`server`] - Relay server, router and per-connection sessions
//! - [`transfer`] - Chunk sequencer and reassembler
//!
//! ## Example
//!
//! ```rust,ignore
//! use parley_core::client::{Backend, ChannelSink};
//! use parley_core::config::Config;
//! use parley_core::server::Server;
//!
//! let config = Config::load()?;
//! let server = Server::bind(config.server_config()).await?;
//! tokio::spawn(server.run());
//!
//! let backend = Backend::new(config.client_config());
//! let (sink, mut events) = ChannelSink::new();
//! backend.bind_sink(sink);
//! backend.start();
//! backend.send_text("hello");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod model;
pub mod protocol;
pub mod server;
pub mod transfer;

pub use error::{Error, Result};

use std::time::Duration;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol version for PRLY
pub const PROTOCOL_VERSION: (u8, u8) = (1, 0);

/// Default relay port (TCP)
pub const DEFAULT_PORT: u16 = 5476;

/// Preferred chunk size for file transfers (512 KB)
pub const DEFAULT_CHUNK_SIZE: usize = 512 * 1024;

/// Smallest chunk a sender emits unless the file ends sooner (1 KB)
pub const MIN_CHUNK_SIZE: usize = 1024;

/// Largest configurable chunk size (1 MB)
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Default wait of the client loop before it checks for shutdown
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
