//! Common test utilities for `Parley` integration tests.
//!
//! Each test starts its own relay on an ephemeral localhost port and talks
//! to it through real [`Backend`]s.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use parley_core::client::{Backend, BackendState, ChannelSink, ClientConfig, ClientEvent};
use parley_core::model::Message;
use parley_core::server::{Server, ServerConfig};

/// How long a test waits for any single expected event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// A relay running in the background.
pub struct TestRelay {
    pub addr: SocketAddr,
    pub stop: CancellationToken,
    pub handle: JoinHandle<()>,
}

impl TestRelay {
    /// Stop the relay and wait for its sessions to end.
    pub async fn shutdown(self) {
        self.stop.cancel();
        self.handle.await.expect("relay task");
    }
}

/// Start a relay on a free localhost port.
pub async fn start_relay() -> TestRelay {
    let server = Server::bind(ServerConfig {
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        keepalive_interval: Duration::from_secs(30),
    })
    .await
    .expect("Failed to bind relay");

    let addr = server.local_addr();
    let stop = server.shutdown_token();
    let handle = tokio::spawn(server.run());
    TestRelay { addr, stop, handle }
}

/// A connected client and the events it reports.
pub struct TestClient {
    pub backend: Arc<Backend>,
    pub events: UnboundedReceiver<ClientEvent>,
}

impl TestClient {
    /// The relay-assigned id of this client.
    pub fn id(&self) -> String {
        self.backend
            .identity()
            .expect("client is online")
            .id()
            .to_string()
    }

    /// Wait for the first event matching `pred`, discarding the others.
    pub async fn expect_event<F>(&mut self, what: &str, mut pred: F) -> ClientEvent
    where
        F: FnMut(&ClientEvent) -> bool,
    {
        let events = &mut self.events;
        tokio::time::timeout(EVENT_TIMEOUT, async {
            loop {
                let event = events.recv().await.expect("event channel closed");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
    }

    /// Wait for a displayed message with the given text.
    pub async fn expect_text(&mut self, text: &str) -> Message {
        let event = self
            .expect_event(text, |e| {
                matches!(e, ClientEvent::MessageReceived(m) if m.text.as_deref() == Some(text))
            })
            .await;
        match event {
            ClientEvent::MessageReceived(message) => message,
            _ => unreachable!(),
        }
    }

    /// Collect displayed texts until `until` arrives (inclusive).
    pub async fn texts_until(&mut self, until: &str) -> Vec<String> {
        let mut seen = Vec::new();
        let events = &mut self.events;
        tokio::time::timeout(EVENT_TIMEOUT, async {
            loop {
                if let ClientEvent::MessageReceived(m) =
                    events.recv().await.expect("event channel closed")
                {
                    if let Some(text) = m.text {
                        let done = text == until;
                        seen.push(text);
                        if done {
                            return;
                        }
                    }
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {until}"));
        seen
    }

    /// Stop the backend and wait for its task.
    pub async fn shutdown(self) {
        self.backend.stop();
        self.backend.wait().await;
    }
}

/// Client settings tuned for fast tests.
pub fn client_config(addr: SocketAddr, name: &str, download_dir: &Path) -> ClientConfig {
    ClientConfig {
        server: addr.to_string(),
        display_name: Some(name.to_string()),
        download_dir: download_dir.to_path_buf(),
        chunk_size: 64 * 1024,
        min_chunk_size: 1024,
        poll_interval: Duration::from_millis(20),
        ..ClientConfig::default()
    }
}

/// Start a client and wait until it is online.
pub async fn connect_client(config: ClientConfig) -> TestClient {
    let backend = Backend::new(config);
    let (sink, events) = ChannelSink::new();
    backend.bind_sink(sink);
    backend.start();

    let state = tokio::time::timeout(EVENT_TIMEOUT, backend.wait_for_state(BackendState::Online))
        .await
        .expect("timed out connecting");
    assert_eq!(state, BackendState::Online, "client failed to come online");

    TestClient { backend, events }
}

/// Create a temporary directory for test files.
///
/// The directory will be automatically cleaned up when the returned
/// `TempDir` is dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directories");
    }
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Assert that two files have identical content.
pub fn assert_files_equal(path1: &Path, path2: &Path) {
    let content1 = std::fs::read(path1).expect("Failed to read first file");
    let content2 = std::fs::read(path2).expect("Failed to read second file");
    assert_eq!(content1, content2, "File contents differ");
}
