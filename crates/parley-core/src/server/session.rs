//! One relay-side session per connected client.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::router::Router;
use crate::error::{Error, ErrorClass, Result};
use crate::model::{Identity, Message};
use crate::protocol::{write_frame, Frame, FrameReader};

/// Lifecycle of a [`ClientSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport accepted, not yet registered
    Connected,
    /// Registered and relaying
    Active,
    /// Goodbye received or shutdown requested
    Disconnecting,
    /// Unregistered and transport shut down
    Closed,
}

/// Per-session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Idle time after which a `none` keep-alive frame is written
    pub keepalive_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(15),
        }
    }
}

/// Relays between one client connection and the [`Router`].
#[derive(Debug)]
pub struct ClientSession<S> {
    identity: Identity,
    router: Arc<Router>,
    config: SessionConfig,
    state: SessionState,
    stream: Option<S>,
    registration: Option<mpsc::WeakUnboundedSender<Frame>>,
}

impl<S> ClientSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a session for an accepted stream.
    pub fn new(
        stream: S,
        identity: Identity,
        router: Arc<Router>,
        config: SessionConfig,
    ) -> Self {
        Self {
            identity,
            router,
            config,
            state: SessionState::Connected,
            stream: Some(stream),
            registration: None,
        }
    }

    /// The identity assigned to this client.
    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session until the client leaves, the connection fails or
    /// `shutdown` is cancelled. Always ends in [`SessionState::Closed`].
    pub async fn run(&mut self, shutdown: CancellationToken) {
        let Some(stream) = self.stream.take() else {
            return;
        };
        let (read_half, mut writer) = tokio::io::split(stream);
        let mut reader = FrameReader::new(read_half);

        let (tx, mut outbound) = mpsc::unbounded_channel();
        self.registration = Some(tx.downgrade());
        let prior = self.router.register(self.identity.clone(), tx);
        self.state = SessionState::Active;

        let result = match self.handshake(&mut writer, prior).await {
            Ok(()) => {
                self.relay(&mut reader, &mut writer, &mut outbound, &shutdown)
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) | Err(Error::ConnectionClosed) => {
                tracing::debug!(peer = %self.identity, "Session ended");
            }
            Err(e) => {
                tracing::warn!(peer = %self.identity, "Session failed: {}", e);
            }
        }

        self.close(&mut writer).await;
    }

    async fn handshake(&self, writer: &mut WriteHalf<S>, prior: Vec<Identity>) -> Result<()> {
        write_frame(writer, &Frame::Identity(self.identity.clone())).await?;

        let roster = prior
            .into_iter()
            .map(|identity| (identity.id().to_string(), identity))
            .collect();
        write_frame(writer, &Frame::Roster(roster)).await
    }

    async fn relay(
        &mut self,
        reader: &mut FrameReader<ReadHalf<S>>,
        writer: &mut WriteHalf<S>,
        outbound: &mut mpsc::UnboundedReceiver<Frame>,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        let keepalive = self.config.keepalive_interval;
        let idle = tokio::time::sleep(keepalive);
        tokio::pin!(idle);

        while self.state == SessionState::Active {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::debug!(peer = %self.identity, "Shutdown requested");
                    let _ = write_frame(writer, &Frame::Disconnect).await;
                    self.state = SessionState::Disconnecting;
                }

                frame = outbound.recv() => {
                    let Some(frame) = frame else {
                        // Replaced by a newer registration of the same id.
                        self.state = SessionState::Disconnecting;
                        continue;
                    };
                    write_frame(writer, &frame).await?;
                    idle.as_mut().reset(Instant::now() + keepalive);
                }

                result = reader.next_frame() => match result {
                    Ok(frame) => self.handle_frame(frame),
                    Err(e) => match e.class() {
                        ErrorClass::Fatal => return Err(e),
                        _ => tracing::debug!(peer = %self.identity, "Ignoring bad frame: {}", e),
                    },
                },

                () = &mut idle => {
                    write_frame(writer, &Frame::None).await?;
                    idle.as_mut().reset(Instant::now() + keepalive);
                }
            }
        }

        Ok(())
    }

    fn handle_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Messages(batch) => self.handle_batch(batch),
            Frame::Disconnect => {
                tracing::debug!(peer = %self.identity, "Client said goodbye");
                self.state = SessionState::Disconnecting;
            }
            Frame::None => {}
            other => {
                tracing::debug!(
                    peer = %self.identity,
                    frame = other.name(),
                    "Ignoring frame not meant for the relay"
                );
            }
        }
    }

    fn handle_batch(&mut self, mut batch: Vec<Message>) {
        let Some(last) = batch.last() else {
            return;
        };

        let claimed = last.sender.name().to_string();
        if !claimed.is_empty() && self.identity.set_name(claimed) && self.identity.has_name_changed() {
            self.router.rename(self.identity.id(), self.identity.name());
            self.identity.name_change_processed();
            tracing::info!(peer = %self.identity, "Client renamed");
        }

        for message in &mut batch {
            message.sender = self.identity.clone();
        }

        let delivered = self.router.route_batch(&batch);
        tracing::debug!(
            peer = %self.identity,
            messages = batch.len(),
            delivered,
            "Relayed batch"
        );
    }

    /// Leave the router and shut the transport down. Runs at most once.
    async fn close(&mut self, writer: &mut WriteHalf<S>) {
        if self.state == SessionState::Closed {
            return;
        }
        // Only the router holds a strong sender, so a failed upgrade means
        // a newer session of the same id has taken over the entry.
        if let Some(tx) = self.registration.take().and_then(|weak| weak.upgrade()) {
            self.router.unregister_channel(&self.identity, &tx);
        }
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(peer = %self.identity, "Shutdown of closed socket: {}", e);
        }
        self.state = SessionState::Closed;
    }
}
