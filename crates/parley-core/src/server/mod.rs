//! The relay server.
//!
//! One listener, one [`ClientSession`] task per accepted connection and a
//! shared [`Router`] that fans messages out between them.
//!
//! ## Example
//!
//! ```rust,ignore
//! use parley_core::server::{Server, ServerConfig};
//!
//! let server = Server::bind(ServerConfig::default()).await?;
//! println!("listening on {}", server.local_addr());
//! let stop = server.shutdown_token();
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     stop.cancel();
//! });
//! server.run().await;
//! ```

mod router;
mod session;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub use router::{PeerSender, Router};
pub use session::{ClientSession, SessionConfig, SessionState};

use crate::connection::configure_tcp_keepalive;
use crate::error::Result;
use crate::model::Identity;

/// Relay server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind_address: IpAddr,
    /// TCP port; 0 picks a free one
    pub port: u16,
    /// Idle time after which sessions send a keep-alive frame
    pub keepalive_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: crate::DEFAULT_PORT,
            keepalive_interval: Duration::from_secs(15),
        }
    }
}

/// A bound relay, ready to accept clients.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    router: Arc<Router>,
    session_config: SessionConfig,
    shutdown: CancellationToken,
}

impl Server {
    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::new(config.bind_address, config.port)).await?;
        let local_addr = listener.local_addr()?;

        tracing::info!("Relay listening on {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
            router: Arc::new(Router::new()),
            session_config: SessionConfig {
                keepalive_interval: config.keepalive_interval,
            },
            shutdown: CancellationToken::new(),
        })
    }

    /// The address actually bound.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The shared registry.
    #[must_use]
    pub fn router(&self) -> Arc<Router> {
        Arc::clone(&self.router)
    }

    /// Token that stops the server when cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept clients until the shutdown token is cancelled, then wait for
    /// every session to finish.
    pub async fn run(self) {
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => break,

                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!("Accept failed: {}", e);
                            continue;
                        }
                    };

                    if let Err(e) = configure_tcp_keepalive(&stream) {
                        tracing::debug!("Could not enable keep-alive for {}: {}", peer_addr, e);
                    }
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!("Could not disable Nagle for {}: {}", peer_addr, e);
                    }

                    let identity = Identity::for_endpoint(peer_addr);
                    tracing::info!("Connection from {} as {}", peer_addr, identity.id());

                    let mut session = ClientSession::new(
                        stream,
                        identity,
                        Arc::clone(&self.router),
                        self.session_config.clone(),
                    );
                    let token = self.shutdown.child_token();
                    sessions.spawn(async move { session.run(token).await });
                }

                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = finished {
                        tracing::warn!("Session task failed: {}", e);
                    }
                }
            }
        }

        tracing::info!("Relay shutting down, {} session(s) open", sessions.len());
        while let Some(finished) = sessions.join_next().await {
            if let Err(e) = finished {
                tracing::warn!("Session task failed: {}", e);
            }
        }
    }
}
