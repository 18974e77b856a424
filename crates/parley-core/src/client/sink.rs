//! Hooks through which the backend reaches the presentation layer.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::model::{Identity, Message, TransferKey};

/// Receives everything the backend wants a human to see.
///
/// Implementations are called from the backend task and must not block.
pub trait PresentationSink: Send + Sync {
    /// A displayable message arrived (or was echoed after sending).
    fn on_message_received(&self, message: &Message);

    /// The full roster was (re)loaded.
    fn on_roster_changed(&self, roster: &HashMap<String, Identity>);

    /// A peer appeared or changed its name.
    fn on_peer_added(&self, peer: &Identity);

    /// A peer left.
    fn on_peer_removed(&self, peer: &Identity);

    /// A download finished writing its last chunk.
    fn on_transfer_complete(&self, _key: &TransferKey, _bytes: u64) {}
}

/// Presentation events as plain values.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// See [`PresentationSink::on_message_received`]
    MessageReceived(Message),
    /// See [`PresentationSink::on_roster_changed`]
    RosterChanged(HashMap<String, Identity>),
    /// See [`PresentationSink::on_peer_added`]
    PeerAdded(Identity),
    /// See [`PresentationSink::on_peer_removed`]
    PeerRemoved(Identity),
    /// See [`PresentationSink::on_transfer_complete`]
    TransferComplete {
        /// Which download
        key: TransferKey,
        /// Bytes written
        bytes: u64,
    },
}

/// A sink that forwards every hook as a [`ClientEvent`] on a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn emit(&self, event: ClientEvent) {
        // Nobody listening any more is fine.
        let _ = self.tx.send(event);
    }
}

impl PresentationSink for ChannelSink {
    fn on_message_received(&self, message: &Message) {
        self.emit(ClientEvent::MessageReceived(message.clone()));
    }

    fn on_roster_changed(&self, roster: &HashMap<String, Identity>) {
        self.emit(ClientEvent::RosterChanged(roster.clone()));
    }

    fn on_peer_added(&self, peer: &Identity) {
        self.emit(ClientEvent::PeerAdded(peer.clone()));
    }

    fn on_peer_removed(&self, peer: &Identity) {
        self.emit(ClientEvent::PeerRemoved(peer.clone()));
    }

    fn on_transfer_complete(&self, key: &TransferKey, bytes: u64) {
        self.emit(ClientEvent::TransferComplete {
            key: key.clone(),
            bytes,
        });
    }
}
