//! Presence registry and message fan-out.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::model::{Identity, Message};
use crate::protocol::Frame;

/// Outbound frame queue of one client session.
pub type PeerSender = mpsc::UnboundedSender<Frame>;

#[derive(Debug, Clone)]
struct PeerHandle {
    identity: Identity,
    outbound: PeerSender,
}

/// Registry of connected identities.
///
/// Every operation locks once, copies what it needs, releases the lock and
/// only then enqueues frames, so the lock is never held across I/O.
#[derive(Debug, Default)]
pub struct Router {
    peers: Mutex<HashMap<String, PeerHandle>>,
}

impl Router {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn peers(&self) -> MutexGuard<'_, HashMap<String, PeerHandle>> {
        // A panic elsewhere while holding the lock leaves the map intact.
        self.peers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register `identity` with its outbound queue.
    ///
    /// Returns the identities that were registered before it; each of them
    /// is sent a `clientConnect` notice. Registering an id again replaces
    /// the old entry.
    pub fn register(&self, identity: Identity, outbound: PeerSender) -> Vec<Identity> {
        let (prior, notify): (Vec<Identity>, Vec<PeerSender>) = {
            let mut peers = self.peers();
            let snapshot = peers
                .values()
                .filter(|p| p.identity != identity)
                .map(|p| (p.identity.clone(), p.outbound.clone()))
                .unzip();
            peers.insert(
                identity.id().to_string(),
                PeerHandle {
                    identity: identity.clone(),
                    outbound,
                },
            );
            snapshot
        };

        tracing::info!(peer = %identity, online = prior.len() + 1, "Client joined");
        for tx in notify {
            deliver(&tx, Frame::ClientConnect(identity.clone()));
        }
        prior
    }

    /// Remove `identity`. Returns `false` if it was not registered.
    ///
    /// Remaining peers are sent a `clientDisconnect` notice.
    pub fn unregister(&self, identity: &Identity) -> bool {
        self.remove_where(identity, |_| true)
    }

    /// Remove `identity` only while it is still registered with `outbound`.
    ///
    /// A session that was replaced by a newer registration of the same id
    /// uses this on its way out, so it cannot evict its successor.
    pub fn unregister_channel(&self, identity: &Identity, outbound: &PeerSender) -> bool {
        self.remove_where(identity, |handle| handle.outbound.same_channel(outbound))
    }

    fn remove_where<F>(&self, identity: &Identity, owned: F) -> bool
    where
        F: FnOnce(&PeerHandle) -> bool,
    {
        let (removed, notify) = {
            let mut peers = self.peers();
            let removed = match peers.get(identity.id()) {
                Some(handle) if owned(handle) => peers.remove(identity.id()),
                _ => None,
            };
            let notify: Vec<PeerSender> = peers.values().map(|p| p.outbound.clone()).collect();
            (removed, notify)
        };

        let Some(removed) = removed else {
            return false;
        };

        tracing::info!(peer = %removed.identity, online = notify.len(), "Client left");
        for tx in notify {
            deliver(&tx, Frame::ClientDisconnect(removed.identity.clone()));
        }
        true
    }

    /// Deliver one message. Returns the number of peers it was queued for.
    ///
    /// With no recipients the message goes to everyone except its sender.
    /// Otherwise only registered recipients get it; unknown ids and the
    /// sender itself are skipped.
    pub fn route(&self, message: &Message) -> usize {
        let targets: Vec<PeerSender> = {
            let peers = self.peers();
            if message.is_broadcast() {
                peers
                    .values()
                    .filter(|p| p.identity != message.sender)
                    .map(|p| p.outbound.clone())
                    .collect()
            } else {
                let mut seen = std::collections::HashSet::new();
                message
                    .recipients()
                    .iter()
                    .filter(|r| **r != message.sender && seen.insert(r.id()))
                    .filter_map(|r| peers.get(r.id()))
                    .map(|p| p.outbound.clone())
                    .collect()
            }
        };

        let frame = Frame::Messages(vec![message.clone()]);
        let delivered = targets
            .iter()
            .filter(|tx| deliver(tx, frame.clone()))
            .count();

        tracing::debug!(
            sender = message.sender.id(),
            kind = message.kind(),
            delivered,
            "Routed message"
        );
        delivered
    }

    /// Route every message of a batch in order.
    pub fn route_batch(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.route(m)).sum()
    }

    /// Update the display name recorded for a registered id.
    pub fn rename(&self, id: &str, name: &str) -> bool {
        let mut peers = self.peers();
        match peers.get_mut(id) {
            Some(peer) => {
                peer.identity.set_name(name);
                peer.identity.name_change_processed();
                true
            }
            None => false,
        }
    }

    /// Snapshot of every registered identity, keyed by id.
    pub fn roster(&self) -> HashMap<String, Identity> {
        self.peers()
            .iter()
            .map(|(id, p)| (id.clone(), p.identity.clone()))
            .collect()
    }

    /// Snapshot of every registered identity except `id`.
    pub fn roster_except(&self, id: &str) -> HashMap<String, Identity> {
        let mut roster = self.roster();
        roster.remove(id);
        roster
    }

    /// Number of registered identities.
    pub fn len(&self) -> usize {
        self.peers().len()
    }

    /// Whether nobody is registered.
    pub fn is_empty(&self) -> bool {
        self.peers().is_empty()
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.peers().contains_key(id)
    }
}

fn deliver(tx: &PeerSender, frame: Frame) -> bool {
    if tx.send(frame).is_err() {
        tracing::debug!("Peer queue closed, frame dropped");
        return false;
    }
    true
}
