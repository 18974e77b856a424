//! Participant identities.

use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Distinguishes identities generated for the same address in the same instant.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Number of digest bytes kept in a generated id.
const ID_DIGEST_LEN: usize = 16;

/// A participant: a durable id plus a mutable display name.
///
/// Two identities are equal iff their ids are equal; the display name,
/// the change flag and the endpoint play no part in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    id: String,
    #[serde(default)]
    display_name: String,
    /// Edge-triggered rename flag, local to this process
    #[serde(skip)]
    name_changed: bool,
    /// Remote address of the direct connection, if any
    #[serde(skip)]
    endpoint: Option<SocketAddr>,
}

impl Identity {
    /// Create an identity from an existing id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: String::new(),
            name_changed: false,
            endpoint: None,
        }
    }

    /// Create an identity from an existing id with a display name.
    pub fn with_name(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            display_name: name.into(),
            ..Self::new(id)
        }
    }

    /// Create a fresh identity for a newly accepted connection.
    #[must_use]
    pub fn for_endpoint(endpoint: SocketAddr) -> Self {
        Self {
            endpoint: Some(endpoint),
            ..Self::new(Self::generate_id(Some(endpoint), Utc::now()))
        }
    }

    /// Generate an id from the remote address and the connection time.
    ///
    /// The id is a truncated SHA-256 digest of the address octets, the
    /// timestamp and a process-wide counter, encoded as URL-safe base64.
    /// Without an address there is nothing meaningful to hash, so the id
    /// falls back to [`Identity::fallback_id`].
    #[must_use]
    pub fn generate_id(endpoint: Option<SocketAddr>, at: DateTime<Utc>) -> String {
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);

        let Some(endpoint) = endpoint else {
            return Self::fallback_id("unknown", at, counter);
        };

        let mut hasher = Sha256::new();
        match endpoint.ip() {
            std::net::IpAddr::V4(ip) => hasher.update(ip.octets()),
            std::net::IpAddr::V6(ip) => hasher.update(ip.octets()),
        }
        hasher.update(at.to_rfc3339().as_bytes());
        hasher.update(counter.to_be_bytes());
        let digest = hasher.finalize();

        URL_SAFE_NO_PAD.encode(&digest[..ID_DIGEST_LEN])
    }

    /// Plain concatenation id: address, timestamp and counter.
    #[must_use]
    pub fn fallback_id(address: &str, at: DateTime<Utc>, counter: u64) -> String {
        format!("{address}-{}-{counter}", at.timestamp_millis())
    }

    /// The immutable id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The current display name (may be empty).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.display_name
    }

    /// Display name, or the id when no name has been set.
    #[must_use]
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.id
        } else {
            &self.display_name
        }
    }

    /// The remote endpoint, when this identity owns a direct connection.
    #[must_use]
    pub const fn endpoint(&self) -> Option<SocketAddr> {
        self.endpoint
    }

    /// Change the display name.
    ///
    /// Returns `true` and raises the change flag only when the value
    /// actually changes.
    pub fn set_name(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.display_name == name {
            return false;
        }
        self.display_name = name;
        self.name_changed = true;
        true
    }

    /// Whether the name changed since [`Identity::name_change_processed`] was last called.
    #[must_use]
    pub const fn has_name_changed(&self) -> bool {
        self.name_changed
    }

    /// Mark the pending name change as handled.
    pub fn name_change_processed(&mut self) {
        self.name_changed = false;
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.display_name.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{} ({})", self.display_name, self.id)
        }
    }
}
