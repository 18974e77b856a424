//! Entity model shared by the relay and its clients.
//!
//! Everything here is plain data: identities, messages and file chunks.
//! All of it travels inside protocol frames as JSON.

mod chunk;
mod identity;
mod message;

pub use chunk::{FileChunk, TransferKey};
pub use identity::Identity;
pub use message::{Message, MessageBody};

/// Serde helper for `Vec<u8>` fields encoded as standard base64 strings.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
