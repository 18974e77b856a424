//! Chat messages and their payload variants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{base64_bytes, FileChunk, Identity, TransferKey};

const fn default_true() -> bool {
    true
}

/// What a message carries besides its optional text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    /// Plain text (or a name-only bookkeeping message when the text is absent)
    Text,
    /// Encoded image bytes
    Image {
        /// Image data
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// Recorded audio clip bytes
    Audio {
        /// Audio data
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// A file offered for download
    FileAnnouncement {
        /// Name of the shared file
        file_name: String,
        /// Size in bytes
        size: u64,
    },
    /// Ask the announcer of a file to send it
    FileRequest {
        /// Name of the requested file
        file_name: String,
        /// First byte wanted; zero together with `range_end` means the whole file
        #[serde(default)]
        range_start: u64,
        /// One past the last byte wanted
        #[serde(default)]
        range_end: u64,
    },
    /// A slice of a file in transit
    FileChunk(FileChunk),
}

/// A chat event travelling through the relay.
///
/// An empty recipient set means broadcast to everyone except the sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Who sent it
    pub sender: Identity,
    /// Optional text
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    recipients: Vec<Identity>,
    /// When it was created
    pub sent_at: DateTime<Utc>,
    #[serde(default = "default_true")]
    should_display: bool,
    /// Variant payload
    pub body: MessageBody,
}

impl Message {
    fn build(sender: Identity, text: Option<String>, body: MessageBody) -> Self {
        Self {
            sender,
            text,
            recipients: Vec::new(),
            sent_at: Utc::now(),
            should_display: true,
            body,
        }
    }

    /// A broadcast text message.
    pub fn text(sender: Identity, text: impl Into<String>) -> Self {
        Self::build(sender, Some(text.into()), MessageBody::Text)
    }

    /// A message with neither text nor payload that only carries the
    /// sender's current name. Never displayed.
    #[must_use]
    pub fn name_update(sender: Identity) -> Self {
        Self::build(sender, None, MessageBody::Text).hidden()
    }

    /// An image with an optional caption.
    #[must_use]
    pub fn image(sender: Identity, data: Vec<u8>, caption: Option<String>) -> Self {
        Self::build(sender, caption, MessageBody::Image { data })
    }

    /// An audio clip.
    #[must_use]
    pub fn audio(sender: Identity, data: Vec<u8>) -> Self {
        Self::build(sender, None, MessageBody::Audio { data })
    }

    /// Offer a file for download.
    pub fn file_announcement(sender: Identity, file_name: impl Into<String>, size: u64) -> Self {
        Self::build(
            sender,
            None,
            MessageBody::FileAnnouncement {
                file_name: file_name.into(),
                size,
            },
        )
    }

    /// Ask `owner` for a whole file.
    pub fn file_request(sender: Identity, owner: Identity, file_name: impl Into<String>) -> Self {
        Self::file_range_request(sender, owner, file_name, 0, 0)
    }

    /// Ask `owner` for the bytes `start..end` of a file.
    pub fn file_range_request(
        sender: Identity,
        owner: Identity,
        file_name: impl Into<String>,
        range_start: u64,
        range_end: u64,
    ) -> Self {
        Self::build(
            sender,
            None,
            MessageBody::FileRequest {
                file_name: file_name.into(),
                range_start,
                range_end,
            },
        )
        .hidden()
        .with_recipients([owner])
    }

    /// Wrap a chunk addressed to `recipient`.
    #[must_use]
    pub fn file_chunk(sender: Identity, recipient: Identity, chunk: FileChunk) -> Self {
        Self::build(sender, None, MessageBody::FileChunk(chunk))
            .hidden()
            .with_recipients([recipient])
    }

    /// Mark the message as not for display.
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.should_display = false;
        self
    }

    /// Address the message to the given identities.
    #[must_use]
    pub fn with_recipients(mut self, recipients: impl IntoIterator<Item = Identity>) -> Self {
        for recipient in recipients {
            self.add_recipient(recipient);
        }
        self
    }

    /// Add a recipient. Returns `false` if it was already present.
    pub fn add_recipient(&mut self, recipient: Identity) -> bool {
        if self.recipients.contains(&recipient) {
            return false;
        }
        self.recipients.push(recipient);
        true
    }

    /// Keep only the recipients for which `keep` returns `true`.
    pub fn narrow_recipients<F>(&mut self, keep: F)
    where
        F: FnMut(&Identity) -> bool,
    {
        self.recipients.retain(keep);
    }

    /// The explicit recipient set.
    #[must_use]
    pub fn recipients(&self) -> &[Identity] {
        &self.recipients
    }

    /// Whether the message goes to everyone except the sender.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.recipients.is_empty()
    }

    /// Whether the message is addressed to `identity`, either explicitly
    /// or by broadcast.
    #[must_use]
    pub fn is_addressed_to(&self, identity: &Identity) -> bool {
        self.is_broadcast() || self.recipients.contains(identity)
    }

    /// Whether the presentation layer should show it.
    #[must_use]
    pub const fn should_display(&self) -> bool {
        self.should_display
    }

    /// Name of the file this message concerns, if any.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        match &self.body {
            MessageBody::FileAnnouncement { file_name, .. }
            | MessageBody::FileRequest { file_name, .. } => Some(file_name),
            MessageBody::FileChunk(chunk) => Some(&chunk.file_name),
            MessageBody::Text | MessageBody::Image { .. } | MessageBody::Audio { .. } => None,
        }
    }

    /// The transfer this message belongs to, keyed by sender and file name.
    #[must_use]
    pub fn transfer_key(&self) -> Option<TransferKey> {
        self.file_name()
            .map(|name| TransferKey::new(self.sender.id(), name))
    }

    /// Short tag for log lines.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self.body {
            MessageBody::Text => "text",
            MessageBody::Image { .. } => "image",
            MessageBody::Audio { .. } => "audio",
            MessageBody::FileAnnouncement { .. } => "file_announcement",
            MessageBody::FileRequest { .. } => "file_request",
            MessageBody::FileChunk(_) => "file_chunk",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity::with_name("id-alice", "alice")
    }

    fn bob() -> Identity {
        Identity::with_name("id-bob", "bob")
    }

    #[test]
    fn test_text_is_broadcast_and_displayed() {
        let msg = Message::text(alice(), "hi");
        assert!(msg.is_broadcast());
        assert!(msg.should_display());
        assert_eq!(msg.text.as_deref(), Some("hi"));
        assert!(msg.is_addressed_to(&bob()));
    }

    #[test]
    fn test_add_recipient_refuses_duplicates() {
        let mut msg = Message::text(alice(), "hi");
        assert!(msg.add_recipient(bob()));
        assert!(!msg.add_recipient(Identity::with_name("id-bob", "robert")));
        assert_eq!(msg.recipients().len(), 1);
        assert!(!msg.is_broadcast());
    }

    #[test]
    fn test_file_request_is_hidden_and_targeted() {
        let msg = Message::file_request(bob(), alice(), "report.pdf");
        assert!(!msg.should_display());
        assert_eq!(msg.recipients(), &[alice()]);
        assert_eq!(msg.file_name(), Some("report.pdf"));
        assert!(matches!(
            msg.body,
            MessageBody::FileRequest {
                range_start: 0,
                range_end: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_file_chunk_message() {
        let chunk = FileChunk::first("a.bin", vec![1, 2], 2);
        let msg = Message::file_chunk(alice(), bob(), chunk);
        assert!(!msg.should_display());
        assert_eq!(
            msg.transfer_key(),
            Some(TransferKey::new("id-alice", "a.bin"))
        );
        assert_eq!(msg.kind(), "file_chunk");
    }

    #[test]
    fn test_name_update_is_hidden() {
        let msg = Message::name_update(alice());
        assert!(msg.text.is_none());
        assert!(!msg.should_display());
        assert_eq!(msg.body, MessageBody::Text);
    }

    #[test]
    fn test_narrow_recipients() {
        let carol = Identity::new("id-carol");
        let mut msg = Message::text(alice(), "hi").with_recipients([bob(), carol.clone()]);
        msg.narrow_recipients(|r| r.id() != "id-bob");
        assert_eq!(msg.recipients(), &[carol]);
    }

    #[test]
    fn test_json_shape() {
        let msg = Message::image(alice(), vec![0xff, 0x00], Some("cat".to_string()));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["body"]["kind"], "image");
        assert_eq!(json["body"]["data"], "/wA=");

        let decoded: Message = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.body, msg.body);
        assert_eq!(decoded.sender, alice());
    }

    #[test]
    fn test_missing_should_display_defaults_true() {
        let json = r#"{
            "sender": {"id": "x", "display_name": "x"},
            "sent_at": "2024-01-01T00:00:00Z",
            "body": {"kind": "text"},
            "text": "hello"
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert!(msg.should_display());
        assert!(msg.is_broadcast());
    }
}
