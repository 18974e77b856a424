//! UI utilities for Parley CLI.

use parley_core::model::{Identity, Message, MessageBody};

/// Characters of an id shown to users.
const SHORT_ID_LEN: usize = 8;

/// Format a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    #[allow(clippy::cast_precision_loss)]
    let value = bytes as f64;
    if bytes >= GB {
        format!("{:.1} GB", value / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", value / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", value / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Leading characters of an id, enough to address a peer.
pub fn short_id(id: &str) -> &str {
    id.char_indices()
        .nth(SHORT_ID_LEN)
        .map_or(id, |(end, _)| &id[..end])
}

/// `name (abcd1234)`, or just the short id for unnamed peers.
pub fn format_peer(peer: &Identity) -> String {
    if peer.name().is_empty() {
        short_id(peer.id()).to_string()
    } else {
        format!("{} ({})", peer.name(), short_id(peer.id()))
    }
}

/// One line of chat output for a displayed message.
pub fn format_message(message: &Message) -> String {
    let time = message
        .sent_at
        .with_timezone(&chrono::Local)
        .format("%H:%M:%S");
    let who = message.sender.label();
    let text = message.text.as_deref().unwrap_or_default();

    let body = match &message.body {
        MessageBody::Text => text.to_string(),
        MessageBody::Image { data } => {
            with_caption(format!("[image, {}]", format_size(data.len() as u64)), text)
        }
        MessageBody::Audio { data } => {
            with_caption(format!("[audio, {}]", format_size(data.len() as u64)), text)
        }
        MessageBody::FileAnnouncement { file_name, size } => format!(
            "shares {} ({}), fetch with: /get {} {}",
            file_name,
            format_size(*size),
            short_id(message.sender.id()),
            file_name
        ),
        MessageBody::FileRequest { file_name, .. } => format!("requested {file_name}"),
        MessageBody::FileChunk(chunk) => format!("[chunk {} of {}]", chunk.sequence, chunk.file_name),
    };

    let private = if message.is_broadcast() { "" } else { " (private)" };
    format!("[{time}] {who}{private}: {body}")
}

fn with_caption(label: String, caption: &str) -> String {
    if caption.is_empty() {
        label
    } else {
        format!("{label} {caption}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.0 GB");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("abcdefghijkl"), "abcdefgh");
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id(""), "");
    }

    #[test]
    fn test_format_peer() {
        assert_eq!(format_peer(&Identity::new("0123456789ab")), "01234567");
        assert_eq!(
            format_peer(&Identity::with_name("0123456789ab", "alice")),
            "alice (01234567)"
        );
    }

    #[test]
    fn test_format_message_variants() {
        let alice = Identity::with_name("0123456789ab", "alice");

        let line = format_message(&Message::text(alice.clone(), "hello"));
        assert!(line.ends_with("alice: hello"), "{line}");

        let line = format_message(&Message::file_announcement(alice.clone(), "a.bin", 2048));
        assert!(line.contains("shares a.bin (2.0 KB)"), "{line}");
        assert!(line.contains("/get 01234567 a.bin"), "{line}");

        let line = format_message(&Message::image(alice.clone(), vec![0; 10], Some("cat".into())));
        assert!(line.ends_with("[image, 10 B] cat"), "{line}");

        let bob = Identity::with_name("bob-id", "bob");
        let line = format_message(&Message::text(alice, "psst").with_recipients([bob]));
        assert!(line.contains("alice (private): psst"), "{line}");
    }
}
