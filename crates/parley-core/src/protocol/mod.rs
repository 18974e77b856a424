//! PRLY (Parley Relay) wire protocol implementation.
//!
//! Every frame is a fixed header followed by a JSON payload.
//!
//! ## Frame Format
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      PRLY Frame                            │
//! ├────────────┬────────────┬────────────┬─────────────────────┤
//! │   Magic    │  Version   │    Tag     │      Length         │
//! │  4 bytes   │  2 bytes   │   1 byte   │      4 bytes        │
//! ├────────────┴────────────┴────────────┴─────────────────────┤
//! │                        Payload                             │
//! │                    (variable length)                       │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! - Magic: `0x50 0x52 0x4C 0x59` ("PRLY")
//! - Version: `0x01 0x00` (1.0)
//! - Tag: frame tag byte, see [`FrameTag`]
//! - Length: Payload length in bytes (big-endian)
//!
//! Frames with a tag this build does not know decode to
//! [`Frame::Unknown`]; their payload is skipped.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::model::{Identity, Message};

/// Protocol magic bytes: "PRLY"
pub const MAGIC: [u8; 4] = [0x50, 0x52, 0x4C, 0x59];

/// Frame header size in bytes
pub const HEADER_SIZE: usize = 11;

/// Maximum payload size (32 MB)
pub const MAX_PAYLOAD_SIZE: usize = 32 * 1024 * 1024;

/// Largest encoded message a client will queue. The margin leaves room for
/// the array brackets and for the sender stamp applied at write time.
pub const MAX_MESSAGE_SIZE: usize = MAX_PAYLOAD_SIZE - 64 * 1024;

/// Frame tags in the PRLY protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameTag {
    /// Server tells a client who it is
    Identity = 0x01,
    /// Server sends the current roster
    Roster = 0x02,
    /// A batch of messages
    Message = 0x03,
    /// A peer joined
    ClientConnect = 0x04,
    /// A peer left
    ClientDisconnect = 0x05,
    /// Keep-alive, no payload
    None = 0x06,
    /// Orderly goodbye, no payload
    Disconnect = 0x07,
}

impl FrameTag {
    /// Parse a frame tag from a byte.
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Identity),
            0x02 => Some(Self::Roster),
            0x03 => Some(Self::Message),
            0x04 => Some(Self::ClientConnect),
            0x05 => Some(Self::ClientDisconnect),
            0x06 => Some(Self::None),
            0x07 => Some(Self::Disconnect),
            _ => None,
        }
    }
}

/// A protocol frame header.
#[derive(Debug, Clone)]
pub struct FrameHeader {
    /// Protocol version (major, minor)
    pub version: (u8, u8),
    /// Raw tag byte; may be a tag this build does not know
    pub tag: u8,
    /// Payload length
    pub payload_length: u32,
}

impl FrameHeader {
    /// Encode the header to bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4] = self.version.0;
        buf[5] = self.version.1;
        buf[6] = self.tag;
        buf[7..11].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Decode a header from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error on bad magic or an oversized payload length.
    /// Unknown tags are not an error.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        if buf[0..4] != MAGIC {
            return Err(Error::ProtocolError("invalid magic bytes".to_string()));
        }

        let version = (buf[4], buf[5]);
        let tag = buf[6];
        let payload_length = u32::from_be_bytes([buf[7], buf[8], buf[9], buf[10]]);

        if payload_length as usize > MAX_PAYLOAD_SIZE {
            return Err(Error::ProtocolError(format!(
                "payload too large: {payload_length} bytes"
            )));
        }

        Ok(Self {
            version,
            tag,
            payload_length,
        })
    }

    /// The known tag, if any.
    #[must_use]
    pub const fn frame_tag(&self) -> Option<FrameTag> {
        FrameTag::from_byte(self.tag)
    }
}

/// A decoded frame.
#[derive(Debug, Clone)]
pub enum Frame {
    /// The receiving client's own identity
    Identity(Identity),
    /// Identities already connected, keyed by id
    Roster(HashMap<String, Identity>),
    /// A batch of messages
    Messages(Vec<Message>),
    /// A peer joined
    ClientConnect(Identity),
    /// A peer left
    ClientDisconnect(Identity),
    /// Keep-alive
    None,
    /// Orderly goodbye
    Disconnect,
    /// A tag this build does not know; the payload was skipped
    Unknown(u8),
}

impl Frame {
    /// The tag byte this frame is sent with.
    #[must_use]
    pub const fn tag(&self) -> u8 {
        match self {
            Self::Identity(_) => FrameTag::Identity as u8,
            Self::Roster(_) => FrameTag::Roster as u8,
            Self::Messages(_) => FrameTag::Message as u8,
            Self::ClientConnect(_) => FrameTag::ClientConnect as u8,
            Self::ClientDisconnect(_) => FrameTag::ClientDisconnect as u8,
            Self::None => FrameTag::None as u8,
            Self::Disconnect => FrameTag::Disconnect as u8,
            Self::Unknown(tag) => *tag,
        }
    }

    /// Human-readable frame name for logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Identity(_) => "identity",
            Self::Roster(_) => "roster",
            Self::Messages(_) => "message",
            Self::ClientConnect(_) => "clientConnect",
            Self::ClientDisconnect(_) => "clientDisconnect",
            Self::None => "none",
            Self::Disconnect => "disconnect",
            Self::Unknown(_) => "unknown",
        }
    }

    /// Encode the payload part of this frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_payload(&self) -> Result<Vec<u8>> {
        match self {
            Self::Identity(identity)
            | Self::ClientConnect(identity)
            | Self::ClientDisconnect(identity) => encode_payload(identity),
            Self::Roster(roster) => encode_payload(roster),
            Self::Messages(messages) => encode_payload(messages),
            Self::None | Self::Disconnect | Self::Unknown(_) => Ok(Vec::new()),
        }
    }

    /// Encode the complete frame, header included.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the payload is too large.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = self.encode_payload()?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::ProtocolError(format!(
                "payload too large: {} bytes",
                payload.len()
            )));
        }

        #[allow(clippy::cast_possible_truncation)]
        let header = FrameHeader {
            version: crate::PROTOCOL_VERSION,
            tag: self.tag(),
            payload_length: payload.len() as u32,
        };

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(&header.encode());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode a frame from its header and payload.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if the payload of a known tag is malformed.
    pub fn decode(header: &FrameHeader, payload: &[u8]) -> Result<Self> {
        let Some(tag) = header.frame_tag() else {
            return Ok(Self::Unknown(header.tag));
        };

        Ok(match tag {
            FrameTag::Identity => Self::Identity(decode_payload(payload)?),
            FrameTag::Roster => Self::Roster(decode_payload(payload)?),
            FrameTag::Message => Self::Messages(decode_payload(payload)?),
            FrameTag::ClientConnect => Self::ClientConnect(decode_payload(payload)?),
            FrameTag::ClientDisconnect => Self::ClientDisconnect(decode_payload(payload)?),
            FrameTag::None => Self::None,
            FrameTag::Disconnect => Self::Disconnect,
        })
    }
}

/// Encode a frame payload to JSON bytes.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_payload<T: Serialize>(payload: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(payload).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode a frame payload from JSON bytes.
///
/// # Errors
///
/// Returns an error if deserialization fails.
pub fn decode_payload<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T> {
    serde_json::from_slice(data).map_err(|e| Error::Serialization(e.to_string()))
}

/// Write a complete frame to a stream.
///
/// # Errors
///
/// Returns an error if encoding or writing fails.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = frame.encode()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Incremental frame reader.
///
/// Bytes are accumulated in an owned buffer and a frame is only consumed
/// once it is complete, so [`FrameReader::next_frame`] is cancel-safe and
/// can sit in a `tokio::select!` branch.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a read half.
    pub const fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
        }
    }

    /// Read the next complete frame.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConnectionClosed` at end of stream, a protocol error
    /// on a bad header, or `Error::Serialization` if a known tag carries a
    /// malformed payload (that frame is consumed and reading can continue).
    pub async fn next_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.take_buffered()? {
                return frame;
            }

            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Read the next frame, giving up after `duration`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Timeout` if no complete frame arrives in time. No
    /// buffered bytes are lost on timeout.
    pub async fn next_frame_with_timeout(&mut self, duration: Duration) -> Result<Frame> {
        timeout(duration, self.next_frame())
            .await
            .map_err(|_| Error::Timeout(duration_millis(duration)))?
    }

    /// Bytes received but not yet consumed as a frame.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    fn take_buffered(&mut self) -> Result<Option<Result<Frame>>> {
        if self.buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut header_buf = [0u8; HEADER_SIZE];
        header_buf.copy_from_slice(&self.buf[..HEADER_SIZE]);
        let header = FrameHeader::decode(&header_buf)?;

        let frame_len = HEADER_SIZE + header.payload_length as usize;
        if self.buf.len() < frame_len {
            return Ok(None);
        }

        let frame = Frame::decode(&header, &self.buf[HEADER_SIZE..frame_len]);
        self.buf.drain(..frame_len);
        Ok(Some(frame))
    }
}

/// Milliseconds in a duration, saturating.
pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
