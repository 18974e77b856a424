//! Error types for Parley.
//!
//! This module provides a unified error type for all Parley operations,
//! with specific error variants for different failure modes. Every error
//! also maps onto an [`ErrorClass`], which is what the I/O loops use to
//! decide whether to keep going or tear the connection down.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for Parley operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Parley.
#[derive(Error, Debug)]
pub enum Error {
    /// The peer closed the stream
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// An operation needed an established identity
    #[error("not connected to a relay")]
    NotConnected,

    /// Invalid protocol frame
    #[error("invalid protocol frame: {0}")]
    ProtocolError(String),

    /// Unexpected frame during a handshake
    #[error("unexpected frame: expected {expected}, got {actual}")]
    UnexpectedFrame {
        /// Expected frame tag
        expected: String,
        /// Actual frame tag received
        actual: String,
    },

    /// File not found
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// A file request named a file that is not shared
    #[error("file '{0}' is not shared")]
    NotShared(String),

    /// The chunk source ended before the declared length
    #[error("source for '{file}' ended after {read} of {expected} bytes")]
    TruncatedSource {
        /// File being sequenced
        file: String,
        /// Bytes actually read
        read: u64,
        /// Bytes declared
        expected: u64,
    },

    /// Transfer offsets would not fit the wire format
    #[error("transfer of {0} bytes exceeds the maximum transfer size")]
    TransferTooLarge(u64),

    /// Invalid user input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Operation timeout
    #[error("operation timed out after {0} ms")]
    Timeout(u64),
}

/// How the I/O loops react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Logged and ignored, the loop continues
    Transient,
    /// Affects one transfer only; the offending chunk is dropped
    TransferLocal,
    /// Malformed frame content; ignored, the loop continues
    Protocol,
    /// The connection is unusable and must be torn down
    Fatal,
}

impl Error {
    /// Classify this error for the session and backend loops.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout(_) => ErrorClass::Transient,
            Self::Io(e) if is_transient_io(e) => ErrorClass::Transient,
            Self::TruncatedSource { .. }
            | Self::TransferTooLarge(_)
            | Self::NotShared(_)
            | Self::FileNotFound(_) => ErrorClass::TransferLocal,
            Self::Serialization(_) | Self::UnexpectedFrame { .. } => ErrorClass::Protocol,
            Self::ConnectionClosed
            | Self::ProtocolError(_)
            | Self::Io(_) => ErrorClass::Fatal,
            Self::NotConnected
            | Self::InvalidInput(_)
            | Self::ConfigError(_)
            | Self::InvalidConfig { .. } => ErrorClass::Fatal,
        }
    }

    /// Returns whether this error is recoverable (can be retried).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.class(), ErrorClass::Fatal)
    }
}

fn is_transient_io(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_transient() {
        assert_eq!(Error::Timeout(100).class(), ErrorClass::Transient);
        assert!(Error::Timeout(100).is_recoverable());
    }

    #[test]
    fn test_closed_stream_is_fatal() {
        assert_eq!(Error::ConnectionClosed.class(), ErrorClass::Fatal);

        let reset = Error::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert_eq!(reset.class(), ErrorClass::Fatal);
        assert!(!reset.is_recoverable());
    }

    #[test]
    fn test_io_timeout_is_transient() {
        let err = Error::Io(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert_eq!(err.class(), ErrorClass::Transient);
    }

    #[test]
    fn test_payload_errors_are_protocol_class() {
        let err = Error::Serialization("missing field".to_string());
        assert_eq!(err.class(), ErrorClass::Protocol);
    }

    #[test]
    fn test_sequencer_errors_are_transfer_local() {
        let err = Error::TruncatedSource {
            file: "a.bin".to_string(),
            read: 10,
            expected: 20,
        };
        assert_eq!(err.class(), ErrorClass::TransferLocal);
        assert!(err.to_string().contains("10 of 20"));

        let err = Error::NotShared("notes.txt".to_string());
        assert_eq!(err.class(), ErrorClass::TransferLocal);
        assert!(err.is_recoverable());
    }
}
