//! Wire protocol error types.

use thiserror::Error;

/// Result type for wire operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors produced while framing or parsing protocol messages.
///
/// The variants split into two groups. Header errors ([`InvalidMagic`],
/// [`UnsupportedVersion`], [`UnknownFrameKind`]) mean the codec can no longer
/// find frame boundaries and the stream must be abandoned. Payload errors are
/// confined to a single frame and can be answered with a protocol-error
/// response. [`WireError::is_stream_fatal`] tells them apart.
///
/// [`InvalidMagic`]: WireError::InvalidMagic
/// [`UnsupportedVersion`]: WireError::UnsupportedVersion
/// [`UnknownFrameKind`]: WireError::UnknownFrameKind
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The header did not start with the frame magic.
    #[error("invalid frame magic: {0:#06x}")]
    InvalidMagic(u16),

    /// The header carried a protocol version we do not speak.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The header carried a frame kind we do not know.
    #[error("unknown frame kind: {0}")]
    UnknownFrameKind(u8),

    /// A payload is too large to be described by the length field.
    #[error("payload too large: {len} bytes")]
    PayloadTooLarge { len: usize },

    /// A frame of the wrong kind was handed to a message parser.
    #[error("unexpected frame kind: expected {expected}, got {actual}")]
    UnexpectedKind {
        expected: &'static str,
        actual: &'static str,
    },

    /// The command verb byte is not part of the vocabulary.
    #[error("unknown command verb: {0}")]
    UnknownVerb(u8),

    /// The response status byte is not part of the vocabulary.
    #[error("unknown response status: {0}")]
    UnknownStatus(u8),

    /// The payload ended before a declared field.
    #[error("truncated payload: needed {needed} bytes, had {available}")]
    Truncated { needed: usize, available: usize },

    /// The command path is not valid UTF-8.
    #[error("command path is not valid UTF-8")]
    InvalidPath,

    /// The command path is longer than the path length field allows.
    #[error("command path too long: {0} bytes")]
    PathTooLong(usize),
}

impl WireError {
    /// Returns true if the error means frame boundaries are lost.
    pub fn is_stream_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidMagic(_) | Self::UnsupportedVersion(_) | Self::UnknownFrameKind(_)
        )
    }
}
