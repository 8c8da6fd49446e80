//! Reverse connection error types.

use std::fmt;
use std::io;

use backhaul_wire::WireError;
use thiserror::Error;

/// Result type for reverse connection operations.
pub type ReverseResult<T> = Result<T, ReverseError>;

/// Which deadline expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// TCP connect plus TLS handshake.
    Dial,
    /// No inbound traffic within the communication timeout.
    Idle,
    /// Handling and answering a single command.
    Command,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dial => "dial",
            Self::Idle => "idle",
            Self::Command => "command",
        })
    }
}

/// Errors that can occur on the reverse connection.
#[derive(Debug, Error)]
pub enum ReverseError {
    /// Settings rejected before any network I/O.
    #[error("invalid reverse configuration: {0}")]
    Config(String),

    /// TCP connect failed.
    #[error("failed to connect to {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// TLS handshake failed.
    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    /// Wire protocol error.
    #[error("wire protocol error: {0}")]
    Protocol(#[from] WireError),

    /// A deadline expired.
    #[error("{0} timeout elapsed")]
    Timeout(TimeoutKind),

    /// Writing a response failed.
    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    /// Reading from the transport failed.
    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    /// The broker closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// A connection task panicked or was aborted.
    #[error("{0} task failed unexpectedly")]
    TaskFailed(&'static str),

    /// `start` called on a connection that is already running.
    #[error("reverse connection already started")]
    AlreadyStarted,
}

impl ReverseError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns the timeout kind if this is a timeout.
    pub fn timeout_kind(&self) -> Option<TimeoutKind> {
        match self {
            Self::Timeout(kind) => Some(*kind),
            _ => None,
        }
    }
}
