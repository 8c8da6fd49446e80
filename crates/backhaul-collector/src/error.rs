//! Collector error types.

use thiserror::Error;

/// A single collection run failed.
#[derive(Debug, Error)]
#[error("collector {collector}: {message}")]
pub struct CollectError {
    pub collector: String,
    pub message: String,
}

impl CollectError {
    pub fn new(collector: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            collector: collector.into(),
            message: message.into(),
        }
    }
}

/// Errors from registry management.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CollectorError {
    /// A collector with the same id is already registered.
    #[error("collector already registered: {0}")]
    Duplicate(String),

    /// No builtin collector has this name.
    #[error("unknown builtin collector: {0}")]
    UnknownBuiltin(String),
}
