//! # backhaul-reverse: reverse TLS connection to the metrics broker
//!
//! The agent usually sits behind NAT or a firewall the broker cannot reach
//! through, so the agent dials out and then serves the broker's requests
//! over that connection.
//!
//! ```text
//!                        ┌──────────────────────────────────────────────┐
//!   broker ◄── TLS ──────┤ FrameReader ─► queue ─► CommandProcessor      │
//!                        │      ▲                        │               │
//!                        │      └──────── FrameWriter ◄──┘               │
//!                        │                 (one generation, TaskGroup)   │
//!                        └──────────────────────────────────────────────┘
//!                                 ▲ dial / backoff / stop
//!                         ReverseConnection ── Registry::flush() ──► metrics
//! ```
//!
//! - [`ReverseConnection`]: lifecycle, reconnects and shutdown
//! - [`BackoffPolicy`]: jittered exponential reconnect delays
//! - [`TlsDialer`] / [`BrokerTarget`]: TLS transport setup
//! - [`FrameReader`] / [`FrameWriter`]: frame I/O with deadlines
//! - [`CommandProcessor`]: command to registry query
//! - [`TaskGroup`]: reader and processor fail and stop together

mod backoff;
mod connection;
mod error;
mod group;
mod pem;
mod processor;
mod settings;
mod state;
mod tls;
mod transport;

#[cfg(test)]
mod tests;

pub use backoff::{BackoffConfig, BackoffPolicy};
pub use connection::{ReverseConnection, ReverseEvent};
pub use error::{ReverseError, ReverseResult, TimeoutKind};
pub use group::TaskGroup;
pub use processor::{CommandProcessor, Inbound};
pub use settings::{ClientAuth, ReverseSettings, Timeouts, TrustSource};
pub use state::ConnState;
pub use tls::{BrokerEndpoint, BrokerTarget, DEFAULT_BROKER_PORT, TlsDialer};
pub use transport::{Dialer, FrameReader, FrameWriter, split};
