//! Settings consumed by the reverse connection.

use std::path::PathBuf;
use std::time::Duration;

use backhaul_wire::DEFAULT_MAX_PAYLOAD;

use crate::backoff::BackoffConfig;

/// Where the broker's CA certificates come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustSource {
    /// PEM bundle on disk.
    CaFile(PathBuf),
    /// PEM bundle inline, as fetched with the check configuration.
    CaPem(String),
}

/// Client certificate and key for mutual TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAuth {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// The independent deadlines of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// TCP connect plus TLS handshake.
    pub dial: Duration,
    /// Maximum silence from the broker before the connection is dropped.
    pub comm: Duration,
    /// Handling and answering one command.
    pub command: Duration,
    /// How long a connection must survive before the attempt counter resets.
    pub grace: Duration,
    /// Upper bound on tearing down a generation's tasks.
    pub shutdown_grace: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            dial: Duration::from_secs(15),
            comm: Duration::from_secs(65),
            command: Duration::from_secs(50),
            grace: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

/// Everything [`ReverseConnection`](crate::ReverseConnection) needs.
#[derive(Debug, Clone)]
pub struct ReverseSettings {
    pub enabled: bool,
    /// Broker-side check identifier.
    pub check_id: String,
    /// `scheme://host[:port][/path]`.
    pub broker_url: String,
    /// TLS server name, when it differs from the URL host.
    pub server_name: Option<String>,
    pub trust: Option<TrustSource>,
    pub client_auth: Option<ClientAuth>,
    /// Address the agent serves metrics on; logged in loopback form.
    pub agent_address: String,
    pub timeouts: Timeouts,
    pub backoff: BackoffConfig,
    /// Commands buffered between the reader and the processor.
    pub queue_capacity: usize,
    /// Largest inbound payload accepted; larger frames are skipped.
    pub max_payload: usize,
}

impl Default for ReverseSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            check_id: String::new(),
            broker_url: String::new(),
            server_name: None,
            trust: None,
            client_auth: None,
            agent_address: "0.0.0.0:2609".to_string(),
            timeouts: Timeouts::default(),
            backoff: BackoffConfig::default(),
            queue_capacity: 16,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl ReverseSettings {
    /// The agent address with every `0.0.0.0` replaced by `localhost`.
    pub fn loopback_agent_address(&self) -> String {
        self.agent_address.replace("0.0.0.0", "localhost")
    }
}
