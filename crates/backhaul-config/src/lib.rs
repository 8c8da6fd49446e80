//! Configuration management for the backhaul agent
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (`BACKHAUL_*`, `__` between nested keys; highest precedence)
//! 2. An explicit file passed with `--config`
//! 3. backhaul.local.toml (local overrides, not checked in)
//! 4. backhaul.toml (project config)
//! 5. ~/.config/backhaul/config.toml (user defaults)
//! 6. Built-in defaults (lowest precedence)

use anyhow::Result;
use backhaul_collector::CollectorOptions;
use backhaul_collector::builtin::BUILTIN_NAMES;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main agent configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackhaulConfig {
    pub agent: AgentConfig,
    pub reverse: ReverseConfig,
    pub collectors: CollectorsConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Address the agent serves metrics on.
    pub listen: String,
    pub collection_interval_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:2609".to_string(),
            collection_interval_secs: 60,
        }
    }
}

/// The `[reverse]` section: where and how to dial the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverseConfig {
    pub enabled: bool,
    pub check_id: String,
    pub broker_url: String,
    pub server_name: Option<String>,
    /// Broker CA bundle on disk. Mutually exclusive with `ca_pem`.
    pub ca_file: Option<PathBuf>,
    pub ca_pem: Option<String>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub dial_timeout_secs: u64,
    pub comm_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub grace_secs: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_secs: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
    pub queue_capacity: usize,
    pub max_payload: usize,
}

impl Default for ReverseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_id: String::new(),
            broker_url: String::new(),
            server_name: None,
            ca_file: None,
            ca_pem: None,
            client_cert: None,
            client_key: None,
            dial_timeout_secs: 15,
            comm_timeout_secs: 65,
            command_timeout_secs: 50,
            grace_secs: 10,
            initial_backoff_ms: 1000,
            max_backoff_secs: 60,
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
            queue_capacity: 16,
            max_payload: 64 * 1024,
        }
    }
}

/// The `[collectors]` section.
///
/// ```toml
/// [collectors]
/// enabled = ["cpu", "memory"]
///
/// [collectors.options.cpu]
/// report_all_cpus = true
/// metrics_disabled = ["num_cpu"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorsConfig {
    /// Collectors to run; every builtin when unset. Left out of the default
    /// layer because array sources merge element by element.
    pub enabled: Option<Vec<String>>,
    pub options: BTreeMap<String, CollectorOptions>,
}

impl CollectorsConfig {
    /// Names of the collectors to run.
    pub fn enabled(&self) -> Vec<&str> {
        match &self.enabled {
            Some(names) => names.iter().map(String::as_str).collect(),
            None => BUILTIN_NAMES.to_vec(),
        }
    }

    /// Options for one collector, defaulted when the section is absent.
    pub fn options_for(&self, name: &str) -> CollectorOptions {
        self.options.get(name).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive; `RUST_LOG` wins when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl BackhaulConfig {
    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();
        let reverse = &mut self.reverse;

        for path in [
            &mut reverse.ca_file,
            &mut reverse.client_cert,
            &mut reverse.client_key,
        ]
        .into_iter()
        .flatten()
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Checks constraints the types cannot express.
    ///
    /// Only a reverse section that is enabled is checked; the rest of it is
    /// validated again when the connection is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

        if self.agent.collection_interval_secs == 0 {
            return invalid("agent.collection_interval_secs must be positive");
        }
        if let Some(unknown) = self
            .collectors
            .enabled()
            .into_iter()
            .find(|name| !BUILTIN_NAMES.contains(name))
        {
            return Err(ConfigError::ValidationError(format!(
                "collectors.enabled: unknown collector {unknown:?}"
            )));
        }

        let reverse = &self.reverse;
        if !reverse.enabled {
            return Ok(());
        }
        if reverse.check_id.trim().is_empty() {
            return invalid("reverse.check_id is required when reverse is enabled");
        }
        if reverse.broker_url.trim().is_empty() {
            return invalid("reverse.broker_url is required when reverse is enabled");
        }
        match (&reverse.ca_file, &reverse.ca_pem) {
            (Some(_), Some(_)) => return invalid("set only one of reverse.ca_file and reverse.ca_pem"),
            (None, None) => return invalid("reverse.ca_file or reverse.ca_pem is required"),
            _ => {}
        }
        if reverse.client_cert.is_some() != reverse.client_key.is_some() {
            return invalid("reverse.client_cert and reverse.client_key must be set together");
        }
        Ok(())
    }

    /// Effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
