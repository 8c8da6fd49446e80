//! Configuration to runtime objects.

use std::time::Duration;

use anyhow::{Context, Result};
use backhaul_collector::Registry;
use backhaul_collector::builtin::builtin;
use backhaul_config::{BackhaulConfig, CollectorsConfig};
use backhaul_reverse::{BackoffConfig, ClientAuth, ReverseSettings, Timeouts, TrustSource};

/// Builds the settings the reverse connection is constructed from.
pub fn reverse_settings(config: &BackhaulConfig) -> ReverseSettings {
    let reverse = &config.reverse;

    let trust = match (&reverse.ca_file, &reverse.ca_pem) {
        (Some(path), _) => Some(TrustSource::CaFile(path.clone())),
        (None, Some(pem)) => Some(TrustSource::CaPem(pem.clone())),
        (None, None) => None,
    };
    let client_auth = reverse
        .client_cert
        .clone()
        .zip(reverse.client_key.clone())
        .map(|(cert_path, key_path)| ClientAuth {
            cert_path,
            key_path,
        });

    ReverseSettings {
        enabled: reverse.enabled,
        check_id: reverse.check_id.clone(),
        broker_url: reverse.broker_url.clone(),
        server_name: reverse.server_name.clone(),
        trust,
        client_auth,
        agent_address: config.agent.listen.clone(),
        timeouts: Timeouts {
            dial: Duration::from_secs(reverse.dial_timeout_secs),
            comm: Duration::from_secs(reverse.comm_timeout_secs),
            command: Duration::from_secs(reverse.command_timeout_secs),
            grace: Duration::from_secs(reverse.grace_secs),
            ..Timeouts::default()
        },
        backoff: BackoffConfig {
            initial_delay_ms: reverse.initial_backoff_ms,
            max_delay_ms: reverse.max_backoff_secs.saturating_mul(1000),
            multiplier: reverse.backoff_multiplier,
            jitter_factor: reverse.jitter_factor,
        },
        queue_capacity: reverse.queue_capacity,
        max_payload: reverse.max_payload,
    }
}

/// Registers every enabled builtin collector.
pub fn build_registry(config: &CollectorsConfig) -> Result<Registry> {
    let registry = Registry::new();
    for name in config.enabled() {
        let options = config.options_for(name);
        let collector =
            builtin(name, &options).with_context(|| format!("Failed to build collector {name}"))?;
        registry
            .register(collector, options)
            .with_context(|| format!("Failed to register collector {name}"))?;
    }
    Ok(registry)
}
