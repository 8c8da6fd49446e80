//! One-shot collection.

use anyhow::{Context, Result, bail};
use backhaul_config::BackhaulConfig;

use crate::settings::build_registry;

/// Runs every enabled collector once and prints the metrics under `path`.
pub fn run(config: &BackhaulConfig, path: Option<&str>) -> Result<()> {
    let registry = build_registry(&config.collectors)?;
    let snapshot = registry.collect();

    let path = path.unwrap_or("");
    let Some(metrics) = snapshot.lookup(path) else {
        bail!("Nothing collected under '{path}'");
    };

    let json = serde_json::to_string_pretty(&metrics).context("Failed to encode metrics")?;
    println!("{json}");
    Ok(())
}
