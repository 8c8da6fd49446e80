//! Print the effective configuration.

use anyhow::Result;
use backhaul_config::BackhaulConfig;

pub fn show(config: &BackhaulConfig) -> Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}
