//! `ccnfwd config`

use anyhow::{Context, Result};
use rust_ccnfwd_pit::PitConfig;

/// Prints the effective configuration as JSON.
pub fn show_config(config: &PitConfig) -> Result<()> {
    let rendered =
        serde_json::to_string_pretty(config).context("Failed to render PIT configuration")?;
    println!("{}", rendered);
    Ok(())
}
