//! PIT configuration loading.
//!
//! Sources, lowest priority first: built-in defaults, the optional file
//! given with `--config`, then `CCNFWD_*` environment variables
//! (`CCNFWD_CAPACITY=4096`, `CCNFWD_RESEND_METHOD=no_suppression`).

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use log::info;
use rust_ccnfwd_pit::PitConfig;
use std::path::Path;

pub const ENV_PREFIX: &str = "CCNFWD";

/// Builds and validates the PIT configuration.
pub fn load(path: Option<&Path>) -> Result<PitConfig> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        info!("Loading PIT configuration from {}", path.display());
        builder = builder.add_source(File::from(path).required(true));
    }
    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));

    let settings = builder
        .build()
        .context("Failed to read PIT configuration")?;
    let pit_config: PitConfig = settings
        .try_deserialize()
        .context("Failed to parse PIT configuration")?;
    pit_config.validate()?;

    Ok(pit_config)
}
