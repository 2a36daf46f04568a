//! Config command
//!
//! Prints the effective pipeline config (file plus overrides) as YAML.

use anyhow::{Context, Result};
use tracing::trace;

use crate::ConfigArgs;

pub fn run(args: ConfigArgs) -> Result<()> {
    trace!(config = ?args.pipeline.config, "config::run");

    let config = super::resolve_config(&args.pipeline)?;
    let yaml = config.to_yaml().context("Failed to serialize config")?;
    print!("{yaml}");
    Ok(())
}
