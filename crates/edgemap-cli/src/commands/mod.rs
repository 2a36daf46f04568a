//! CLI command implementations

pub mod backends;
pub mod config;
pub mod run;

use anyhow::{Context, Result};
use edgemap_compute::PipelineConfig;

use crate::PipelineArgs;

/// Config file (or defaults) with command-line overrides applied, validated.
pub fn resolve_config(args: &PipelineArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(radius) = args.radius {
        config.gaussian_radius = radius;
    }
    if let Some(sigma) = args.sigma {
        config.gaussian_sigma = sigma;
    }
    if let Some((w, h)) = args.tile {
        config = config.with_tile(w, h);
    }
    if let Some(mode) = args.edge_mode {
        config.edge_mode = mode;
    }
    if let Some(norm) = args.norm {
        config.sobel_norm = norm;
    }

    config.validate().context("Invalid pipeline config")?;
    Ok(config)
}

/// Format file size for display
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
