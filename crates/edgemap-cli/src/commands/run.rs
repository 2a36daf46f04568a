//! Run command
//!
//! Reads a raw RGB8 batch, computes edge maps and writes them as raw bytes.

use anyhow::{Context, Result, bail, ensure};
use std::time::Instant;
use tracing::{info, trace};

use edgemap_compute::{EdgeProcessor, ImageBatch};

use super::format_size;
use crate::RunArgs;

pub fn run(args: RunArgs, verbose: u8) -> Result<()> {
    trace!(input = %args.input.display(), output = %args.output.display(), "run::run");

    let config = super::resolve_config(&args.pipeline)?;

    let data = std::fs::read(&args.input)
        .with_context(|| format!("Failed to read: {}", args.input.display()))?;

    let image_bytes = args.width as usize * args.height as usize * 3;
    ensure!(image_bytes > 0, "Image dimensions must be non-zero: {}x{}", args.width, args.height);

    let batch = match args.batch {
        Some(n) => n,
        None => {
            if data.is_empty() || data.len() % image_bytes != 0 {
                bail!(
                    "Input size {} is not a whole number of {}x{} RGB images ({} bytes each)",
                    data.len(), args.width, args.height, image_bytes
                );
            }
            u32::try_from(data.len() / image_bytes).context("Batch too large")?
        }
    };

    let batch = ImageBatch::from_rgb8(data, args.width, args.height, batch)
        .with_context(|| format!("Invalid input batch: {}", args.input.display()))?;

    let processor = EdgeProcessor::new(args.backend, config)
        .with_context(|| format!("Failed to initialize {} backend", args.backend))?;

    info!(
        backend = processor.backend_name(),
        w = args.width, h = args.height, batch = batch.shape().batch,
        "Computing edge maps"
    );

    if verbose > 0 {
        println!("Processing {} image(s) of {}x{} ({}) on {}",
            batch.shape().batch, args.width, args.height,
            format_size(batch.size_bytes() as u64), processor.backend_name());
    }

    let start = Instant::now();
    let edges = processor.run(&batch).context("Edge-map pipeline failed")?;
    let elapsed = start.elapsed();

    std::fs::write(&args.output, edges.data())
        .with_context(|| format!("Failed to write: {}", args.output.display()))?;

    if verbose > 0 {
        println!("Wrote {} to {} in {:.2?}", format_size(edges.size_bytes() as u64), args.output.display(), elapsed);
    }

    Ok(())
}
