//! edgemap - batched edge maps from raw RGB8 images
//!
//! Runs Gaussian smoothing, grayscale reduction and a Sobel gradient over a
//! whole batch on the CPU or a CUDA device.

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use edgemap_compute::{Backend, EdgeMode, SobelNorm};

mod commands;

#[derive(Parser)]
#[command(name = "edgemap")]
#[command(author, version, about = "Batched GPU edge maps (Gaussian -> grayscale -> Sobel)")]
#[command(long_about = "
Computes 8-bit edge magnitude maps for a batch of raw RGB8 images.

Input is a headerless file of N images of WxH interleaved RGB samples,
stored back to back. Output is N maps of WxH single-byte magnitudes.

Examples:
  edgemap run frames.rgb -o edges.gray --width 640 --height 480
  edgemap run frames.rgb -o edges.gray --width 640 --height 480 --batch 8 --backend cuda
  edgemap run in.rgb -o out.gray --width 64 --height 64 --radius 5 --sigma 2 --tile 32x8
  edgemap run in.rgb -o out.gray --width 64 --height 64 --config pipeline.yaml
  edgemap backends                      # List compute backends
  edgemap config --radius 5             # Print effective config as YAML
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Number of threads (0 = auto)
    #[arg(short = 'j', long, global = true, default_value = "0")]
    threads: usize,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute edge maps for a batch
    #[command(visible_alias = "r")]
    Run(RunArgs),

    /// List compute backends
    #[command(visible_alias = "b")]
    Backends,

    /// Print the effective pipeline config as YAML
    Config(ConfigArgs),
}

/// Pipeline parameters shared by `run` and `config`.
#[derive(Args, Clone)]
struct PipelineArgs {
    /// YAML config file (command-line values override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Gaussian radius
    #[arg(short, long)]
    radius: Option<u32>,

    /// Gaussian spread
    #[arg(short, long)]
    sigma: Option<f32>,

    /// Block size as WxH (e.g. 16x16)
    #[arg(short, long, value_parser = parse_tile)]
    tile: Option<(u32, u32)>,

    /// Boundary policy: image, block
    #[arg(long)]
    edge_mode: Option<EdgeMode>,

    /// Gradient magnitude: l1, l2
    #[arg(long)]
    norm: Option<SobelNorm>,
}

#[derive(Args)]
struct RunArgs {
    /// Input file of raw RGB8 images
    input: PathBuf,

    /// Output file of raw 8-bit edge maps
    #[arg(short, long)]
    output: PathBuf,

    /// Image width
    #[arg(short = 'W', long)]
    width: u32,

    /// Image height
    #[arg(short = 'H', long)]
    height: u32,

    /// Images in the batch (default: inferred from input size)
    #[arg(short = 'n', long)]
    batch: Option<u32>,

    /// Backend: auto, cpu, cuda
    #[arg(short, long, default_value = "auto")]
    backend: Backend,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Args)]
struct ConfigArgs {
    #[command(flatten)]
    pipeline: PipelineArgs,
}

fn parse_tile(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got '{s}'"))?;
    let w = w.trim().parse().map_err(|e| format!("bad tile width '{w}': {e}"))?;
    let h = h.trim().parse().map_err(|e| format!("bad tile height '{h}': {e}"))?;
    Ok((w, h))
}

/// Install the tracing subscriber. The guard must live until exit so the
/// non-blocking file writer flushes.
fn init_logging(verbose: u8, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path.file_name().context("Log file path has no file name")?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.verbose, cli.log_file.as_deref())?;

    // Configure thread pool
    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    match cli.command {
        Commands::Run(args) => commands::run::run(args, cli.verbose),
        Commands::Backends => commands::backends::run(cli.verbose),
        Commands::Config(args) => commands::config::run(args),
    }
}
