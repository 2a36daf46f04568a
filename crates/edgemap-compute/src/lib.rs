//! Batched edge-map pipeline on a tiled compute grid.
//!
//! Converts a batch of RGB8 images into 1-channel edge magnitude maps:
//! Gaussian smoothing, then grayscale reduction, then a Sobel gradient.
//! Every stage runs through the same tiled executor: one thread per output
//! pixel, one block per image patch, a shared tile loaded before a block
//! barrier, and a per-pixel combine over the tile.
//!
//! # Architecture
//!
//! ```text
//! EdgeProcessor (backend selection)
//!     └── Pipeline<G: GpuPrimitives>
//!             ├── GaussianWeights / SobelWeights (caller-owned weight cache)
//!             ├── LaunchGeometry (grid/block/apron per stage)
//!             └── GpuPrimitives
//!                     ├── CpuPrimitives  (rayon, tiled executor)
//!                     └── CudaPrimitives (NVRTC kernels, shared-memory tiles)
//! ```
//!
//! # Example
//!
//! ```rust
//! use edgemap_compute::{Backend, EdgeProcessor, ImageBatch, PipelineConfig};
//!
//! let batch = ImageBatch::from_rgb8(vec![100; 8 * 8 * 3 * 2], 8, 8, 2).unwrap();
//! let proc = EdgeProcessor::new(Backend::Cpu, PipelineConfig::default()).unwrap();
//! let edges = proc.run(&batch).unwrap();
//!
//! assert_eq!(edges.data().len(), 8 * 8 * 2);
//! assert!(edges.data().iter().all(|&v| v == 0));
//! ```

use std::fmt;

pub mod backend;
pub mod batch;
pub mod config;
pub mod pipeline;
pub mod processor;
pub mod stages;
pub mod weights;

pub use backend::{Backend, GpuLimits, LaunchGeometry, detect_backends, select_best_backend, describe_backends};
pub use batch::{BatchShape, EdgeMapBatch, ImageBatch};
pub use config::{EdgeMode, PipelineConfig, SobelNorm};
pub use pipeline::{Pipeline, StagePlan};
pub use processor::EdgeProcessor;
pub use stages::Stage;
pub use weights::{GaussianWeights, SobelWeights, WeightKind};

use thiserror::Error;

/// Device-level operation that can fail during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOp {
    Allocate,
    Upload,
    Download,
    Launch,
    Synchronize,
}

impl fmt::Display for DeviceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Allocate => "allocate",
            Self::Upload => "upload",
            Self::Download => "download",
            Self::Launch => "launch",
            Self::Synchronize => "synchronize",
        })
    }
}

fn stage_suffix(stage: &Option<Stage>) -> String {
    stage.map(|s| format!(" in {s} stage")).unwrap_or_default()
}

/// Pipeline errors.
///
/// Configuration errors are detected before any device work. Device errors
/// abort the run; no partial output is returned.
#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("Invalid dimensions: {width}x{height}, batch of {batch}")]
    InvalidDimensions { width: u32, height: u32, batch: u32 },

    #[error("Gaussian radius {radius} does not fit a weight cache of {capacity} entries")]
    RadiusTooLarge { radius: u32, capacity: usize },

    #[error("Invalid Gaussian spread: {0}")]
    InvalidSigma(f32),

    #[error("Invalid block size: {0}x{1}")]
    InvalidBlock(u32, u32),

    #[error("{what} {requested} exceeds device limit {limit}")]
    LaunchLimit { what: &'static str, requested: u64, limit: u64 },

    #[error("Buffer size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("Failed to create device: {0}")]
    DeviceCreation(String),

    #[error("Failed to compile kernels: {0}")]
    ShaderCompilation(String),

    #[error("Device {op} failed{}: {message}", stage_suffix(.stage))]
    Device {
        op: DeviceOp,
        stage: Option<Stage>,
        message: String,
    },
}

impl ComputeError {
    /// Device failure outside of any stage (allocation, transfers).
    pub fn device(op: DeviceOp, message: impl Into<String>) -> Self {
        Self::Device { op, stage: None, message: message.into() }
    }

    /// Device failure attributed to a stage (launch, synchronize).
    pub fn stage(op: DeviceOp, stage: Stage, message: impl Into<String>) -> Self {
        Self::Device { op, stage: Some(stage), message: message.into() }
    }

    /// True for errors raised before any device work was issued.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidDimensions { .. }
                | Self::RadiusTooLarge { .. }
                | Self::InvalidSigma(_)
                | Self::InvalidBlock(..)
                | Self::LaunchLimit { .. }
                | Self::BufferSizeMismatch { .. }
                | Self::Io(_)
                | Self::Yaml(_)
        )
    }
}

pub type ComputeResult<T> = Result<T, ComputeError>;
