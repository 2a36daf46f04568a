//! Compute backends for the edge-map pipeline.
//!
//! Provides a CPU (rayon) backend and an optional CUDA backend behind the
//! same [`GpuPrimitives`] trait.
//!
//! # Architecture
//!
//! ```text
//! Pipeline<G: GpuPrimitives>
//!     +-- CpuPrimitives  (rayon, tiled executor)
//!     +-- CudaPrimitives (NVIDIA CUDA, shared-memory tiles)
//! ```
//!
//! Both backends launch the same grid: one thread per pixel, one block per
//! image patch, `grid.z` indexing the image in the batch.

mod cpu_backend;
mod detect;
mod executor;
mod gpu_primitives;
mod tiling;

#[cfg(feature = "cuda")]
mod cuda_backend;

use std::str::FromStr;

// Core types
pub use gpu_primitives::{DeviceBuffer, GpuPrimitives, WeightHandle};
pub use tiling::{Dim3, GpuLimits, LaunchGeometry, Tile, generate_tiles};
pub use detect::{BackendInfo, describe_backends, detect_backends, select_best_backend};

// Executor
pub use executor::{SharedTile, StageKernel, run_stage};

// Backends
pub use cpu_backend::{CpuBuffer, CpuPrimitives, CpuWeights};

#[cfg(feature = "cuda")]
pub use cuda_backend::{CudaBuffer, CudaPrimitives, CudaWeights};

/// Available compute backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Auto-select best available (CUDA > CPU).
    #[default]
    Auto,
    /// CPU backend using rayon for parallelization.
    Cpu,
    /// NVIDIA CUDA backend.
    Cuda,
}

impl Backend {
    /// Check if this backend is available on current system.
    pub fn is_available(&self) -> bool {
        match self {
            Self::Auto => true,
            Self::Cpu => true,
            #[cfg(feature = "cuda")]
            Self::Cuda => CudaPrimitives::is_available(),
            #[cfg(not(feature = "cuda"))]
            Self::Cuda => false,
        }
    }

    /// Get human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            other => Err(format!("unknown backend '{other}' (expected auto, cpu or cuda)")),
        }
    }
}
