//! Edge-map processor with runtime backend selection.
//!
//! ```rust
//! use edgemap_compute::{Backend, EdgeProcessor, ImageBatch, PipelineConfig};
//!
//! let proc = EdgeProcessor::new(Backend::Auto, PipelineConfig::default()).unwrap();
//! let batch = ImageBatch::from_rgb8(vec![0; 4 * 4 * 3], 4, 4, 1).unwrap();
//! let edges = proc.run(&batch).unwrap();
//! assert_eq!(edges.data().len(), 16);
//! ```

use tracing::info;

use crate::backend::{Backend, CpuPrimitives, GpuLimits, GpuPrimitives, select_best_backend};
#[cfg(feature = "cuda")]
use crate::backend::CudaPrimitives;
use crate::batch::{BatchShape, EdgeMapBatch, ImageBatch};
use crate::config::PipelineConfig;
use crate::pipeline::{Pipeline, StagePlan};
use crate::ComputeResult;
#[cfg(not(feature = "cuda"))]
use crate::ComputeError;

/// Pipeline over any compiled-in backend.
enum AnyPipeline {
    Cpu(Pipeline<CpuPrimitives>),
    #[cfg(feature = "cuda")]
    Cuda(Pipeline<CudaPrimitives>),
}

impl AnyPipeline {
    fn new(backend: Backend, config: PipelineConfig) -> ComputeResult<Self> {
        match backend {
            Backend::Auto => Self::new(select_best_backend(), config),
            Backend::Cpu => Ok(Self::Cpu(Pipeline::new(CpuPrimitives::new(), config)?)),
            Backend::Cuda => {
                #[cfg(feature = "cuda")]
                {
                    Ok(Self::Cuda(Pipeline::new(CudaPrimitives::new()?, config)?))
                }
                #[cfg(not(feature = "cuda"))]
                {
                    let _ = config;
                    Err(ComputeError::BackendNotAvailable(
                        "cuda feature not enabled".to_string()
                    ))
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Cpu(p) => p.name(),
            #[cfg(feature = "cuda")]
            Self::Cuda(p) => p.name(),
        }
    }

    fn limits(&self) -> &GpuLimits {
        match self {
            Self::Cpu(p) => p.gpu().limits(),
            #[cfg(feature = "cuda")]
            Self::Cuda(p) => p.gpu().limits(),
        }
    }

    fn config(&self) -> &PipelineConfig {
        match self {
            Self::Cpu(p) => p.config(),
            #[cfg(feature = "cuda")]
            Self::Cuda(p) => p.config(),
        }
    }

    fn plan(&self, shape: BatchShape) -> ComputeResult<StagePlan> {
        match self {
            Self::Cpu(p) => p.plan(shape),
            #[cfg(feature = "cuda")]
            Self::Cuda(p) => p.plan(shape),
        }
    }

    fn run_into(&self, batch: &ImageBatch, out: &mut [u8]) -> ComputeResult<()> {
        match self {
            Self::Cpu(p) => p.run_into(batch, out),
            #[cfg(feature = "cuda")]
            Self::Cuda(p) => p.run_into(batch, out),
        }
    }
}

/// Edge-map processor.
///
/// Uses the GPU when available, with automatic fallback to CPU.
pub struct EdgeProcessor {
    pipeline: AnyPipeline,
}

impl EdgeProcessor {
    /// Create with specified backend.
    pub fn new(backend: Backend, config: PipelineConfig) -> ComputeResult<Self> {
        let pipeline = AnyPipeline::new(backend, config)?;
        info!(requested = backend.name(), selected = pipeline.name(), "backend selected");
        Ok(Self { pipeline })
    }

    /// Backend name.
    pub fn backend_name(&self) -> &'static str {
        self.pipeline.name()
    }

    pub fn config(&self) -> &PipelineConfig {
        self.pipeline.config()
    }

    /// Device limits of the selected backend.
    pub fn limits(&self) -> &GpuLimits {
        self.pipeline.limits()
    }

    /// Launch plan the processor would use for `shape`.
    pub fn plan(&self, shape: BatchShape) -> ComputeResult<StagePlan> {
        self.pipeline.plan(shape)
    }

    /// Run the pipeline and return the edge maps.
    pub fn run(&self, batch: &ImageBatch) -> ComputeResult<EdgeMapBatch> {
        let mut edges = EdgeMapBatch::new(batch.shape());
        self.pipeline.run_into(batch, edges.data_mut())?;
        Ok(edges)
    }

    /// Run the pipeline into a caller-provided buffer of `width * height * batch` bytes.
    pub fn run_into(&self, batch: &ImageBatch, out: &mut [u8]) -> ComputeResult<()> {
        self.pipeline.run_into(batch, out)
    }
}
