//! Pipeline orchestrator.
//!
//! Runs the three stages over one batch on a single backend:
//!
//! ```text
//!  host RGB ──upload──► input (3ch) ──gaussian──► blurred (3ch)
//!                                                    │ grayscale
//!  host edges ◄─download── output (1ch) ◄──sobel── gray (1ch)
//! ```
//!
//! Each stage is followed by a completion barrier, so stage N+1 only ever
//! reads finished output of stage N. A run either returns the whole edge
//! map or an error; device buffers are released on every exit path.

use std::sync::Arc;

use tracing::{debug, info_span, trace};

use crate::backend::{DeviceBuffer, GpuPrimitives, LaunchGeometry};
use crate::batch::{BatchShape, EdgeMapBatch, GRAY_CHANNELS, ImageBatch, RGB_CHANNELS};
use crate::config::PipelineConfig;
use crate::stages::Stage;
use crate::weights::{GaussianWeights, SOBEL_WIDTH, SobelWeights, WeightKind};
use crate::{ComputeError, ComputeResult};

/// Launch geometry of every stage for one batch shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePlan {
    pub gaussian: LaunchGeometry,
    pub grayscale: LaunchGeometry,
    pub sobel: LaunchGeometry,
}

/// The four device buffers of a run. Dropping the set releases them all.
struct DeviceBuffers<B: DeviceBuffer> {
    input: B,
    blurred: B,
    gray: B,
    output: B,
}

impl<B: DeviceBuffer> DeviceBuffers<B> {
    fn allocate<G: GpuPrimitives<Buffer = B>>(gpu: &G, shape: BatchShape) -> ComputeResult<Self> {
        // A failed allocation drops the buffers acquired before it.
        let input = gpu.allocate(shape, RGB_CHANNELS)?;
        let blurred = gpu.allocate(shape, RGB_CHANNELS)?;
        let gray = gpu.allocate(shape, GRAY_CHANNELS)?;
        let output = gpu.allocate(shape, GRAY_CHANNELS)?;
        Ok(Self { input, blurred, gray, output })
    }

    fn size_bytes(&self) -> u64 {
        self.input.size_bytes() + self.blurred.size_bytes() + self.gray.size_bytes() + self.output.size_bytes()
    }
}

impl<B: DeviceBuffer> Drop for DeviceBuffers<B> {
    fn drop(&mut self) {
        trace!(bytes = self.size_bytes(), "releasing device buffers");
    }
}

/// Edge-map pipeline bound to one backend.
///
/// The backend is shared through an `Arc`, so several pipelines with
/// different configurations can run on the same device concurrently: each
/// run uploads its own weight tables and owns its own buffers.
pub struct Pipeline<G: GpuPrimitives> {
    gpu: Arc<G>,
    config: PipelineConfig,
    gaussian: GaussianWeights,
    sobel: SobelWeights,
}

impl<G: GpuPrimitives> Pipeline<G> {
    /// Create a pipeline owning `gpu`.
    pub fn new(gpu: G, config: PipelineConfig) -> ComputeResult<Self> {
        Self::with_shared(Arc::new(gpu), config)
    }

    /// Create a pipeline on a shared backend.
    pub fn with_shared(gpu: Arc<G>, config: PipelineConfig) -> ComputeResult<Self> {
        config.validate()?;

        let capacity = gpu.limits().weight_cache_capacity;
        if 2 * config.gaussian_radius as usize + 1 > capacity {
            return Err(ComputeError::RadiusTooLarge { radius: config.gaussian_radius, capacity });
        }

        let gaussian = GaussianWeights::new(config.gaussian_sigma, config.gaussian_radius)?;
        debug!(backend = gpu.name(), ?config, "pipeline created");

        Ok(Self {
            gpu,
            config,
            gaussian,
            sobel: SobelWeights::standard(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn name(&self) -> &'static str {
        self.gpu.name()
    }

    /// Upload the Gaussian table; the handle belongs to the caller.
    pub fn load_gaussian_weights(&self) -> ComputeResult<G::Weights> {
        trace!(radius = self.gaussian.radius(), delta = self.gaussian.delta(), "load_gaussian_weights");
        self.gpu.upload_weights(WeightKind::Gaussian, self.gaussian.as_slice())
    }

    /// Upload both 3x3 gradient tables; the handle belongs to the caller.
    pub fn load_sobel_weights(&self) -> ComputeResult<G::Weights> {
        trace!(width = SOBEL_WIDTH, "load_sobel_weights");
        self.gpu.upload_weights(WeightKind::Sobel, &self.sobel.to_coefficients())
    }

    /// Plan all three launches for `shape`, checked against device limits.
    pub fn plan(&self, shape: BatchShape) -> ComputeResult<StagePlan> {
        let tile = (self.config.tile_width, self.config.tile_height);
        let mode = self.config.edge_mode;
        let limits = self.gpu.limits();

        let plan = StagePlan {
            gaussian: LaunchGeometry::plan(shape, tile, self.config.gaussian_radius, RGB_CHANNELS, mode, limits)?,
            grayscale: LaunchGeometry::plan(shape, tile, 0, RGB_CHANNELS, mode, limits)?,
            sobel: LaunchGeometry::plan(shape, tile, (SOBEL_WIDTH / 2) as u32, GRAY_CHANNELS, mode, limits)?,
        };
        debug!(grid = ?plan.gaussian.grid, block = ?plan.gaussian.block, "launch plan");
        Ok(plan)
    }

    /// Run the whole pipeline and return the edge maps.
    pub fn run(&self, batch: &ImageBatch) -> ComputeResult<EdgeMapBatch> {
        let mut edges = EdgeMapBatch::new(batch.shape());
        self.run_into(batch, edges.data_mut())?;
        Ok(edges)
    }

    /// Run the whole pipeline into a host buffer of `width * height * batch` bytes.
    ///
    /// All checks happen before the first device call. On error `out` may
    /// hold partial data and must be discarded.
    pub fn run_into(&self, batch: &ImageBatch, out: &mut [u8]) -> ComputeResult<()> {
        let shape = batch.shape();
        let span = info_span!(
            "edgemap",
            backend = self.gpu.name(),
            width = shape.width,
            height = shape.height,
            batch = shape.batch,
        );
        let _enter = span.enter();

        // 1. Validate
        let expected = shape.buffer_len(GRAY_CHANNELS);
        if out.len() != expected {
            return Err(ComputeError::BufferSizeMismatch { expected, actual: out.len() });
        }
        let plan = self.plan(shape)?;
        let limits = self.gpu.limits();
        if !limits.fits_memory(shape) {
            return Err(ComputeError::LaunchLimit {
                what: "device memory bytes",
                requested: limits.estimate_memory(shape),
                limit: limits.available_memory,
            });
        }

        // 2. Allocate
        let mut buffers = DeviceBuffers::allocate(&*self.gpu, shape)?;
        debug!(bytes = buffers.size_bytes(), "allocated device buffers");

        // 3. Upload
        self.gpu.upload(&mut buffers.input, batch.data())?;
        debug!(bytes = batch.size_bytes(), "uploaded batch");

        // 4. Gaussian
        let gaussian = self.load_gaussian_weights()?;
        self.gpu.exec_gaussian(&buffers.input, &mut buffers.blurred, &gaussian, &plan.gaussian)?;
        self.gpu.synchronize(Stage::Gaussian)?;
        debug!(stage = %Stage::Gaussian, "stage complete");

        // 5. Grayscale
        self.gpu.exec_grayscale(&buffers.blurred, &mut buffers.gray, &plan.grayscale)?;
        self.gpu.synchronize(Stage::Grayscale)?;
        debug!(stage = %Stage::Grayscale, "stage complete");

        // 6. Sobel
        let sobel = self.load_sobel_weights()?;
        self.gpu.exec_sobel(&buffers.gray, &mut buffers.output, &sobel, self.config.sobel_norm, &plan.sobel)?;
        self.gpu.synchronize(Stage::Sobel)?;
        debug!(stage = %Stage::Sobel, "stage complete");

        // 7. Download
        self.gpu.download(&buffers.output, out)?;
        debug!(bytes = out.len(), "downloaded edge maps");

        Ok(())
    }
}
