//! CPU backend using rayon for parallelization.
//!
//! Buffers live in host memory; every stage goes through the tiled
//! executor so the CPU sees the same grid, apron and clamp behavior as a
//! device launch.

use tracing::trace;

use super::executor::run_stage;
use super::gpu_primitives::{DeviceBuffer, GpuPrimitives, WeightHandle, check_stage, check_weights};
use super::tiling::LaunchGeometry;
use super::GpuLimits;
use crate::batch::{BatchShape, GRAY_CHANNELS, RGB_CHANNELS};
use crate::config::SobelNorm;
use crate::stages::{GaussianKernel, GrayscaleKernel, SobelKernel, Stage};
use crate::weights::{SOBEL_WIDTH, WeightKind};
use crate::{ComputeError, ComputeResult};

/// Fallback when system memory cannot be queried.
const FALLBACK_MEMORY_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// CPU batch buffer - data stored in RAM.
pub struct CpuBuffer {
    data: Vec<u8>,
    shape: BatchShape,
    channels: u32,
}

impl CpuBuffer {
    pub fn new(shape: BatchShape, channels: u32) -> Self {
        Self {
            data: vec![0; shape.buffer_len(channels)],
            shape,
            channels,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl DeviceBuffer for CpuBuffer {
    fn shape(&self) -> BatchShape {
        self.shape
    }

    fn channels(&self) -> u32 {
        self.channels
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

/// CPU weight table.
pub struct CpuWeights {
    kind: WeightKind,
    data: Vec<f32>,
}

impl CpuWeights {
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

impl WeightHandle for CpuWeights {
    fn kind(&self) -> WeightKind {
        self.kind
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

/// CPU primitives implementation.
pub struct CpuPrimitives {
    limits: GpuLimits,
}

impl CpuPrimitives {
    pub fn new() -> Self {
        // Get system RAM (fallback to 4GB if detection fails)
        let available = sys_info::mem_info()
            .map(|m| m.avail * 1024)
            .unwrap_or(FALLBACK_MEMORY_BYTES);

        // Launch limits follow a typical device so launches validate the same way.
        Self {
            limits: GpuLimits {
                total_memory: available,
                available_memory: available,
                detected: true,
                ..GpuLimits::default()
            },
        }
    }

    /// Use explicit limits instead of querying the system.
    pub fn with_limits(limits: GpuLimits) -> Self {
        Self { limits }
    }
}

impl Default for CpuPrimitives {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuPrimitives for CpuPrimitives {
    type Buffer = CpuBuffer;
    type Weights = CpuWeights;

    fn allocate(&self, shape: BatchShape, channels: u32) -> ComputeResult<Self::Buffer> {
        Ok(CpuBuffer::new(shape, channels))
    }

    fn upload(&self, dst: &mut Self::Buffer, data: &[u8]) -> ComputeResult<()> {
        if data.len() != dst.data.len() {
            return Err(ComputeError::BufferSizeMismatch { expected: dst.data.len(), actual: data.len() });
        }
        dst.data.copy_from_slice(data);
        Ok(())
    }

    fn download(&self, src: &Self::Buffer, out: &mut [u8]) -> ComputeResult<()> {
        if out.len() != src.data.len() {
            return Err(ComputeError::BufferSizeMismatch { expected: src.data.len(), actual: out.len() });
        }
        out.copy_from_slice(&src.data);
        Ok(())
    }

    fn upload_weights(&self, kind: WeightKind, coefficients: &[f32]) -> ComputeResult<Self::Weights> {
        if coefficients.len() > self.limits.weight_cache_capacity {
            return Err(ComputeError::LaunchLimit {
                what: "weight cache entries",
                requested: coefficients.len() as u64,
                limit: self.limits.weight_cache_capacity as u64,
            });
        }
        Ok(CpuWeights { kind, data: coefficients.to_vec() })
    }

    fn exec_gaussian(&self, src: &Self::Buffer, dst: &mut Self::Buffer,
                     weights: &Self::Weights, launch: &LaunchGeometry) -> ComputeResult<()> {
        check_stage(Stage::Gaussian, (weights.len() / 2) as u32, src, RGB_CHANNELS, dst, RGB_CHANNELS, launch)?;
        check_weights(Stage::Gaussian, weights, WeightKind::Gaussian, Some(2 * launch.radius as usize + 1))?;

        let kernel = GaussianKernel::new(&weights.data);
        run_stage(&kernel, &src.data, &mut dst.data, src.shape, launch);
        Ok(())
    }

    fn exec_grayscale(&self, src: &Self::Buffer, dst: &mut Self::Buffer,
                      launch: &LaunchGeometry) -> ComputeResult<()> {
        check_stage(Stage::Grayscale, 0, src, RGB_CHANNELS, dst, GRAY_CHANNELS, launch)?;

        run_stage(&GrayscaleKernel, &src.data, &mut dst.data, src.shape, launch);
        Ok(())
    }

    fn exec_sobel(&self, src: &Self::Buffer, dst: &mut Self::Buffer,
                  weights: &Self::Weights, norm: SobelNorm, launch: &LaunchGeometry) -> ComputeResult<()> {
        check_stage(Stage::Sobel, (SOBEL_WIDTH / 2) as u32, src, GRAY_CHANNELS, dst, GRAY_CHANNELS, launch)?;
        check_weights(Stage::Sobel, weights, WeightKind::Sobel, Some(2 * SOBEL_WIDTH * SOBEL_WIDTH))?;

        let kernel = SobelKernel::new(&weights.data, norm);
        run_stage(&kernel, &src.data, &mut dst.data, src.shape, launch);
        Ok(())
    }

    fn synchronize(&self, stage: Stage) -> ComputeResult<()> {
        // Stages run to completion inside exec_*.
        trace!(%stage, "cpu synchronize");
        Ok(())
    }

    fn limits(&self) -> &GpuLimits {
        &self.limits
    }

    fn name(&self) -> &'static str {
        "cpu"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DeviceOp;
    use crate::config::EdgeMode;
    use crate::weights::{GaussianWeights, SobelWeights};

    fn plan(shape: BatchShape, radius: u32, channels: u32) -> LaunchGeometry {
        LaunchGeometry::plan(shape, (4, 4), radius, channels, EdgeMode::Image, &GpuLimits::default()).unwrap()
    }

    #[test]
    fn test_upload_download() {
        let gpu = CpuPrimitives::new();
        let shape = BatchShape::new(3, 2, 2).unwrap();
        let mut buf = gpu.allocate(shape, 3).unwrap();
        assert_eq!(buf.len(), 36);
        assert!(buf.data().iter().all(|&v| v == 0));

        let data: Vec<u8> = (0..36).collect();
        gpu.upload(&mut buf, &data).unwrap();
        assert_eq!(gpu.download_vec(&buf).unwrap(), data);
    }

    #[test]
    fn test_upload_size_mismatch() {
        let gpu = CpuPrimitives::new();
        let shape = BatchShape::new(2, 2, 1).unwrap();
        let mut buf = gpu.allocate(shape, 3).unwrap();
        let err = gpu.upload(&mut buf, &[0; 11]).unwrap_err();
        assert!(matches!(err, ComputeError::BufferSizeMismatch { expected: 12, actual: 11 }));
    }

    #[test]
    fn test_weight_cache_capacity() {
        let gpu = CpuPrimitives::new();
        assert!(gpu.upload_weights(WeightKind::Gaussian, &[1.0; 64]).is_ok());
        assert!(matches!(
            gpu.upload_weights(WeightKind::Gaussian, &[1.0; 65]),
            Err(ComputeError::LaunchLimit { what: "weight cache entries", .. })
        ));
    }

    #[test]
    fn test_wrong_weights_rejected() {
        let gpu = CpuPrimitives::new();
        let shape = BatchShape::new(4, 4, 1).unwrap();
        let src = gpu.allocate(shape, 3).unwrap();
        let mut dst = gpu.allocate(shape, 3).unwrap();
        let sobel = gpu.upload_weights(WeightKind::Sobel, &SobelWeights::standard().to_coefficients()).unwrap();
        let err = gpu.exec_gaussian(&src, &mut dst, &sobel, &plan(shape, 1, 3)).unwrap_err();
        assert!(matches!(err, ComputeError::Device { stage: Some(Stage::Gaussian), .. }));
    }

    #[test]
    fn test_channel_mismatch_rejected() {
        let gpu = CpuPrimitives::new();
        let shape = BatchShape::new(4, 4, 1).unwrap();
        let src = gpu.allocate(shape, 3).unwrap();
        let mut dst = gpu.allocate(shape, 3).unwrap();
        let err = gpu.exec_grayscale(&src, &mut dst, &plan(shape, 0, 3)).unwrap_err();
        assert!(matches!(err, ComputeError::BufferSizeMismatch { expected: 16, actual: 48 }));
    }

    #[test]
    fn test_launch_radius_must_match_stage() {
        let gpu = CpuPrimitives::new();
        let shape = BatchShape::new(8, 8, 1).unwrap();
        let mut src = gpu.allocate(shape, 1).unwrap();
        gpu.upload(&mut src, &[9; 64]).unwrap();
        let mut dst = gpu.allocate(shape, 1).unwrap();
        let sobel = gpu.upload_weights(WeightKind::Sobel, &SobelWeights::standard().to_coefficients()).unwrap();

        // Planned without an apron: the tile would clamp at block borders
        let flat = plan(shape, 0, 1);
        let err = gpu.exec_sobel(&src, &mut dst, &sobel, SobelNorm::L1, &flat).unwrap_err();
        assert!(matches!(err, ComputeError::Device { op: DeviceOp::Launch, stage: Some(Stage::Sobel), .. }));
        assert!(err.to_string().contains("stage needs radius 1 with apron 1"), "{err}");

        // Right radius, apron stripped by hand
        let stripped = LaunchGeometry { apron: 0, ..plan(shape, 1, 1) };
        assert!(gpu.exec_sobel(&src, &mut dst, &sobel, SobelNorm::L1, &stripped).is_err());

        // Block mode plans no apron
        let block = LaunchGeometry::plan(shape, (4, 4), 1, 1, EdgeMode::Block, &GpuLimits::default()).unwrap();
        assert!(gpu.exec_sobel(&src, &mut dst, &sobel, SobelNorm::L1, &block).is_ok());
        assert!(gpu.exec_sobel(&src, &mut dst, &sobel, SobelNorm::L1, &plan(shape, 1, 1)).is_ok());
    }

    #[test]
    fn test_gaussian_stage_flat() {
        let gpu = CpuPrimitives::new();
        let shape = BatchShape::new(8, 8, 1).unwrap();
        let mut src = gpu.allocate(shape, 3).unwrap();
        gpu.upload(&mut src, &[100; 8 * 8 * 3]).unwrap();
        let mut dst = gpu.allocate(shape, 3).unwrap();
        let g = GaussianWeights::new(1.0, 3).unwrap();
        let w = gpu.upload_weights(WeightKind::Gaussian, g.as_slice()).unwrap();

        gpu.exec_gaussian(&src, &mut dst, &w, &plan(shape, 3, 3)).unwrap();
        gpu.synchronize(Stage::Gaussian).unwrap();
        assert!(dst.data().iter().all(|&v| v == 100));
    }
}
