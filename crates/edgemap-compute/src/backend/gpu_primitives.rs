//! Device primitives abstraction shared by all backends.

use super::GpuLimits;
use super::tiling::LaunchGeometry;
use crate::{ComputeError, ComputeResult, DeviceOp};
use crate::batch::BatchShape;
use crate::config::{EdgeMode, SobelNorm};
use crate::stages::Stage;
use crate::weights::WeightKind;

/// Handle to a batch buffer in device memory.
///
/// Dropping the handle releases the device memory.
pub trait DeviceBuffer: Send + Sync {
    /// Batch dimensions the buffer was sized for.
    fn shape(&self) -> BatchShape;

    /// Samples per pixel (3 or 1).
    fn channels(&self) -> u32;

    /// Length in samples.
    fn len(&self) -> usize {
        self.shape().buffer_len(self.channels())
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size in bytes of device memory used (8-bit samples).
    fn size_bytes(&self) -> u64 {
        self.len() as u64
    }
}

/// Handle to a weight table in broadcast memory.
pub trait WeightHandle: Send + Sync {
    fn kind(&self) -> WeightKind;

    /// Number of coefficients.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Core device operations.
///
/// Stage launches may be asynchronous; [`synchronize`](Self::synchronize)
/// is the completion barrier after which the stage's writes are visible
/// and any deferred failure is reported.
pub trait GpuPrimitives: Send + Sync {
    /// Backend-specific buffer handle.
    type Buffer: DeviceBuffer;
    /// Backend-specific weight table handle.
    type Weights: WeightHandle;

    /// Allocate a zero-filled buffer for `shape` with `channels` samples per pixel.
    fn allocate(&self, shape: BatchShape, channels: u32) -> ComputeResult<Self::Buffer>;

    /// Copy host samples into a device buffer of exactly the same length.
    fn upload(&self, dst: &mut Self::Buffer, data: &[u8]) -> ComputeResult<()>;

    /// Copy a device buffer into a host buffer of exactly the same length.
    fn download(&self, src: &Self::Buffer, out: &mut [u8]) -> ComputeResult<()>;

    /// Download into a fresh host vector.
    fn download_vec(&self, src: &Self::Buffer) -> ComputeResult<Vec<u8>> {
        let mut out = vec![0; src.len()];
        self.download(src, &mut out)?;
        Ok(out)
    }

    /// Upload a weight table to broadcast memory.
    fn upload_weights(&self, kind: WeightKind, coefficients: &[f32]) -> ComputeResult<Self::Weights>;

    /// Gaussian smoothing: 3-channel `src` into 3-channel `dst`.
    fn exec_gaussian(&self, src: &Self::Buffer, dst: &mut Self::Buffer,
                     weights: &Self::Weights, launch: &LaunchGeometry) -> ComputeResult<()>;

    /// Grayscale reduction: 3-channel `src` into 1-channel `dst`.
    fn exec_grayscale(&self, src: &Self::Buffer, dst: &mut Self::Buffer,
                      launch: &LaunchGeometry) -> ComputeResult<()>;

    /// Sobel magnitude: 1-channel `src` into 1-channel `dst`.
    fn exec_sobel(&self, src: &Self::Buffer, dst: &mut Self::Buffer,
                  weights: &Self::Weights, norm: SobelNorm, launch: &LaunchGeometry) -> ComputeResult<()>;

    /// Wait until all work of `stage` is finished and visible.
    fn synchronize(&self, stage: Stage) -> ComputeResult<()>;

    /// Device limits.
    fn limits(&self) -> &GpuLimits;

    /// Backend name.
    fn name(&self) -> &'static str;
}

/// Check a stage launch against its buffers and neighborhood radius
/// before anything is issued.
pub(crate) fn check_stage<B: DeviceBuffer>(
    stage: Stage,
    radius: u32,
    src: &B,
    src_channels: u32,
    dst: &B,
    dst_channels: u32,
    launch: &LaunchGeometry,
) -> ComputeResult<()> {
    let shape = src.shape();
    if src.channels() != src_channels {
        return Err(ComputeError::BufferSizeMismatch {
            expected: shape.buffer_len(src_channels),
            actual: src.len(),
        });
    }
    let expected = shape.buffer_len(dst_channels);
    if dst.shape() != shape || dst.channels() != dst_channels {
        return Err(ComputeError::BufferSizeMismatch { expected, actual: dst.len() });
    }
    if launch.channels != src_channels
        || launch.grid.z != shape.batch
        || (launch.grid.x as u64) * (launch.block.x as u64) < shape.width as u64
        || (launch.grid.y as u64) * (launch.block.y as u64) < shape.height as u64
    {
        return Err(ComputeError::stage(
            DeviceOp::Launch,
            stage,
            format!("grid {:?} x block {:?} does not cover {}x{}x{}",
                launch.grid, launch.block, shape.width, shape.height, shape.batch),
        ));
    }
    // A launch planned for a smaller radius would read past its apron.
    let apron = match launch.edge_mode {
        EdgeMode::Image => radius,
        EdgeMode::Block => 0,
    };
    if launch.radius != radius || launch.apron != apron {
        return Err(ComputeError::stage(
            DeviceOp::Launch,
            stage,
            format!("launch planned for radius {} with apron {}, stage needs radius {radius} with apron {apron}",
                launch.radius, launch.apron),
        ));
    }
    Ok(())
}

/// Check that a weight handle holds the table a stage expects.
pub(crate) fn check_weights<W: WeightHandle>(stage: Stage, weights: &W, kind: WeightKind, len: Option<usize>) -> ComputeResult<()> {
    if weights.kind() != kind {
        return Err(ComputeError::stage(
            DeviceOp::Launch,
            stage,
            format!("expected {kind} weights, got {}", weights.kind()),
        ));
    }
    match len {
        Some(len) if weights.len() != len => Err(ComputeError::stage(
            DeviceOp::Launch,
            stage,
            format!("expected {len} {kind} weights, got {}", weights.len()),
        )),
        _ => Ok(()),
    }
}
