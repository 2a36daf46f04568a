//! CUDA GPU compute backend for the edge-map stages.
//!
//! Requires the `cuda` feature and NVIDIA GPU with CUDA support.

use std::sync::Arc;

use cudarc::driver::sys::CUdevice_attribute;
use cudarc::driver::{CudaContext, CudaFunction, CudaModule, CudaSlice, CudaStream, LaunchConfig, PushKernelArg};
use tracing::debug;

use super::gpu_primitives::{DeviceBuffer, GpuPrimitives, WeightHandle, check_stage, check_weights};
use super::tiling::{GpuLimits, LaunchGeometry};
use crate::batch::{BatchShape, GRAY_CHANNELS, RGB_CHANNELS};
use crate::config::{EdgeMode, SobelNorm};
use crate::stages::Stage;
use crate::weights::{SOBEL_WIDTH, WeightKind};
use crate::{ComputeError, ComputeResult, DeviceOp};

// =============================================================================
// CUDA Kernel Source
// =============================================================================

/// CUDA kernel source for the three stages.
///
/// Compiled at runtime via NVRTC. Every kernel runs one thread per output
/// pixel on a `(ceil(w/bw), ceil(h/bh), batch)` grid and stages its input
/// through dynamic shared memory:
/// - `gaussian_kernel`: 3-channel weighted average, per-pixel normalization
/// - `grayscale_kernel`: integer Rec.601 luma
/// - `sobel_kernel`: 3x3 gradient, L1 or L2 magnitude, saturated
const CUDA_KERNELS: &str = r#"
struct Tile {
    int width;
    int apron;
    int clamp_w;
    int clamp_h;
};

__device__ __forceinline__ int clampi(int v, int lo, int hi) {
    return v < lo ? lo : (v > hi ? hi : v);
}

// Fill the block's tile, then barrier. Called by every thread of the block.
__device__ Tile load_tile(
    unsigned char* tile,
    const unsigned char* __restrict__ image,
    int c, int w, int h, int apron, int block_mode
) {
    int x0 = blockIdx.x * blockDim.x;
    int y0 = blockIdx.y * blockDim.y;
    int cols = min((int)blockDim.x, w - x0);
    int rows = min((int)blockDim.y, h - y0);
    Tile t;

    if (block_mode) {
        t.width = blockDim.x;
        t.apron = 0;
        t.clamp_w = cols;
        t.clamp_h = rows;
        int lx = threadIdx.x;
        int ly = threadIdx.y;
        if (lx < cols && ly < rows) {
            int s = ((y0 + ly) * w + x0 + lx) * c;
            int d = (ly * t.width + lx) * c;
            for (int k = 0; k < c; k++) tile[d + k] = image[s + k];
        }
    } else {
        t.width = blockDim.x + 2 * apron;
        t.apron = apron;
        t.clamp_w = t.width;
        t.clamp_h = blockDim.y + 2 * apron;
        int n = t.clamp_w * t.clamp_h;
        int tid = threadIdx.y * blockDim.x + threadIdx.x;
        int nthreads = blockDim.x * blockDim.y;
        for (int i = tid; i < n; i += nthreads) {
            int tx = i % t.width;
            int ty = i / t.width;
            int gx = clampi(x0 + tx - apron, 0, w - 1);
            int gy = clampi(y0 + ty - apron, 0, h - 1);
            int s = (gy * w + gx) * c;
            for (int k = 0; k < c; k++) tile[i * c + k] = image[s + k];
        }
    }

    __syncthreads();
    return t;
}

__device__ __forceinline__ const unsigned char* tile_at(
    const unsigned char* tile, Tile t, int c, int lx, int ly, int dx, int dy
) {
    int tx = clampi(lx + t.apron + dx, 0, t.clamp_w - 1);
    int ty = clampi(ly + t.apron + dy, 0, t.clamp_h - 1);
    return tile + (ty * t.width + tx) * c;
}

extern "C" {

// ============================================================================
// Gaussian smoothing (RGB -> RGB)
// ============================================================================
__global__ void gaussian_kernel(
    const unsigned char* __restrict__ src,
    unsigned char* __restrict__ dst,
    const float* __restrict__ weights,
    int w, int h, int radius, int apron, int block_mode
) {
    extern __shared__ unsigned char tile[];
    const int c = 3;
    size_t plane = (size_t)w * h;
    Tile t = load_tile(tile, src + blockIdx.z * plane * c, c, w, h, apron, block_mode);

    int lx = threadIdx.x;
    int ly = threadIdx.y;
    int x = blockIdx.x * blockDim.x + lx;
    int y = blockIdx.y * blockDim.y + ly;
    if (x >= w || y >= h) return;

    float acc0 = 0.0f, acc1 = 0.0f, acc2 = 0.0f, norm = 0.0f;
    for (int dy = -radius; dy <= radius; dy++) {
        float wy = weights[radius + dy];
        for (int dx = -radius; dx <= radius; dx++) {
            float wt = weights[radius + dx] * wy;
            const unsigned char* px = tile_at(tile, t, c, lx, ly, dx, dy);
            acc0 += wt * (float)px[0];
            acc1 += wt * (float)px[1];
            acc2 += wt * (float)px[2];
            norm += wt;
        }
    }

    size_t o = (blockIdx.z * plane + (size_t)y * w + x) * c;
    dst[o]     = (unsigned char)fminf(fmaxf(roundf(acc0 / norm), 0.0f), 255.0f);
    dst[o + 1] = (unsigned char)fminf(fmaxf(roundf(acc1 / norm), 0.0f), 255.0f);
    dst[o + 2] = (unsigned char)fminf(fmaxf(roundf(acc2 / norm), 0.0f), 255.0f);
}

// ============================================================================
// Grayscale (RGB -> luma)
// ============================================================================
__global__ void grayscale_kernel(
    const unsigned char* __restrict__ src,
    unsigned char* __restrict__ dst,
    int w, int h, int block_mode
) {
    extern __shared__ unsigned char tile[];
    const int c = 3;
    size_t plane = (size_t)w * h;
    Tile t = load_tile(tile, src + blockIdx.z * plane * c, c, w, h, 0, block_mode);

    int lx = threadIdx.x;
    int ly = threadIdx.y;
    int x = blockIdx.x * blockDim.x + lx;
    int y = blockIdx.y * blockDim.y + ly;
    if (x >= w || y >= h) return;

    const unsigned char* px = tile_at(tile, t, c, lx, ly, 0, 0);
    unsigned int l = (299u * px[0] + 587u * px[1] + 114u * px[2]) / 1000u;
    dst[blockIdx.z * plane + (size_t)y * w + x] = (unsigned char)l;
}

// ============================================================================
// Sobel magnitude (luma -> edge)
// ============================================================================
__global__ void sobel_kernel(
    const unsigned char* __restrict__ src,
    unsigned char* __restrict__ dst,
    const float* __restrict__ weights,
    int w, int h, int apron, int block_mode, int l2
) {
    extern __shared__ unsigned char tile[];
    size_t plane = (size_t)w * h;
    Tile t = load_tile(tile, src + blockIdx.z * plane, 1, w, h, apron, block_mode);

    int lx = threadIdx.x;
    int ly = threadIdx.y;
    int x = blockIdx.x * blockDim.x + lx;
    int y = blockIdx.y * blockDim.y + ly;
    if (x >= w || y >= h) return;

    int gx = 0, gy = 0;
    for (int dy = -1; dy <= 1; dy++) {
        for (int dx = -1; dx <= 1; dx++) {
            int k = (dy + 1) * 3 + (dx + 1);
            int p = tile_at(tile, t, 1, lx, ly, dx, dy)[0];
            gx += (int)weights[k] * p;
            gy += (int)weights[9 + k] * p;
        }
    }

    int m;
    if (l2) {
        m = (int)fminf(roundf(sqrtf((float)gx * gx + (float)gy * gy)), 255.0f);
    } else {
        m = min(abs(gx) + abs(gy), 255);
    }
    dst[blockIdx.z * plane + (size_t)y * w + x] = (unsigned char)m;
}

} // extern "C"
"#;

// =============================================================================
// CUDA Handles
// =============================================================================

/// CUDA batch buffer.
///
/// Memory is managed by cudarc and freed when this handle is dropped.
pub struct CudaBuffer {
    buffer: CudaSlice<u8>,
    shape: BatchShape,
    channels: u32,
}

impl DeviceBuffer for CudaBuffer {
    fn shape(&self) -> BatchShape {
        self.shape
    }

    fn channels(&self) -> u32 {
        self.channels
    }
}

/// Read-only weight table in device memory.
pub struct CudaWeights {
    buffer: CudaSlice<f32>,
    kind: WeightKind,
    len: usize,
}

impl WeightHandle for CudaWeights {
    fn kind(&self) -> WeightKind {
        self.kind
    }

    fn len(&self) -> usize {
        self.len
    }
}

// =============================================================================
// CudaPrimitives
// =============================================================================

/// CUDA primitives for the edge-map pipeline.
pub struct CudaPrimitives {
    /// CUDA context - kept alive for the lifetime of primitives.
    #[allow(dead_code)]
    ctx: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    /// Compiled CUDA module - kept alive for kernel lifetime.
    #[allow(dead_code)]
    module: Arc<CudaModule>,
    k_gaussian: CudaFunction,
    k_grayscale: CudaFunction,
    k_sobel: CudaFunction,
    limits: GpuLimits,
}

impl CudaPrimitives {
    /// Create new CUDA primitives on device 0.
    pub fn new() -> ComputeResult<Self> {
        let ctx = CudaContext::new(0).map_err(|e| {
            ComputeError::DeviceCreation(format!("CUDA init failed: {e:?}"))
        })?;

        let stream = ctx.default_stream();
        let limits = query_limits(&ctx);
        debug!(?limits, "CUDA device limits");

        let ptx = cudarc::nvrtc::compile_ptx(CUDA_KERNELS).map_err(|e| {
            ComputeError::ShaderCompilation(format!("CUDA kernel compile failed: {e:?}"))
        })?;

        let module = ctx.load_module(ptx).map_err(|e| {
            ComputeError::ShaderCompilation(format!("CUDA module load failed: {e:?}"))
        })?;

        let load_err = |name: &str, e: cudarc::driver::result::DriverError| {
            ComputeError::ShaderCompilation(format!("Failed to load {name}: {e:?}"))
        };

        let k_gaussian = module.load_function("gaussian_kernel").map_err(|e| load_err("gaussian_kernel", e))?;
        let k_grayscale = module.load_function("grayscale_kernel").map_err(|e| load_err("grayscale_kernel", e))?;
        let k_sobel = module.load_function("sobel_kernel").map_err(|e| load_err("sobel_kernel", e))?;

        Ok(Self {
            ctx,
            stream,
            module,
            k_gaussian,
            k_grayscale,
            k_sobel,
            limits,
        })
    }

    /// Check if CUDA is available.
    pub fn is_available() -> bool {
        CudaContext::new(0).is_ok()
    }

    /// Launch config straight from the planned geometry.
    fn launch_config(launch: &LaunchGeometry) -> LaunchConfig {
        LaunchConfig {
            grid_dim: (launch.grid.x, launch.grid.y, launch.grid.z),
            block_dim: (launch.block.x, launch.block.y, launch.block.z),
            shared_mem_bytes: launch.shared_mem_bytes(),
        }
    }
}

fn block_mode(launch: &LaunchGeometry) -> i32 {
    match launch.edge_mode {
        EdgeMode::Image => 0,
        EdgeMode::Block => 1,
    }
}

fn launch_err(stage: Stage) -> impl Fn(cudarc::driver::result::DriverError) -> ComputeError {
    move |e| ComputeError::stage(DeviceOp::Launch, stage, format!("{e:?}"))
}

impl GpuPrimitives for CudaPrimitives {
    type Buffer = CudaBuffer;
    type Weights = CudaWeights;

    fn allocate(&self, shape: BatchShape, channels: u32) -> ComputeResult<Self::Buffer> {
        let buffer: CudaSlice<u8> = self.stream.alloc_zeros(shape.buffer_len(channels)).map_err(|e| {
            ComputeError::device(DeviceOp::Allocate, format!("{e:?}"))
        })?;
        Ok(CudaBuffer { buffer, shape, channels })
    }

    fn upload(&self, dst: &mut Self::Buffer, data: &[u8]) -> ComputeResult<()> {
        if data.len() != dst.len() {
            return Err(ComputeError::BufferSizeMismatch { expected: dst.len(), actual: data.len() });
        }
        self.stream.memcpy_htod(data, &mut dst.buffer).map_err(|e| {
            ComputeError::device(DeviceOp::Upload, format!("{e:?}"))
        })
    }

    fn download(&self, src: &Self::Buffer, out: &mut [u8]) -> ComputeResult<()> {
        if out.len() != src.len() {
            return Err(ComputeError::BufferSizeMismatch { expected: src.len(), actual: out.len() });
        }
        self.stream.memcpy_dtoh(&src.buffer, out).map_err(|e| {
            ComputeError::device(DeviceOp::Download, format!("{e:?}"))
        })
    }

    fn upload_weights(&self, kind: WeightKind, coefficients: &[f32]) -> ComputeResult<Self::Weights> {
        if coefficients.len() > self.limits.weight_cache_capacity {
            return Err(ComputeError::LaunchLimit {
                what: "weight cache entries",
                requested: coefficients.len() as u64,
                limit: self.limits.weight_cache_capacity as u64,
            });
        }
        let buffer = self.stream.clone_htod(coefficients).map_err(|e| {
            ComputeError::device(DeviceOp::Upload, format!("{kind} weights: {e:?}"))
        })?;
        Ok(CudaWeights { buffer, kind, len: coefficients.len() })
    }

    fn exec_gaussian(&self, src: &Self::Buffer, dst: &mut Self::Buffer,
                     weights: &Self::Weights, launch: &LaunchGeometry) -> ComputeResult<()> {
        check_stage(Stage::Gaussian, (weights.len() / 2) as u32, src, RGB_CHANNELS, dst, RGB_CHANNELS, launch)?;
        check_weights(Stage::Gaussian, weights, WeightKind::Gaussian, Some(2 * launch.radius as usize + 1))?;

        let (w, h) = (src.shape.width as i32, src.shape.height as i32);
        let radius = launch.radius as i32;
        let apron = launch.apron as i32;
        let mode = block_mode(launch);

        let cfg = Self::launch_config(launch);
        let mut builder = self.stream.launch_builder(&self.k_gaussian);
        builder.arg(&src.buffer);
        builder.arg(&dst.buffer);
        builder.arg(&weights.buffer);
        builder.arg(&w); builder.arg(&h); builder.arg(&radius); builder.arg(&apron); builder.arg(&mode);

        #[allow(unsafe_code)]
        unsafe { builder.launch(cfg) }.map_err(launch_err(Stage::Gaussian))?;
        Ok(())
    }

    fn exec_grayscale(&self, src: &Self::Buffer, dst: &mut Self::Buffer,
                      launch: &LaunchGeometry) -> ComputeResult<()> {
        check_stage(Stage::Grayscale, 0, src, RGB_CHANNELS, dst, GRAY_CHANNELS, launch)?;

        let (w, h) = (src.shape.width as i32, src.shape.height as i32);
        let mode = block_mode(launch);

        let cfg = Self::launch_config(launch);
        let mut builder = self.stream.launch_builder(&self.k_grayscale);
        builder.arg(&src.buffer);
        builder.arg(&dst.buffer);
        builder.arg(&w); builder.arg(&h); builder.arg(&mode);

        #[allow(unsafe_code)]
        unsafe { builder.launch(cfg) }.map_err(launch_err(Stage::Grayscale))?;
        Ok(())
    }

    fn exec_sobel(&self, src: &Self::Buffer, dst: &mut Self::Buffer,
                  weights: &Self::Weights, norm: SobelNorm, launch: &LaunchGeometry) -> ComputeResult<()> {
        check_stage(Stage::Sobel, (SOBEL_WIDTH / 2) as u32, src, GRAY_CHANNELS, dst, GRAY_CHANNELS, launch)?;
        check_weights(Stage::Sobel, weights, WeightKind::Sobel, Some(2 * SOBEL_WIDTH * SOBEL_WIDTH))?;

        let (w, h) = (src.shape.width as i32, src.shape.height as i32);
        let apron = launch.apron as i32;
        let mode = block_mode(launch);
        let l2 = matches!(norm, SobelNorm::L2) as i32;

        let cfg = Self::launch_config(launch);
        let mut builder = self.stream.launch_builder(&self.k_sobel);
        builder.arg(&src.buffer);
        builder.arg(&dst.buffer);
        builder.arg(&weights.buffer);
        builder.arg(&w); builder.arg(&h); builder.arg(&apron); builder.arg(&mode); builder.arg(&l2);

        #[allow(unsafe_code)]
        unsafe { builder.launch(cfg) }.map_err(launch_err(Stage::Sobel))?;
        Ok(())
    }

    fn synchronize(&self, stage: Stage) -> ComputeResult<()> {
        self.stream.synchronize().map_err(|e| {
            ComputeError::stage(DeviceOp::Synchronize, stage, format!("{e:?}"))
        })
    }

    fn limits(&self) -> &GpuLimits {
        &self.limits
    }

    fn name(&self) -> &'static str {
        "CUDA"
    }
}

// =============================================================================
// Device Limits
// =============================================================================

/// Query launch limits and VRAM from the driver, keeping defaults for
/// anything the driver does not report.
fn query_limits(ctx: &CudaContext) -> GpuLimits {
    use cudarc::driver::sys as cuda_sys;

    let defaults = GpuLimits::default();
    let attr = |a: CUdevice_attribute, fallback: u32| {
        ctx.attribute(a).map(|v| v as u32).unwrap_or(fallback)
    };

    let mut free: usize = 0;
    let mut total: usize = 0;

    #[allow(unsafe_code)]
    let result = unsafe {
        cuda_sys::cuMemGetInfo_v2(&raw mut free, &raw mut total)
    };

    let (total_memory, available_memory) = if result == cuda_sys::CUresult::CUDA_SUCCESS {
        // 60% of free memory for driver overhead and other allocations
        (total as u64, (free as f64 * 0.6) as u64)
    } else {
        (defaults.total_memory, defaults.available_memory)
    };

    GpuLimits {
        max_threads_per_block: attr(
            CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK,
            defaults.max_threads_per_block,
        ),
        max_block_dim: (
            attr(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_X, defaults.max_block_dim.0),
            attr(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_Y, defaults.max_block_dim.1),
            attr(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_Z, defaults.max_block_dim.2),
        ),
        max_grid_dim_y: attr(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_Y, defaults.max_grid_dim_y),
        max_grid_dim_z: attr(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_Z, defaults.max_grid_dim_z),
        shared_mem_per_block: attr(
            CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_SHARED_MEMORY_PER_BLOCK,
            defaults.shared_mem_per_block,
        ),
        weight_cache_capacity: defaults.weight_cache_capacity,
        total_memory,
        available_memory,
        detected: result == cuda_sys::CUresult::CUDA_SUCCESS,
    }
}
