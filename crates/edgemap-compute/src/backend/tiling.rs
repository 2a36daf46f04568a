//! Launch geometry and device limits.
//!
//! A stage launch covers the batch with a 3D grid: two axes tile the image
//! plane with `tile_width x tile_height` blocks, the third axis is the image
//! index. A block therefore never straddles two images.
//!
//! ```text
//!  grid.z = batch
//!  ┌──────────────┐
//!  │ b(0,0) b(1,0)│  each block: tile_w x tile_h threads, 1 thread per pixel
//!  │ b(0,1) b(1,1)│  shared tile: (tile_w + 2*apron) x (tile_h + 2*apron) pixels
//!  └──────────────┘
//! ```

use crate::batch::BatchShape;
use crate::config::EdgeMode;
use crate::weights::WEIGHT_CACHE_CAPACITY;
use crate::{ComputeError, ComputeResult};

/// Memory safety margin: use at most 60% of device memory.
const MEMORY_SAFETY_MARGIN: f64 = 0.4;

/// Bytes per pixel held on the device during a run:
/// input (3) + blurred (3) + grayscale (1) + output (1).
const PIPELINE_BYTES_PER_PIXEL: u64 = 8;

/// Default assumptions when device info is unavailable.
const DEFAULT_MEMORY_BYTES: u64 = 2 * 1024 * 1024 * 1024; // 2 GB
const DEFAULT_MAX_THREADS_PER_BLOCK: u32 = 1024;
const DEFAULT_MAX_BLOCK_DIM: (u32, u32, u32) = (1024, 1024, 64);
const DEFAULT_MAX_GRID_Y: u32 = 65535;
const DEFAULT_MAX_GRID_Z: u32 = 65535;
const DEFAULT_SHARED_MEM_PER_BLOCK: u32 = 48 * 1024;

/// Device resource limits used to validate launches.
#[derive(Debug, Clone)]
pub struct GpuLimits {
    pub max_threads_per_block: u32,
    pub max_block_dim: (u32, u32, u32),
    /// Upper bound on block rows per image.
    pub max_grid_dim_y: u32,
    /// Upper bound on the batch size (grid depth).
    pub max_grid_dim_z: u32,
    /// Bytes of block-shared memory available to one tile.
    pub shared_mem_per_block: u32,
    /// Entries in the broadcast weight cache.
    pub weight_cache_capacity: usize,
    /// Total device memory in bytes (detected or estimated).
    pub total_memory: u64,
    /// Usable device memory in bytes (after safety margin).
    pub available_memory: u64,
    /// Whether values were auto-detected vs defaults.
    pub detected: bool,
}

impl Default for GpuLimits {
    fn default() -> Self {
        Self {
            max_threads_per_block: DEFAULT_MAX_THREADS_PER_BLOCK,
            max_block_dim: DEFAULT_MAX_BLOCK_DIM,
            max_grid_dim_y: DEFAULT_MAX_GRID_Y,
            max_grid_dim_z: DEFAULT_MAX_GRID_Z,
            shared_mem_per_block: DEFAULT_SHARED_MEM_PER_BLOCK,
            weight_cache_capacity: WEIGHT_CACHE_CAPACITY,
            total_memory: DEFAULT_MEMORY_BYTES,
            available_memory: (DEFAULT_MEMORY_BYTES as f64 * (1.0 - MEMORY_SAFETY_MARGIN)) as u64,
            detected: false,
        }
    }
}

impl GpuLimits {
    /// Default limits with the given total memory (applies safety margin).
    pub fn with_memory(total_bytes: u64) -> Self {
        Self {
            total_memory: total_bytes,
            available_memory: (total_bytes as f64 * (1.0 - MEMORY_SAFETY_MARGIN)) as u64,
            detected: true,
            ..Self::default()
        }
    }

    /// Device memory a full pipeline run needs for `shape`.
    pub fn estimate_memory(&self, shape: BatchShape) -> u64 {
        shape.pixel_count() as u64 * PIPELINE_BYTES_PER_PIXEL
    }

    /// Check that all four pipeline buffers fit at once.
    pub fn fits_memory(&self, shape: BatchShape) -> bool {
        self.estimate_memory(shape) <= self.available_memory
    }
}

/// Grid or block extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub fn volume(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

/// Launch configuration of one stage over one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGeometry {
    pub grid: Dim3,
    pub block: Dim3,
    /// Neighborhood radius of the stage.
    pub radius: u32,
    /// Extra pixels loaded on each side of the tile.
    pub apron: u32,
    /// Samples per pixel of the stage input.
    pub channels: u32,
    pub edge_mode: EdgeMode,
}

impl LaunchGeometry {
    /// Plan a launch of a stage with neighborhood `radius` reading
    /// `channels`-sample pixels, checked against `limits`.
    pub fn plan(
        shape: BatchShape,
        tile: (u32, u32),
        radius: u32,
        channels: u32,
        edge_mode: EdgeMode,
        limits: &GpuLimits,
    ) -> ComputeResult<Self> {
        let (tw, th) = tile;
        if tw == 0 || th == 0 {
            return Err(ComputeError::InvalidBlock(tw, th));
        }

        let threads = tw as u64 * th as u64;
        if threads > limits.max_threads_per_block as u64 {
            return Err(ComputeError::LaunchLimit {
                what: "threads per block",
                requested: threads,
                limit: limits.max_threads_per_block as u64,
            });
        }
        if tw > limits.max_block_dim.0 || th > limits.max_block_dim.1 {
            return Err(ComputeError::LaunchLimit {
                what: "block dimension",
                requested: tw.max(th) as u64,
                limit: limits.max_block_dim.0.min(limits.max_block_dim.1) as u64,
            });
        }
        let grid_y = shape.height.div_ceil(th);
        if grid_y > limits.max_grid_dim_y {
            return Err(ComputeError::LaunchLimit {
                what: "grid rows",
                requested: grid_y as u64,
                limit: limits.max_grid_dim_y as u64,
            });
        }
        if shape.batch > limits.max_grid_dim_z {
            return Err(ComputeError::LaunchLimit {
                what: "batch size",
                requested: shape.batch as u64,
                limit: limits.max_grid_dim_z as u64,
            });
        }

        let apron = match edge_mode {
            EdgeMode::Image => radius,
            EdgeMode::Block => 0,
        };

        let geometry = Self {
            grid: Dim3::new(shape.width.div_ceil(tw), grid_y, shape.batch),
            block: Dim3::new(tw, th, 1),
            radius,
            apron,
            channels,
            edge_mode,
        };

        let shared = geometry.shared_mem_bytes() as u64;
        if shared > limits.shared_mem_per_block as u64 {
            return Err(ComputeError::LaunchLimit {
                what: "shared tile bytes",
                requested: shared,
                limit: limits.shared_mem_per_block as u64,
            });
        }

        Ok(geometry)
    }

    /// Tile width including the apron.
    #[inline]
    pub fn tile_width(&self) -> u32 {
        self.block.x + 2 * self.apron
    }

    /// Tile height including the apron.
    #[inline]
    pub fn tile_height(&self) -> u32 {
        self.block.y + 2 * self.apron
    }

    /// Shared memory one block needs for its tile (8-bit samples).
    pub fn shared_mem_bytes(&self) -> u32 {
        self.tile_width() * self.tile_height() * self.channels
    }

    pub fn threads_per_block(&self) -> u64 {
        self.block.volume()
    }

    pub fn block_count(&self) -> u64 {
        self.grid.volume()
    }

    /// Region of the image covered by block `(bx, by)`, cut at the image edge.
    pub fn block_region(&self, shape: BatchShape, bx: u32, by: u32) -> Tile {
        let x = bx * self.block.x;
        let y = by * self.block.y;
        Tile::new(x, y, self.block.x.min(shape.width - x), self.block.y.min(shape.height - y))
    }
}

/// Active footprint of one block within its image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    /// X offset in the image.
    pub x: u32,
    /// Y offset in the image.
    pub y: u32,
    /// Active threads along x.
    pub width: u32,
    /// Active threads along y.
    pub height: u32,
}

impl Tile {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }
}

/// Active block footprints of one image, row-major.
pub fn generate_tiles(shape: BatchShape, geometry: &LaunchGeometry) -> Vec<Tile> {
    let mut tiles = Vec::with_capacity((geometry.grid.x * geometry.grid.y) as usize);
    for by in 0..geometry.grid.y {
        for bx in 0..geometry.grid.x {
            tiles.push(geometry.block_region(shape, bx, by));
        }
    }
    tiles
}
