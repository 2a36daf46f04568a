//! Tiled stage executor.
//!
//! Host rendition of the per-pixel compute pattern every stage shares:
//!
//! 1. The grid is `(ceil(w / bw), ceil(h / bh), batch)` blocks; a block
//!    covers one rectangular patch of exactly one image.
//! 2. **Load**: the block fills its private [`SharedTile`] from the input
//!    image. With [`EdgeMode::Image`] the tile includes an apron of `apron`
//!    pixels whose coordinates are clamped to the image bounds.
//! 3. **Barrier**: all loads of the block complete before any thread reads.
//! 4. **Compute**: each active thread (pixel inside the image) runs the
//!    stage's [`StageKernel::combine`] reading only from the tile.
//! 5. **Write**: the result goes to the thread's own output pixel.
//!
//! Blocks are independent. Each rayon task owns one band of block rows of
//! one image as a disjoint `&mut` slice of the output, so no two tasks can
//! touch the same output sample.

use rayon::prelude::*;
use tracing::trace;

use super::tiling::LaunchGeometry;
use crate::batch::BatchShape;
use crate::config::EdgeMode;
use crate::stages::Stage;

/// Per-pixel combine policy plugged into the executor.
pub trait StageKernel: Sync {
    const STAGE: Stage;
    /// Samples per input pixel.
    const SRC_CHANNELS: usize;
    /// Samples per output pixel.
    const DST_CHANNELS: usize;

    /// Neighborhood radius; 0 for point operations.
    fn radius(&self) -> u32;

    /// Produce the output pixel of thread `(lx, ly)` from the loaded tile.
    fn combine(&self, tile: &SharedTile, lx: usize, ly: usize, out: &mut [u8]);
}

/// Block-private staging buffer.
///
/// Holds `(block_w + 2*apron) x (block_h + 2*apron)` pixels. Reads clamp to
/// the loaded region: the whole tile in image mode, the active block
/// footprint in block mode.
pub struct SharedTile {
    data: Vec<u8>,
    width: usize,
    channels: usize,
    apron: usize,
    mode: EdgeMode,
    // readable extent of the current block
    clamp_w: usize,
    clamp_h: usize,
}

impl SharedTile {
    pub fn new(geometry: &LaunchGeometry) -> Self {
        let width = geometry.tile_width() as usize;
        let height = geometry.tile_height() as usize;
        let channels = geometry.channels as usize;
        Self {
            data: vec![0; width * height * channels],
            width,
            channels,
            apron: geometry.apron as usize,
            mode: geometry.edge_mode,
            clamp_w: width,
            clamp_h: height,
        }
    }

    /// Load phase for the block at `(x0, y0)` with `cols x rows` active threads.
    ///
    /// `image` is the input of the block's own image only, so the apron can
    /// never pick up samples from a neighbouring image in the batch.
    pub fn load(&mut self, image: &[u8], width: usize, height: usize, x0: usize, y0: usize, cols: usize, rows: usize) {
        let c = self.channels;
        match self.mode {
            EdgeMode::Image => {
                let tile_h = self.data.len() / (self.width * c);
                let a = self.apron as isize;
                for ty in 0..tile_h {
                    let gy = (y0 as isize + ty as isize - a).clamp(0, height as isize - 1) as usize;
                    let row = &image[gy * width * c..(gy + 1) * width * c];
                    for tx in 0..self.width {
                        let gx = (x0 as isize + tx as isize - a).clamp(0, width as isize - 1) as usize;
                        let dst = (ty * self.width + tx) * c;
                        self.data[dst..dst + c].copy_from_slice(&row[gx * c..gx * c + c]);
                    }
                }
                self.clamp_w = self.width;
                self.clamp_h = tile_h;
            }
            EdgeMode::Block => {
                // Only active threads write their own pixel.
                for ly in 0..rows {
                    let src = ((y0 + ly) * width + x0) * c;
                    let dst = ly * self.width * c;
                    self.data[dst..dst + cols * c].copy_from_slice(&image[src..src + cols * c]);
                }
                self.clamp_w = cols;
                self.clamp_h = rows;
            }
        }
    }

    /// Pixel at offset `(dx, dy)` from thread `(lx, ly)`.
    #[inline]
    pub fn sample(&self, lx: usize, ly: usize, dx: i32, dy: i32) -> &[u8] {
        let tx = (lx as isize + self.apron as isize + dx as isize).clamp(0, self.clamp_w as isize - 1) as usize;
        let ty = (ly as isize + self.apron as isize + dy as isize).clamp(0, self.clamp_h as isize - 1) as usize;
        let idx = (ty * self.width + tx) * self.channels;
        &self.data[idx..idx + self.channels]
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

/// Run one stage over the whole batch.
///
/// `src` and `dst` must hold exactly `shape` pixels with the kernel's
/// channel counts; the pipeline checks this before launching.
pub fn run_stage<K: StageKernel>(kernel: &K, src: &[u8], dst: &mut [u8], shape: BatchShape, launch: &LaunchGeometry) {
    let width = shape.width as usize;
    let height = shape.height as usize;
    let block_w = launch.block.x as usize;
    let block_h = launch.block.y as usize;
    let src_image_len = shape.pixels_per_image() * K::SRC_CHANNELS;
    let dst_image_len = shape.pixels_per_image() * K::DST_CHANNELS;
    let dst_row_len = width * K::DST_CHANNELS;

    debug_assert_eq!(src.len(), shape.buffer_len(K::SRC_CHANNELS as u32));
    debug_assert_eq!(dst.len(), shape.buffer_len(K::DST_CHANNELS as u32));
    debug_assert_eq!(launch.channels as usize, K::SRC_CHANNELS);
    debug_assert_eq!(launch.grid.z, shape.batch);

    trace!(stage = %K::STAGE, grid = ?launch.grid, block = ?launch.block, apron = launch.apron, "run_stage");

    dst.par_chunks_mut(dst_image_len)
        .zip(src.par_chunks(src_image_len))
        .for_each(|(dst_image, src_image)| {
            dst_image
                .par_chunks_mut(dst_row_len * block_h)
                .enumerate()
                .for_each(|(by, band)| {
                    let mut tile = SharedTile::new(launch);
                    let y0 = by * block_h;
                    let rows = band.len() / dst_row_len;

                    for bx in 0..launch.grid.x as usize {
                        let x0 = bx * block_w;
                        let cols = block_w.min(width - x0);

                        tile.load(src_image, width, height, x0, y0, cols, rows);
                        // Barrier: the tile is complete before any combine reads it.

                        for ly in 0..rows {
                            for lx in 0..cols {
                                let o = (ly * width + x0 + lx) * K::DST_CHANNELS;
                                kernel.combine(&tile, lx, ly, &mut band[o..o + K::DST_CHANNELS]);
                            }
                        }
                    }
                });
        });
}
