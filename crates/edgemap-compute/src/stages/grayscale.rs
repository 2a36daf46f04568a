//! RGB to luma reduction.

use super::Stage;
use crate::backend::{SharedTile, StageKernel};

/// Rec.601 luma weights in thousandths: 0.299, 0.587, 0.114.
const LUMA_R: u32 = 299;
const LUMA_G: u32 = 587;
const LUMA_B: u32 = 114;
const LUMA_SCALE: u32 = 1000;

/// `floor(0.299 R + 0.587 G + 0.114 B)`, evaluated in exact fixed point.
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((LUMA_R * r as u32 + LUMA_G * g as u32 + LUMA_B * b as u32) / LUMA_SCALE) as u8
}

/// Point operation: radius 0, no neighborhood.
pub struct GrayscaleKernel;

impl StageKernel for GrayscaleKernel {
    const STAGE: Stage = Stage::Grayscale;
    const SRC_CHANNELS: usize = 3;
    const DST_CHANNELS: usize = 1;

    fn radius(&self) -> u32 {
        0
    }

    fn combine(&self, tile: &SharedTile, lx: usize, ly: usize, out: &mut [u8]) {
        let px = tile.sample(lx, ly, 0, 0);
        out[0] = luma(px[0], px[1], px[2]);
    }
}
