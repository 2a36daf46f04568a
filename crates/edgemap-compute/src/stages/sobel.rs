//! Sobel gradient magnitude over 1-channel pixels.

use super::Stage;
use crate::backend::{SharedTile, StageKernel};
use crate::config::SobelNorm;
use crate::weights::SOBEL_WIDTH;

const TAPS: usize = SOBEL_WIDTH * SOBEL_WIDTH;

/// Combine horizontal and vertical responses into an 8-bit magnitude.
///
/// `L1` is `min(|gx| + |gy|, 255)`. `L2` is the rounded Euclidean norm,
/// also saturated.
#[inline]
pub fn magnitude(gx: i32, gy: i32, norm: SobelNorm) -> u8 {
    match norm {
        SobelNorm::L1 => (gx.unsigned_abs() + gy.unsigned_abs()).min(255) as u8,
        SobelNorm::L2 => {
            let m = ((gx as f32).powi(2) + (gy as f32).powi(2)).sqrt();
            m.round().min(255.0) as u8
        }
    }
}

/// Fixed radius-1 kernel applying both 3x3 tables in one pass.
pub struct SobelKernel<'a> {
    x: &'a [f32],
    y: &'a [f32],
    norm: SobelNorm,
}

impl<'a> SobelKernel<'a> {
    /// `coefficients` is the 18-entry layout of
    /// [`SobelWeights::to_coefficients`](crate::weights::SobelWeights::to_coefficients).
    pub fn new(coefficients: &'a [f32], norm: SobelNorm) -> Self {
        debug_assert_eq!(coefficients.len(), 2 * TAPS);
        let (x, y) = coefficients.split_at(TAPS);
        Self { x, y, norm }
    }
}

impl StageKernel for SobelKernel<'_> {
    const STAGE: Stage = Stage::Sobel;
    const SRC_CHANNELS: usize = 1;
    const DST_CHANNELS: usize = 1;

    fn radius(&self) -> u32 {
        (SOBEL_WIDTH / 2) as u32
    }

    fn combine(&self, tile: &SharedTile, lx: usize, ly: usize, out: &mut [u8]) {
        let mut gx = 0i32;
        let mut gy = 0i32;

        for dy in -1..=1i32 {
            for dx in -1..=1i32 {
                let k = ((dy + 1) as usize) * SOBEL_WIDTH + (dx + 1) as usize;
                let p = tile.sample(lx, ly, dx, dy)[0] as i32;
                gx += self.x[k] as i32 * p;
                gy += self.y[k] as i32 * p;
            }
        }

        out[0] = magnitude(gx, gy, self.norm);
    }
}
