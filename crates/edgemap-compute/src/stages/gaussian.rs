//! Gaussian smoothing over RGB pixels.

use super::{Stage, quantize};
use crate::backend::{SharedTile, StageKernel};

/// Weighted average over a `(2r+1)^2` neighborhood using separable weights.
///
/// The normalization `sum(w[r+i] * w[r+j])` is accumulated per output
/// pixel alongside the weighted samples.
pub struct GaussianKernel<'a> {
    weights: &'a [f32],
    radius: u32,
}

impl<'a> GaussianKernel<'a> {
    /// `weights` is the 1D table of `2r + 1` entries.
    pub fn new(weights: &'a [f32]) -> Self {
        debug_assert!(weights.len() % 2 == 1);
        Self {
            weights,
            radius: (weights.len() / 2) as u32,
        }
    }
}

impl StageKernel for GaussianKernel<'_> {
    const STAGE: Stage = Stage::Gaussian;
    const SRC_CHANNELS: usize = 3;
    const DST_CHANNELS: usize = 3;

    fn radius(&self) -> u32 {
        self.radius
    }

    fn combine(&self, tile: &SharedTile, lx: usize, ly: usize, out: &mut [u8]) {
        let r = self.radius as i32;
        let mut acc = [0.0f32; 3];
        let mut norm = 0.0f32;

        for dy in -r..=r {
            let wy = self.weights[(r + dy) as usize];
            for dx in -r..=r {
                let w = self.weights[(r + dx) as usize] * wy;
                let px = tile.sample(lx, ly, dx, dy);
                acc[0] += w * px[0] as f32;
                acc[1] += w * px[1] as f32;
                acc[2] += w * px[2] as f32;
                norm += w;
            }
        }

        for (o, a) in out.iter_mut().zip(acc) {
            *o = quantize(a / norm);
        }
    }
}
