//! Filter weight tables.
//!
//! Weights are computed on the host and uploaded once per run into the
//! backend's broadcast (read-only, shared by all threads) memory. Each
//! upload returns a handle owned by the caller, so two pipelines on the
//! same device never overwrite each other's tables.

use crate::{ComputeError, ComputeResult};

/// Maximum number of 1D Gaussian weights the broadcast cache holds.
pub const WEIGHT_CACHE_CAPACITY: usize = 64;

/// Gradient kernel width; fixed at 3x3.
pub const SOBEL_WIDTH: usize = 3;

/// Which table a weight upload carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightKind {
    Gaussian,
    Sobel,
}

impl std::fmt::Display for WeightKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Gaussian => "gaussian",
            Self::Sobel => "sobel",
        })
    }
}

/// Reject a spread whose `2 delta^2` is not a usable divisor.
///
/// A tiny positive `delta` underflows the divisor to zero and turns the
/// center weight into NaN.
pub(crate) fn check_sigma(delta: f32) -> ComputeResult<()> {
    let denom = 2.0 * delta * delta;
    if !delta.is_finite() || delta <= 0.0 || !(denom > 0.0 && denom.is_finite()) {
        return Err(ComputeError::InvalidSigma(delta));
    }
    Ok(())
}

/// 1D Gaussian table of `2r + 1` weights.
///
/// The 2D weight at offset `(dx, dy)` is `w[r + dx] * w[r + dy]`, which is
/// exact because the Gaussian is separable. Weights are not normalized;
/// the smoothing stage divides by the weight sum of each output pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianWeights {
    delta: f32,
    radius: u32,
    weights: Vec<f32>,
}

impl GaussianWeights {
    /// `w[i] = exp(-(i - r)^2 / (2 delta^2))` for `i` in `[0, 2r]`.
    pub fn new(delta: f32, radius: u32) -> ComputeResult<Self> {
        let taps = 2 * radius as usize + 1;
        if taps > WEIGHT_CACHE_CAPACITY {
            return Err(ComputeError::RadiusTooLarge { radius, capacity: WEIGHT_CACHE_CAPACITY });
        }
        check_sigma(delta)?;

        let r = radius as i32;
        let denom = 2.0 * delta * delta;
        let weights: Vec<f32> = (0..taps as i32)
            .map(|i| {
                let x = (i - r) as f32;
                (-(x * x) / denom).exp()
            })
            .collect();

        // The center weight is exp(0) = 1, so the per-pixel sum never vanishes.
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(ComputeError::InvalidSigma(delta));
        }

        Ok(Self { delta, radius, weights })
    }

    pub fn radius(&self) -> u32 {
        self.radius
    }

    pub fn delta(&self) -> f32 {
        self.delta
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

/// Horizontal and vertical 3x3 Sobel tables, indexed `[dy + 1][dx + 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SobelWeights {
    pub x: [[i32; SOBEL_WIDTH]; SOBEL_WIDTH],
    pub y: [[i32; SOBEL_WIDTH]; SOBEL_WIDTH],
}

impl SobelWeights {
    pub const fn standard() -> Self {
        Self {
            x: [[-1, 0, 1], [-2, 0, 2], [-1, 0, 1]],
            y: [[-1, -2, -1], [0, 0, 0], [1, 2, 1]],
        }
    }

    /// Flattened upload layout: nine `x` weights then nine `y` weights.
    pub fn to_coefficients(&self) -> [f32; 2 * SOBEL_WIDTH * SOBEL_WIDTH] {
        let mut out = [0.0; 2 * SOBEL_WIDTH * SOBEL_WIDTH];
        let n = SOBEL_WIDTH * SOBEL_WIDTH;
        for (i, (wx, wy)) in self.x.iter().flatten().zip(self.y.iter().flatten()).enumerate() {
            out[i] = *wx as f32;
            out[n + i] = *wy as f32;
        }
        out
    }
}

impl Default for SobelWeights {
    fn default() -> Self {
        Self::standard()
    }
}
