//! The three filter stages.
//!
//! Each stage is a thin [`StageKernel`](crate::backend::StageKernel)
//! parameterization of the tiled executor: a radius, channel counts and a
//! per-pixel combine. The CUDA backend mirrors the same combines in its
//! kernel source.

use std::fmt;

mod gaussian;
mod grayscale;
mod sobel;

pub use gaussian::GaussianKernel;
pub use grayscale::{GrayscaleKernel, luma};
pub use sobel::{SobelKernel, magnitude};

/// Pipeline stage identity, used in logs and error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Gaussian,
    Grayscale,
    Sobel,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Gaussian, Stage::Grayscale, Stage::Sobel];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Gaussian => "gaussian",
            Self::Grayscale => "grayscale",
            Self::Sobel => "sobel",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Round to nearest and saturate to the 8-bit sample range.
#[inline]
pub(crate) fn quantize(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}
