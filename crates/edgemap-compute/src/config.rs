//! Pipeline configuration.
//!
//! Every knob has a default, so a YAML file only needs the keys it changes:
//!
//! ```yaml
//! gaussian_radius: 2
//! tile_width: 32
//! edge_mode: image
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::weights::{WEIGHT_CACHE_CAPACITY, check_sigma};
use crate::{ComputeError, ComputeResult};

pub const DEFAULT_GAUSSIAN_RADIUS: u32 = 3;
pub const DEFAULT_GAUSSIAN_SIGMA: f32 = 1.0;
pub const DEFAULT_TILE_SIZE: u32 = 16;

/// How neighbor reads are clamped at tile borders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeMode {
    /// Tiles carry an apron clamped to the image bounds. Output does not
    /// depend on the tile size or on neighbouring images in the batch.
    #[default]
    Image,
    /// Tiles hold only the block footprint and reads clamp to the block.
    /// Produces seams at block borders; kept to reproduce legacy output.
    Block,
}

impl FromStr for EdgeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "image" => Ok(Self::Image),
            "block" => Ok(Self::Block),
            _ => Err(format!("unknown edge mode '{s}' (expected image or block)")),
        }
    }
}

impl fmt::Display for EdgeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Image => "image",
            Self::Block => "block",
        })
    }
}

/// Gradient magnitude combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SobelNorm {
    /// `|gx| + |gy|`
    #[default]
    L1,
    /// `sqrt(gx^2 + gy^2)`
    L2,
}

impl FromStr for SobelNorm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "l1" => Ok(Self::L1),
            "l2" => Ok(Self::L2),
            _ => Err(format!("unknown gradient norm '{s}' (expected l1 or l2)")),
        }
    }
}

impl fmt::Display for SobelNorm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::L1 => "l1",
            Self::L2 => "l2",
        })
    }
}

/// Tunable parameters of one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Gaussian neighborhood radius; `2r + 1` weights must fit the cache.
    pub gaussian_radius: u32,
    /// Gaussian spread (delta).
    pub gaussian_sigma: f32,
    /// Block width in threads.
    pub tile_width: u32,
    /// Block height in threads.
    pub tile_height: u32,
    pub edge_mode: EdgeMode,
    pub sobel_norm: SobelNorm,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            gaussian_radius: DEFAULT_GAUSSIAN_RADIUS,
            gaussian_sigma: DEFAULT_GAUSSIAN_SIGMA,
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
            edge_mode: EdgeMode::Image,
            sobel_norm: SobelNorm::L1,
        }
    }
}

impl PipelineConfig {
    pub fn with_gaussian(mut self, radius: u32, sigma: f32) -> Self {
        self.gaussian_radius = radius;
        self.gaussian_sigma = sigma;
        self
    }

    pub fn with_tile(mut self, width: u32, height: u32) -> Self {
        self.tile_width = width;
        self.tile_height = height;
        self
    }

    pub fn with_edge_mode(mut self, mode: EdgeMode) -> Self {
        self.edge_mode = mode;
        self
    }

    pub fn with_sobel_norm(mut self, norm: SobelNorm) -> Self {
        self.sobel_norm = norm;
        self
    }

    /// Check everything that can be checked without a device.
    pub fn validate(&self) -> ComputeResult<()> {
        let taps = 2 * self.gaussian_radius as usize + 1;
        if taps > WEIGHT_CACHE_CAPACITY {
            return Err(ComputeError::RadiusTooLarge {
                radius: self.gaussian_radius,
                capacity: WEIGHT_CACHE_CAPACITY,
            });
        }
        check_sigma(self.gaussian_sigma)?;
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(ComputeError::InvalidBlock(self.tile_width, self.tile_height));
        }
        Ok(())
    }

    /// Parse YAML; missing keys take their defaults.
    pub fn from_yaml_str(yaml: &str) -> ComputeResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML config file.
    pub fn from_file(path: impl AsRef<Path>) -> ComputeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml(&self) -> ComputeResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
