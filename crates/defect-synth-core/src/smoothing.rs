//! Scene smoothing
//!
//! Gaussian blur over the composited image to soften seams at patch
//! borders. Never applied to the target mask.

use image::RgbImage;
use imageproc::filter::gaussian_blur_f32;
use serde::{Deserialize, Serialize};

use crate::CompositeError;

/// Smoothing configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Odd kernel size, as in `GaussianBlur(img, (k, k), 0)`
    pub kernel_size: u32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self { kernel_size: 9 }
    }
}

impl SmoothingConfig {
    pub fn new(kernel_size: u32) -> Result<Self, CompositeError> {
        let config = Self { kernel_size };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CompositeError> {
        if self.kernel_size == 0 || self.kernel_size % 2 == 0 {
            return Err(CompositeError::InvalidConfig(format!(
                "blur kernel size must be odd and positive, got {}",
                self.kernel_size
            )));
        }
        Ok(())
    }

    /// Sigma implied by the kernel size when no sigma is given
    pub fn sigma(&self) -> f32 {
        0.3 * ((self.kernel_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
    }

    pub fn apply(&self, img: &RgbImage) -> RgbImage {
        gaussian_blur_f32(img, self.sigma())
    }
}
