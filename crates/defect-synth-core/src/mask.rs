//! Foreground/padding classification for patch masks

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

/// Default intensity threshold separating defect pixels from patch padding.
pub const DEFAULT_MASK_THRESHOLD: u8 = 30;

/// A mask pixel is padding when every channel is below `threshold`,
/// foreground otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskRule {
    pub threshold: u8,
}

impl Default for MaskRule {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MASK_THRESHOLD,
        }
    }
}

impl MaskRule {
    pub fn new(threshold: u8) -> Self {
        Self { threshold }
    }

    pub fn is_foreground(&self, pixel: &Rgb<u8>) -> bool {
        pixel.0.iter().any(|&c| c >= self.threshold)
    }

    pub fn is_padding(&self, pixel: &Rgb<u8>) -> bool {
        !self.is_foreground(pixel)
    }

    /// Number of foreground pixels in a mask image
    pub fn foreground_count(&self, mask: &RgbImage) -> usize {
        mask.pixels().filter(|p| self.is_foreground(p)).count()
    }
}
