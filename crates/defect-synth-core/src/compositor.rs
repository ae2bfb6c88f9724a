//! Patch compositor
//!
//! Places patches from a [`PatchPool`] onto a background at random,
//! non-overlapping positions by rejection sampling, and accumulates the
//! matching target labels into a separate mask canvas.

use image::{imageops, RgbImage};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::geometry::{PlacedRegions, Region};
use crate::mask::MaskRule;
use crate::pool::PatchPool;
use crate::smoothing::SmoothingConfig;
use crate::CompositeError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;

/// Compositor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    /// Random draws per requested patch before giving up on it
    pub max_attempts_per_patch: u32,
    /// Foreground/padding rule applied to patch masks
    pub mask_rule: MaskRule,
    /// Blur applied to the finished scene image, `None` to skip
    pub smoothing: Option<SmoothingConfig>,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_patch: DEFAULT_MAX_ATTEMPTS,
            mask_rule: MaskRule::default(),
            smoothing: Some(SmoothingConfig::default()),
        }
    }
}

impl CompositorConfig {
    pub fn validate(&self) -> Result<(), CompositeError> {
        if self.max_attempts_per_patch == 0 {
            return Err(CompositeError::InvalidConfig(
                "max_attempts_per_patch must be at least 1".to_string(),
            ));
        }
        if let Some(smoothing) = &self.smoothing {
            smoothing.validate()?;
        }
        Ok(())
    }
}

/// One stamped patch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub region: Region,
    /// Index of the pool entry that was stamped
    pub patch: usize,
}

/// Composited scene with its ground-truth mask
#[derive(Debug, Clone)]
pub struct Scene {
    pub image: RgbImage,
    pub target_mask: RgbImage,
    pub placements: Vec<Placement>,
    pub requested: usize,
}

impl Scene {
    pub fn regions(&self) -> Vec<Region> {
        self.placements.iter().map(|p| p.region).collect()
    }

    pub fn placed(&self) -> usize {
        self.placements.len()
    }
}

/// Places patches from a pool onto backgrounds
pub struct Compositor {
    config: CompositorConfig,
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new(CompositorConfig::default())
    }
}

impl Compositor {
    pub fn new(config: CompositorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    /// Stamp up to `patch_count` patches onto `background`.
    ///
    /// Patches that find no free slot within the attempt budget are dropped
    /// silently, so `Scene::placed()` may be lower than requested. Fails only
    /// when the pool has no usable triple at all.
    pub fn composite_scene<R: Rng + ?Sized>(
        &self,
        mut background: RgbImage,
        pool: &PatchPool,
        patch_count: usize,
        rng: &mut R,
    ) -> Result<Scene, CompositeError> {
        if patch_count > 0 && !pool.has_valid() {
            return Err(CompositeError::NoValidPatches);
        }

        let (width, height) = background.dimensions();
        let mut target_mask = RgbImage::new(width, height);
        let mut placed = PlacedRegions::new();
        let mut placements = Vec::with_capacity(patch_count);

        for n in 0..patch_count {
            match self.place_one(&mut background, &mut target_mask, &mut placed, pool, rng)? {
                Some(placement) => placements.push(placement),
                None => log::debug!(
                    "Patch {}/{} dropped after {} attempts",
                    n + 1,
                    patch_count,
                    self.config.max_attempts_per_patch
                ),
            }
        }

        log::info!(
            "Placed {}/{} patches on {}x{} background",
            placements.len(),
            patch_count,
            width,
            height
        );

        let image = match &self.config.smoothing {
            Some(smoothing) => smoothing.apply(&background),
            None => background,
        };

        Ok(Scene {
            image,
            target_mask,
            placements,
            requested: patch_count,
        })
    }

    fn place_one<R: Rng + ?Sized>(
        &self,
        background: &mut RgbImage,
        target_mask: &mut RgbImage,
        placed: &mut PlacedRegions,
        pool: &PatchPool,
        rng: &mut R,
    ) -> Result<Option<Placement>, CompositeError> {
        let (bg_width, bg_height) = background.dimensions();

        for _ in 0..self.config.max_attempts_per_patch {
            let index = rng.gen_range(0..pool.len());
            let Some(triple) = pool.get(index) else {
                continue;
            };

            let (width, height) = triple.dimensions();
            if width > bg_width || height > bg_height {
                pool.report_oversized(index, (bg_width, bg_height));
                continue;
            }

            let x = rng.gen_range(0..=bg_width - width);
            let y = rng.gen_range(0..=bg_height - height);
            let region = Region::new(x, y, width, height);

            if placed.collides(&region) {
                continue;
            }

            stamp_masked(background, &triple.image, &triple.mask, x, y, &self.config.mask_rule);
            imageops::replace(target_mask, &triple.target, x as i64, y as i64);
            placed.push(region);

            return Ok(Some(Placement { region, patch: index }));
        }

        Ok(None)
    }
}

/// Copy `patch` pixels onto `canvas` at `(x, y)` wherever `mask` is
/// foreground. Padding pixels leave the canvas untouched.
pub fn stamp_masked(
    canvas: &mut RgbImage,
    patch: &RgbImage,
    mask: &RgbImage,
    x: u32,
    y: u32,
    rule: &MaskRule,
) {
    let (canvas_width, canvas_height) = canvas.dimensions();

    for (px, py, mask_pixel) in mask.enumerate_pixels() {
        if rule.is_padding(mask_pixel) {
            continue;
        }
        let (cx, cy) = (x + px, y + py);
        if cx >= canvas_width || cy >= canvas_height {
            continue;
        }
        canvas.put_pixel(cx, cy, *patch.get_pixel(px, py));
    }
}
