//! Defect Synth Core - synthetic defect scene generation
//!
//! Builds training data for surface inspection:
//! - Random non-overlapping placement of defect patches
//! - Masked stamping of a patch onto a background
//! - A target mask (ground truth) accumulated per scene
//! - Batch generation of scene datasets with a reproducible seed

pub mod background;
pub mod compositor;
pub mod generator;
pub mod geometry;
pub mod mask;
pub mod pool;
pub mod smoothing;

pub use background::BackgroundSource;
pub use compositor::{Compositor, CompositorConfig, Placement, Scene};
pub use generator::{
    DatasetGenerator, GeneratedScene, GeneratorConfig, OutputNaming, PatchCountPlan, RunSummary,
    SceneManifest,
};
pub use geometry::{PlacedRegions, Region};
pub use mask::MaskRule;
pub use pool::{PatchPaths, PatchPool, PatchTriple, PoolReport};
pub use smoothing::SmoothingConfig;

use std::path::{Path, PathBuf};

use image::RgbImage;
use rand::Rng;
use thiserror::Error;

/// Errors raised by the core library
#[derive(Error, Debug)]
pub enum CompositeError {
    #[error("Failed to read image {path}: {source}")]
    ImageRead {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to write image {path}: {source}")]
    ImageWrite {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Patch {what} is {actual:?}, expected {expected:?}")]
    DimensionMismatch {
        what: &'static str,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("No valid patch triples in pool")]
    NoValidPatches,

    #[error("None of the {0} background candidates could be read")]
    NoReadableBackground(usize),

    #[error("No usable images found in {0}")]
    EmptyDirectory(PathBuf),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// Decode any supported raster as 3-channel 8-bit
pub fn load_rgb(path: &Path) -> Result<RgbImage, CompositeError> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|source| CompositeError::ImageRead {
            path: path.to_path_buf(),
            source,
        })
}

/// Composite one scene with default settings apart from the attempt budget.
///
/// Shorthand for [`Compositor::composite_scene`] without smoothing.
pub fn composite_scene<R: Rng + ?Sized>(
    background: RgbImage,
    pool: &PatchPool,
    patch_count: usize,
    max_attempts_per_patch: u32,
    rng: &mut R,
) -> Result<Scene, CompositeError> {
    let compositor = Compositor::new(CompositorConfig {
        max_attempts_per_patch,
        smoothing: None,
        ..CompositorConfig::default()
    });
    compositor.composite_scene(background, pool, patch_count, rng)
}
