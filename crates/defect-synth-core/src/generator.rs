//! Dataset generation loop
//!
//! Repeats the compositor for a number of scenes: picks a background and a
//! patch count per scene, composites, and writes the scene image, its target
//! mask and optionally a JSON manifest.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::background::BackgroundSource;
use crate::compositor::{Compositor, Scene};
use crate::pool::PatchPool;
use crate::CompositeError;

/// Density schedule: scenes with a global index below the bound draw their
/// patch count from the inclusive range.
const TIERS: [(usize, usize, usize); 3] = [(200, 5, 10), (600, 10, 35), (1000, 35, 50)];

/// How many patches each scene asks for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatchCountPlan {
    Fixed { count: usize },
    /// Uniform in `min..=max`
    Range { min: usize, max: usize },
    /// Few, then moderate, then dense scenes as the index grows. Indices past
    /// the last tier end the run.
    Tiered,
}

impl Default for PatchCountPlan {
    fn default() -> Self {
        Self::Fixed { count: 50 }
    }
}

impl PatchCountPlan {
    pub fn validate(&self) -> Result<(), CompositeError> {
        match self {
            Self::Range { min, max } if min > max => Err(CompositeError::InvalidConfig(format!(
                "patch range min {min} is greater than max {max}"
            ))),
            _ => Ok(()),
        }
    }

    /// Patch count for the scene at `index`, `None` when the plan is exhausted
    pub fn count_for<R: Rng + ?Sized>(&self, index: usize, rng: &mut R) -> Option<usize> {
        match *self {
            Self::Fixed { count } => Some(count),
            Self::Range { min, max } => Some(rng.gen_range(min..=max)),
            Self::Tiered => TIERS
                .iter()
                .find(|(bound, _, _)| index < *bound)
                .map(|&(_, min, max)| rng.gen_range(min..=max)),
        }
    }
}

/// Output file naming
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputNaming {
    /// `{prefix}_{index}.png` / `{prefix}_target_{index}.png`
    Indexed { prefix: String },
    /// `{timestamp}_{prefix}_{index}.png` / `{timestamp}_{prefix}_target_{index}.png`
    Timestamp { prefix: String },
}

impl Default for OutputNaming {
    fn default() -> Self {
        Self::Indexed {
            prefix: "scene".to_string(),
        }
    }
}

impl OutputNaming {
    /// Scene and target file names for `index` at time `now`
    pub fn file_names_at(&self, index: usize, now: DateTime<Local>) -> (String, String) {
        match self {
            Self::Indexed { prefix } => (
                format!("{prefix}_{index}.png"),
                format!("{prefix}_target_{index}.png"),
            ),
            Self::Timestamp { prefix } => {
                let stamp = now.format("%Y%m%d_%H%M%S_%6f");
                (
                    format!("{stamp}_{prefix}_{index}.png"),
                    format!("{stamp}_{prefix}_target_{index}.png"),
                )
            }
        }
    }

    pub fn file_names(&self, index: usize) -> (String, String) {
        self.file_names_at(index, Local::now())
    }
}

/// Dataset generation settings
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Number of scenes to generate
    pub runs: usize,
    /// Global index of the first scene
    pub start_index: usize,
    pub plan: PatchCountPlan,
    pub naming: OutputNaming,
    pub output_dir: PathBuf,
    pub target_dir: PathBuf,
    /// Base seed; scene `i` uses `seed + i`. `None` draws from entropy.
    pub seed: Option<u64>,
    /// Write a JSON manifest next to each scene image
    pub write_manifest: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            runs: 10,
            start_index: 0,
            plan: PatchCountPlan::default(),
            naming: OutputNaming::default(),
            output_dir: PathBuf::from("output"),
            target_dir: PathBuf::from("output_target"),
            seed: None,
            write_manifest: false,
        }
    }
}

/// Placement entry in a scene manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementRecord {
    /// Bounding box [x, y, width, height]
    pub bbox: [u32; 4],
    /// Source patch
    pub patch: String,
}

/// JSON sidecar describing one generated scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneManifest {
    pub index: usize,
    pub background: PathBuf,
    pub image: PathBuf,
    pub target: PathBuf,
    pub requested: usize,
    pub placements: Vec<PlacementRecord>,
}

/// Paths written for one scene
#[derive(Debug, Clone)]
pub struct GeneratedScene {
    pub index: usize,
    pub image_path: PathBuf,
    pub target_path: PathBuf,
    pub manifest_path: Option<PathBuf>,
    pub requested: usize,
    pub placed: usize,
}

/// Totals for a generation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub scenes_written: usize,
    pub scenes_failed: usize,
    pub patches_requested: usize,
    pub patches_placed: usize,
}

/// Writes a batch of composited scenes
pub struct DatasetGenerator {
    compositor: Compositor,
    pool: PatchPool,
    backgrounds: BackgroundSource,
    config: GeneratorConfig,
}

impl DatasetGenerator {
    pub fn new(
        compositor: Compositor,
        pool: PatchPool,
        backgrounds: BackgroundSource,
        config: GeneratorConfig,
    ) -> Result<Self, CompositeError> {
        compositor.config().validate()?;
        config.plan.validate()?;
        if backgrounds.is_empty() {
            return Err(CompositeError::InvalidConfig("no background candidates".to_string()));
        }

        Ok(Self {
            compositor,
            pool,
            backgrounds,
            config,
        })
    }

    pub fn pool(&self) -> &PatchPool {
        &self.pool
    }

    /// Generate all scenes. A scene whose background cannot be read is
    /// counted as failed; the run aborts once every background candidate has
    /// failed, or when the pool has no usable patch.
    pub fn run(&self) -> Result<RunSummary, CompositeError> {
        fs::create_dir_all(&self.config.output_dir)?;
        fs::create_dir_all(&self.config.target_dir)?;

        let mut summary = RunSummary::default();
        let mut unreadable = HashSet::new();
        for i in 0..self.config.runs {
            let index = self.config.start_index + i;
            log::info!("Generating scene {}/{} (index {})", i + 1, self.config.runs, index);

            match self.generate_scene(index) {
                Ok(Some(scene)) => {
                    summary.scenes_written += 1;
                    summary.patches_requested += scene.requested;
                    summary.patches_placed += scene.placed;
                }
                Ok(None) => {
                    log::info!("Patch count plan exhausted at index {}", index);
                    break;
                }
                Err(CompositeError::NoValidPatches) => return Err(CompositeError::NoValidPatches),
                // only the background is read while generating a scene
                Err(CompositeError::ImageRead { path, source }) => {
                    log::warn!("Scene {} failed: background {}: {}", index, path.display(), source);
                    summary.scenes_failed += 1;
                    unreadable.insert(path);
                    if unreadable.len() >= self.backgrounds.len() {
                        return Err(CompositeError::NoReadableBackground(unreadable.len()));
                    }
                }
                Err(e) => {
                    log::warn!("Scene {} failed: {}", index, e);
                    summary.scenes_failed += 1;
                }
            }
        }

        log::info!(
            "Generated {} scenes ({} failed), placed {}/{} patches",
            summary.scenes_written,
            summary.scenes_failed,
            summary.patches_placed,
            summary.patches_requested
        );
        Ok(summary)
    }

    /// Generate and write the scene at `index`. With a seed the result only
    /// depends on the seed and the index.
    pub fn generate_scene(&self, index: usize) -> Result<Option<GeneratedScene>, CompositeError> {
        let mut rng = self.scene_rng(index);

        let Some(patch_count) = self.config.plan.count_for(index, &mut rng) else {
            return Ok(None);
        };
        let (background_path, background) = self.backgrounds.load(&mut rng)?;
        let scene = self
            .compositor
            .composite_scene(background, &self.pool, patch_count, &mut rng)?;

        let (image_name, target_name) = self.config.naming.file_names(index);
        let image_path = self.config.output_dir.join(image_name);
        let target_path = self.config.target_dir.join(target_name);

        save_rgb(&scene.image, &image_path)?;
        save_rgb(&scene.target_mask, &target_path)?;
        log::debug!("Saved {} and {}", image_path.display(), target_path.display());

        let manifest_path = if self.config.write_manifest {
            let manifest = self.manifest(index, background_path, &image_path, &target_path, &scene);
            let path = image_path.with_extension("json");
            write_manifest(&manifest, &path)?;
            Some(path)
        } else {
            None
        };

        Ok(Some(GeneratedScene {
            index,
            image_path,
            target_path,
            manifest_path,
            requested: scene.requested,
            placed: scene.placed(),
        }))
    }

    fn scene_rng(&self, index: usize) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
            None => StdRng::from_entropy(),
        }
    }

    fn manifest(
        &self,
        index: usize,
        background: PathBuf,
        image: &Path,
        target: &Path,
        scene: &Scene,
    ) -> SceneManifest {
        let placements = scene
            .placements
            .iter()
            .map(|p| PlacementRecord {
                bbox: p.region.to_bbox(),
                patch: self.pool.name(p.patch).unwrap_or_default().to_string(),
            })
            .collect();

        SceneManifest {
            index,
            background,
            image: image.to_path_buf(),
            target: target.to_path_buf(),
            requested: scene.requested,
            placements,
        }
    }
}

fn save_rgb(img: &image::RgbImage, path: &Path) -> Result<(), CompositeError> {
    img.save(path).map_err(|source| CompositeError::ImageWrite {
        path: path.to_path_buf(),
        source,
    })
}

fn write_manifest(manifest: &SceneManifest, path: &Path) -> Result<(), CompositeError> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, manifest)?;
    Ok(())
}
