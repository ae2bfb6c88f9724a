//! Patch pool: defect patches with their masks and target labels
//!
//! On disk a patch `{base}.png` is paired with its target label
//! `{base}_target.png` and its mask `{base}_target_process.png`. When no
//! separate mask exists the target label doubles as the mask.
//!
//! Pools whose patches should be pasted as whole rectangles, with no mask and
//! no blur, are composited with `MaskRule::new(0)` and smoothing disabled
//! (`--threshold 0 --no-blur` on the command line).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use image::RgbImage;

use crate::CompositeError;

const PATCH_EXTENSION: &str = ".png";
const TARGET_SUFFIX: &str = "_target.png";
const PROCESS_SUFFIX: &str = "_process.png";
const MASK_SUFFIX: &str = "_target_process.png";

/// Patch image, its mask and its target label, all of the same size.
#[derive(Debug, Clone)]
pub struct PatchTriple {
    pub image: RgbImage,
    pub mask: RgbImage,
    pub target: RgbImage,
}

impl PatchTriple {
    pub fn new(image: RgbImage, mask: RgbImage, target: RgbImage) -> Result<Self, CompositeError> {
        if mask.dimensions() != image.dimensions() {
            return Err(CompositeError::DimensionMismatch {
                what: "mask",
                expected: image.dimensions(),
                actual: mask.dimensions(),
            });
        }
        if target.dimensions() != image.dimensions() {
            return Err(CompositeError::DimensionMismatch {
                what: "target",
                expected: image.dimensions(),
                actual: target.dimensions(),
            });
        }

        Ok(Self { image, mask, target })
    }

    pub fn load(paths: &PatchPaths) -> Result<Self, CompositeError> {
        let image = crate::load_rgb(&paths.image)?;
        let mask = crate::load_rgb(&paths.mask)?;
        let target = crate::load_rgb(&paths.target)?;
        Self::new(image, mask, target)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// File locations of one on-disk triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchPaths {
    pub image: PathBuf,
    pub mask: PathBuf,
    pub target: PathBuf,
}

impl PatchPaths {
    /// Paths following the `{base}.png` naming convention inside `dir`.
    /// Falls back to the target label as mask when `{base}_target_process.png`
    /// does not exist.
    pub fn for_base(dir: &Path, base: &str) -> Self {
        let target = dir.join(format!("{base}{TARGET_SUFFIX}"));
        let process = dir.join(format!("{base}{MASK_SUFFIX}"));
        let mask = if process.exists() { process } else { target.clone() };

        Self {
            image: dir.join(format!("{base}{PATCH_EXTENSION}")),
            mask,
            target,
        }
    }
}

#[derive(Debug)]
enum EntrySource {
    Memory,
    Files(PatchPaths),
}

#[derive(Debug)]
struct PatchEntry {
    name: String,
    source: EntrySource,
    loaded: OnceLock<Result<Arc<PatchTriple>, String>>,
    oversize_reported: AtomicBool,
}

impl PatchEntry {
    fn resolve(&self) -> &Result<Arc<PatchTriple>, String> {
        self.loaded.get_or_init(|| match &self.source {
            // memory entries are initialised at construction
            EntrySource::Memory => Err(format!("{}: in-memory patch missing", self.name)),
            EntrySource::Files(paths) => {
                PatchTriple::load(paths).map(Arc::new).map_err(|e| {
                    log::warn!("Skipping patch {}: {}", self.name, e);
                    e.to_string()
                })
            }
        })
    }
}

/// Result of validating every entry in a pool
#[derive(Debug, Clone, Default)]
pub struct PoolReport {
    pub valid: usize,
    /// Entry name and the reason it cannot be used
    pub invalid: Vec<(String, String)>,
}

/// Ordered collection of patch triples, loaded lazily and cached.
///
/// An entry that fails to load is remembered as invalid and never re-read.
#[derive(Debug, Default)]
pub struct PatchPool {
    entries: Vec<PatchEntry>,
}

impl PatchPool {
    /// Pool of already decoded triples
    pub fn from_triples(triples: Vec<PatchTriple>) -> Self {
        let entries = triples
            .into_iter()
            .enumerate()
            .map(|(idx, triple)| PatchEntry {
                name: format!("patch#{idx}"),
                source: EntrySource::Memory,
                loaded: OnceLock::from(Ok(Arc::new(triple))),
                oversize_reported: AtomicBool::new(false),
            })
            .collect();

        Self { entries }
    }

    /// Pool of on-disk triples; nothing is decoded until first use
    pub fn from_paths(paths: Vec<PatchPaths>) -> Self {
        let entries = paths
            .into_iter()
            .map(|paths| PatchEntry {
                name: paths.image.display().to_string(),
                source: EntrySource::Files(paths),
                loaded: OnceLock::new(),
                oversize_reported: AtomicBool::new(false),
            })
            .collect();

        Self { entries }
    }

    /// Discover triples in `dir` by naming convention, sorted by file name.
    pub fn from_dir(dir: &Path) -> Result<Self, CompositeError> {
        let mut bases = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                log::debug!("Ignoring non UTF-8 file name {:?}", file_name);
                continue;
            };
            if let Some(base) = patch_base_name(name) {
                bases.push(base.to_string());
            }
        }

        if bases.is_empty() {
            return Err(CompositeError::EmptyDirectory(dir.to_path_buf()));
        }

        bases.sort();
        log::info!("Found {} patches in {}", bases.len(), dir.display());

        let paths = bases
            .iter()
            .map(|base| PatchPaths::for_base(dir, base))
            .collect();
        Ok(Self::from_paths(paths))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|e| e.name.as_str())
    }

    /// Triple at `index`, loading it on first access. `None` if the index is
    /// out of range or the entry is invalid.
    pub fn get(&self, index: usize) -> Option<Arc<PatchTriple>> {
        self.entries
            .get(index)
            .and_then(|entry| entry.resolve().as_ref().ok().cloned())
    }

    /// Whether at least one entry loads. Stops at the first valid entry;
    /// entries tried along the way stay cached.
    pub fn has_valid(&self) -> bool {
        self.entries.iter().any(|entry| entry.resolve().is_ok())
    }

    /// Warn that the entry at `index` is larger than the background. Only the
    /// first call per entry logs; returns whether this call did.
    pub fn report_oversized(&self, index: usize, background: (u32, u32)) -> bool {
        let Some(entry) = self.entries.get(index) else {
            return false;
        };
        if entry.oversize_reported.swap(true, Ordering::Relaxed) {
            return false;
        }

        let (width, height) = entry
            .loaded
            .get()
            .and_then(|loaded| loaded.as_ref().ok())
            .map(|triple| triple.dimensions())
            .unwrap_or_default();
        log::warn!(
            "Patch {} ({}x{}) does not fit {}x{} background, it will never be placed",
            entry.name,
            width,
            height,
            background.0,
            background.1
        );
        true
    }

    /// Load every entry and report which ones are usable
    pub fn check(&self) -> PoolReport {
        let mut report = PoolReport::default();
        for entry in &self.entries {
            match entry.resolve() {
                Ok(_) => report.valid += 1,
                Err(reason) => report.invalid.push((entry.name.clone(), reason.clone())),
            }
        }
        report
    }
}

/// `{base}` for a patch file name, `None` for labels, masks and other files
fn patch_base_name(file_name: &str) -> Option<&str> {
    if file_name.ends_with(TARGET_SUFFIX) || file_name.ends_with(PROCESS_SUFFIX) {
        return None;
    }
    file_name.strip_suffix(PATCH_EXTENSION)
}
