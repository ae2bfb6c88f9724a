//! Background selection

use std::fs;
use std::path::{Path, PathBuf};

use image::RgbImage;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::CompositeError;

const BACKGROUND_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Where scene backgrounds come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundSource {
    /// Same background for every scene
    File(PathBuf),
    /// One candidate picked at random per scene
    Directory(Vec<PathBuf>),
}

impl BackgroundSource {
    /// Collect background candidates from `dir`, sorted by file name.
    pub fn from_dir(dir: &Path) -> Result<Self, CompositeError> {
        let mut candidates = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_file() && has_background_extension(&path) {
                candidates.push(path);
            }
        }

        if candidates.is_empty() {
            return Err(CompositeError::EmptyDirectory(dir.to_path_buf()));
        }

        candidates.sort();
        log::info!("Found {} backgrounds in {}", candidates.len(), dir.display());
        Ok(Self::Directory(candidates))
    }

    pub fn len(&self) -> usize {
        match self {
            Self::File(_) => 1,
            Self::Directory(candidates) => candidates.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pick the background path for the next scene
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<&Path, CompositeError> {
        match self {
            Self::File(path) => Ok(path),
            Self::Directory(candidates) => candidates
                .choose(rng)
                .map(PathBuf::as_path)
                .ok_or_else(|| CompositeError::InvalidConfig("no background candidates".to_string())),
        }
    }

    /// Pick and decode a background as 8-bit RGB
    pub fn load<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<(PathBuf, RgbImage), CompositeError> {
        let path = self.choose(rng)?;
        let image = crate::load_rgb(path)?;
        log::debug!(
            "Selected background {} ({}x{})",
            path.display(),
            image.width(),
            image.height()
        );
        Ok((path.to_path_buf(), image))
    }
}

fn has_background_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            BACKGROUND_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}
