use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in background pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Exclusive right edge
    pub fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Two rectangles overlap unless one lies entirely to the left, right,
    /// above or below the other. Shared edges do not count as overlap.
    pub fn overlaps(&self, other: &Region) -> bool {
        if self.area() == 0 || other.area() == 0 {
            return false;
        }

        !(self.right() <= other.x as u64
            || other.right() <= self.x as u64
            || self.bottom() <= other.y as u64
            || other.bottom() <= self.y as u64)
    }

    pub fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x && (px as u64) < self.right() && py >= self.y && (py as u64) < self.bottom()
    }

    /// Whether the region lies fully inside a canvas of the given size
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.right() <= width as u64 && self.bottom() <= height as u64
    }

    /// `[x, y, width, height]`, the bbox layout used in scene manifests
    pub fn to_bbox(&self) -> [u32; 4] {
        [self.x, self.y, self.width, self.height]
    }
}

/// Regions stamped so far in one scene.
#[derive(Debug, Clone, Default)]
pub struct PlacedRegions {
    regions: Vec<Region>,
}

impl PlacedRegions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Linear scan; scenes hold tens of patches, not thousands.
    pub fn collides(&self, candidate: &Region) -> bool {
        self.regions.iter().any(|placed| placed.overlaps(candidate))
    }

    pub fn push(&mut self, region: Region) {
        self.regions.push(region);
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn as_slice(&self) -> &[Region] {
        &self.regions
    }

    pub fn into_vec(self) -> Vec<Region> {
        self.regions
    }
}
