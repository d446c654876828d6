use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{DetectError, Result};

/// Prior box in coordinates normalized to the input size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Anchor {
    pub cx: f32,
    pub cy: f32,
    pub sx: f32,
    pub sy: f32,
}

/// One feature-map level: its stride in pixels and the box sizes placed on each cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorLevel {
    pub stride: u32,
    pub sizes: Vec<u32>,
}

impl AnchorLevel {
    pub fn new(stride: u32, sizes: &[u32]) -> Self {
        Self { stride, sizes: sizes.to_vec() }
    }

    fn grid(&self, width: u32, height: u32) -> (usize, usize) {
        (height.div_ceil(self.stride) as usize, width.div_ceil(self.stride) as usize)
    }

    fn count(&self, width: u32, height: u32) -> usize {
        let (rows, cols) = self.grid(width, height);
        rows * cols * self.sizes.len()
    }

    fn generate(&self, width: u32, height: u32) -> Vec<Anchor> {
        let (rows, cols) = self.grid(width, height);
        let (w, h) = (width as f32, height as f32);
        let stride = self.stride as f32;
        let mut out = Vec::with_capacity(rows * cols * self.sizes.len());
        for row in 0..rows {
            let cy = (row as f32 + 0.5) * stride / h;
            for col in 0..cols {
                let cx = (col as f32 + 0.5) * stride / w;
                for &size in &self.sizes {
                    out.push(Anchor {
                        cx,
                        cy,
                        sx: size as f32 / w,
                        sy: size as f32 / h,
                    });
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnchorPreset {
    /// Four levels, strides 8..64.
    #[default]
    FourScale,
    /// Three levels, strides 8..32.
    ThreeScale,
    Custom(Vec<AnchorLevel>),
}

impl AnchorPreset {
    pub fn levels(&self) -> Vec<AnchorLevel> {
        match self {
            AnchorPreset::FourScale => vec![
                AnchorLevel::new(8, &[10, 16, 24]),
                AnchorLevel::new(16, &[32, 48]),
                AnchorLevel::new(32, &[64, 96]),
                AnchorLevel::new(64, &[128, 192, 256]),
            ],
            AnchorPreset::ThreeScale => vec![
                AnchorLevel::new(8, &[10, 20]),
                AnchorLevel::new(16, &[32, 64]),
                AnchorLevel::new(32, &[128, 256]),
            ],
            AnchorPreset::Custom(levels) => levels.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let levels = self.levels();
        if levels.is_empty() {
            return Err(DetectError::InvalidConfig("anchor preset has no levels".into()));
        }
        for level in &levels {
            if level.stride == 0 {
                return Err(DetectError::InvalidConfig("anchor stride must be non-zero".into()));
            }
            if level.sizes.is_empty() {
                return Err(DetectError::InvalidConfig(format!(
                    "anchor level with stride {} has no sizes",
                    level.stride
                )));
            }
        }
        Ok(())
    }
}

/// Largest accepted input side in pixels.
pub const MAX_DIMENSION: u32 = 4096;

/// Distinct input sizes an [`AnchorCache`] keeps.
pub const CACHE_CAPACITY: usize = 16;

fn check_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(DetectError::InvalidDimensions { width, height });
    }
    Ok(())
}

/// Number of anchors `generate` would produce, without building them.
pub fn anchor_count(width: u32, height: u32, preset: &AnchorPreset) -> Result<usize> {
    check_dimensions(width, height)?;
    preset.validate()?;
    Ok(preset.levels().iter().map(|l| l.count(width, height)).sum())
}

/// Builds the prior grid ordered level, row, column, size.
///
/// Levels are generated in parallel; the concatenation keeps level order, which
/// is the positional contract with the network's output tensors.
pub fn generate(width: u32, height: u32, preset: &AnchorPreset) -> Result<Vec<Anchor>> {
    check_dimensions(width, height)?;
    preset.validate()?;
    let per_level: Vec<Vec<Anchor>> = preset
        .levels()
        .par_iter()
        .map(|level| level.generate(width, height))
        .collect();
    Ok(per_level.concat())
}

/// Per-size cache of generated anchors for one preset.
///
/// Entries are written once and then shared immutably. Once `CACHE_CAPACITY`
/// sizes are stored, further sizes are generated per call and not kept.
#[derive(Debug, Default)]
pub struct AnchorCache {
    preset: AnchorPreset,
    entries: RwLock<HashMap<(u32, u32), Arc<[Anchor]>>>,
}

impl AnchorCache {
    pub fn new(preset: AnchorPreset) -> Self {
        Self { preset, entries: RwLock::new(HashMap::new()) }
    }

    pub fn preset(&self) -> &AnchorPreset {
        &self.preset
    }

    pub fn get(&self, width: u32, height: u32) -> Result<Arc<[Anchor]>> {
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = entries.get(&(width, height)) {
                return Ok(Arc::clone(hit));
            }
        }
        let anchors: Arc<[Anchor]> = generate(width, height, &self.preset)?.into();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= CACHE_CAPACITY && !entries.contains_key(&(width, height)) {
            return Ok(anchors);
        }
        let stored = entries.entry((width, height)).or_insert(anchors);
        Ok(Arc::clone(stored))
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected_count(w: u32, h: u32, levels: &[(u32, usize)]) -> usize {
        levels
            .iter()
            .map(|&(s, n)| (h as f32 / s as f32).ceil() as usize * (w as f32 / s as f32).ceil() as usize * n)
            .sum()
    }

    #[test]
    fn four_scale_count_matches_grid_formula() {
        let anchors = generate(640, 480, &AnchorPreset::FourScale).unwrap();
        let expected = expected_count(640, 480, &[(8, 3), (16, 2), (32, 2), (64, 3)]);
        assert_eq!(anchors.len(), expected);
        assert_eq!(anchors.len(), 4800 * 3 + 1200 * 2 + 300 * 2 + 80 * 3);
        assert_eq!(anchor_count(640, 480, &AnchorPreset::FourScale).unwrap(), expected);
    }

    #[test]
    fn three_scale_count_rounds_partial_cells_up() {
        let anchors = generate(100, 50, &AnchorPreset::ThreeScale).unwrap();
        // 13x7 cells at stride 8, 7x4 at 16, 4x2 at 32.
        assert_eq!(anchors.len(), 91 * 2 + 28 * 2 + 8 * 2);
    }

    #[test]
    fn generation_is_deterministic() {
        let a = generate(320, 240, &AnchorPreset::FourScale).unwrap();
        let b = generate(320, 240, &AnchorPreset::FourScale).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn order_is_level_row_column_size() {
        let anchors = generate(64, 32, &AnchorPreset::FourScale).unwrap();
        // First level: stride 8, three sizes on cell (0, 0).
        let w = 64.0;
        let h = 32.0;
        for (i, size) in [10.0f32, 16.0, 24.0].iter().enumerate() {
            let a = anchors[i];
            assert!((a.cx - 4.0 / w).abs() < 1e-6);
            assert!((a.cy - 4.0 / h).abs() < 1e-6);
            assert!((a.sx - size / w).abs() < 1e-6);
            assert!((a.sy - size / h).abs() < 1e-6);
        }
        // Next cell is column 1 of row 0.
        assert!((anchors[3].cx - 12.0 / w).abs() < 1e-6);
        assert!((anchors[3].cy - 4.0 / h).abs() < 1e-6);
        // Row 1 starts after the eight columns of row 0.
        assert!((anchors[8 * 3].cx - 4.0 / w).abs() < 1e-6);
        assert!((anchors[8 * 3].cy - 12.0 / h).abs() < 1e-6);
        // Second level starts after 8x4 cells of the first.
        let second = anchors[8 * 4 * 3];
        assert!((second.cx - 8.0 / w).abs() < 1e-6);
        assert!((second.sx - 32.0 / w).abs() < 1e-6);
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        let err = generate(0, 480, &AnchorPreset::FourScale).unwrap_err();
        assert!(matches!(err, DetectError::InvalidDimensions { width: 0, height: 480 }));
        let err = anchor_count(640, MAX_DIMENSION + 1, &AnchorPreset::FourScale).unwrap_err();
        assert!(matches!(err, DetectError::InvalidDimensions { .. }));
        assert!(generate(MAX_DIMENSION + 1, 8, &AnchorPreset::ThreeScale).is_err());
    }

    #[test]
    fn custom_preset_validation() {
        let bad = AnchorPreset::Custom(vec![AnchorLevel::new(0, &[10])]);
        assert!(matches!(bad.validate(), Err(DetectError::InvalidConfig(_))));
        assert!(matches!(anchor_count(64, 64, &bad), Err(DetectError::InvalidConfig(_))));
        let empty = AnchorPreset::Custom(vec![]);
        assert!(empty.validate().is_err());
        let single = AnchorPreset::Custom(vec![AnchorLevel::new(16, &[24])]);
        assert_eq!(generate(32, 32, &single).unwrap().len(), 4);
    }

    #[test]
    fn cache_returns_shared_entries() {
        let cache = AnchorCache::new(AnchorPreset::ThreeScale);
        let first = cache.get(64, 64).unwrap();
        let second = cache.get(64, 64).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        cache.get(32, 32).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn cache_stops_growing_at_capacity() {
        let cache = AnchorCache::new(AnchorPreset::ThreeScale);
        for side in 0..CACHE_CAPACITY as u32 + 4 {
            cache.get(16 + side, 16).unwrap();
        }
        assert_eq!(cache.len(), CACHE_CAPACITY);
        // Sizes past capacity are still served, just not kept.
        let a = cache.get(200, 16).unwrap();
        let b = cache.get(200, 16).unwrap();
        assert_eq!(a.len(), b.len());
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), CACHE_CAPACITY);
    }

    #[test]
    fn concurrent_lookups_share_one_entry() {
        use rayon::prelude::*;

        let cache = AnchorCache::new(AnchorPreset::FourScale);
        let got: Vec<Arc<[Anchor]>> = (0..32)
            .into_par_iter()
            .map(|_| cache.get(320, 240).unwrap())
            .collect();
        assert_eq!(cache.len(), 1);
        let stored = cache.get(320, 240).unwrap();
        assert!(got.iter().all(|a| Arc::ptr_eq(a, &stored)));
    }
}
