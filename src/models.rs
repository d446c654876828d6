use std::fs;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::infer::DetectorConfig;

/// Model kinds looked up under the models directory.
pub const KINDS: [&str; 2] = ["retinaface", "lffd"];

#[derive(Debug, Clone, Serialize)]
pub struct ModelCatalogEntry {
    pub kind: String,
    pub versions: Vec<String>,
}

pub fn inspect_models_dir(base_dir: impl AsRef<Path>) -> Vec<ModelCatalogEntry> {
    let base = base_dir.as_ref();
    KINDS
        .into_iter()
        .map(|kind| {
            let kind_dir = base.join(kind);
            let mut versions: Vec<String> = version_dirs(&kind_dir)
                .into_iter()
                // only count as model version if it contains metadata.json
                .filter(|name| kind_dir.join(name).join("metadata.json").exists())
                .collect();
            versions.sort();
            ModelCatalogEntry { kind: kind.to_string(), versions }
        })
        .collect()
}

fn version_dirs(kind_dir: &Path) -> Vec<String> {
    let Ok(read) = fs::read_dir(kind_dir) else {
        return Vec::new();
    };
    read.flatten()
        .filter(|item| item.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .map(|item| item.file_name().to_string_lossy().to_string())
        .collect()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputSpec {
    pub name: String,
    pub shape: Vec<i64>,
    pub layout: String,
    pub mean: Option<Vec<f32>>,
    pub std: Option<Vec<f32>>,
}

impl InputSpec {
    /// `(width, height)` of an `[N, C, H, W]` input with static spatial dims.
    pub fn spatial_size(&self) -> Option<(u32, u32)> {
        match self.shape.as_slice() {
            [_, _, h, w] if *h > 0 && *w > 0 => Some((*w as u32, *h as u32)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelMetadata {
    pub name: String,
    pub version: String,
    pub url: String,
    pub sha256: String,
    pub inputs: Vec<InputSpec>,
    /// Output tensor names: `[boxes, scores, landmarks]` for anchor models,
    /// `[score_0, box_0, score_1, box_1, ...]` for LFFD.
    #[serde(default)]
    pub outputs: Vec<String>,
    pub license: String,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub detector: Option<DetectorConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSelection {
    pub kind: String,
    pub version: String,
    pub path: String,
    pub metadata: ModelMetadata,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct SelectedCatalog {
    pub retinaface: Option<ModelSelection>,
    pub lffd: Option<ModelSelection>,
}

impl SelectedCatalog {
    /// Preferred detector: RetinaFace when available, LFFD otherwise.
    pub fn detector(&self) -> Option<&ModelSelection> {
        self.retinaface.as_ref().or(self.lffd.as_ref())
    }
}

pub fn read_metadata(path: &Path) -> Option<ModelMetadata> {
    let data = fs::read_to_string(path).ok()?;
    serde_json::from_str::<ModelMetadata>(&data).ok()
}

fn discover_kind(base_dir: &Path, kind: &str) -> Vec<(String, ModelMetadata, String)> {
    let kind_dir = base_dir.join(kind);
    version_dirs(&kind_dir)
        .into_iter()
        .filter_map(|version| {
            let dir = kind_dir.join(&version);
            let meta = read_metadata(&dir.join("metadata.json"))?;
            // Prefer a model.onnx in the same dir; allow any extension "model.*"
            let model: PathBuf = ["model.onnx", "model.ort", "model"]
                .into_iter()
                .map(|fname| dir.join(fname))
                .find(|p| p.exists())?;
            Some((version, meta, model.to_string_lossy().to_string()))
        })
        .collect()
}

fn pick_best(kind: &str, mut items: Vec<(String, ModelMetadata, String)>) -> Option<ModelSelection> {
    if items.is_empty() {
        return None;
    }
    items.sort_by(|a, b| {
        let acc_a = a.1.accuracy.unwrap_or(f64::NEG_INFINITY);
        let acc_b = b.1.accuracy.unwrap_or(f64::NEG_INFINITY);
        acc_b
            .partial_cmp(&acc_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.0.cmp(&a.0))
    });
    let (version, metadata, path) = items.remove(0);
    Some(ModelSelection { kind: kind.to_string(), version, path, metadata })
}

pub fn select_best_models(base_dir: impl AsRef<Path>) -> SelectedCatalog {
    let base = base_dir.as_ref();
    SelectedCatalog {
        retinaface: pick_best("retinaface", discover_kind(base, "retinaface")),
        lffd: pick_best("lffd", discover_kind(base, "lffd")),
    }
}
