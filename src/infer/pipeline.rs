use serde::{Deserialize, Serialize};
use tracing::debug;

use super::anchors::{self, AnchorCache, AnchorPreset};
use super::decode::{decode_all, BOX_STRIDE, LANDMARK_STRIDE, SCORE_STRIDE};
use super::lffd::{self, LffdBranch, LffdVariant};
use super::nms::{non_max_suppression, sort_by_score};
use super::preprocess::Normalization;
use super::{Detection, OverlapMetric};
use crate::error::{expect_len, DetectError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DetectorFamily {
    #[serde(rename = "retinaface")]
    RetinaFace { preset: AnchorPreset },
    Lffd {
        variant: LffdVariant,
        /// Scale branches left out of decoding, by index.
        #[serde(default, rename = "skipBranches", skip_serializing_if = "Vec::is_empty")]
        skip_branches: Vec<usize>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectorConfig {
    pub family: DetectorFamily,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub overlap: OverlapMetric,
    pub top_k: Option<usize>,
    pub normalization: Normalization,
}

impl DetectorConfig {
    /// Four-scale anchor grid.
    pub fn retinaface() -> Self {
        Self {
            family: DetectorFamily::RetinaFace { preset: AnchorPreset::FourScale },
            score_threshold: 0.6,
            nms_threshold: 0.4,
            overlap: OverlapMetric::Union,
            top_k: None,
            normalization: Normalization::retinaface(),
        }
    }

    /// Three-scale anchor grid used by the lighter RetinaFace exports.
    pub fn retinaface_mobile() -> Self {
        Self {
            family: DetectorFamily::RetinaFace { preset: AnchorPreset::ThreeScale },
            ..Self::retinaface()
        }
    }

    pub fn lffd(variant: LffdVariant) -> Self {
        Self {
            family: DetectorFamily::Lffd { variant, skip_branches: Vec::new() },
            score_threshold: 0.6,
            nms_threshold: 0.5,
            overlap: OverlapMetric::Min,
            top_k: Some(10_000),
            normalization: Normalization::lffd(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("scoreThreshold", self.score_threshold),
            ("nmsThreshold", self.nms_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(DetectError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.top_k == Some(0) {
            return Err(DetectError::InvalidConfig("topK must be positive".into()));
        }
        match &self.family {
            DetectorFamily::RetinaFace { preset } => preset.validate()?,
            DetectorFamily::Lffd { variant, skip_branches } => {
                let scales = variant.scales().len();
                if let Some(bad) = skip_branches.iter().find(|&&b| b >= scales) {
                    return Err(DetectError::InvalidConfig(format!(
                        "skipBranches index {bad} out of range for {scales} scales"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::retinaface()
    }
}

/// Raw network outputs as flat arrays, one record per anchor:
/// `scores` is `N×2`, `boxes` is `N×4` and `landmarks` is `N×10`.
#[derive(Debug, Clone, Copy)]
pub struct RawOutputs<'a> {
    pub scores: &'a [f32],
    pub boxes: &'a [f32],
    pub landmarks: &'a [f32],
}

impl RawOutputs<'_> {
    fn check(&self, anchors: usize) -> Result<()> {
        expect_len("scores", self.scores, anchors, SCORE_STRIDE)?;
        expect_len("boxes", self.boxes, anchors, BOX_STRIDE)?;
        expect_len("landmarks", self.landmarks, anchors, LANDMARK_STRIDE)
    }
}

/// Decode-and-suppress pipeline for one detector configuration.
#[derive(Debug)]
pub struct Detector {
    config: DetectorConfig,
    anchors: Option<AnchorCache>,
}

impl Detector {
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        let anchors = match &config.family {
            DetectorFamily::RetinaFace { preset } => Some(AnchorCache::new(preset.clone())),
            DetectorFamily::Lffd { .. } => None,
        };
        Ok(Self { config, anchors })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Number of anchors the network must emit for an input of this size.
    pub fn anchor_count(&self, width: u32, height: u32) -> Result<usize> {
        anchors::anchor_count(width, height, self.anchor_cache()?.preset())
    }

    fn anchor_cache(&self) -> Result<&AnchorCache> {
        self.anchors.as_ref().ok_or_else(|| {
            DetectError::InvalidConfig("lffd detectors have no anchor grid".into())
        })
    }

    /// Runs filter, decode, sort and suppression over anchor-aligned outputs.
    pub fn detect_raw(&self, raw: &RawOutputs<'_>, width: u32, height: u32) -> Result<Vec<Detection>> {
        let cache = self.anchor_cache()?;
        raw.check(anchors::anchor_count(width, height, cache.preset())?)?;
        let anchors = cache.get(width, height)?;
        let candidates = decode_all(
            &anchors,
            raw.scores,
            raw.boxes,
            raw.landmarks,
            self.config.score_threshold,
            width,
            height,
        );
        debug!("event" = "pipeline.decoded", anchors = anchors.len(), candidates = candidates.len());
        Ok(self.suppress(candidates))
    }

    /// Runs the LFFD branches of a `input_w`x`input_h` network input and maps the
    /// survivors back onto the `original_w`x`original_h` image.
    pub fn detect_lffd(
        &self,
        branches: &[LffdBranch<'_>],
        input_w: u32,
        input_h: u32,
        original_w: u32,
        original_h: u32,
    ) -> Result<Vec<Detection>> {
        let DetectorFamily::Lffd { variant, skip_branches } = &self.config.family else {
            return Err(DetectError::InvalidConfig(
                "anchor-based detectors do not take lffd branches".into(),
            ));
        };
        for (w, h) in [(input_w, input_h), (original_w, original_h)] {
            if w == 0 || h == 0 {
                return Err(DetectError::InvalidDimensions { width: w, height: h });
            }
        }
        let candidates = lffd::collect(
            *variant,
            branches,
            skip_branches,
            self.config.score_threshold,
            input_w,
            input_h,
        )?;
        debug!("event" = "pipeline.decoded", branches = branches.len(), candidates = candidates.len());
        Ok(self
            .suppress(candidates)
            .into_iter()
            .map(|d| lffd::restore(d, input_w, input_h, original_w, original_h))
            .collect())
    }

    fn suppress(&self, mut candidates: Vec<Detection>) -> Vec<Detection> {
        sort_by_score(&mut candidates);
        if let Some(k) = self.config.top_k {
            candidates.truncate(k);
        }
        let before = candidates.len();
        let kept = non_max_suppression(candidates, self.config.nms_threshold, self.config.overlap);
        debug!("event" = "pipeline.done", before, kept = kept.len());
        kept
    }
}

impl Default for Detector {
    fn default() -> Self {
        Self {
            config: DetectorConfig::default(),
            anchors: Some(AnchorCache::new(AnchorPreset::FourScale)),
        }
    }
}

/// One-shot anchor pipeline with union-overlap suppression.
#[allow(clippy::too_many_arguments)]
pub fn run(
    scores: &[f32],
    box_deltas: &[f32],
    landmark_deltas: &[f32],
    width: u32,
    height: u32,
    threshold: f32,
    nms_threshold: f32,
    preset: AnchorPreset,
) -> Result<Vec<Detection>> {
    let detector = Detector::new(DetectorConfig {
        family: DetectorFamily::RetinaFace { preset },
        score_threshold: threshold,
        nms_threshold,
        ..DetectorConfig::retinaface()
    })?;
    let raw = RawOutputs { scores, boxes: box_deltas, landmarks: landmark_deltas };
    detector.detect_raw(&raw, width, height)
}
