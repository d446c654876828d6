//! Receptive-field decoding for LFFD-style detectors.
//!
//! LFFD has no anchor priors: every feature cell of a scale branch regresses
//! the four box edges relative to the center of its receptive field.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::{Detection, Point, LANDMARK_COUNT};
use crate::error::{expect_len, DetectError, Result};

/// Score map channels per cell; channel 0 is the face probability.
pub const SCORE_CHANNELS: usize = 2;
pub const BOX_CHANNELS: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LffdVariant {
    FiveScale,
    #[default]
    EightScale,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LffdScale {
    pub stride: f32,
    pub center_start: f32,
    pub receptive_field: f32,
}

impl LffdScale {
    const fn new(stride: f32, center_start: f32, receptive_field: f32) -> Self {
        Self { stride, center_start, receptive_field }
    }

    fn constant(&self) -> f32 {
        self.receptive_field / 2.0
    }
}

const FIVE_SCALES: [LffdScale; 5] = [
    LffdScale::new(4.0, 3.0, 20.0),
    LffdScale::new(8.0, 7.0, 40.0),
    LffdScale::new(16.0, 15.0, 80.0),
    LffdScale::new(32.0, 31.0, 160.0),
    LffdScale::new(64.0, 63.0, 320.0),
];

const EIGHT_SCALES: [LffdScale; 8] = [
    LffdScale::new(4.0, 3.0, 15.0),
    LffdScale::new(4.0, 3.0, 20.0),
    LffdScale::new(8.0, 7.0, 40.0),
    LffdScale::new(8.0, 7.0, 70.0),
    LffdScale::new(16.0, 15.0, 110.0),
    LffdScale::new(32.0, 31.0, 250.0),
    LffdScale::new(32.0, 31.0, 400.0),
    LffdScale::new(32.0, 31.0, 560.0),
];

impl LffdVariant {
    pub fn scales(&self) -> &'static [LffdScale] {
        match self {
            LffdVariant::FiveScale => &FIVE_SCALES,
            LffdVariant::EightScale => &EIGHT_SCALES,
        }
    }
}

/// Raw outputs of one scale branch, channel-major.
#[derive(Debug, Clone, Copy)]
pub struct LffdBranch<'a> {
    pub feature_width: usize,
    pub feature_height: usize,
    pub scores: &'a [f32],
    pub boxes: &'a [f32],
}

impl LffdBranch<'_> {
    /// Feature cells in the branch, `None` when the dimensions overflow.
    pub fn cells(&self) -> Option<usize> {
        self.feature_width.checked_mul(self.feature_height)
    }
}

/// Decodes every branch cell scoring strictly above `threshold`, in network-input pixels.
/// Branches whose index is listed in `skip` are shape-checked but not decoded.
pub fn collect(
    variant: LffdVariant,
    branches: &[LffdBranch<'_>],
    skip: &[usize],
    threshold: f32,
    input_w: u32,
    input_h: u32,
) -> Result<Vec<Detection>> {
    let scales = variant.scales();
    if branches.len() != scales.len() {
        return Err(DetectError::ShapeMismatch {
            tensor: "lffd branches",
            expected: scales.len(),
            actual: branches.len(),
        });
    }
    let max_x = input_w.saturating_sub(1) as f32;
    let max_y = input_h.saturating_sub(1) as f32;

    let mut out = Vec::new();
    for (index, (scale, branch)) in scales.iter().zip(branches).enumerate() {
        let cells = branch.cells().ok_or(DetectError::ShapeMismatch {
            tensor: "lffd scores",
            expected: usize::MAX,
            actual: branch.scores.len(),
        })?;
        expect_len("lffd scores", branch.scores, cells, SCORE_CHANNELS)?;
        expect_len("lffd boxes", branch.boxes, cells, BOX_CHANNELS)?;
        if skip.contains(&index) {
            continue;
        }

        let c = scale.constant();
        let channel = |ch: usize, k: usize| branch.boxes[ch * cells + k];
        for y in 0..branch.feature_height {
            let cy = scale.center_start + scale.stride * y as f32;
            for x in 0..branch.feature_width {
                let k = y * branch.feature_width + x;
                let score = branch.scores[k];
                // NaN compares as unordered and is dropped with the rest.
                if score.partial_cmp(&threshold) != Some(Ordering::Greater) {
                    continue;
                }
                let cx = scale.center_start + scale.stride * x as f32;
                let x1 = (cx - channel(0, k) * c).max(0.0);
                let y1 = (cy - channel(1, k) * c).max(0.0);
                let x2 = (cx - channel(2, k) * c).min(max_x).max(x1);
                let y2 = (cy - channel(3, k) * c).min(max_y).max(y1);
                out.push(Detection {
                    x1,
                    y1,
                    x2,
                    y2,
                    score,
                    landmarks: [Point::default(); LANDMARK_COUNT],
                });
            }
        }
    }
    Ok(out)
}

/// Maps a box from network-input pixels back to the original image and squares
/// it around its center on the longer side.
pub fn restore(
    det: Detection,
    input_w: u32,
    input_h: u32,
    original_w: u32,
    original_h: u32,
) -> Detection {
    let ratio_w = original_w as f32 / input_w as f32;
    let ratio_h = original_h as f32 / input_h as f32;
    let (x1, y1) = (det.x1 * ratio_w, det.y1 * ratio_h);
    let (x2, y2) = (det.x2 * ratio_w, det.y2 * ratio_h);

    let side = (x2 - x1).max(y2 - y1);
    let cx = x1 + (x2 - x1) / 2.0;
    let cy = y1 + (y2 - y1) / 2.0;
    let max_x = original_w.saturating_sub(1) as f32;
    let max_y = original_h.saturating_sub(1) as f32;

    let x1 = (cx - side / 2.0).clamp(0.0, max_x);
    let y1 = (cy - side / 2.0).clamp(0.0, max_y);
    Detection {
        x1,
        y1,
        x2: (cx + side / 2.0).min(max_x).max(x1),
        y2: (cy + side / 2.0).min(max_y).max(y1),
        ..det
    }
}
