use super::{Anchor, Detection, Point, LANDMARK_COUNT};

/// Variance applied to center offsets.
pub const CENTER_VARIANCE: f32 = 0.1;
/// Variance applied to log-scale size offsets.
pub const SIZE_VARIANCE: f32 = 0.2;

pub const BOX_STRIDE: usize = 4;
pub const SCORE_STRIDE: usize = 2;
pub const LANDMARK_STRIDE: usize = LANDMARK_COUNT * 2;

/// Index of the foreground probability inside each score record.
pub const FOREGROUND: usize = 1;

/// SSD-style decode of one anchor against its regression and landmark records.
///
/// Landmarks are offset from the anchor center, not from the regressed box center.
pub fn decode(
    anchor: &Anchor,
    delta: &[f32],
    landmark_delta: &[f32],
    score: f32,
    img_w: f32,
    img_h: f32,
) -> Detection {
    let cx = anchor.cx + delta[0] * CENTER_VARIANCE * anchor.sx;
    let cy = anchor.cy + delta[1] * CENTER_VARIANCE * anchor.sy;
    let sx = anchor.sx * (delta[2] * SIZE_VARIANCE).exp();
    let sy = anchor.sy * (delta[3] * SIZE_VARIANCE).exp();

    let x1 = clamp((cx - sx / 2.0) * img_w, img_w);
    let y1 = clamp((cy - sy / 2.0) * img_h, img_h);
    let x2 = clamp((cx + sx / 2.0) * img_w, img_w).max(x1);
    let y2 = clamp((cy + sy / 2.0) * img_h, img_h).max(y1);

    let mut landmarks = [Point::default(); LANDMARK_COUNT];
    for (j, point) in landmarks.iter_mut().enumerate() {
        point.x = (anchor.cx + landmark_delta[2 * j] * CENTER_VARIANCE * anchor.sx) * img_w;
        point.y = (anchor.cy + landmark_delta[2 * j + 1] * CENTER_VARIANCE * anchor.sy) * img_h;
    }

    Detection { x1, y1, x2, y2, score, landmarks }
}

#[inline]
fn clamp(v: f32, max: f32) -> f32 {
    v.clamp(0.0, max)
}

/// Indices of anchors whose foreground score is strictly above `threshold`,
/// in their original positional order.
pub fn passing_indices(scores: &[f32], threshold: f32) -> impl Iterator<Item = usize> + '_ {
    scores
        .chunks_exact(SCORE_STRIDE)
        .enumerate()
        .filter(move |(_, record)| record[FOREGROUND] > threshold)
        .map(|(i, _)| i)
}

/// Filters and decodes in one positional pass over the raw arrays.
pub fn decode_all(
    anchors: &[Anchor],
    scores: &[f32],
    deltas: &[f32],
    landmark_deltas: &[f32],
    threshold: f32,
    img_w: u32,
    img_h: u32,
) -> Vec<Detection> {
    let (w, h) = (img_w as f32, img_h as f32);
    passing_indices(scores, threshold)
        .map(|i| {
            decode(
                &anchors[i],
                &deltas[i * BOX_STRIDE..(i + 1) * BOX_STRIDE],
                &landmark_deltas[i * LANDMARK_STRIDE..(i + 1) * LANDMARK_STRIDE],
                scores[i * SCORE_STRIDE + FOREGROUND],
                w,
                h,
            )
        })
        .collect()
}
