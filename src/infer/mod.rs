pub mod anchors;
pub mod decode;
pub mod lffd;
pub mod nms;
pub mod pipeline;
pub mod preprocess;
#[cfg(feature = "onnx")]
pub mod onnx;

use serde::{Deserialize, Serialize};

pub use anchors::{Anchor, AnchorLevel, AnchorPreset};
pub use nms::{non_max_suppression, top_k};
pub use pipeline::{run, Detector, DetectorConfig, DetectorFamily, RawOutputs};

/// Number of facial landmarks regressed per face.
pub const LANDMARK_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// A decoded face in absolute pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    pub landmarks: [Point; LANDMARK_COUNT],
}

impl Detection {
    /// Pixel-grid area: both corners are inclusive, hence the `+ 1`.
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1 + 1.0) * (self.y2 - self.y1 + 1.0)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Maps the box and its landmarks by independent x/y factors.
    pub fn scaled(mut self, sx: f32, sy: f32) -> Self {
        self.x1 *= sx;
        self.x2 *= sx;
        self.y1 *= sy;
        self.y2 *= sy;
        for p in &mut self.landmarks {
            p.x *= sx;
            p.y *= sy;
        }
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlapMetric {
    /// Intersection over union.
    #[default]
    Union,
    /// Intersection over the smaller of the two areas.
    Min,
}

/// Intersection area of two boxes on the inclusive pixel grid.
pub fn intersection(a: &Detection, b: &Detection) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);
    let w = (x2 - x1 + 1.0).max(0.0);
    let h = (y2 - y1 + 1.0).max(0.0);
    w * h
}

pub fn overlap(a: &Detection, b: &Detection, metric: OverlapMetric) -> f32 {
    let inter = intersection(a, b);
    if inter <= 0.0 {
        return 0.0;
    }
    let (area_a, area_b) = (a.area(), b.area());
    let denom = match metric {
        OverlapMetric::Union => area_a + area_b - inter,
        OverlapMetric::Min => area_a.min(area_b),
    };
    if denom <= 0.0 { 0.0 } else { inter / denom }
}

#[cfg(test)]
pub(crate) fn face(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Detection {
    Detection {
        x1,
        y1,
        x2,
        y2,
        score,
        landmarks: [Point::default(); LANDMARK_COUNT],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_counts_inclusive_pixels() {
        let d = face(0.0, 0.0, 9.0, 9.0, 1.0);
        assert_eq!(d.area(), 100.0);
        assert_eq!(d.width(), 9.0);
    }

    #[test]
    fn scaling_moves_landmarks_with_the_box() {
        let mut d = face(10.0, 20.0, 30.0, 40.0, 0.5);
        d.landmarks[2] = Point { x: 15.0, y: 25.0 };
        let s = d.scaled(2.0, 0.5);
        assert_eq!((s.x1, s.y1, s.x2, s.y2), (20.0, 10.0, 60.0, 20.0));
        assert_eq!(s.landmarks[2], Point { x: 30.0, y: 12.5 });
        assert_eq!(s.score, 0.5);
    }

    #[test]
    fn identical_boxes_overlap_fully_under_both_metrics() {
        let a = face(10.0, 10.0, 29.0, 29.0, 0.9);
        let b = face(10.0, 10.0, 29.0, 29.0, 0.8);
        assert!((overlap(&a, &b, OverlapMetric::Union) - 1.0).abs() < 1e-6);
        assert!((overlap(&a, &b, OverlapMetric::Min) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn nested_box_is_full_overlap_under_min_only() {
        let outer = face(0.0, 0.0, 19.0, 19.0, 0.9);
        let inner = face(5.0, 5.0, 14.0, 14.0, 0.8);
        assert!((overlap(&outer, &inner, OverlapMetric::Min) - 1.0).abs() < 1e-6);
        assert!((overlap(&outer, &inner, OverlapMetric::Union) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn disjoint_boxes_do_not_overlap() {
        let a = face(0.0, 0.0, 10.0, 10.0, 0.9);
        let b = face(50.0, 50.0, 60.0, 60.0, 0.8);
        assert_eq!(intersection(&a, &b), 0.0);
        assert_eq!(overlap(&a, &b, OverlapMetric::Union), 0.0);
        assert_eq!(overlap(&a, &b, OverlapMetric::Min), 0.0);
    }
}
