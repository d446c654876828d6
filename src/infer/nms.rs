use super::{overlap, Detection, OverlapMetric};

/// Stable descending sort by score; ties keep their input order.
pub fn sort_by_score(boxes: &mut [Detection]) {
    boxes.sort_by(|a, b| b.score.total_cmp(&a.score));
}

/// Keeps the `k` highest-scoring boxes, sorted by descending score.
pub fn top_k(mut boxes: Vec<Detection>, k: usize) -> Vec<Detection> {
    sort_by_score(&mut boxes);
    boxes.truncate(k);
    boxes
}

/// Greedy suppression over boxes sorted by descending score.
///
/// Each surviving box removes every later survivor whose overlap with it is at
/// least `threshold`. Boxes with no shared pixels are never removed.
pub fn non_max_suppression(
    mut boxes: Vec<Detection>,
    threshold: f32,
    metric: OverlapMetric,
) -> Vec<Detection> {
    if boxes.is_empty() {
        return boxes;
    }
    sort_by_score(&mut boxes);

    let mut suppressed = vec![false; boxes.len()];
    for i in 0..boxes.len() {
        if suppressed[i] {
            continue;
        }
        for j in (i + 1)..boxes.len() {
            if suppressed[j] {
                continue;
            }
            let ovr = overlap(&boxes[i], &boxes[j], metric);
            if ovr > 0.0 && ovr >= threshold {
                suppressed[j] = true;
            }
        }
    }

    boxes
        .into_iter()
        .zip(suppressed)
        .filter_map(|(b, gone)| (!gone).then_some(b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infer::face;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random_boxes(rng: &mut StdRng, n: usize) -> Vec<Detection> {
        (0..n)
            .map(|_| {
                let x1 = rng.gen_range(0.0..200.0f32);
                let y1 = rng.gen_range(0.0..200.0f32);
                let w = rng.gen_range(5.0..80.0f32);
                let h = rng.gen_range(5.0..80.0f32);
                face(x1, y1, x1 + w, y1 + h, rng.gen_range(0.0..1.0))
            })
            .collect()
    }

    #[test]
    fn identical_boxes_keep_the_best_score() {
        for metric in [OverlapMetric::Union, OverlapMetric::Min] {
            let boxes = vec![
                face(40.0, 40.0, 80.0, 80.0, 0.8),
                face(40.0, 40.0, 80.0, 80.0, 0.9),
            ];
            let kept = non_max_suppression(boxes, 0.3, metric);
            assert_eq!(kept.len(), 1);
            assert_eq!(kept[0].score, 0.9);
        }
    }

    #[test]
    fn disjoint_boxes_survive_any_threshold() {
        for threshold in [0.0, 0.1, 0.5, 0.99] {
            let boxes = vec![
                face(0.0, 0.0, 10.0, 10.0, 0.9),
                face(100.0, 100.0, 120.0, 120.0, 0.8),
            ];
            let kept = non_max_suppression(boxes, threshold, OverlapMetric::Union);
            assert_eq!(kept.len(), 2);
        }
    }

    #[test]
    fn suppressed_box_no_longer_suppresses_others() {
        // b overlaps a and c, but a and c do not overlap: b is removed by a, so c survives.
        let a = face(0.0, 0.0, 19.0, 19.0, 0.9);
        let b = face(10.0, 0.0, 29.0, 19.0, 0.8);
        let c = face(22.0, 0.0, 41.0, 19.0, 0.7);
        let kept = non_max_suppression(vec![c, b, a], 0.3, OverlapMetric::Union);
        let scores: Vec<f32> = kept.iter().map(|d| d.score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
    }

    #[test]
    fn min_metric_removes_nested_boxes() {
        let outer = face(0.0, 0.0, 99.0, 99.0, 0.9);
        let inner = face(30.0, 30.0, 49.0, 49.0, 0.8);
        let union = non_max_suppression(vec![outer.clone(), inner.clone()], 0.5, OverlapMetric::Union);
        assert_eq!(union.len(), 2);
        let min = non_max_suppression(vec![outer, inner], 0.5, OverlapMetric::Min);
        assert_eq!(min.len(), 1);
    }

    #[test]
    fn ties_keep_input_order() {
        let first = face(0.0, 0.0, 10.0, 10.0, 0.5);
        let second = face(100.0, 0.0, 110.0, 10.0, 0.5);
        let kept = non_max_suppression(vec![first.clone(), second.clone()], 0.4, OverlapMetric::Union);
        assert_eq!(kept, vec![first, second]);
    }

    #[test]
    fn output_is_sorted_and_idempotent() {
        let mut rng = StdRng::seed_from_u64(42);
        for metric in [OverlapMetric::Union, OverlapMetric::Min] {
            let boxes = random_boxes(&mut rng, 120);
            let once = non_max_suppression(boxes, 0.4, metric);
            assert!(once.windows(2).all(|w| w[0].score >= w[1].score));
            let twice = non_max_suppression(once.clone(), 0.4, metric);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn raising_the_threshold_never_drops_more() {
        // One large box and eight thin bands, pairwise disjoint, each covering
        // k/10 of its own area inside the large box.
        let mut boxes = vec![face(0.0, 0.0, 99.0, 99.0, 0.95)];
        for k in 1..=8 {
            let y = (k - 1) as f32 * 12.0;
            let x1 = 100.0 - 10.0 * k as f32;
            boxes.push(face(x1, y, x1 + 99.0, y + 9.0, 0.9 - 0.05 * k as f32));
        }
        let mut previous = 0;
        for step in 0..=10 {
            let threshold = step as f32 / 10.0 + 0.05;
            let kept = non_max_suppression(boxes.clone(), threshold, OverlapMetric::Min).len();
            assert!(kept >= previous, "threshold {threshold}: {kept} < {previous}");
            previous = kept;
        }
        assert_eq!(previous, 9);
    }

    #[test]
    fn top_k_truncates_after_sorting() {
        let boxes = vec![
            face(0.0, 0.0, 1.0, 1.0, 0.2),
            face(0.0, 0.0, 1.0, 1.0, 0.9),
            face(0.0, 0.0, 1.0, 1.0, 0.5),
        ];
        let best = top_k(boxes, 2);
        let scores: Vec<f32> = best.iter().map(|d| d.score).collect();
        assert_eq!(scores, vec![0.9, 0.5]);
        assert!(top_k(Vec::new(), 5).is_empty());
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(non_max_suppression(Vec::new(), 0.4, OverlapMetric::Union).is_empty());
    }
}
