//! Reciprocal rank fusion and score normalization.

use std::collections::HashMap;

/// Fuse ranked id lists with RRF.
///
/// Each list contributes `1 / (k + rank + 1)` to every id it contains, for
/// at most its first `k` entries. The output is sorted by fused score, best
/// first; equal scores keep the order in which ids were first seen.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn reciprocal_rank_fusion<S: AsRef<str>>(lists: &[Vec<S>], k: usize) -> Vec<(String, f32)> {
    let mut order: Vec<String> = Vec::new();
    let mut scores: HashMap<String, f64> = HashMap::new();

    for list in lists {
        for (rank, id) in list.iter().take(k).enumerate() {
            let id = id.as_ref();
            let contribution = 1.0 / (k + rank + 1) as f64;
            if let Some(score) = scores.get_mut(id) {
                *score += contribution;
            } else {
                order.push(id.to_owned());
                scores.insert(id.to_owned(), contribution);
            }
        }
    }

    let mut fused: Vec<(String, f32)> = order
        .into_iter()
        .map(|id| {
            let score = scores.get(&id).copied().unwrap_or(0.0);
            (id, score as f32)
        })
        .collect();
    fused.sort_by(|a, b| b.1.total_cmp(&a.1));
    fused
}

/// Min-max scale into `[0, 1]`. A set of equal scores maps to all `1.0`.
#[must_use]
pub fn normalize_scores(scores: &[f32]) -> Vec<f32> {
    let Some(min) = scores.iter().copied().reduce(f32::min) else {
        return Vec::new();
    };
    let max = scores.iter().copied().fold(min, f32::max);
    let range = max - min;
    if range <= f32::EPSILON {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|s| (s - min) / range).collect()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn doc_in_both_lists_beats_doc_in_one() {
        let fused = reciprocal_rank_fusion(&[vec!["a", "b"], vec!["a"]], 60);
        let score = |id: &str| fused.iter().find(|(d, _)| d == id).map(|(_, s)| *s).unwrap();
        assert!(score("a") > score("b"));
        assert_eq!(fused[0].0, "a");
    }

    #[test]
    fn contributions_use_rank_plus_one() {
        let fused = reciprocal_rank_fusion(&[vec!["x"]], 60);
        assert!((fused[0].1 - 1.0 / 61.0).abs() < 1e-6);
    }

    #[test]
    fn ties_keep_first_seen_order() {
        let fused = reciprocal_rank_fusion(&[vec!["p"], vec!["q"]], 60);
        assert_eq!(fused[0].0, "p");
        assert_eq!(fused[1].0, "q");
    }

    #[test]
    fn lists_truncated_to_k() {
        let long: Vec<String> = (0..10).map(|i| format!("d{i}")).collect();
        let fused = reciprocal_rank_fusion(&[long], 3);
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn empty_input() {
        assert!(reciprocal_rank_fusion::<&str>(&[], 60).is_empty());
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize_scores(&[2.0, 4.0, 3.0]), vec![0.0, 1.0, 0.5]);
        assert_eq!(normalize_scores(&[0.3, 0.3]), vec![1.0, 1.0]);
    }

    proptest! {
        #[test]
        fn fused_scores_sorted_and_unique(
            lists in proptest::collection::vec(
                proptest::collection::vec("[a-f]", 0..8), 0..5),
        ) {
            let fused = reciprocal_rank_fusion(&lists, 60);
            for pair in fused.windows(2) {
                prop_assert!(pair[0].1 >= pair[1].1);
            }
            let mut ids: Vec<&String> = fused.iter().map(|(id, _)| id).collect();
            ids.sort();
            ids.dedup();
            prop_assert_eq!(ids.len(), fused.len());
        }

        #[test]
        fn normalized_in_unit_range(scores in proptest::collection::vec(-100.0f32..100.0, 1..30)) {
            for s in normalize_scores(&scores) {
                prop_assert!((0.0..=1.0).contains(&s));
            }
        }
    }
}
