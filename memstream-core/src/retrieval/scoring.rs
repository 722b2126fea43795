//! Per-signal scoring functions for the retrieval ranking.
//!
//! Score = w_rec·0.5·Recency' + w_rel·3·Relevance' + w_imp·2·Importance'
//!
//! Where each primed signal is min-max normalized over the candidate set:
//!   Recency(k)   = decay^k, k = 1 for the most recently accessed candidate
//!   Relevance(m) = cosine_similarity(focal_embedding, memory_embedding)
//!   Importance(m) = the node's stored poignancy

use crate::config::RetrievalWeights;
use crate::retrieval::ScoreBreakdown;

/// Fixed multiplier on the recency term.
pub const RECENCY_FACTOR: f64 = 0.5;
/// Fixed multiplier on the relevance term.
pub const RELEVANCE_FACTOR: f64 = 3.0;
/// Fixed multiplier on the importance term.
pub const IMPORTANCE_FACTOR: f64 = 2.0;

/// Min-max normalize `values` into `[target_min, target_max]`.
///
/// When every value is identical the range is zero and each value
/// collapses to the midpoint of the target range.
#[must_use]
pub fn normalize_scores(values: &[f64], target_min: f64, target_max: f64) -> Vec<f64> {
    let Some(min) = values.iter().copied().reduce(f64::min) else {
        return Vec::new();
    };
    let max = values.iter().copied().fold(min, f64::max);
    let range = max - min;
    if range == 0.0 {
        let mid = (target_min + target_max) / 2.0;
        return vec![mid; values.len()];
    }
    values
        .iter()
        .map(|v| (v - min) * (target_max - target_min) / range + target_min)
        .collect()
}

/// Raw recency for `count` candidates ordered oldest access first.
///
/// The newest candidate gets `decay^1`, the one before it `decay^2`, and
/// so on back to the oldest at `decay^count`.
#[must_use]
pub fn recency_scores(count: usize, decay: f64) -> Vec<f64> {
    (0..count)
        .map(|i| {
            let k = i32::try_from(count - i).unwrap_or(i32::MAX);
            decay.powi(k)
        })
        .collect()
}

/// Fuse normalized signals into a weighted breakdown.
#[must_use]
pub fn fuse(
    weights: &RetrievalWeights,
    recency: f64,
    relevance: f64,
    importance: f64,
) -> ScoreBreakdown {
    ScoreBreakdown {
        recency: weights.recency * recency * RECENCY_FACTOR,
        relevance: weights.relevance * relevance * RELEVANCE_FACTOR,
        importance: weights.importance * importance * IMPORTANCE_FACTOR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_range_collapses_to_midpoint() {
        assert_eq!(normalize_scores(&[5.0, 5.0], 0.0, 1.0), vec![0.5, 0.5]);
        assert_eq!(normalize_scores(&[3.0], -5.0, 5.0), vec![0.0]);
    }

    #[test]
    fn range_maps_onto_target() {
        assert_eq!(normalize_scores(&[0.0, 10.0], -5.0, 5.0), vec![-5.0, 5.0]);
        assert_eq!(normalize_scores(&[1.0, 3.0, 2.0], 0.0, 1.0), vec![0.0, 1.0, 0.5]);
    }

    #[test]
    fn empty_input_is_empty() {
        assert!(normalize_scores(&[], 0.0, 1.0).is_empty());
    }

    #[test]
    fn newest_candidate_gets_highest_recency() {
        let r = recency_scores(3, 0.99);
        assert_eq!(r, vec![0.99_f64.powi(3), 0.99_f64.powi(2), 0.99_f64.powi(1)]);
        assert!(r[2] > r[1] && r[1] > r[0]);
    }

    #[test]
    fn fusion_applies_fixed_multipliers() {
        let b = fuse(&RetrievalWeights::default(), 1.0, 1.0, 1.0);
        assert_eq!(b.total(), 5.5);
        let w = RetrievalWeights {
            recency: 2.0,
            relevance: 0.0,
            importance: 1.0,
        };
        let b = fuse(&w, 0.5, 1.0, 0.25);
        assert_eq!((b.recency, b.relevance, b.importance), (0.5, 0.0, 0.5));
    }
}
