//! Confidence-based reweighting.
//!
//! Non-empty clusters are ranked by size, then by mean confidence, then by
//! id. The top-ranked cluster is always trusted and, whenever two or more
//! clusters are populated, the bottom-ranked one is always an outlier. The
//! clusters in between are trusted when they hold at least
//! `min_trusted_share` of the examples. Every example gets
//!
//! ```text
//! base(c) = floor + (1 - floor) * c^exponent
//! w       = base(c)                 trusted cluster
//! w       = base(c) / (1 + scale)   outlier cluster
//! ```
//!
//! and the vector is rescaled to mean 1.0. `base` is increasing in `c` with
//! its maximum at `c = 1`, so a fully confident member of a trusted cluster
//! carries the largest weight in the dataset. Since `scale > 0` an outlier
//! weight is strictly below a trusted weight at the same confidence.

use super::{normalize_mean, ReweightPolicy};
use crate::cluster::ClusterAssignment;
use crate::config::PolicyConfig;
use crate::error::{ReweightError, Result};

/// Default [`ReweightPolicy`].
#[derive(Debug, Clone, Default)]
pub struct ConfidencePolicy {
    config: PolicyConfig,
}

impl ConfidencePolicy {
    /// Create the policy.
    #[must_use]
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    /// Policy parameters.
    #[must_use]
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Which cluster ids are trusted. Empty clusters are never trusted.
    #[must_use]
    pub fn trusted_clusters(&self, assignment: &ClusterAssignment) -> Vec<bool> {
        let sizes = assignment.cluster_sizes();
        let total = assignment.len().max(1) as f32;

        let mut confidence_sum = vec![0.0f32; sizes.len()];
        for (&label, &c) in assignment.labels().iter().zip(assignment.confidence()) {
            confidence_sum[label] += c;
        }
        let mean_confidence: Vec<f32> = confidence_sum
            .iter()
            .zip(&sizes)
            .map(|(&sum, &size)| if size == 0 { 0.0 } else { sum / size as f32 })
            .collect();

        let mut ranked: Vec<usize> = (0..sizes.len()).filter(|&j| sizes[j] > 0).collect();
        ranked.sort_by(|&a, &b| {
            sizes[b]
                .cmp(&sizes[a])
                .then_with(|| mean_confidence[b].total_cmp(&mean_confidence[a]))
                .then(a.cmp(&b))
        });

        let mut trusted = vec![false; sizes.len()];
        let last = ranked.len().saturating_sub(1);
        for (rank, &j) in ranked.iter().enumerate() {
            let share = sizes[j] as f32 / total;
            trusted[j] = rank == 0 || (rank < last && share >= self.config.min_trusted_share);
        }
        trusted
    }

    /// Weight before outlier suppression and normalization.
    #[must_use]
    pub fn base(&self, confidence: f32) -> f32 {
        let floor = self.config.floor;
        floor + (1.0 - floor) * confidence.clamp(0.0, 1.0).powf(self.config.exponent)
    }
}

impl ReweightPolicy for ConfidencePolicy {
    fn name(&self) -> &'static str {
        "confidence"
    }

    fn compute_weights(&self, assignment: &ClusterAssignment, scale: f32) -> Result<Vec<f32>> {
        if !(scale > 0.0 && scale.is_finite()) {
            return Err(ReweightError::InvalidConfig(format!(
                "scale must be a positive finite number, got {scale}"
            )));
        }
        let trusted = self.trusted_clusters(assignment);
        let suppression = 1.0 + scale;

        let mut weights: Vec<f32> = assignment
            .labels()
            .iter()
            .zip(assignment.confidence())
            .map(|(&label, &c)| {
                let base = self.base(c);
                if trusted[label] {
                    base
                } else {
                    base / suppression
                }
            })
            .collect();
        normalize_mean(&mut weights);
        Ok(weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ConfidencePolicy {
        ConfidencePolicy::new(PolicyConfig::default())
    }

    #[test]
    fn test_base_is_monotonic_with_max_at_one() {
        let p = policy();
        let values: Vec<f32> = (0..=10).map(|i| p.base(i as f32 / 10.0)).collect();
        assert!(values.windows(2).all(|w| w[0] < w[1]));
        assert!((p.base(1.0) - 1.0).abs() < 1e-6);
        assert!(p.base(0.0) > 0.0);
    }

    #[test]
    fn test_largest_cluster_always_trusted() {
        let p = ConfidencePolicy::new(PolicyConfig::default().with_min_trusted_share(0.9));
        let a = ClusterAssignment::new(vec![0, 1, 1, 2, 2, 2], vec![1.0; 6], 3).unwrap();
        assert_eq!(p.trusted_clusters(&a), vec![false, false, true]);
    }

    #[test]
    fn test_even_split_still_has_an_outlier() {
        let a = ClusterAssignment::new(vec![0, 0, 0, 1, 1, 1], vec![1.0; 6], 2).unwrap();
        assert_eq!(policy().trusted_clusters(&a), vec![true, false]);

        let w = policy().compute_weights(&a, 1e6).unwrap();
        assert!(w[0] - w[5] > 0.5);
    }

    #[test]
    fn test_equal_sizes_ranked_by_mean_confidence() {
        let a =
            ClusterAssignment::new(vec![0, 0, 1, 1], vec![0.6, 0.7, 0.9, 1.0], 2).unwrap();
        assert_eq!(policy().trusted_clusters(&a), vec![false, true]);
    }

    #[test]
    fn test_middle_cluster_trusted_by_share() {
        let a = ClusterAssignment::new(vec![0, 0, 0, 0, 1, 1, 1, 2, 2, 2], vec![1.0; 10], 4)
            .unwrap();
        // Cluster 3 is empty; cluster 2 ranks last on the id tie-break.
        assert_eq!(
            policy().trusted_clusters(&a),
            vec![true, true, false, false]
        );
    }

    #[test]
    fn test_single_populated_cluster_is_trusted() {
        let a = ClusterAssignment::new(vec![1, 1, 1], vec![0.9; 3], 3).unwrap();
        assert_eq!(policy().trusted_clusters(&a), vec![false, true, false]);
    }

    #[test]
    fn test_outlier_strictly_below_trusted_at_same_confidence() {
        let labels = vec![0, 0, 0, 0, 0, 0, 0, 0, 1, 1];
        for &c in &[0.0f32, 0.3, 0.9, 1.0] {
            let a = ClusterAssignment::new(labels.clone(), vec![c; 10], 2).unwrap();
            let w = policy().compute_weights(&a, 1e-3).unwrap();
            assert!(w[9] < w[0], "confidence {c}: {} !< {}", w[9], w[0]);
        }
    }

    #[test]
    fn test_confident_trusted_member_has_max_weight() {
        let a = ClusterAssignment::new(
            vec![0, 0, 0, 0, 1, 1, 1, 2],
            vec![1.0, 0.7, 0.2, 0.9, 1.0, 0.5, 0.1, 1.0],
            3,
        )
        .unwrap();
        let w = policy().compute_weights(&a, 1e6).unwrap();
        let max = w.iter().copied().fold(f32::MIN, f32::max);
        assert_eq!(w[0], max);
        assert_eq!(w[4], max);
        assert!(w[7] < w[0]);
    }

    #[test]
    fn test_weights_finite_non_negative_mean_one() {
        let confidence: Vec<f32> = (0..20).map(|i| i as f32 / 19.0).collect();
        let labels: Vec<usize> = (0..20).map(|i| usize::from(i >= 17)).collect();
        let a = ClusterAssignment::new(labels, confidence, 2).unwrap();
        let w = policy().compute_weights(&a, 1e6).unwrap();

        assert!(w.iter().all(|x| x.is_finite() && *x >= 0.0));
        let mean = w.iter().sum::<f32>() / w.len() as f32;
        assert!((mean - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_rejects_non_positive_scale() {
        let a = ClusterAssignment::new(vec![0, 1], vec![1.0, 1.0], 2).unwrap();
        assert!(policy().compute_weights(&a, 0.0).is_err());
        assert!(policy().compute_weights(&a, -1.0).is_err());
    }
}
