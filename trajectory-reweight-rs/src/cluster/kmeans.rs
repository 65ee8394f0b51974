//! K-means seeding and soft k-means clustering.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{argmax, check_features, squared_distance, ClusterAssignment, ClusteringStrategy};
use crate::config::SoftKMeansConfig;
use crate::error::Result;

/// Pick `k` initial centers with k-means++ (D² sampling).
///
/// When every point coincides with an existing center the next center is
/// drawn uniformly, so degenerate data still yields `k` centers.
pub fn kmeans_plus_plus(points: &[Vec<f64>], k: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f64>> {
    let n = points.len();
    let mut centroids = Vec::with_capacity(k);
    if n == 0 || k == 0 {
        return centroids;
    }
    centroids.push(points[rng.gen_range(0..n)].clone());

    let mut nearest: Vec<f64> = points
        .iter()
        .map(|p| squared_distance(p, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = nearest.iter().sum();
        let next = if total > 0.0 && total.is_finite() {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = n - 1;
            for (i, &d) in nearest.iter().enumerate() {
                if target < d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            chosen
        } else {
            rng.gen_range(0..n)
        };

        let center = points[next].clone();
        for (d, p) in nearest.iter_mut().zip(points) {
            *d = d.min(squared_distance(p, &center));
        }
        centroids.push(center);
    }
    centroids
}

/// Lloyd's k-means followed by softmax responsibilities.
///
/// Responsibility of cluster `j` for point `x` is proportional to
/// `exp(-stiffness * ||x - mu_j||^2)`.
#[derive(Debug, Clone)]
pub struct SoftKMeans {
    config: SoftKMeansConfig,
    seed: u64,
}

impl SoftKMeans {
    /// Create a soft k-means strategy.
    #[must_use]
    pub fn new(config: SoftKMeansConfig, seed: u64) -> Self {
        Self { config, seed }
    }

    /// Run Lloyd iterations; returns final centroids.
    pub fn fit(&self, points: &[Vec<f64>], k: usize) -> Result<Vec<Vec<f64>>> {
        let dim = check_features(points, k)?;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut centroids = kmeans_plus_plus(points, k, &mut rng);
        let mut assignments = vec![usize::MAX; points.len()];

        for iteration in 0..self.config.max_iter {
            let mut changed = false;
            for (a, point) in assignments.iter_mut().zip(points) {
                let best = nearest_centroid(point, &centroids);
                if *a != best {
                    *a = best;
                    changed = true;
                }
            }
            if !changed {
                tracing::debug!("k-means assignments stable at iteration {iteration}");
                break;
            }

            let mut sums = vec![vec![0.0f64; dim]; k];
            let mut counts = vec![0usize; k];
            for (&cluster, point) in assignments.iter().zip(points) {
                counts[cluster] += 1;
                for (s, &v) in sums[cluster].iter_mut().zip(point) {
                    *s += v;
                }
            }

            let mut max_movement = 0.0f64;
            for (j, (sum, count)) in sums.into_iter().zip(counts).enumerate() {
                // Empty clusters keep their previous centroid.
                if count == 0 {
                    continue;
                }
                let updated: Vec<f64> = sum.into_iter().map(|s| s / count as f64).collect();
                max_movement = max_movement.max(squared_distance(&updated, &centroids[j]).sqrt());
                centroids[j] = updated;
            }

            if max_movement < self.config.tol {
                tracing::debug!("k-means converged at iteration {iteration}");
                break;
            }
        }
        Ok(centroids)
    }
}

fn nearest_centroid(point: &[f64], centroids: &[Vec<f64>]) -> usize {
    let neg: Vec<f64> = centroids
        .iter()
        .map(|c| -squared_distance(point, c))
        .collect();
    argmax(&neg).0
}

impl ClusteringStrategy for SoftKMeans {
    fn name(&self) -> &'static str {
        "soft-kmeans"
    }

    fn fit_predict(&self, features: &[Vec<f64>], num_cluster: usize) -> Result<ClusterAssignment> {
        let centroids = self.fit(features, num_cluster)?;
        let mut labels = Vec::with_capacity(features.len());
        let mut confidence = Vec::with_capacity(features.len());

        for point in features {
            let logits: Vec<f64> = centroids
                .iter()
                .map(|c| -self.config.stiffness * squared_distance(point, c))
                .collect();
            let (best, max_logit) = argmax(&logits);
            let norm: f64 = logits.iter().map(|l| (l - max_logit).exp()).sum();
            labels.push(best);
            confidence.push((1.0 / norm) as f32);
        }
        ClusterAssignment::new(labels, confidence, num_cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReweightError;

    fn two_groups() -> Vec<Vec<f64>> {
        let mut points = Vec::new();
        for i in 0..6 {
            points.push(vec![0.0 + i as f64 * 0.01, 0.0]);
        }
        for i in 0..4 {
            points.push(vec![10.0 + i as f64 * 0.01, 10.0]);
        }
        points
    }

    #[test]
    fn test_plus_plus_picks_distinct_groups() {
        let points = two_groups();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let centers = kmeans_plus_plus(&points, 2, &mut rng);
        assert_eq!(centers.len(), 2);
        assert!((centers[0][0] - centers[1][0]).abs() > 5.0);
    }

    #[test]
    fn test_plus_plus_on_identical_points() {
        let points = vec![vec![1.0, 1.0]; 4];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(kmeans_plus_plus(&points, 3, &mut rng).len(), 3);
    }

    #[test]
    fn test_soft_kmeans_separates_groups() {
        let points = two_groups();
        let strategy = SoftKMeans::new(SoftKMeansConfig::default(), 7);
        let assignment = strategy.fit_predict(&points, 2).unwrap();

        let mut sizes = assignment.cluster_sizes();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![4, 6]);
        assert!(assignment.confidence().iter().all(|&c| c > 0.99));
    }

    #[test]
    fn test_soft_kmeans_insufficient_data() {
        let strategy = SoftKMeans::new(SoftKMeansConfig::default(), 0);
        assert!(matches!(
            strategy.fit_predict(&[vec![1.0]], 3),
            Err(ReweightError::InsufficientData { .. })
        ));
    }
}
