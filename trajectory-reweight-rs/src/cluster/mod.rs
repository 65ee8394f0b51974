//! Trajectory clustering.
//!
//! [`TrajectoryClusterer`] flattens every trajectory into a feature vector and
//! hands the whole set to a [`ClusteringStrategy`]. The result is a
//! [`ClusterAssignment`]: one hard label and one confidence per example.
//!
//! Cluster ids are only meaningful within one assignment. Two fits of the
//! same data may number the same groups differently; use
//! [`ClusterAssignment::same_partition`] to compare partitions.

mod gmm;
mod kmeans;

use serde::{Deserialize, Serialize};

use crate::config::{ClusterMethod, FeatureMode, ReweightConfig};
use crate::error::{ReweightError, Result};
use crate::trajectory::TrajectoryStore;

pub use gmm::{GaussianMixture, MixtureModel};
pub use kmeans::{kmeans_plus_plus, SoftKMeans};

/// Hard cluster label and membership confidence for every example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    labels: Vec<usize>,
    confidence: Vec<f32>,
    num_cluster: usize,
}

impl ClusterAssignment {
    /// Build an assignment, clamping confidences into `[0, 1]`.
    ///
    /// Rejects labels outside `0..num_cluster` and NaN confidences.
    pub fn new(labels: Vec<usize>, confidence: Vec<f32>, num_cluster: usize) -> Result<Self> {
        if labels.len() != confidence.len() {
            return Err(ReweightError::DimensionMismatch {
                expected: labels.len(),
                actual: confidence.len(),
            });
        }
        if let Some(&bad) = labels.iter().find(|&&l| l >= num_cluster) {
            return Err(ReweightError::InvalidConfig(format!(
                "cluster label {bad} out of range for {num_cluster} clusters"
            )));
        }
        if confidence.iter().any(|c| c.is_nan()) {
            return Err(ReweightError::NumericalInstability(
                "cluster confidence is NaN".to_string(),
            ));
        }
        let confidence = confidence.into_iter().map(|c| c.clamp(0.0, 1.0)).collect();
        Ok(Self {
            labels,
            confidence,
            num_cluster,
        })
    }

    /// Number of examples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the assignment covers no examples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of clusters, including empty ones.
    #[must_use]
    pub fn num_cluster(&self) -> usize {
        self.num_cluster
    }

    /// Cluster label per example.
    #[must_use]
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Confidence per example.
    #[must_use]
    pub fn confidence(&self) -> &[f32] {
        &self.confidence
    }

    /// Number of examples per cluster id.
    #[must_use]
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.num_cluster];
        for &label in &self.labels {
            sizes[label] += 1;
        }
        sizes
    }

    /// Indices of the examples in one cluster.
    #[must_use]
    pub fn members(&self, cluster: usize) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|&(_, &l)| l == cluster)
            .map(|(i, _)| i)
            .collect()
    }

    /// Whether both assignments group the examples identically, ignoring
    /// how the clusters are numbered.
    #[must_use]
    pub fn same_partition(&self, other: &Self) -> bool {
        if self.labels.len() != other.labels.len() {
            return false;
        }
        let mut forward = vec![None; self.num_cluster];
        let mut backward = vec![None; other.num_cluster];
        for (&a, &b) in self.labels.iter().zip(&other.labels) {
            match (forward[a], backward[b]) {
                (None, None) => {
                    forward[a] = Some(b);
                    backward[b] = Some(a);
                }
                (Some(fb), Some(ba)) if fb == b && ba == a => {}
                _ => return false,
            }
        }
        true
    }
}

/// An unsupervised soft-clustering algorithm.
pub trait ClusteringStrategy {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Fit `num_cluster` groups over all rows of `features` jointly.
    fn fit_predict(&self, features: &[Vec<f64>], num_cluster: usize) -> Result<ClusterAssignment>;
}

/// Common input checks; returns the feature dimension.
pub(crate) fn check_features(features: &[Vec<f64>], num_cluster: usize) -> Result<usize> {
    if num_cluster < 2 {
        return Err(ReweightError::InvalidConfig(format!(
            "num_cluster must be >= 2, got {num_cluster}"
        )));
    }
    if features.len() < num_cluster {
        return Err(ReweightError::InsufficientData {
            examples: features.len(),
            clusters: num_cluster,
        });
    }
    let dim = features[0].len();
    if dim == 0 {
        return Err(ReweightError::EmptyInput(
            "feature vectors are empty".to_string(),
        ));
    }
    if let Some(row) = features.iter().find(|row| row.len() != dim) {
        return Err(ReweightError::DimensionMismatch {
            expected: dim,
            actual: row.len(),
        });
    }
    if features.iter().flatten().any(|v| !v.is_finite()) {
        return Err(ReweightError::NumericalInstability(
            "feature vectors contain non-finite values".to_string(),
        ));
    }
    Ok(dim)
}

pub(crate) fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Index and value of the largest entry.
pub(crate) fn argmax(values: &[f64]) -> (usize, f64) {
    values
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, v)| {
            if v > best.1 {
                (i, v)
            } else {
                best
            }
        })
}

/// Clusters recorded trajectories with a pluggable strategy.
pub struct TrajectoryClusterer {
    strategy: Box<dyn ClusteringStrategy>,
    feature_mode: FeatureMode,
}

impl TrajectoryClusterer {
    /// Create a clusterer around any strategy.
    #[must_use]
    pub fn new(strategy: Box<dyn ClusteringStrategy>, feature_mode: FeatureMode) -> Self {
        Self {
            strategy,
            feature_mode,
        }
    }

    /// Create the clusterer selected by the reweight configuration.
    #[must_use]
    pub fn from_config(config: &ReweightConfig) -> Self {
        let strategy: Box<dyn ClusteringStrategy> = match config.method {
            ClusterMethod::GaussianMixture => {
                Box::new(GaussianMixture::new(config.gmm.clone(), config.seed))
            }
            ClusterMethod::SoftKMeans => {
                Box::new(SoftKMeans::new(config.kmeans.clone(), config.seed))
            }
        };
        Self::new(strategy, config.feature_mode)
    }

    /// Name of the underlying strategy.
    #[must_use]
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Cluster every tracked example.
    pub fn fit_predict(
        &self,
        store: &TrajectoryStore,
        num_cluster: usize,
    ) -> Result<ClusterAssignment> {
        if store.num_examples() < num_cluster {
            return Err(ReweightError::InsufficientData {
                examples: store.num_examples(),
                clusters: num_cluster,
            });
        }
        let features = store.features(self.feature_mode)?;
        let assignment = self.strategy.fit_predict(&features, num_cluster)?;
        tracing::debug!(
            strategy = self.strategy.name(),
            passes = store.passes(),
            sizes = ?assignment.cluster_sizes(),
            "clustered trajectories"
        );
        Ok(assignment)
    }
}
