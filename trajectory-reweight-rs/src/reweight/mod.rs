//! Cluster-based example reweighting.
//!
//! A [`ReweightPolicy`] turns a [`ClusterAssignment`] into one weight per
//! example. [`Reweighter`] wraps a policy, repairs any invalid output and
//! installs the result on a [`WeightedDataSource`].
//!
//! # Example
//!
//! ```
//! use trajectory_reweight_rs::cluster::ClusterAssignment;
//! use trajectory_reweight_rs::config::PolicyConfig;
//! use trajectory_reweight_rs::reweight::Reweighter;
//!
//! let assignment =
//!     ClusterAssignment::new(vec![0, 0, 0, 0, 1], vec![1.0; 5], 2).unwrap();
//! let weights = Reweighter::from_config(&PolicyConfig::default())
//!     .compute_weights(&assignment, 10.0)
//!     .unwrap();
//!
//! assert!(weights[4] < weights[0]);
//! ```

mod confidence;

use serde::{Deserialize, Serialize};

use crate::cluster::ClusterAssignment;
use crate::config::PolicyConfig;
use crate::data::{LabeledDataset, WeightedDataSource};
use crate::error::{ReweightError, Result};

pub use confidence::ConfidencePolicy;

/// Examples whose weight falls below this fraction of the mean count as
/// downweighted in a [`WeightSummary`].
pub const DOWNWEIGHT_FRACTION: f32 = 0.5;

/// Maps a cluster assignment to per-example weights.
pub trait ReweightPolicy {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// One weight per example, in assignment order.
    fn compute_weights(&self, assignment: &ClusterAssignment, scale: f32) -> Result<Vec<f32>>;
}

/// Every example keeps weight 1.0.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformPolicy;

impl ReweightPolicy for UniformPolicy {
    fn name(&self) -> &'static str {
        "uniform"
    }

    fn compute_weights(&self, assignment: &ClusterAssignment, _scale: f32) -> Result<Vec<f32>> {
        Ok(vec![1.0; assignment.len()])
    }
}

/// Statistics of one installed weight vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightSummary {
    /// Smallest weight.
    pub min: f32,
    /// Largest weight.
    pub max: f32,
    /// Mean weight.
    pub mean: f32,
    /// Examples below [`DOWNWEIGHT_FRACTION`] of the mean.
    pub downweighted: usize,
    /// Values replaced by zero because they were negative or non-finite.
    pub clamped: usize,
}

impl WeightSummary {
    /// Summarize a weight vector.
    #[must_use]
    pub fn from_weights(weights: &[f32], clamped: usize) -> Self {
        if weights.is_empty() {
            return Self {
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                downweighted: 0,
                clamped,
            };
        }
        let min = weights.iter().copied().fold(f32::INFINITY, f32::min);
        let max = weights.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mean = weights.iter().sum::<f32>() / weights.len() as f32;
        let cutoff = mean * DOWNWEIGHT_FRACTION;
        Self {
            min,
            max,
            mean,
            downweighted: weights.iter().filter(|&&w| w < cutoff).count(),
            clamped,
        }
    }
}

/// Replace negative and non-finite weights with zero; returns how many
/// were replaced.
pub fn sanitize_weights(weights: &mut [f32]) -> usize {
    let mut clamped = 0;
    for (i, w) in weights.iter_mut().enumerate() {
        if !w.is_finite() || *w < 0.0 {
            tracing::warn!(index = i, value = *w, "clamping invalid weight to 0");
            *w = 0.0;
            clamped += 1;
        }
    }
    clamped
}

/// Rescale so the mean weight is 1.0.
///
/// A vector summing to zero becomes uniform.
pub fn normalize_mean(weights: &mut [f32]) {
    if weights.is_empty() {
        return;
    }
    let sum: f32 = weights.iter().sum();
    if !(sum > 0.0 && sum.is_finite()) {
        tracing::warn!("weights sum to {sum}, falling back to uniform");
        weights.fill(1.0);
        return;
    }
    let factor = weights.len() as f32 / sum;
    weights.iter_mut().for_each(|w| *w *= factor);
}

/// Applies a [`ReweightPolicy`] to a weighted data source.
pub struct Reweighter {
    policy: Box<dyn ReweightPolicy>,
}

impl Reweighter {
    /// Wrap any policy.
    #[must_use]
    pub fn new(policy: Box<dyn ReweightPolicy>) -> Self {
        Self { policy }
    }

    /// The default confidence policy.
    #[must_use]
    pub fn from_config(config: &PolicyConfig) -> Self {
        Self::new(Box::new(ConfidencePolicy::new(config.clone())))
    }

    /// A reweighter that always yields uniform weights.
    #[must_use]
    pub fn uniform() -> Self {
        Self::new(Box::new(UniformPolicy))
    }

    /// Name of the wrapped policy.
    #[must_use]
    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Compute repaired weights without installing them.
    pub fn compute_weights(&self, assignment: &ClusterAssignment, scale: f32) -> Result<Vec<f32>> {
        Ok(self.compute_with_count(assignment, scale)?.0)
    }

    fn compute_with_count(
        &self,
        assignment: &ClusterAssignment,
        scale: f32,
    ) -> Result<(Vec<f32>, usize)> {
        let mut weights = self.policy.compute_weights(assignment, scale)?;
        if weights.len() != assignment.len() {
            return Err(ReweightError::DimensionMismatch {
                expected: assignment.len(),
                actual: weights.len(),
            });
        }
        let clamped = sanitize_weights(&mut weights);
        if weights.iter().all(|&w| w == 0.0) {
            tracing::warn!(policy = self.policy.name(), "all weights are zero, using uniform");
            weights.fill(1.0);
        }
        Ok((weights, clamped))
    }

    /// Compute weights and install them on `source`.
    pub fn apply<D: LabeledDataset>(
        &self,
        assignment: &ClusterAssignment,
        scale: f32,
        source: &mut WeightedDataSource<D>,
    ) -> Result<WeightSummary> {
        if assignment.len() != source.len() {
            return Err(ReweightError::Consistency(format!(
                "assignment covers {} examples, data source holds {}",
                assignment.len(),
                source.len()
            )));
        }
        let (weights, clamped) = self.compute_with_count(assignment, scale)?;
        let summary = WeightSummary::from_weights(&weights, clamped);
        source.set_weights(weights)?;

        tracing::info!(
            policy = self.policy.name(),
            min = summary.min,
            max = summary.max,
            downweighted = summary.downweighted,
            "installed new example weights"
        );
        Ok(summary)
    }
}
