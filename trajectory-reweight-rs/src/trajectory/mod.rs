//! Per-example signal trajectories.
//!
//! A [`TrajectoryStore`] holds one [`Trajectory`] per dataset index. Every
//! recording pass appends exactly one signal vector to every trajectory, so
//! after `p` passes each trajectory has length `p` and all signal vectors
//! share one dimension. Passes that would break either property are rejected
//! before anything is appended.

mod recorder;

use serde::{Deserialize, Serialize};

use crate::config::FeatureMode;
use crate::error::{ReweightError, Result};

pub use recorder::TrajectoryRecorder;

/// Signal history of one example, oldest pass first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    steps: Vec<Vec<f32>>,
}

impl Trajectory {
    /// Number of recorded passes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether nothing has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// All recorded signal vectors.
    #[must_use]
    pub fn steps(&self) -> &[Vec<f32>] {
        &self.steps
    }

    /// Most recent signal vector.
    #[must_use]
    pub fn latest(&self) -> Option<&[f32]> {
        self.steps.last().map(Vec::as_slice)
    }

    /// Flatten into one clustering feature vector.
    #[must_use]
    pub fn features(&self, mode: FeatureMode) -> Vec<f64> {
        match mode {
            FeatureMode::Concatenate => self.concat_from(0),
            FeatureMode::Window(n) => self.concat_from(self.steps.len().saturating_sub(n)),
            FeatureMode::Mean => {
                let dim = self.steps.first().map_or(0, Vec::len);
                let mut mean = vec![0.0f64; dim];
                for step in &self.steps {
                    for (m, &v) in mean.iter_mut().zip(step) {
                        *m += f64::from(v);
                    }
                }
                let passes = self.steps.len().max(1) as f64;
                mean.iter_mut().for_each(|m| *m /= passes);
                mean
            }
        }
    }

    fn concat_from(&self, start: usize) -> Vec<f64> {
        self.steps[start..]
            .iter()
            .flat_map(|step| step.iter().map(|&v| f64::from(v)))
            .collect()
    }
}

/// Trajectories for every example of one run.
#[derive(Debug, Clone, Default)]
pub struct TrajectoryStore {
    trajectories: Vec<Trajectory>,
    signal_dim: Option<usize>,
    passes: usize,
}

impl TrajectoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed recording passes.
    #[must_use]
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Number of tracked examples (zero before the first pass).
    #[must_use]
    pub fn num_examples(&self) -> usize {
        self.trajectories.len()
    }

    /// Signal dimension fixed by the first pass.
    #[must_use]
    pub fn signal_dim(&self) -> Option<usize> {
        self.signal_dim
    }

    /// Trajectory of one example.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Trajectory> {
        self.trajectories.get(index)
    }

    /// Trajectories in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Trajectory> {
        self.trajectories.iter()
    }

    /// Append one signal vector per example, in index order.
    pub fn append_pass(&mut self, signals: Vec<Vec<f32>>) -> Result<()> {
        if signals.is_empty() {
            return Err(ReweightError::EmptyInput(
                "recording pass produced no signals".to_string(),
            ));
        }
        if self.passes > 0 && signals.len() != self.trajectories.len() {
            return Err(ReweightError::Consistency(format!(
                "dataset size changed from {} to {} between recording passes",
                self.trajectories.len(),
                signals.len()
            )));
        }
        let dim = self.signal_dim.unwrap_or(signals[0].len());
        if dim == 0 {
            return Err(ReweightError::EmptyInput(
                "signal vectors must not be empty".to_string(),
            ));
        }
        if let Some((i, s)) = signals.iter().enumerate().find(|(_, s)| s.len() != dim) {
            return Err(ReweightError::Consistency(format!(
                "signal for example {i} has dimension {}, expected {dim}",
                s.len()
            )));
        }

        if self.passes == 0 {
            self.trajectories = vec![Trajectory::default(); signals.len()];
            self.signal_dim = Some(dim);
        }
        for (trajectory, signal) in self.trajectories.iter_mut().zip(signals) {
            trajectory.steps.push(signal);
        }
        self.passes += 1;
        Ok(())
    }

    /// Feature vectors for every example, in index order.
    pub fn features(&self, mode: FeatureMode) -> Result<Vec<Vec<f64>>> {
        if self.passes == 0 {
            return Err(ReweightError::EmptyInput(
                "no trajectories recorded yet".to_string(),
            ));
        }
        Ok(self.trajectories.iter().map(|t| t.features(mode)).collect())
    }

    /// Drop all trajectories, e.g. at the end of a run.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(passes: &[Vec<Vec<f32>>]) -> TrajectoryStore {
        let mut store = TrajectoryStore::new();
        for pass in passes {
            store.append_pass(pass.clone()).unwrap();
        }
        store
    }

    #[test]
    fn test_every_trajectory_grows_per_pass() {
        let store = store_with(&[
            vec![vec![0.1, 0.9], vec![0.8, 0.2], vec![0.5, 0.5]],
            vec![vec![0.2, 0.8], vec![0.7, 0.3], vec![0.4, 0.6]],
        ]);
        assert_eq!(store.passes(), 2);
        assert_eq!(store.num_examples(), 3);
        assert!(store.iter().all(|t| t.len() == 2));
        assert_eq!(store.get(1).unwrap().latest(), Some(&[0.7, 0.3][..]));
    }

    #[test]
    fn test_size_change_is_consistency_error() {
        let mut store = store_with(&[vec![vec![1.0], vec![2.0]]]);
        let err = store.append_pass(vec![vec![1.0]]).unwrap_err();
        assert!(matches!(err, ReweightError::Consistency(_)));
        assert_eq!(store.passes(), 1);
        assert!(store.iter().all(|t| t.len() == 1));
    }

    #[test]
    fn test_signal_dim_change_is_consistency_error() {
        let mut store = store_with(&[vec![vec![1.0, 2.0], vec![3.0, 4.0]]]);
        assert!(matches!(
            store.append_pass(vec![vec![1.0], vec![2.0]]),
            Err(ReweightError::Consistency(_))
        ));
        let mut fresh = TrajectoryStore::new();
        assert!(matches!(
            fresh.append_pass(vec![vec![1.0, 2.0], vec![3.0]]),
            Err(ReweightError::Consistency(_))
        ));
        assert_eq!(fresh.passes(), 0);
    }

    #[test]
    fn test_feature_modes() {
        let store = store_with(&[
            vec![vec![1.0, 2.0]],
            vec![vec![3.0, 4.0]],
            vec![vec![5.0, 6.0]],
        ]);
        let t = store.get(0).unwrap();
        assert_eq!(
            t.features(FeatureMode::Concatenate),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
        );
        assert_eq!(t.features(FeatureMode::Window(2)), vec![3.0, 4.0, 5.0, 6.0]);
        assert_eq!(t.features(FeatureMode::Window(10)).len(), 6);
        assert_eq!(t.features(FeatureMode::Mean), vec![3.0, 4.0]);
    }

    #[test]
    fn test_features_before_first_pass() {
        let store = TrajectoryStore::new();
        assert!(store.features(FeatureMode::Mean).is_err());
    }

    #[test]
    fn test_clear_resets_dimension() {
        let mut store = store_with(&[vec![vec![1.0, 2.0]]]);
        store.clear();
        assert_eq!(store.passes(), 0);
        store.append_pass(vec![vec![1.0], vec![2.0]]).unwrap();
        assert_eq!(store.signal_dim(), Some(1));
    }
}
