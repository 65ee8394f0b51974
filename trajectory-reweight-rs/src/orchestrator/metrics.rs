//! Run metrics and the JSON-lines comparison report.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Regime, RunPhase};
use crate::config::ExperimentConfig;
use crate::error::Result;
use crate::reweight::WeightSummary;

/// Unweighted loss and accuracy over one dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    /// Mean negative log-likelihood.
    pub loss: f32,
    /// Correct predictions in percent.
    pub accuracy: f32,
    /// Number of evaluated examples.
    pub examples: usize,
}

/// Mean weight of label-flipped versus untouched examples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseDiagnostics {
    /// Mean weight over flipped examples.
    pub noisy_mean_weight: f32,
    /// Mean weight over the remaining examples.
    pub clean_mean_weight: f32,
}

impl NoiseDiagnostics {
    /// Compare weights of the `noisy` indices against everything else.
    ///
    /// `None` when either group is empty.
    #[must_use]
    pub fn from_weights(weights: &[f32], noisy: &[usize]) -> Option<Self> {
        let mut is_noisy = vec![false; weights.len()];
        for &i in noisy {
            if let Some(flag) = is_noisy.get_mut(i) {
                *flag = true;
            }
        }
        let (mut noisy_sum, mut noisy_count) = (0.0f32, 0usize);
        let (mut clean_sum, mut clean_count) = (0.0f32, 0usize);
        for (&w, &flag) in weights.iter().zip(&is_noisy) {
            if flag {
                noisy_sum += w;
                noisy_count += 1;
            } else {
                clean_sum += w;
                clean_count += 1;
            }
        }
        if noisy_count == 0 || clean_count == 0 {
            return None;
        }
        Some(Self {
            noisy_mean_weight: noisy_sum / noisy_count as f32,
            clean_mean_weight: clean_sum / clean_count as f32,
        })
    }
}

/// Metrics recorded after one epoch of one regime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochRecord {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Phase the epoch finished in.
    pub phase: RunPhase,
    /// Mean training batch loss as optimized.
    pub batch_loss: f32,
    /// Training set metrics.
    pub train: EvalMetrics,
    /// Validation set metrics.
    pub valid: EvalMetrics,
    /// Test set metrics.
    pub test: EvalMetrics,
    /// Cluster sizes when the epoch reclustered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_sizes: Option<Vec<usize>>,
    /// Installed weights when the epoch reclustered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weights: Option<WeightSummary>,
    /// Noisy versus clean mean weight.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise: Option<NoiseDiagnostics>,
}

/// Every epoch of one regime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeHistory {
    /// Which regime was trained.
    pub regime: Regime,
    /// Epoch records in order.
    pub epochs: Vec<EpochRecord>,
}

impl RegimeHistory {
    /// Empty history.
    #[must_use]
    pub fn new(regime: Regime) -> Self {
        Self {
            regime,
            epochs: Vec::new(),
        }
    }

    /// Last recorded epoch.
    #[must_use]
    pub fn last(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }
}

/// One standard-vs-reweight comparison run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    /// Configuration the run used.
    pub config: ExperimentConfig,
    /// Uniform-weight baseline.
    pub standard: RegimeHistory,
    /// Trajectory reweighting.
    pub reweight: RegimeHistory,
    /// Number of training labels flipped.
    pub noisy_examples: usize,
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
}

impl ComparisonReport {
    /// Append the report as one JSON line, creating the file if needed.
    pub fn append_jsonl<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}
