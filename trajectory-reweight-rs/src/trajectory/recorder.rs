//! Trajectory recording.
//!
//! A recording pass runs the model over the whole dataset in index order,
//! detached from the autograd graph, and turns every output row into a signal
//! vector of the configured [`SignalKind`].

use candle_core::{DType, D};

use super::TrajectoryStore;
use crate::config::{ReweightConfig, SignalKind};
use crate::data::LabeledDataset;
use crate::error::{ReweightError, Result};
use crate::model::Classifier;

// Keeps -ln(p) finite for saturated outputs.
const MIN_PROBABILITY: f32 = 1e-12;

/// Records one signal vector per example per pass.
#[derive(Debug, Clone)]
pub struct TrajectoryRecorder {
    signal: SignalKind,
    eval_batch_size: usize,
    store: TrajectoryStore,
}

impl TrajectoryRecorder {
    /// Create a recorder with an empty store.
    #[must_use]
    pub fn new(signal: SignalKind, eval_batch_size: usize) -> Self {
        Self {
            signal,
            eval_batch_size: eval_batch_size.max(1),
            store: TrajectoryStore::new(),
        }
    }

    /// Create a recorder from the reweight configuration.
    #[must_use]
    pub fn from_config(config: &ReweightConfig) -> Self {
        Self::new(config.signal, config.eval_batch_size)
    }

    /// Signal kind recorded by this recorder.
    #[must_use]
    pub fn signal(&self) -> SignalKind {
        self.signal
    }

    /// Number of completed passes.
    #[must_use]
    pub fn passes(&self) -> usize {
        self.store.passes()
    }

    /// Recorded trajectories.
    #[must_use]
    pub fn store(&self) -> &TrajectoryStore {
        &self.store
    }

    /// Drop all recorded trajectories.
    pub fn clear(&mut self) {
        self.store.clear();
    }

    /// Append one signal vector per example.
    ///
    /// Fails with [`ReweightError::Consistency`] if the dataset size differs
    /// from the first pass; in that case nothing is appended.
    pub fn record<M, S>(&mut self, model: &M, dataset: &S) -> Result<()>
    where
        M: Classifier + ?Sized,
        S: LabeledDataset + ?Sized,
    {
        let n = dataset.len();
        if self.store.passes() > 0 && n != self.store.num_examples() {
            return Err(ReweightError::Consistency(format!(
                "dataset has {n} examples, trajectories track {}",
                self.store.num_examples()
            )));
        }
        if n == 0 {
            return Err(ReweightError::EmptyInput(
                "cannot record trajectories of an empty dataset".to_string(),
            ));
        }

        let indices: Vec<usize> = (0..n).collect();
        let mut signals = Vec::with_capacity(n);
        for chunk in indices.chunks(self.eval_batch_size) {
            let (inputs, labels) = dataset.gather(chunk)?;
            let logits = model.forward(&inputs)?.detach().to_dtype(DType::F32)?;
            let probs = candle_nn::ops::softmax(&logits, D::Minus1)?.to_vec2::<f32>()?;
            for (row, label) in probs.iter().zip(labels) {
                signals.push(self.signal_for(row, label as usize)?);
            }
        }

        self.store.append_pass(signals)?;
        tracing::debug!(
            passes = self.store.passes(),
            examples = n,
            signal = ?self.signal,
            "recorded trajectory pass"
        );
        Ok(())
    }

    fn signal_for(&self, probs: &[f32], label: usize) -> Result<Vec<f32>> {
        let Some(&p_true) = probs.get(label) else {
            return Err(ReweightError::Consistency(format!(
                "label {label} outside model output of {} classes",
                probs.len()
            )));
        };
        Ok(match self.signal {
            SignalKind::Probabilities => probs.to_vec(),
            SignalKind::ConfidenceMargin => {
                let best_other = probs
                    .iter()
                    .enumerate()
                    .filter(|(c, _)| *c != label)
                    .map(|(_, &p)| p)
                    .fold(0.0f32, f32::max);
                vec![p_true, p_true - best_other]
            }
            SignalKind::TrueLabelLoss => vec![-p_true.max(MIN_PROBABILITY).ln()],
        })
    }
}
