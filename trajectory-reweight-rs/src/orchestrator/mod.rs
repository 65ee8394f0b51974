//! Epoch-level training orchestration.
//!
//! [`TrainingOrchestrator`] trains one model under one [`Regime`]. In the
//! reweight regime every epoch moves through the following phases:
//!
//! ```text
//!  epoch <= burn_in        epoch > burn_in
//! ┌────────┐            ┌──────────┐  record   ┌───────────┐
//! │ WARMUP │───────────▶│ TRACKING │──────────▶│ RECLUSTER │
//! └────────┘            └──────────┘           └───────────┘
//!  uniform weights            ▲   cluster + reweight  │
//!                             └───────────────────────┘
//!                                   next epoch
//! ```
//!
//! The standard regime never leaves WARMUP. Recording, clustering and
//! reweighting only happen between epochs, never while batches are in
//! flight.
//!
//! Recoverable failures of the recluster step are absorbed:
//! [`ReweightError::InsufficientData`] keeps the current weights and
//! [`ReweightError::NumericalInstability`] resets to uniform weights. Every
//! other error ends the run.

mod metrics;

use candle_core::{Device, Tensor, D};
use candle_nn::{Optimizer, SGD};
use serde::{Deserialize, Serialize};

use crate::cluster::{ClusterAssignment, TrajectoryClusterer};
use crate::config::{ExperimentConfig, ReweightConfig};
use crate::data::{
    inject_label_noise, random_split, BlobGenerator, InMemoryDataset, LabeledDataset,
    WeightedDataSource,
};
use crate::error::{ReweightError, Result};
use crate::loss::{summed_nll, weighted_nll_loss};
use crate::model::{Classifier, MlpClassifier};
use crate::reweight::{Reweighter, WeightSummary};
use crate::trajectory::TrajectoryRecorder;

pub use metrics::{ComparisonReport, EpochRecord, EvalMetrics, NoiseDiagnostics, RegimeHistory};

/// Training regime under comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    /// Uniform weights for the whole run.
    Standard,
    /// Trajectory clustering and reweighting after burn-in.
    Reweight,
}

impl Regime {
    /// Returns the regime name as a string.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Regime::Standard => "standard",
            Regime::Reweight => "reweight",
        }
    }
}

/// Per-epoch phase of the reweight regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Burn-in: uniform weights, nothing recorded.
    Warmup,
    /// Training after burn-in; a recording pass follows.
    Tracking,
    /// Trajectories were clustered and new weights installed.
    Recluster,
}

impl RunPhase {
    /// Phase in which training of `epoch` (1-based) starts.
    #[must_use]
    pub fn for_epoch(epoch: usize, burn_in: usize) -> Self {
        if epoch <= burn_in {
            RunPhase::Warmup
        } else {
            RunPhase::Tracking
        }
    }

    /// Returns the phase name as a string.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            RunPhase::Warmup => "warmup",
            RunPhase::Tracking => "tracking",
            RunPhase::Recluster => "recluster",
        }
    }
}

/// Result of one [`TrainingOrchestrator::train_epoch`] call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochOutcome {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Phase the epoch finished in.
    pub phase: RunPhase,
    /// Mean of the optimized batch losses.
    pub batch_loss: f32,
    /// Number of optimizer steps taken.
    pub batches: usize,
    /// Cluster sizes if the epoch reclustered.
    pub cluster_sizes: Option<Vec<usize>>,
    /// Installed weights if the epoch reclustered.
    pub weights: Option<WeightSummary>,
}

/// Drives epochs of one regime over a weighted data source.
pub struct TrainingOrchestrator<M, O, D> {
    model: M,
    optimizer: O,
    source: WeightedDataSource<D>,
    recorder: TrajectoryRecorder,
    clusterer: TrajectoryClusterer,
    reweighter: Reweighter,
    regime: Regime,
    num_cluster: usize,
    burn_in: usize,
    scale: f32,
    batch_size: usize,
    log_interval: usize,
    epoch: usize,
    last_assignment: Option<ClusterAssignment>,
}

impl<M, O, D> TrainingOrchestrator<M, O, D>
where
    M: Classifier,
    O: Optimizer,
    D: LabeledDataset,
{
    /// Create an orchestrator. The reweight configuration is validated.
    pub fn new(
        model: M,
        optimizer: O,
        source: WeightedDataSource<D>,
        regime: Regime,
        config: &ReweightConfig,
        batch_size: usize,
    ) -> Result<Self> {
        config.validate()?;
        if batch_size == 0 {
            return Err(ReweightError::InvalidConfig(
                "batch_size must be > 0".to_string(),
            ));
        }
        Ok(Self {
            model,
            optimizer,
            source,
            recorder: TrajectoryRecorder::from_config(config),
            clusterer: TrajectoryClusterer::from_config(config),
            reweighter: Reweighter::from_config(&config.policy),
            regime,
            num_cluster: config.num_cluster,
            burn_in: config.burn_in,
            scale: config.scale,
            batch_size,
            log_interval: 10,
            epoch: 0,
            last_assignment: None,
        })
    }

    /// Replace the weight policy.
    #[must_use]
    pub fn with_reweighter(mut self, reweighter: Reweighter) -> Self {
        self.reweighter = reweighter;
        self
    }

    /// Replace the clusterer.
    #[must_use]
    pub fn with_clusterer(mut self, clusterer: TrajectoryClusterer) -> Self {
        self.clusterer = clusterer;
        self
    }

    /// Batches between progress log lines; 0 disables them.
    #[must_use]
    pub fn with_log_interval(mut self, log_interval: usize) -> Self {
        self.log_interval = log_interval;
        self
    }

    /// The model being trained.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// The weighted data source.
    pub fn source(&self) -> &WeightedDataSource<D> {
        &self.source
    }

    /// The trajectory recorder.
    pub fn recorder(&self) -> &TrajectoryRecorder {
        &self.recorder
    }

    /// Assignment from the most recent successful recluster.
    pub fn last_assignment(&self) -> Option<&ClusterAssignment> {
        self.last_assignment.as_ref()
    }

    /// Completed epochs.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Regime being trained.
    pub fn regime(&self) -> Regime {
        self.regime
    }

    /// Phase in which the next epoch will train.
    pub fn next_phase(&self) -> RunPhase {
        match self.regime {
            Regime::Standard => RunPhase::Warmup,
            Regime::Reweight => RunPhase::for_epoch(self.epoch + 1, self.burn_in),
        }
    }

    /// Train one epoch and, after burn-in, recluster and reweight.
    pub fn train_epoch(&mut self) -> Result<EpochOutcome> {
        let phase = self.next_phase();
        self.epoch += 1;
        let epoch = self.epoch;
        let weighted = self.regime == Regime::Reweight;

        let mut loss_sum = 0.0f32;
        let mut batches = 0usize;
        let mut seen = 0usize;
        let total = self.source.len();
        let batch_iter = self.source.get_batches(self.batch_size)?;
        let num_batches = batch_iter.num_batches();

        for (batch_idx, batch) in batch_iter.enumerate() {
            let batch = batch?;
            let logits = self.model.forward(&batch.inputs)?;
            let log_probs = candle_nn::ops::log_softmax(&logits, candle_core::D::Minus1)?;
            let weights = weighted.then(|| batch.loss_weights());
            let loss = weighted_nll_loss(&log_probs, &batch.labels, weights)?;
            self.optimizer.backward_step(&loss)?;

            let loss_value = loss.to_scalar::<f32>()?;
            loss_sum += loss_value;
            batches += 1;
            seen += batch.len();

            if self.log_interval > 0 && batch_idx % self.log_interval == 0 {
                tracing::info!(
                    "{} epoch {} [{}/{} ({:.0}%)] loss: {:.6}",
                    self.regime.name(),
                    epoch,
                    seen,
                    total,
                    100.0 * (batch_idx + 1) as f32 / num_batches as f32,
                    loss_value
                );
            }
        }

        let batch_loss = if batches > 0 {
            loss_sum / batches as f32
        } else {
            0.0
        };
        let mut outcome = EpochOutcome {
            epoch,
            phase,
            batch_loss,
            batches,
            cluster_sizes: None,
            weights: None,
        };

        if phase == RunPhase::Tracking {
            match self.recluster() {
                Ok((sizes, summary)) => {
                    outcome.phase = RunPhase::Recluster;
                    outcome.cluster_sizes = Some(sizes);
                    outcome.weights = Some(summary);
                }
                Err(e @ ReweightError::InsufficientData { .. }) => {
                    tracing::warn!(epoch, "skipping reweighting: {e}");
                }
                Err(e @ ReweightError::NumericalInstability(_)) => {
                    tracing::warn!(epoch, "clustering unstable, using uniform weights: {e}");
                    self.source.reset_weights();
                }
                Err(e) => return Err(e),
            }
        }

        tracing::debug!(
            regime = self.regime.name(),
            epoch,
            phase = outcome.phase.name(),
            batch_loss,
            "epoch finished"
        );
        Ok(outcome)
    }

    fn recluster(&mut self) -> Result<(Vec<usize>, WeightSummary)> {
        self.recorder.record(&self.model, self.source.dataset())?;
        let assignment = self
            .clusterer
            .fit_predict(self.recorder.store(), self.num_cluster)?;
        let summary = self
            .reweighter
            .apply(&assignment, self.scale, &mut self.source)?;
        let sizes = assignment.cluster_sizes();
        self.last_assignment = Some(assignment);
        Ok((sizes, summary))
    }
}

/// Unweighted mean NLL and accuracy of `model` on `dataset`.
pub fn evaluate<M, S>(model: &M, dataset: &S, batch_size: usize) -> Result<EvalMetrics>
where
    M: Classifier + ?Sized,
    S: LabeledDataset + ?Sized,
{
    let n = dataset.len();
    if n == 0 {
        return Err(ReweightError::EmptyInput(
            "cannot evaluate on an empty dataset".to_string(),
        ));
    }
    let indices: Vec<usize> = (0..n).collect();
    let mut loss_sum = 0.0f32;
    let mut correct = 0usize;

    for chunk in indices.chunks(batch_size.max(1)) {
        let (inputs, labels) = dataset.gather(chunk)?;
        let logits = model.forward(&inputs)?.detach();
        let log_probs = candle_nn::ops::log_softmax(&logits, D::Minus1)?;
        let label_tensor = Tensor::from_vec(labels.clone(), chunk.len(), dataset.device())?;
        loss_sum += summed_nll(&log_probs, &label_tensor)?;

        let predicted = logits.argmax(D::Minus1)?.to_vec1::<u32>()?;
        correct += predicted
            .iter()
            .zip(&labels)
            .filter(|(p, l)| p == l)
            .count();
    }

    Ok(EvalMetrics {
        loss: loss_sum / n as f32,
        accuracy: 100.0 * correct as f32 / n as f32,
        examples: n,
    })
}

struct Splits<'a> {
    train: &'a InMemoryDataset,
    valid: &'a InMemoryDataset,
    test: &'a InMemoryDataset,
    noisy: &'a [usize],
}

/// Train a fresh model under each regime on the same noisy synthetic data.
///
/// Both regimes start from identical parameters and shuffle with the same
/// seed, so they differ only in the weights the reweight regime installs.
pub fn run_comparison(config: &ExperimentConfig, device: &Device) -> Result<ComparisonReport> {
    config.validate()?;
    let data = &config.data;
    let generator = BlobGenerator::new(data.num_classes, data.input_dim, data.spread, config.seed)?;
    let full = generator.sample(data.train_size, config.seed, device)?;
    let test = generator.sample(data.test_size, config.seed.wrapping_add(1), device)?;
    let (train, valid) = random_split(&full, config.valid_size, config.seed)?;

    let mut labels = train.labels().to_vec();
    let noisy = inject_label_noise(&mut labels, config.noise_level, data.num_classes, config.seed)?;
    let train = train.with_labels(labels)?;
    tracing::info!(
        train = train.len(),
        valid = valid.len(),
        test = test.len(),
        noisy = noisy.len(),
        "prepared synthetic data"
    );

    let splits = Splits {
        train: &train,
        valid: &valid,
        test: &test,
        noisy: &noisy,
    };
    let standard = run_regime(Regime::Standard, config, &splits, device)?;
    let reweight = run_regime(Regime::Reweight, config, &splits, device)?;

    Ok(ComparisonReport {
        config: config.clone(),
        standard,
        reweight,
        noisy_examples: noisy.len(),
        timestamp: chrono::Utc::now(),
    })
}

fn run_regime(
    regime: Regime,
    config: &ExperimentConfig,
    splits: &Splits<'_>,
    device: &Device,
) -> Result<RegimeHistory> {
    let model = MlpClassifier::new(
        config.data.input_dim,
        config.hidden_dim,
        config.data.num_classes,
        config.seed,
        device,
    )?;
    let optimizer = SGD::new(model.vars(), config.lr)?;
    let source = WeightedDataSource::new(splits.train.clone(), config.seed);
    let mut orchestrator = TrainingOrchestrator::new(
        model,
        optimizer,
        source,
        regime,
        &config.reweight,
        config.batch_size,
    )?
    .with_log_interval(config.log_interval);

    let eval_batch = config.reweight.eval_batch_size;
    let mut history = RegimeHistory::new(regime);
    for _ in 0..config.epochs {
        let outcome = orchestrator.train_epoch()?;
        let model = orchestrator.model();
        let noise = outcome.weights.and_then(|_| {
            NoiseDiagnostics::from_weights(orchestrator.source().weights(), splits.noisy)
        });
        let record = EpochRecord {
            epoch: outcome.epoch,
            phase: outcome.phase,
            batch_loss: outcome.batch_loss,
            train: evaluate(model, splits.train, eval_batch)?,
            valid: evaluate(model, splits.valid, eval_batch)?,
            test: evaluate(model, splits.test, eval_batch)?,
            cluster_sizes: outcome.cluster_sizes,
            weights: outcome.weights,
            noise,
        };

        tracing::info!(
            "{} epoch {}: valid loss {:.4}, acc {:.2}% | test loss {:.4}, acc {:.2}%",
            regime.name(),
            record.epoch,
            record.valid.loss,
            record.valid.accuracy,
            record.test.loss,
            record.test.accuracy
        );
        if let Some(noise) = &record.noise {
            tracing::info!(
                noisy = noise.noisy_mean_weight,
                clean = noise.clean_mean_weight,
                "mean example weight"
            );
        }
        history.epochs.push(record);
    }
    Ok(history)
}
