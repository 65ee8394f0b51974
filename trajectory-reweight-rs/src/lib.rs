//! # trajectory-reweight-rs
//!
//! Sample reweighting for classifier training on noisy labels, driven by the
//! trajectories of per-example model outputs.
//!
//! Examples whose labels are wrong tend to move through training differently
//! from clean ones. After a burn-in period this crate records one signal
//! vector per example per epoch, clusters the resulting trajectories with a
//! Gaussian mixture, and downweights examples that land in small clusters or
//! sit near a cluster boundary.
//!
//! ## Key Properties
//!
//! - **Deterministic**: same seeds and data give the same clusters and weights
//! - **Pluggable**: clustering and weight policies sit behind traits
//! - **Non-invasive**: the core reads model outputs and never touches parameters
//! - **Reduces cleanly**: with uniform weights the reweight regime computes
//!   bit-identical losses to standard training
//!
//! ## Quick Start
//!
//! ```ignore
//! use candle_core::Device;
//! use candle_nn::{Optimizer, SGD};
//! use trajectory_reweight_rs::{
//!     MlpClassifier, Regime, ReweightConfig, TrainingOrchestrator, WeightedDataSource,
//! };
//!
//! let config = ReweightConfig::default().with_burn_in(2);
//! let model = MlpClassifier::new(32, 64, 10, 1, &Device::Cpu)?;
//! let optimizer = SGD::new(model.vars(), 0.01)?;
//! let source = WeightedDataSource::new(train_set, 1);
//!
//! let mut orchestrator =
//!     TrainingOrchestrator::new(model, optimizer, source, Regime::Reweight, &config, 64)?;
//! for _ in 0..10 {
//!     let outcome = orchestrator.train_epoch()?;
//!     println!("epoch {} finished in {}", outcome.epoch, outcome.phase.name());
//! }
//! # Ok::<(), trajectory_reweight_rs::ReweightError>(())
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration types and TOML loading
//! - [`error`]: Error types and result aliases
//! - [`data`]: Labeled datasets, weighted batching, synthetic data
//! - [`trajectory`]: Per-example signal recording
//! - [`cluster`]: Gaussian mixture and soft k-means clustering
//! - [`reweight`]: Cluster-to-weight policies
//! - [`loss`]: Weighted negative log-likelihood
//! - [`model`]: Classifier trait and reference MLP
//! - [`orchestrator`]: Epoch loop, evaluation and regime comparison
//!
//! ## Weight Policy
//!
//! The default [`ConfidencePolicy`] maps cluster confidence `c` to
//!
//! ```text
//! base(c) = floor + (1 - floor) * c^exponent
//! w       = base(c)                 trusted cluster
//! w       = base(c) / (1 + scale)   outlier cluster
//! ```
//!
//! then rescales the weights to mean 1.0.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod cluster;
pub mod config;
pub mod data;
pub mod error;
pub mod loss;
pub mod model;
pub mod orchestrator;
pub mod reweight;
pub mod trajectory;

// Re-export main types at crate root for convenience
pub use cluster::{
    ClusterAssignment, ClusteringStrategy, GaussianMixture, SoftKMeans, TrajectoryClusterer,
};
pub use config::{
    ClusterMethod, ExperimentConfig, FeatureMode, GmmConfig, PolicyConfig, ReweightConfig,
    SignalKind, SoftKMeansConfig, SyntheticConfig,
};
pub use data::{InMemoryDataset, LabeledDataset, WeightedBatch, WeightedDataSource};
pub use error::{ReweightError, Result};
pub use loss::LossWeights;
pub use model::{Classifier, MlpClassifier};
pub use orchestrator::{
    evaluate, run_comparison, ComparisonReport, EpochOutcome, EvalMetrics, Regime, RunPhase,
    TrainingOrchestrator,
};
pub use reweight::{ConfidencePolicy, ReweightPolicy, Reweighter, UniformPolicy, WeightSummary};
pub use trajectory::{Trajectory, TrajectoryRecorder, TrajectoryStore};
