//! Configuration types for trajectory reweighting.
//!
//! - [`ReweightConfig`]: recording, clustering and weight policy settings
//! - [`GmmConfig`] / [`SoftKMeansConfig`]: clustering strategy settings
//! - [`PolicyConfig`]: confidence-to-weight transform settings
//! - [`ExperimentConfig`]: a full standard-vs-reweight comparison run
//!
//! All types load from TOML with per-field defaults, so a config file only
//! needs the values it changes.
//!
//! # Example
//!
//! ```
//! use trajectory_reweight_rs::config::{ReweightConfig, SignalKind};
//!
//! let config = ReweightConfig::default()
//!     .with_num_cluster(2)
//!     .with_burn_in(1)
//!     .with_signal(SignalKind::ConfidenceMargin);
//!
//! assert!(config.validate().is_ok());
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ReweightError, Result};

/// Per-example signal recorded at every tracking epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Softmax probability for every class.
    #[default]
    Probabilities,
    /// Probability of the true label and its margin over the best other class.
    ConfidenceMargin,
    /// Negative log-likelihood of the true label.
    TrueLabelLoss,
}

/// How a trajectory is flattened into one feature vector for clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureMode {
    /// All recorded passes, oldest first.
    #[default]
    Concatenate,
    /// The most recent `n` passes (fewer if not yet recorded).
    Window(usize),
    /// Per-dimension mean over all passes.
    Mean,
}

/// Clustering algorithm used by the reweight regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMethod {
    /// Diagonal-covariance Gaussian mixture fitted by EM.
    #[default]
    GaussianMixture,
    /// K-means with softmax responsibilities.
    SoftKMeans,
}

/// Gaussian mixture fitting parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GmmConfig {
    /// Maximum EM iterations per initialization.
    pub max_iter: usize,
    /// Convergence threshold on the mean log-likelihood gain.
    pub tol: f64,
    /// Non-negative value added to every variance.
    pub reg_covar: f64,
    /// Number of seeded initializations; the best log-likelihood wins.
    pub n_init: usize,
}

impl Default for GmmConfig {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tol: 1e-4,
            reg_covar: 1e-6,
            n_init: 1,
        }
    }
}

impl GmmConfig {
    /// Set the maximum EM iterations.
    #[must_use]
    pub const fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set the covariance regularization.
    #[must_use]
    pub const fn with_reg_covar(mut self, reg_covar: f64) -> Self {
        self.reg_covar = reg_covar;
        self
    }

    /// Set the number of initializations.
    #[must_use]
    pub const fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init;
        self
    }
}

/// Soft k-means parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftKMeansConfig {
    /// Maximum Lloyd iterations.
    pub max_iter: usize,
    /// Convergence threshold on centroid movement.
    pub tol: f64,
    /// Inverse temperature of the responsibility softmax.
    pub stiffness: f64,
}

impl Default for SoftKMeansConfig {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tol: 1e-4,
            stiffness: 1.0,
        }
    }
}

/// Confidence-to-weight transform parameters.
///
/// `base(c) = floor + (1 - floor) * c^exponent`; outlier clusters get
/// `base(c) / (1 + scale)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Confidence exponent, must be positive.
    pub exponent: f32,
    /// Weight at zero confidence, in `(0, 1)`.
    pub floor: f32,
    /// Share of examples a cluster needs to be trusted. The largest cluster is
    /// always trusted and the smallest populated one never is.
    pub min_trusted_share: f32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            exponent: 2.0,
            floor: 1e-3,
            min_trusted_share: 0.25,
        }
    }
}

impl PolicyConfig {
    /// Set the confidence exponent.
    #[must_use]
    pub const fn with_exponent(mut self, exponent: f32) -> Self {
        self.exponent = exponent;
        self
    }

    /// Set the trusted share threshold.
    #[must_use]
    pub const fn with_min_trusted_share(mut self, share: f32) -> Self {
        self.min_trusted_share = share;
        self
    }
}

/// Configuration for the reweight regime.
///
/// | Parameter | Default | Description |
/// |-----------|---------|-------------|
/// | `num_cluster` | 3 | Mixture components |
/// | `burn_in` | 5 | Epochs before the first recording pass |
/// | `scale` | 1e6 | Outlier suppression factor |
/// | `seed` | 1 | Clustering seed |
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReweightConfig {
    /// Number of behavior clusters, at least 2.
    pub num_cluster: usize,
    /// Epochs trained with uniform weights before tracking starts.
    pub burn_in: usize,
    /// Reweighting sharpness, must be positive.
    pub scale: f32,
    /// Seed for clustering initialization.
    pub seed: u64,
    /// Signal recorded per example.
    pub signal: SignalKind,
    /// Trajectory flattening.
    pub feature_mode: FeatureMode,
    /// Clustering algorithm.
    pub method: ClusterMethod,
    /// Examples per inference chunk while recording.
    pub eval_batch_size: usize,
    /// Gaussian mixture settings.
    pub gmm: GmmConfig,
    /// Soft k-means settings.
    pub kmeans: SoftKMeansConfig,
    /// Weight policy settings.
    pub policy: PolicyConfig,
}

impl Default for ReweightConfig {
    fn default() -> Self {
        Self {
            num_cluster: 3,
            burn_in: 5,
            scale: 1e6,
            seed: 1,
            signal: SignalKind::default(),
            feature_mode: FeatureMode::default(),
            method: ClusterMethod::default(),
            eval_batch_size: 1000,
            gmm: GmmConfig::default(),
            kmeans: SoftKMeansConfig::default(),
            policy: PolicyConfig::default(),
        }
    }
}

impl ReweightConfig {
    /// Set the number of clusters.
    #[must_use]
    pub const fn with_num_cluster(mut self, num_cluster: usize) -> Self {
        self.num_cluster = num_cluster;
        self
    }

    /// Set the burn-in epochs.
    #[must_use]
    pub const fn with_burn_in(mut self, burn_in: usize) -> Self {
        self.burn_in = burn_in;
        self
    }

    /// Set the reweighting scale.
    #[must_use]
    pub const fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    /// Set the clustering seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the recorded signal.
    #[must_use]
    pub const fn with_signal(mut self, signal: SignalKind) -> Self {
        self.signal = signal;
        self
    }

    /// Set the trajectory feature mode.
    #[must_use]
    pub const fn with_feature_mode(mut self, mode: FeatureMode) -> Self {
        self.feature_mode = mode;
        self
    }

    /// Set the clustering method.
    #[must_use]
    pub const fn with_method(mut self, method: ClusterMethod) -> Self {
        self.method = method;
        self
    }

    /// Set the policy sub-configuration.
    #[must_use]
    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    /// Set the Gaussian mixture sub-configuration.
    #[must_use]
    pub fn with_gmm(mut self, gmm: GmmConfig) -> Self {
        self.gmm = gmm;
        self
    }

    /// Check every parameter range.
    pub fn validate(&self) -> Result<()> {
        if self.num_cluster < 2 {
            return Err(ReweightError::InvalidConfig(format!(
                "num_cluster must be >= 2, got {}",
                self.num_cluster
            )));
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(ReweightError::InvalidConfig(format!(
                "scale must be a positive finite number, got {}",
                self.scale
            )));
        }
        if self.eval_batch_size == 0 {
            return Err(ReweightError::InvalidConfig(
                "eval_batch_size must be > 0".to_string(),
            ));
        }
        if let FeatureMode::Window(0) = self.feature_mode {
            return Err(ReweightError::InvalidConfig(
                "feature window must cover at least one pass".to_string(),
            ));
        }
        if self.gmm.max_iter == 0 || self.gmm.n_init == 0 {
            return Err(ReweightError::InvalidConfig(
                "gmm.max_iter and gmm.n_init must be > 0".to_string(),
            ));
        }
        if !(self.gmm.reg_covar >= 0.0 && self.gmm.reg_covar.is_finite()) {
            return Err(ReweightError::InvalidConfig(
                "gmm.reg_covar must be non-negative".to_string(),
            ));
        }
        if !(self.kmeans.stiffness > 0.0 && self.kmeans.stiffness.is_finite()) {
            return Err(ReweightError::InvalidConfig(
                "kmeans.stiffness must be positive".to_string(),
            ));
        }
        let policy = &self.policy;
        if !(policy.exponent > 0.0 && policy.exponent.is_finite()) {
            return Err(ReweightError::InvalidConfig(
                "policy.exponent must be positive".to_string(),
            ));
        }
        if !(policy.floor > 0.0 && policy.floor < 1.0) {
            return Err(ReweightError::InvalidConfig(
                "policy.floor must be in (0, 1)".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&policy.min_trusted_share) {
            return Err(ReweightError::InvalidConfig(
                "policy.min_trusted_share must be in [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Synthetic dataset used by the comparison binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Training examples before the validation split.
    pub train_size: usize,
    /// Held-out test examples.
    pub test_size: usize,
    /// Number of classes.
    pub num_classes: usize,
    /// Input feature dimension.
    pub input_dim: usize,
    /// Standard deviation of each class blob.
    pub spread: f32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            train_size: 6000,
            test_size: 1000,
            num_classes: 10,
            input_dim: 32,
            spread: 1.5,
        }
    }
}

/// A full standard-vs-reweight comparison run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Training batch size.
    pub batch_size: usize,
    /// Epochs per regime.
    pub epochs: usize,
    /// Examples held out from training for validation.
    pub valid_size: usize,
    /// SGD learning rate.
    pub lr: f64,
    /// Fraction of training labels flipped to a wrong class.
    pub noise_level: f32,
    /// Batches between progress log lines.
    pub log_interval: usize,
    /// Seed for data generation, shuffling and model init.
    pub seed: u64,
    /// Hidden width of the reference classifier.
    pub hidden_dim: usize,
    /// Synthetic data settings.
    pub data: SyntheticConfig,
    /// Reweight regime settings.
    pub reweight: ReweightConfig,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            epochs: 10,
            valid_size: 1000,
            lr: 0.01,
            noise_level: 0.1,
            log_interval: 10,
            seed: 1,
            hidden_dim: 64,
            data: SyntheticConfig::default(),
            reweight: ReweightConfig::default(),
        }
    }
}

impl ExperimentConfig {
    /// Load from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&content)?)
    }

    /// Save to a TOML file.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Check every parameter range, including the reweight section.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ReweightError::InvalidConfig(
                "batch_size must be > 0".to_string(),
            ));
        }
        if self.epochs == 0 {
            return Err(ReweightError::InvalidConfig(
                "epochs must be > 0".to_string(),
            ));
        }
        if !(self.lr > 0.0 && self.lr.is_finite()) {
            return Err(ReweightError::InvalidConfig(
                "lr must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.noise_level) {
            return Err(ReweightError::InvalidConfig(
                "noise_level must be in [0, 1]".to_string(),
            ));
        }
        if self.data.num_classes < 2 || self.data.input_dim == 0 {
            return Err(ReweightError::InvalidConfig(
                "data needs at least 2 classes and a non-empty input".to_string(),
            ));
        }
        if self.valid_size >= self.data.train_size {
            return Err(ReweightError::InvalidConfig(format!(
                "valid_size {} leaves no training data out of {}",
                self.valid_size, self.data.train_size
            )));
        }
        self.reweight.validate()
    }
}
