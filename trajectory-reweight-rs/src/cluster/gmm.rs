//! Diagonal-covariance Gaussian mixture fitted by expectation-maximization.
//!
//! Components are seeded with k-means++ and every point starts fully
//! responsible to its nearest seed. Each iteration runs an M-step followed by
//! an E-step, so the returned responsibilities always belong to the returned
//! parameters. All densities are handled in log space with log-sum-exp.

use std::f64::consts::PI;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::kmeans::kmeans_plus_plus;
use super::{argmax, check_features, squared_distance, ClusterAssignment, ClusteringStrategy};
use crate::config::GmmConfig;
use crate::error::{ReweightError, Result};

// Keeps empty components from dividing by zero.
const MIN_COMPONENT_MASS: f64 = 10.0 * f64::EPSILON;

/// Fitted mixture parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixtureModel {
    weights: Vec<f64>,
    means: Vec<Vec<f64>>,
    variances: Vec<Vec<f64>>,
    log_likelihood: f64,
    iterations: usize,
    converged: bool,
}

impl MixtureModel {
    /// Number of components.
    #[must_use]
    pub fn num_components(&self) -> usize {
        self.weights.len()
    }

    /// Mixing proportions, summing to one.
    #[must_use]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Component means.
    #[must_use]
    pub fn means(&self) -> &[Vec<f64>] {
        &self.means
    }

    /// Per-dimension component variances, regularization included.
    #[must_use]
    pub fn variances(&self) -> &[Vec<f64>] {
        &self.variances
    }

    /// Mean per-point log-likelihood of the training data.
    #[must_use]
    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    /// EM iterations performed.
    #[must_use]
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Whether the likelihood gain dropped below `tol` before `max_iter`.
    #[must_use]
    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Posterior component probabilities for one point.
    #[must_use]
    pub fn predict_proba(&self, point: &[f64]) -> Vec<f64> {
        let log_probs = self.weighted_log_probs(point);
        let norm = log_sum_exp(&log_probs);
        log_probs.iter().map(|lp| (lp - norm).exp()).collect()
    }

    fn weighted_log_probs(&self, point: &[f64]) -> Vec<f64> {
        let dim = point.len() as f64;
        self.weights
            .iter()
            .zip(&self.means)
            .zip(&self.variances)
            .map(|((w, mean), var)| {
                let log_det: f64 = var.iter().map(|v| v.ln()).sum();
                let mahalanobis: f64 = point
                    .iter()
                    .zip(mean)
                    .zip(var)
                    .map(|((x, m), v)| (x - m) * (x - m) / v)
                    .sum();
                w.ln() - 0.5 * (dim * (2.0 * PI).ln() + log_det + mahalanobis)
            })
            .collect()
    }
}

fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Gaussian mixture clustering strategy.
#[derive(Debug, Clone)]
pub struct GaussianMixture {
    config: GmmConfig,
    seed: u64,
}

impl GaussianMixture {
    /// Create a mixture strategy. Initialization `i` uses `seed + i`.
    #[must_use]
    pub fn new(config: GmmConfig, seed: u64) -> Self {
        Self { config, seed }
    }

    /// Fit `k` components, keeping the best of `n_init` initializations.
    pub fn fit(&self, features: &[Vec<f64>], k: usize) -> Result<MixtureModel> {
        check_features(features, k)?;
        if self.config.reg_covar < 0.0 || !self.config.reg_covar.is_finite() {
            return Err(ReweightError::InvalidConfig(format!(
                "reg_covar must be non-negative, got {}",
                self.config.reg_covar
            )));
        }

        let mut best: Option<MixtureModel> = None;
        let mut first_error = None;
        for init in 0..self.config.n_init.max(1) {
            let seed = self.seed.wrapping_add(init as u64);
            match self.fit_once(features, k, seed) {
                Ok(model) => {
                    tracing::debug!(
                        init,
                        log_likelihood = model.log_likelihood,
                        iterations = model.iterations,
                        converged = model.converged,
                        "gmm initialization finished"
                    );
                    if best
                        .as_ref()
                        .map_or(true, |b| model.log_likelihood > b.log_likelihood)
                    {
                        best = Some(model);
                    }
                }
                Err(e) => {
                    tracing::debug!(init, error = %e, "gmm initialization failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match (best, first_error) {
            (Some(model), _) => {
                if !model.converged {
                    tracing::warn!(
                        iterations = model.iterations,
                        "gmm did not converge, using last iterate"
                    );
                }
                Ok(model)
            }
            (None, Some(e)) => Err(e),
            (None, None) => Err(ReweightError::NumericalInstability(
                "gmm produced no model".to_string(),
            )),
        }
    }

    fn fit_once(&self, features: &[Vec<f64>], k: usize, seed: u64) -> Result<MixtureModel> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let seeds = kmeans_plus_plus(features, k, &mut rng);

        let mut resp: Vec<Vec<f64>> = features
            .iter()
            .map(|x| {
                let neg: Vec<f64> = seeds.iter().map(|c| -squared_distance(x, c)).collect();
                let nearest = argmax(&neg).0;
                (0..k).map(|j| if j == nearest { 1.0 } else { 0.0 }).collect()
            })
            .collect();

        let mut previous = f64::NEG_INFINITY;
        let mut model = self.m_step(features, &resp, k)?;
        for iteration in 1..=self.config.max_iter {
            if iteration > 1 {
                model = self.m_step(features, &resp, k)?;
            }
            let log_likelihood = e_step(features, &model, &mut resp)?;
            model.log_likelihood = log_likelihood;
            model.iterations = iteration;

            if (log_likelihood - previous).abs() < self.config.tol {
                model.converged = true;
                break;
            }
            previous = log_likelihood;
        }
        Ok(model)
    }

    fn m_step(&self, features: &[Vec<f64>], resp: &[Vec<f64>], k: usize) -> Result<MixtureModel> {
        let n = features.len() as f64;
        let dim = features[0].len();

        let mut mass = vec![MIN_COMPONENT_MASS; k];
        let mut means = vec![vec![0.0; dim]; k];
        for (x, r) in features.iter().zip(resp) {
            for j in 0..k {
                mass[j] += r[j];
                for (m, &v) in means[j].iter_mut().zip(x) {
                    *m += r[j] * v;
                }
            }
        }
        for (mean, &nk) in means.iter_mut().zip(&mass) {
            mean.iter_mut().for_each(|m| *m /= nk);
        }

        let mut variances = vec![vec![0.0; dim]; k];
        for (x, r) in features.iter().zip(resp) {
            for j in 0..k {
                for ((var, &v), &m) in variances[j].iter_mut().zip(x).zip(&means[j]) {
                    *var += r[j] * (v - m) * (v - m);
                }
            }
        }
        for (j, (var, &nk)) in variances.iter_mut().zip(&mass).enumerate() {
            for v in var.iter_mut() {
                *v = *v / nk + self.config.reg_covar;
                if !(v.is_finite() && *v > 0.0) {
                    return Err(ReweightError::NumericalInstability(format!(
                        "component {j} variance collapsed to {v}; increase reg_covar"
                    )));
                }
            }
        }

        Ok(MixtureModel {
            weights: mass.iter().map(|nk| nk / n).collect(),
            means,
            variances,
            log_likelihood: f64::NEG_INFINITY,
            iterations: 0,
            converged: false,
        })
    }
}

/// Recompute responsibilities in place; returns the mean log-likelihood.
fn e_step(features: &[Vec<f64>], model: &MixtureModel, resp: &mut [Vec<f64>]) -> Result<f64> {
    let mut total = 0.0;
    for (x, r) in features.iter().zip(resp.iter_mut()) {
        let log_probs = model.weighted_log_probs(x);
        let norm = log_sum_exp(&log_probs);
        if !norm.is_finite() {
            return Err(ReweightError::NumericalInstability(format!(
                "point log-likelihood is {norm}"
            )));
        }
        for (rj, lp) in r.iter_mut().zip(&log_probs) {
            *rj = (lp - norm).exp();
        }
        total += norm;
    }
    let mean = total / features.len() as f64;
    if !mean.is_finite() {
        return Err(ReweightError::NumericalInstability(format!(
            "mean log-likelihood is {mean}"
        )));
    }
    Ok(mean)
}

impl ClusteringStrategy for GaussianMixture {
    fn name(&self) -> &'static str {
        "gaussian-mixture"
    }

    fn fit_predict(&self, features: &[Vec<f64>], num_cluster: usize) -> Result<ClusterAssignment> {
        let model = self.fit(features, num_cluster)?;
        let mut labels = Vec::with_capacity(features.len());
        let mut confidence = Vec::with_capacity(features.len());
        for x in features {
            let (label, p) = argmax(&model.predict_proba(x));
            labels.push(label);
            confidence.push(p as f32);
        }
        ClusterAssignment::new(labels, confidence, num_cluster)
    }
}
