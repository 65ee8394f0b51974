//! Synthetic labeled data, validation splits and label noise.
//!
//! The comparison binary has no dataset download, so it trains on Gaussian
//! class blobs. Noise is injected by flipping a fraction of training labels
//! to a different class, which is exactly the situation reweighting targets.

use candle_core::{Device, Tensor};
use rand::seq::{index, SliceRandom};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use super::{InMemoryDataset, LabeledDataset};
use crate::error::{ReweightError, Result};

/// Gaussian blobs with one fixed center per class.
///
/// Train and test sets sampled from the same generator share centers.
#[derive(Debug, Clone)]
pub struct BlobGenerator {
    centers: Vec<Vec<f32>>,
    spread: f32,
}

impl BlobGenerator {
    /// Draw `num_classes` centers uniformly in `[-3, 3]^input_dim`.
    pub fn new(num_classes: usize, input_dim: usize, spread: f32, seed: u64) -> Result<Self> {
        if num_classes < 2 || input_dim == 0 {
            return Err(ReweightError::InvalidConfig(
                "blobs need at least 2 classes and 1 input dimension".to_string(),
            ));
        }
        if !(spread > 0.0 && spread.is_finite()) {
            return Err(ReweightError::InvalidConfig(format!(
                "spread must be positive, got {spread}"
            )));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let centers = (0..num_classes)
            .map(|_| (0..input_dim).map(|_| rng.gen_range(-3.0..3.0)).collect())
            .collect();
        Ok(Self { centers, spread })
    }

    /// Number of classes.
    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.centers.len()
    }

    /// Sample `n` examples with uniformly drawn labels.
    pub fn sample(&self, n: usize, seed: u64, device: &Device) -> Result<InMemoryDataset> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let noise = Normal::new(0.0f32, self.spread)
            .map_err(|e| ReweightError::InvalidConfig(e.to_string()))?;
        let dim = self.centers[0].len();

        let mut data = Vec::with_capacity(n * dim);
        let mut labels = Vec::with_capacity(n);
        for _ in 0..n {
            let label = rng.gen_range(0..self.centers.len());
            data.extend(
                self.centers[label]
                    .iter()
                    .map(|c| c + noise.sample(&mut rng)),
            );
            labels.push(label as u32);
        }

        let inputs = Tensor::from_vec(data, (n, dim), device)?;
        InMemoryDataset::new(inputs, labels, self.centers.len())
    }
}

/// Split off `valid_size` random examples as a validation set.
///
/// Returns `(train, valid)`; both keep the relative order of the original.
pub fn random_split(
    dataset: &InMemoryDataset,
    valid_size: usize,
    seed: u64,
) -> Result<(InMemoryDataset, InMemoryDataset)> {
    let n = dataset.len();
    if valid_size >= n {
        return Err(ReweightError::InvalidConfig(format!(
            "valid_size {valid_size} leaves no training data out of {n}"
        )));
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));

    let (valid, train) = order.split_at_mut(valid_size);
    train.sort_unstable();
    valid.sort_unstable();
    Ok((dataset.subset(train)?, dataset.subset(valid)?))
}

/// Flip `fraction` of the labels to a different, uniformly chosen class.
///
/// Returns the flipped indices in ascending order.
pub fn inject_label_noise(
    labels: &mut [u32],
    fraction: f32,
    num_classes: usize,
    seed: u64,
) -> Result<Vec<usize>> {
    if !(0.0..=1.0).contains(&fraction) {
        return Err(ReweightError::InvalidConfig(format!(
            "noise fraction must be in [0, 1], got {fraction}"
        )));
    }
    if num_classes < 2 {
        return Err(ReweightError::InvalidConfig(
            "label noise needs at least 2 classes".to_string(),
        ));
    }
    let count = (fraction * labels.len() as f32).round() as usize;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut flipped = index::sample(&mut rng, labels.len(), count).into_vec();
    flipped.sort_unstable();

    for &i in &flipped {
        let shift = rng.gen_range(1..num_classes) as u32;
        labels[i] = (labels[i] + shift) % num_classes as u32;
    }
    Ok(flipped)
}
