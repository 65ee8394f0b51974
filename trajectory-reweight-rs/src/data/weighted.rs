//! Weighted batch source.
//!
//! [`WeightedDataSource`] owns the per-example weight vector for the whole
//! run. `get_batches` borrows the source for as long as the epoch iterator
//! lives, so `set_weights` cannot land while an epoch is in flight.

use candle_core::Tensor;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::LabeledDataset;
use crate::error::{ReweightError, Result};
use crate::loss::LossWeights;

/// One training batch with per-example weights.
#[derive(Debug, Clone)]
pub struct WeightedBatch {
    /// Dataset indices of the examples in this batch.
    pub indices: Vec<usize>,
    /// Stacked inputs.
    pub inputs: Tensor,
    /// Labels as a `u32` tensor of shape `[batch]`.
    pub labels: Tensor,
    /// Weights as an `f32` tensor of shape `[batch]`.
    pub weights: Tensor,
    /// Sum of the batch weights, computed on the host; used as the loss divisor.
    pub weight_sum: f32,
}

impl WeightedBatch {
    /// Weights and their precomputed sum, ready for the loss.
    #[must_use]
    pub fn loss_weights(&self) -> LossWeights<'_> {
        LossWeights {
            values: &self.weights,
            sum: self.weight_sum,
        }
    }

    /// Number of examples in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Base dataset plus a mutable weight per example.
#[derive(Debug)]
pub struct WeightedDataSource<D> {
    dataset: D,
    weights: Vec<f32>,
    shuffle: bool,
    rng: ChaCha8Rng,
}

impl<D: LabeledDataset> WeightedDataSource<D> {
    /// Wrap a dataset with uniform weights. `seed` drives batch shuffling.
    #[must_use]
    pub fn new(dataset: D, seed: u64) -> Self {
        let weights = vec![1.0; dataset.len()];
        Self {
            dataset,
            weights,
            shuffle: true,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Enable or disable per-pass shuffling.
    #[must_use]
    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// The wrapped dataset.
    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    /// Number of examples.
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    /// Whether the source holds no examples.
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Current weights in index order.
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Start a new pass over the dataset.
    ///
    /// Every call draws a fresh permutation when shuffling is enabled.
    pub fn get_batches(&mut self, batch_size: usize) -> Result<WeightedBatches<'_, D>> {
        if batch_size == 0 {
            return Err(ReweightError::InvalidConfig(
                "batch_size must be > 0".to_string(),
            ));
        }
        let mut order: Vec<usize> = (0..self.weights.len()).collect();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }
        Ok(WeightedBatches {
            source: self,
            order,
            batch_size,
            cursor: 0,
        })
    }

    /// Replace the whole weight vector.
    ///
    /// Zero is a legal weight; negative or non-finite values are rejected.
    pub fn set_weights(&mut self, new_weights: Vec<f32>) -> Result<()> {
        if new_weights.len() != self.weights.len() {
            return Err(ReweightError::DimensionMismatch {
                expected: self.weights.len(),
                actual: new_weights.len(),
            });
        }
        if let Some((i, w)) = new_weights
            .iter()
            .enumerate()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(ReweightError::InvalidWeights(format!(
                "weight {w} at index {i}"
            )));
        }
        self.weights = new_weights;
        Ok(())
    }

    /// Back to uniform weights.
    pub fn reset_weights(&mut self) {
        self.weights.fill(1.0);
    }
}

/// Lazy iterator over one pass of weighted batches.
pub struct WeightedBatches<'a, D> {
    source: &'a WeightedDataSource<D>,
    order: Vec<usize>,
    batch_size: usize,
    cursor: usize,
}

impl<D: LabeledDataset> WeightedBatches<'_, D> {
    /// Number of batches in this pass.
    #[must_use]
    pub fn num_batches(&self) -> usize {
        self.order.len().div_ceil(self.batch_size)
    }

    fn build(&self, indices: Vec<usize>) -> Result<WeightedBatch> {
        let dataset = &self.source.dataset;
        let device = dataset.device();
        let (inputs, labels) = dataset.gather(&indices)?;
        let weights: Vec<f32> = indices.iter().map(|&i| self.source.weights[i]).collect();
        let weight_sum = weights.iter().sum();
        let n = indices.len();
        Ok(WeightedBatch {
            indices,
            inputs,
            labels: Tensor::from_vec(labels, n, device)?,
            weights: Tensor::from_vec(weights, n, device)?,
            weight_sum,
        })
    }
}

impl<D: LabeledDataset> Iterator for WeightedBatches<'_, D> {
    type Item = Result<WeightedBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let indices = self.order[self.cursor..end].to_vec();
        self.cursor = end;
        Some(self.build(indices))
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device};

    use super::*;
    use crate::data::InMemoryDataset;

    fn source(n: usize) -> WeightedDataSource<InMemoryDataset> {
        let inputs = Tensor::zeros((n, 3), DType::F32, &Device::Cpu).unwrap();
        let labels = (0..n as u32).map(|i| i % 2).collect();
        WeightedDataSource::new(InMemoryDataset::new(inputs, labels, 2).unwrap(), 3)
    }

    #[test]
    fn test_batches_cover_every_example_once() {
        let mut src = source(10);
        let mut seen: Vec<usize> = src
            .get_batches(3)
            .unwrap()
            .flat_map(|b| b.unwrap().indices)
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_last_batch_is_partial() {
        let mut src = source(10);
        let batches = src.get_batches(4).unwrap();
        assert_eq!(batches.num_batches(), 3);
        let sizes: Vec<usize> = batches.map(|b| b.unwrap().len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_each_pass_reshuffles() {
        let mut src = source(32);
        let first: Vec<usize> = src
            .get_batches(32)
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .indices;
        let second: Vec<usize> = src
            .get_batches(32)
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .indices;
        assert_ne!(first, second);
    }

    #[test]
    fn test_unshuffled_pass_is_index_order() {
        let mut src = source(5).with_shuffle(false);
        let order: Vec<usize> = src
            .get_batches(2)
            .unwrap()
            .flat_map(|b| b.unwrap().indices)
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_loss_weights_carry_installed_sum() {
        let mut src = source(4);
        src.set_weights(vec![0.5, 1.5, 2.0, 0.0]).unwrap();
        let batch = src.get_batches(4).unwrap().next().unwrap().unwrap();
        let lw = batch.loss_weights();
        assert!((lw.sum - 4.0).abs() < 1e-6);
        let device_sum = lw.values.sum_all().unwrap().to_scalar::<f32>().unwrap();
        assert!((lw.sum - device_sum).abs() < 1e-6);
    }

    #[test]
    fn test_uniform_weight_sum_equals_batch_len() {
        let mut src = source(7);
        for batch in src.get_batches(3).unwrap() {
            let batch = batch.unwrap();
            assert_eq!(batch.weight_sum, batch.len() as f32);
        }
    }

    #[test]
    fn test_set_weights_validation() {
        let mut src = source(4);
        assert!(matches!(
            src.set_weights(vec![1.0; 3]),
            Err(ReweightError::DimensionMismatch {
                expected: 4,
                actual: 3
            })
        ));
        assert!(src.set_weights(vec![1.0, -0.5, 1.0, 1.0]).is_err());
        assert!(src.set_weights(vec![1.0, f32::NAN, 1.0, 1.0]).is_err());
        assert_eq!(src.weights(), &[1.0; 4]);

        src.set_weights(vec![0.0, 2.0, 0.5, 1.0]).unwrap();
        assert_eq!(src.weights(), &[0.0, 2.0, 0.5, 1.0]);

        src.reset_weights();
        assert_eq!(src.weights(), &[1.0; 4]);
    }

    #[test]
    fn test_batch_weights_follow_indices() {
        let mut src = source(4);
        src.set_weights(vec![0.1, 0.2, 0.3, 0.4]).unwrap();
        for batch in src.get_batches(2).unwrap() {
            let batch = batch.unwrap();
            let weights = batch.weights.to_vec1::<f32>().unwrap();
            for (i, w) in batch.indices.iter().zip(weights) {
                assert!((w - (*i as f32 + 1.0) * 0.1).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut src = source(4);
        assert!(src.get_batches(0).is_err());
    }
}
