//! Labeled datasets and the weighted batch source.
//!
//! The core only needs index-ordered access to inputs and labels, so any
//! backing store implements [`LabeledDataset`]. [`InMemoryDataset`] keeps all
//! inputs in one `[n, ...]` tensor on the caller's device.

mod synthetic;
mod weighted;

use candle_core::{Device, Tensor};

use crate::error::{ReweightError, Result};

pub use synthetic::{inject_label_noise, random_split, BlobGenerator};
pub use weighted::{WeightedBatch, WeightedBatches, WeightedDataSource};

/// A dataset with stable example indices `0..len()`.
pub trait LabeledDataset {
    /// Number of examples.
    fn len(&self) -> usize;

    /// Whether the dataset holds no examples.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of label classes.
    fn num_classes(&self) -> usize;

    /// Device the inputs live on.
    fn device(&self) -> &Device;

    /// Inputs stacked along dim 0 and labels for the given indices, in order.
    fn gather(&self, indices: &[usize]) -> Result<(Tensor, Vec<u32>)>;
}

/// Dataset held as a single input tensor plus a label vector.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    inputs: Tensor,
    labels: Vec<u32>,
    num_classes: usize,
}

impl InMemoryDataset {
    /// Create a dataset from `[n, ...]` inputs and `n` labels.
    pub fn new(inputs: Tensor, labels: Vec<u32>, num_classes: usize) -> Result<Self> {
        let n = inputs.dim(0)?;
        if n != labels.len() {
            return Err(ReweightError::DimensionMismatch {
                expected: n,
                actual: labels.len(),
            });
        }
        if let Some(&bad) = labels.iter().find(|&&l| l as usize >= num_classes) {
            return Err(ReweightError::InvalidConfig(format!(
                "label {bad} out of range for {num_classes} classes"
            )));
        }
        Ok(Self {
            inputs,
            labels,
            num_classes,
        })
    }

    /// All inputs.
    #[must_use]
    pub fn inputs(&self) -> &Tensor {
        &self.inputs
    }

    /// All labels in index order.
    #[must_use]
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// Same inputs with replaced labels.
    pub fn with_labels(self, labels: Vec<u32>) -> Result<Self> {
        Self::new(self.inputs, labels, self.num_classes)
    }

    /// New dataset made of the given examples, re-indexed from zero.
    pub fn subset(&self, indices: &[usize]) -> Result<Self> {
        let (inputs, labels) = self.gather(indices)?;
        Self::new(inputs, labels, self.num_classes)
    }
}

impl LabeledDataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.labels.len()
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn device(&self) -> &Device {
        self.inputs.device()
    }

    fn gather(&self, indices: &[usize]) -> Result<(Tensor, Vec<u32>)> {
        let mut ids = Vec::with_capacity(indices.len());
        let mut labels = Vec::with_capacity(indices.len());
        for &i in indices {
            let label = self.labels.get(i).ok_or(ReweightError::DimensionMismatch {
                expected: self.labels.len(),
                actual: i + 1,
            })?;
            ids.push(i as u32);
            labels.push(*label);
        }
        let ids = Tensor::from_vec(ids, indices.len(), self.inputs.device())?;
        let inputs = self.inputs.index_select(&ids, 0)?;
        Ok((inputs, labels))
    }
}
