//! Classifier interface and a small reference network.
//!
//! Recording and evaluation only need logits, so the core talks to models
//! through [`Classifier`]. Parameters and optimizer state stay with the
//! caller; nothing in this crate mutates them except the orchestrator's
//! `backward_step`.

use candle_core::{Device, Tensor, Var};
use candle_nn::{Linear, Module};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::{ReweightError, Result};

/// A model mapping `[batch, ...]` inputs to `[batch, classes]` logits.
pub trait Classifier {
    /// Forward pass returning unnormalized logits.
    fn forward(&self, inputs: &Tensor) -> Result<Tensor>;
}

/// Two-layer perceptron with ReLU.
///
/// Parameters are drawn from a seeded `ChaCha8Rng`, so two instances built
/// with the same seed start from identical weights on any device.
pub struct MlpClassifier {
    hidden: Linear,
    output: Linear,
    vars: Vec<Var>,
}

impl MlpClassifier {
    /// Build a `input_dim -> hidden_dim -> num_classes` network.
    pub fn new(
        input_dim: usize,
        hidden_dim: usize,
        num_classes: usize,
        seed: u64,
        device: &Device,
    ) -> Result<Self> {
        if input_dim == 0 || hidden_dim == 0 || num_classes < 2 {
            return Err(ReweightError::InvalidConfig(format!(
                "invalid mlp shape {input_dim} -> {hidden_dim} -> {num_classes}"
            )));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let w1 = uniform_var(&mut rng, &[hidden_dim, input_dim], input_dim, device)?;
        let b1 = uniform_var(&mut rng, &[hidden_dim], input_dim, device)?;
        let w2 = uniform_var(&mut rng, &[num_classes, hidden_dim], hidden_dim, device)?;
        let b2 = uniform_var(&mut rng, &[num_classes], hidden_dim, device)?;

        let hidden = Linear::new(w1.as_tensor().clone(), Some(b1.as_tensor().clone()));
        let output = Linear::new(w2.as_tensor().clone(), Some(b2.as_tensor().clone()));

        Ok(Self {
            hidden,
            output,
            vars: vec![w1, b1, w2, b2],
        })
    }

    /// Trainable variables, for building an optimizer.
    #[must_use]
    pub fn vars(&self) -> Vec<Var> {
        self.vars.clone()
    }

    /// Total number of scalar parameters.
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.vars.iter().map(|v| v.elem_count()).sum()
    }
}

impl Classifier for MlpClassifier {
    fn forward(&self, inputs: &Tensor) -> Result<Tensor> {
        let h = self.hidden.forward(inputs)?.relu()?;
        Ok(self.output.forward(&h)?)
    }
}

// PyTorch-style default init: U(-1/sqrt(fan_in), 1/sqrt(fan_in)).
fn uniform_var(
    rng: &mut ChaCha8Rng,
    shape: &[usize],
    fan_in: usize,
    device: &Device,
) -> Result<Var> {
    let bound = 1.0 / (fan_in as f32).sqrt();
    let count: usize = shape.iter().product();
    let data: Vec<f32> = (0..count).map(|_| rng.gen_range(-bound..bound)).collect();
    Ok(Var::from_tensor(&Tensor::from_vec(data, shape, device)?)?)
}
