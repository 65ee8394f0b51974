//! Weighted negative log-likelihood.
//!
//! The reweight regime reduces per-example losses as
//! `sum(w_i * nll_i) / sum(w_i)`. A batch whose weights sum to zero falls back
//! to the unweighted mean so that fully suppressed batches never divide by
//! zero. With every weight at 1.0 both reductions perform the same float
//! operations and agree bit for bit.

use candle_core::{Tensor, D};

use crate::error::Result;

/// Per-example `-log p(label)` from `[batch, classes]` log-probabilities.
pub fn per_example_nll(log_probs: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let picked = log_probs
        .gather(&labels.unsqueeze(D::Minus1)?, D::Minus1)?
        .squeeze(D::Minus1)?;
    Ok(picked.neg()?)
}

/// Per-example weights together with their sum, computed on the host when the
/// batch was assembled.
#[derive(Debug, Clone, Copy)]
pub struct LossWeights<'a> {
    /// `[batch]` weight tensor on the loss device.
    pub values: &'a Tensor,
    /// Sum of `values`.
    pub sum: f32,
}

/// Mean NLL, weighted when `weights` is given and sums to a positive value.
///
/// Returns a scalar tensor that stays on the autograd graph of `log_probs`.
/// The divisor is taken from `weights.sum`, so no device read is needed.
pub fn weighted_nll_loss(
    log_probs: &Tensor,
    labels: &Tensor,
    weights: Option<LossWeights<'_>>,
) -> Result<Tensor> {
    let nll = per_example_nll(log_probs, labels)?;
    let device = nll.device();

    if let Some(LossWeights { values, sum }) = weights {
        if sum > 0.0 && sum.is_finite() {
            let total = nll.mul(values)?.sum_all()?;
            return Ok(total.broadcast_div(&Tensor::new(sum, device)?)?);
        }
        tracing::debug!("batch weight sum is {sum}, using unweighted mean");
    }

    let count = nll.dim(0)? as f32;
    Ok(nll.sum_all()?.broadcast_div(&Tensor::new(count, device)?)?)
}

/// Summed NLL over a batch, for evaluation.
pub fn summed_nll(log_probs: &Tensor, labels: &Tensor) -> Result<f32> {
    Ok(per_example_nll(log_probs, labels)?
        .sum_all()?
        .to_scalar::<f32>()?)
}

#[cfg(test)]
mod tests {
    use candle_core::Device;

    use super::*;

    fn log_probs() -> Tensor {
        let logits = Tensor::new(
            &[[2.0f32, 0.5, -1.0], [0.1, 0.2, 0.3], [-2.0, 3.0, 0.0]],
            &Device::Cpu,
        )
        .unwrap();
        candle_nn::ops::log_softmax(&logits, D::Minus1).unwrap()
    }

    fn labels() -> Tensor {
        Tensor::new(&[0u32, 2, 1], &Device::Cpu).unwrap()
    }

    fn loss(weights: Option<LossWeights<'_>>) -> f32 {
        weighted_nll_loss(&log_probs(), &labels(), weights)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap()
    }

    fn with_sum(values: &Tensor, sum: f32) -> LossWeights<'_> {
        LossWeights { values, sum }
    }

    #[test]
    fn test_uniform_weights_match_unweighted_exactly() {
        let ones = Tensor::ones(3, candle_core::DType::F32, &Device::Cpu).unwrap();
        let weighted = loss(Some(with_sum(&ones, 3.0)));
        assert_eq!(weighted.to_bits(), loss(None).to_bits());
    }

    #[test]
    fn test_zero_weight_sum_falls_back_to_mean() {
        let zeros = Tensor::zeros(3, candle_core::DType::F32, &Device::Cpu).unwrap();
        let fallback = loss(Some(with_sum(&zeros, 0.0)));
        assert!(fallback.is_finite());
        assert_eq!(fallback.to_bits(), loss(None).to_bits());
    }

    #[test]
    fn test_weights_select_examples() {
        let only_first = Tensor::new(&[1.0f32, 0.0, 0.0], &Device::Cpu).unwrap();
        let selected = loss(Some(with_sum(&only_first, 1.0)));
        let nll = per_example_nll(&log_probs(), &labels())
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert!((selected - nll[0]).abs() < 1e-6);
    }

    #[test]
    fn test_divisor_comes_from_given_sum() {
        let ones = Tensor::ones(3, candle_core::DType::F32, &Device::Cpu).unwrap();
        let halved = loss(Some(with_sum(&ones, 6.0)));
        assert!((halved - loss(None) / 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_non_finite_sum_falls_back_to_mean() {
        let ones = Tensor::ones(3, candle_core::DType::F32, &Device::Cpu).unwrap();
        let fallback = loss(Some(with_sum(&ones, f32::INFINITY)));
        assert_eq!(fallback.to_bits(), loss(None).to_bits());
    }

    #[test]
    fn test_summed_nll_is_positive() {
        let total = summed_nll(&log_probs(), &labels()).unwrap();
        assert!(total > 0.0);
    }
}
