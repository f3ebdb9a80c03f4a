//! Weighted multi-criterion loss over ragged batches.
//!
//! Several elementwise criteria (each sum-reduced) are combined into a
//! vector of independently weighted, length-normalized scalars. The
//! vector is kept per-criterion for observability and only collapsed
//! to a single scalar at backprop time.
//!
//! Two evaluation paths:
//! - **uniform**: all samples share one valid length, so each
//!   criterion runs once over the full tensor and the sum is divided
//!   by the common length;
//! - **ragged**: each sample is sliced to its own valid length and
//!   contributes `sum / length` before the criterion weight is
//!   applied.
//! Both divide a floating sum by an exact integer length, so the paths
//! agree to float tolerance whenever lengths are uniform.

use candle_core::{Tensor, D};

use crate::error::{TrainError, TrainResult};

/// A sum-reduced elementwise loss term.
pub trait Criterion: Send {
    /// Identifier used in scalar tags and checkpoints.
    fn name(&self) -> &str;

    /// Sum of the elementwise loss over all entries of `output` and
    /// `target` (which have identical shapes).
    fn loss_sum(&self, output: &Tensor, target: &Tensor) -> TrainResult<Tensor>;
}

/// Sum of squared errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct SumSquaredError;

impl Criterion for SumSquaredError {
    fn name(&self) -> &str {
        "mse"
    }

    fn loss_sum(&self, output: &Tensor, target: &Tensor) -> TrainResult<Tensor> {
        Ok((output - target)?.sqr()?.sum_all()?)
    }
}

/// Sum of absolute errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct SumAbsoluteError;

impl Criterion for SumAbsoluteError {
    fn name(&self) -> &str {
        "l1"
    }

    fn loss_sum(&self, output: &Tensor, target: &Tensor) -> TrainResult<Tensor> {
        Ok((output - target)?.abs()?.sum_all()?)
    }
}

/// One weighted, length-normalized scalar per configured criterion.
///
/// Entries are scalar graph tensors in declaration order; gradients
/// flow through [`LossVector::total`].
#[derive(Debug)]
pub struct LossVector {
    terms: Vec<Tensor>,
}

impl LossVector {
    /// Number of criteria.
    #[must_use]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Whether no criteria are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Sum of all terms, as a scalar tensor suitable for backprop.
    pub fn total(&self) -> TrainResult<Tensor> {
        let mut iter = self.terms.iter();
        let first = iter.next().ok_or_else(|| TrainError::Config {
            detail: "loss vector has no terms".to_string(),
        })?;
        let mut acc = first.clone();
        for term in iter {
            acc = (acc + term)?;
        }
        Ok(acc)
    }

    /// Detached per-criterion values for accumulation and reporting.
    pub fn values(&self) -> TrainResult<Vec<f32>> {
        self.terms
            .iter()
            .map(|t| Ok(t.detach().to_scalar::<f32>()?))
            .collect()
    }
}

/// Combines configured criteria with per-criterion weights.
pub struct MultiCriterionLoss {
    criteria: Vec<Box<dyn Criterion>>,
    weights: Vec<f64>,
}

impl MultiCriterionLoss {
    /// Pairs criteria with weights; the two lists must be congruent.
    pub fn new(criteria: Vec<Box<dyn Criterion>>, weights: Vec<f64>) -> TrainResult<Self> {
        if criteria.is_empty() {
            return Err(TrainError::Config {
                detail: "at least one criterion is required".to_string(),
            });
        }
        if criteria.len() != weights.len() {
            return Err(TrainError::Config {
                detail: format!(
                    "{} criteria but {} weights",
                    criteria.len(),
                    weights.len()
                ),
            });
        }
        Ok(Self { criteria, weights })
    }

    /// Criterion names in declaration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.criteria.iter().map(|c| c.name().to_string()).collect()
    }

    /// Number of criteria.
    #[must_use]
    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    /// Whether no criteria are configured. `new` forbids this.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    /// Computes the loss vector for a (sub-)batch.
    ///
    /// `t_ys` holds the valid length of every sample in `y`/`output`
    /// (already clipped to the window by the caller). Zero-weight
    /// criteria are skipped without being evaluated; their slot stays
    /// exactly zero. Degenerate inputs (a length of zero, or a length
    /// list that does not match the batch) are contract errors the
    /// caller must have filtered.
    pub fn compute(
        &self,
        y: &Tensor,
        output: &Tensor,
        t_ys: &[usize],
    ) -> TrainResult<LossVector> {
        let n = y.dims3()?.0;
        if t_ys.len() != n {
            return Err(TrainError::BatchContract {
                detail: format!("{n} samples but {} valid lengths", t_ys.len()),
            });
        }
        if t_ys.iter().any(|&l| l == 0) {
            return Err(TrainError::BatchContract {
                detail: "zero valid length reached the loss; filter degenerate windows first"
                    .to_string(),
            });
        }

        let uniform = t_ys.windows(2).all(|w| w[0] == w[1]);
        let mut terms = Vec::with_capacity(self.criteria.len());
        for (criterion, &weight) in self.criteria.iter().zip(&self.weights) {
            if weight == 0.0 {
                terms.push(Tensor::new(0f32, y.device())?);
                continue;
            }
            let term = if uniform {
                Self::uniform_term(criterion.as_ref(), y, output, t_ys[0])?
            } else {
                Self::ragged_term(criterion.as_ref(), y, output, t_ys)?
            };
            terms.push((term * weight)?);
        }
        Ok(LossVector { terms })
    }

    /// One criterion over the full tensor, divided by the common
    /// valid length shared by every sample.
    fn uniform_term(
        criterion: &dyn Criterion,
        y: &Tensor,
        output: &Tensor,
        len: usize,
    ) -> TrainResult<Tensor> {
        let sum = criterion.loss_sum(output, y)?;
        Ok((sum / len as f64)?)
    }

    /// One criterion per sample slice, each divided by that sample's
    /// own valid length.
    fn ragged_term(
        criterion: &dyn Criterion,
        y: &Tensor,
        output: &Tensor,
        t_ys: &[usize],
    ) -> TrainResult<Tensor> {
        let mut acc = Tensor::new(0f32, y.device())?;
        for (i, &len) in t_ys.iter().enumerate() {
            let out_i = output.narrow(0, i, 1)?.narrow(D::Minus1, 0, len)?;
            let y_i = y.narrow(0, i, 1)?.narrow(D::Minus1, 0, len)?;
            let sum = criterion.loss_sum(&out_i, &y_i)?;
            acc = (acc + (sum / len as f64)?)?;
        }
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn pair(device: &Device) -> (Tensor, Tensor) {
        let y: Vec<f32> = (0..16).map(|v| v as f32 * 0.25).collect();
        let out: Vec<f32> = (0..16).map(|v| v as f32 * 0.25 + 0.5).collect();
        (
            Tensor::from_vec(y, (2, 1, 8), device).unwrap(),
            Tensor::from_vec(out, (2, 1, 8), device).unwrap(),
        )
    }

    fn loss_fn(weights: Vec<f64>) -> MultiCriterionLoss {
        MultiCriterionLoss::new(
            vec![Box::new(SumSquaredError), Box::new(SumAbsoluteError)],
            weights,
        )
        .unwrap()
    }

    #[test]
    fn test_uniform_and_ragged_paths_agree() {
        let device = Device::Cpu;
        let (y, out) = pair(&device);
        for criterion in [
            Box::new(SumSquaredError) as Box<dyn Criterion>,
            Box::new(SumAbsoluteError),
        ] {
            let fast = MultiCriterionLoss::uniform_term(criterion.as_ref(), &y, &out, 8)
                .unwrap()
                .to_scalar::<f32>()
                .unwrap();
            let ragged = MultiCriterionLoss::ragged_term(criterion.as_ref(), &y, &out, &[8, 8])
                .unwrap()
                .to_scalar::<f32>()
                .unwrap();
            assert!(
                (fast - ragged).abs() < 1e-5,
                "{}: {fast} vs {ragged}",
                criterion.name()
            );
        }
    }

    #[test]
    fn test_ragged_lengths_normalize_per_sample() {
        let device = Device::Cpu;
        let (y, out) = pair(&device);
        // Constant error of 0.5 everywhere: per-sample normalized L1 is
        // 0.5 * len / len = 0.5 regardless of the slice length, so the
        // batch total is 1.0 for two samples.
        let loss = MultiCriterionLoss::new(vec![Box::new(SumAbsoluteError)], vec![1.0]).unwrap();
        let v = loss.compute(&y, &out, &[8, 3]).unwrap().values().unwrap();
        assert!((v[0] - 1.0).abs() < 1e-5, "got {}", v[0]);
    }

    #[test]
    fn test_zero_weight_skips_computation() {
        struct Counting {
            calls: Arc<AtomicUsize>,
        }
        impl Criterion for Counting {
            fn name(&self) -> &str {
                "counting"
            }
            fn loss_sum(&self, output: &Tensor, target: &Tensor) -> TrainResult<Tensor> {
                self.calls.fetch_add(1, Ordering::Relaxed);
                Ok((output - target)?.sqr()?.sum_all()?)
            }
        }

        let device = Device::Cpu;
        let (y, out) = pair(&device);
        let calls = Arc::new(AtomicUsize::new(0));
        let counting = Box::new(Counting {
            calls: Arc::clone(&calls),
        });
        let loss = MultiCriterionLoss::new(
            vec![Box::new(SumSquaredError), counting],
            vec![1.0, 0.0],
        )
        .unwrap();
        let v = loss.compute(&y, &out, &[8, 8]).unwrap().values().unwrap();
        assert_eq!(v[1], 0.0);
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let device = Device::Cpu;
        let (y, out) = pair(&device);
        let loss = loss_fn(vec![1.0, 1.0]);
        assert!(matches!(
            loss.compute(&y, &out, &[8]),
            Err(TrainError::BatchContract { .. })
        ));
        assert!(matches!(
            loss.compute(&y, &out, &[8, 0]),
            Err(TrainError::BatchContract { .. })
        ));
    }

    #[test]
    fn test_total_sums_terms() {
        let device = Device::Cpu;
        let (y, out) = pair(&device);
        let loss = loss_fn(vec![1.0, 2.0]);
        let lv = loss.compute(&y, &out, &[8, 8]).unwrap();
        let values = lv.values().unwrap();
        let total = lv.total().unwrap().to_scalar::<f32>().unwrap();
        assert!((total - (values[0] + values[1])).abs() < 1e-5);
    }
}
