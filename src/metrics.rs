//! Per-epoch running loss accumulation.
//!
//! One accumulator lives for exactly one epoch: reset at epoch start,
//! summed over every window (training) or every batch (validation),
//! then divided by the number of samples for reporting and discarded.

use crate::error::{TrainError, TrainResult};
use crate::loss::LossVector;

/// Running per-criterion loss sums for one epoch.
#[derive(Debug, Clone)]
pub struct RunningLoss {
    names: Vec<String>,
    sums: Vec<f64>,
}

impl RunningLoss {
    /// Fresh accumulator with one slot per criterion name.
    #[must_use]
    pub fn new(names: Vec<String>) -> Self {
        let sums = vec![0.0; names.len()];
        Self { names, sums }
    }

    /// Adds a detached loss vector into the running sums.
    pub fn accumulate(&mut self, loss: &LossVector) -> TrainResult<()> {
        let values = loss.values()?;
        if values.len() != self.sums.len() {
            return Err(TrainError::Config {
                detail: format!(
                    "loss vector has {} terms, accumulator expects {}",
                    values.len(),
                    self.sums.len()
                ),
            });
        }
        for (sum, value) in self.sums.iter_mut().zip(values) {
            *sum += f64::from(value);
        }
        Ok(())
    }

    /// Averages the sums over `n_samples` into a reportable summary.
    #[must_use]
    pub fn averaged(&self, n_samples: usize) -> LossSummary {
        let divisor = n_samples.max(1) as f64;
        LossSummary {
            per_criterion: self
                .names
                .iter()
                .cloned()
                .zip(self.sums.iter().map(|s| s / divisor))
                .collect(),
        }
    }
}

/// Averaged per-criterion losses for one epoch.
#[derive(Debug, Clone)]
pub struct LossSummary {
    /// `(criterion name, averaged loss)` in declaration order.
    pub per_criterion: Vec<(String, f64)>,
}

impl LossSummary {
    /// Sum over all criteria, the scalar that gets reported as the
    /// headline loss.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.per_criterion.iter().map(|(_, v)| v).sum()
    }

    /// Averaged values in declaration order.
    #[must_use]
    pub fn values(&self) -> Vec<f64> {
        self.per_criterion.iter().map(|&(_, v)| v).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::{MultiCriterionLoss, SumAbsoluteError, SumSquaredError};
    use candle_core::{Device, Tensor};

    fn loss_vector(scale: f32) -> LossVector {
        let device = Device::Cpu;
        let y = Tensor::zeros((1, 1, 4), candle_core::DType::F32, &device).unwrap();
        let out = Tensor::full(scale, (1, 1, 4), &device).unwrap();
        MultiCriterionLoss::new(
            vec![Box::new(SumSquaredError), Box::new(SumAbsoluteError)],
            vec![1.0, 1.0],
        )
        .unwrap()
        .compute(&y, &out, &[4])
        .unwrap()
    }

    #[test]
    fn test_accumulate_and_average() {
        let mut running = RunningLoss::new(vec!["mse".to_string(), "l1".to_string()]);
        // Constant output 1.0 against zero target, normalized by the
        // valid length: mse = 1.0, l1 = 1.0 per vector.
        running.accumulate(&loss_vector(1.0)).unwrap();
        running.accumulate(&loss_vector(1.0)).unwrap();
        let summary = running.averaged(2);
        assert!((summary.per_criterion[0].1 - 1.0).abs() < 1e-6);
        assert!((summary.per_criterion[1].1 - 1.0).abs() < 1e-6);
        assert!((summary.total() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_term_count_mismatch() {
        let mut running = RunningLoss::new(vec!["mse".to_string()]);
        assert!(running.accumulate(&loss_vector(1.0)).is_err());
    }
}
