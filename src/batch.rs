//! Padded ragged batches of waveform pairs.
//!
//! A batch holds `(batch, channels, time)` input and target tensors
//! padded to a common maximum length, plus the true target length of
//! every sample. Lengths are required to be sorted descending; the
//! window loop leans on that ordering to shrink the active sub-batch
//! with an O(1) amortized cursor advance instead of a per-window scan.
//!
//! Contract violations are rejected here, at construction, so the
//! training loop never has to re-validate.

use candle_core::{Device, Tensor};

use crate::error::{TrainError, TrainResult};

/// One padded batch from the data loader.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Model input, `(batch, channels_in, time_in)`.
    pub x: Tensor,
    /// Regression target, `(batch, channels_out, time_out)`.
    pub y: Tensor,
    /// True (unpadded) target length per sample, sorted descending.
    t_ys: Vec<usize>,
}

impl Batch {
    /// Validates the batch contract and builds a batch.
    ///
    /// Requirements: matching batch dimensions, one length per sample,
    /// lengths descending and in `1..=time_out`, and the input padded
    /// at least as far as the target (input windows may overhang the
    /// target window, never the input tensor).
    pub fn new(x: Tensor, y: Tensor, t_ys: Vec<usize>) -> TrainResult<Self> {
        let (n_x, _, t_x) = x.dims3()?;
        let (n_y, _, t_y) = y.dims3()?;
        if n_x != n_y {
            return Err(TrainError::BatchContract {
                detail: format!("input holds {n_x} samples but target holds {n_y}"),
            });
        }
        if t_ys.len() != n_y {
            return Err(TrainError::BatchContract {
                detail: format!("{n_y} samples but {} lengths", t_ys.len()),
            });
        }
        if t_x < t_y {
            return Err(TrainError::BatchContract {
                detail: format!("input padded to {t_x} timesteps, target to {t_y}"),
            });
        }
        if t_ys.windows(2).any(|w| w[0] < w[1]) {
            return Err(TrainError::BatchContract {
                detail: "lengths must be sorted descending".to_string(),
            });
        }
        match (t_ys.first(), t_ys.last()) {
            (Some(&longest), Some(&shortest)) if shortest >= 1 && longest <= t_y => {}
            _ => {
                return Err(TrainError::BatchContract {
                    detail: format!(
                        "lengths must be non-empty and within 1..={t_y}, got {t_ys:?}"
                    ),
                });
            }
        }
        Ok(Self { x, y, t_ys })
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.t_ys.len()
    }

    /// Whether the batch holds no samples. Construction forbids this,
    /// so it only returns true for batches built by a broken loader.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.t_ys.is_empty()
    }

    /// True target lengths, descending. Never mutated; windowed views
    /// take clipped copies instead (see [`crate::mask`]).
    #[must_use]
    pub fn t_ys(&self) -> &[usize] {
        &self.t_ys
    }

    /// Padded target extent.
    pub fn max_len(&self) -> TrainResult<usize> {
        Ok(self.y.dims3()?.2)
    }

    /// Moves both tensors to the compute device.
    pub fn to_device(&self, device: &Device) -> TrainResult<Self> {
        Ok(Self {
            x: self.x.to_device(device)?,
            y: self.y.to_device(device)?,
            t_ys: self.t_ys.clone(),
        })
    }

    /// Extracts one sample's raw input and target, the target trimmed
    /// to its true length. Used when exporting inspection samples.
    pub fn decollate(&self, idx: usize) -> TrainResult<(Tensor, Tensor)> {
        if idx >= self.len() {
            return Err(TrainError::BatchContract {
                detail: format!("sample index {idx} out of range for batch of {}", self.len()),
            });
        }
        let x = self.x.narrow(0, idx, 1)?.squeeze(0)?;
        let y = self
            .y
            .narrow(0, idx, 1)?
            .narrow(2, 0, self.t_ys[idx])?
            .squeeze(0)?;
        Ok((x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn tensors(n: usize, c: usize, t: usize) -> Tensor {
        Tensor::zeros((n, c, t), DType::F32, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_valid_batch() {
        let batch = Batch::new(tensors(2, 1, 12), tensors(2, 1, 10), vec![10, 4]).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.max_len().unwrap(), 10);
    }

    #[test]
    fn test_rejects_ascending_lengths() {
        let err = Batch::new(tensors(2, 1, 10), tensors(2, 1, 10), vec![4, 10]);
        assert!(matches!(err, Err(TrainError::BatchContract { .. })));
    }

    #[test]
    fn test_rejects_length_count_mismatch() {
        let err = Batch::new(tensors(2, 1, 10), tensors(2, 1, 10), vec![10]);
        assert!(matches!(err, Err(TrainError::BatchContract { .. })));
    }

    #[test]
    fn test_rejects_overlong_length() {
        let err = Batch::new(tensors(1, 1, 10), tensors(1, 1, 10), vec![11]);
        assert!(matches!(err, Err(TrainError::BatchContract { .. })));
    }

    #[test]
    fn test_rejects_input_shorter_than_target() {
        let err = Batch::new(tensors(1, 1, 8), tensors(1, 1, 10), vec![10]);
        assert!(matches!(err, Err(TrainError::BatchContract { .. })));
    }

    #[test]
    fn test_decollate_trims_target() {
        let batch = Batch::new(tensors(2, 1, 12), tensors(2, 3, 10), vec![10, 4]).unwrap();
        let (x, y) = batch.decollate(1).unwrap();
        assert_eq!(x.dims(), &[1, 12]);
        assert_eq!(y.dims(), &[3, 4]);
    }
}
