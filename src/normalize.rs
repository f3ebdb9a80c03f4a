//! Invertible per-channel normalization of waveform tensors.
//!
//! Statistics are fit once from training data (or supplied directly)
//! and then applied as an affine transform to `(batch, channels,
//! time)` tensors. `denormalize` is the exact inverse of `normalize`
//! given the same stored statistics, which validation relies on when
//! exporting model output next to raw targets.

use candle_core::{Device, Tensor, D};

use crate::error::{TrainError, TrainResult};

/// Per-channel mean/std statistics with normalize/denormalize
/// transforms.
#[derive(Debug, Clone)]
pub struct Normalization {
    mean: Tensor,
    std: Tensor,
}

impl Normalization {
    /// Builds a transform from precomputed per-channel statistics.
    ///
    /// Both tensors must be rank 1 with one entry per channel.
    pub fn from_stats(mean: Tensor, std: Tensor) -> TrainResult<Self> {
        if mean.dims() != std.dims() || mean.dims().len() != 1 {
            return Err(TrainError::Config {
                detail: format!(
                    "normalization stats must be rank-1 and congruent, got mean {:?} / std {:?}",
                    mean.dims(),
                    std.dims()
                ),
            });
        }
        Ok(Self { mean, std })
    }

    /// Fits per-channel statistics over a set of `(batch, channels,
    /// time)` tensors in one pass.
    ///
    /// A small variance floor keeps silent channels from producing a
    /// zero divisor; the floor is baked into the stored std, so the
    /// round-trip stays exact.
    pub fn fit<'a, I>(tensors: I) -> TrainResult<Self>
    where
        I: IntoIterator<Item = &'a Tensor>,
    {
        let mut count = 0f64;
        let mut sum: Vec<f64> = Vec::new();
        let mut sum_sq: Vec<f64> = Vec::new();
        let mut device: Option<Device> = None;

        for tensor in tensors {
            let (n, c, t) = tensor.dims3()?;
            if sum.is_empty() {
                sum = vec![0.0; c];
                sum_sq = vec![0.0; c];
                device = Some(tensor.device().clone());
            } else if sum.len() != c {
                return Err(TrainError::Config {
                    detail: format!(
                        "channel count changed while fitting normalization: {} then {}",
                        sum.len(),
                        c
                    ),
                });
            }
            let flat = tensor.transpose(0, 1)?.contiguous()?.reshape((c, n * t))?;
            let s = flat.sum(D::Minus1)?.to_vec1::<f32>()?;
            let s2 = flat.sqr()?.sum(D::Minus1)?.to_vec1::<f32>()?;
            for ch in 0..c {
                sum[ch] += f64::from(s[ch]);
                sum_sq[ch] += f64::from(s2[ch]);
            }
            count += (n * t) as f64;
        }

        let device = device.ok_or_else(|| TrainError::Config {
            detail: "cannot fit normalization from an empty set of tensors".to_string(),
        })?;

        let c = sum.len();
        let mut mean = Vec::with_capacity(c);
        let mut std = Vec::with_capacity(c);
        for ch in 0..c {
            let m = sum[ch] / count;
            let var = (sum_sq[ch] / count - m * m).max(0.0) + 1e-12;
            mean.push(m as f32);
            std.push(var.sqrt() as f32);
        }
        Ok(Self {
            mean: Tensor::from_vec(mean, c, &device)?,
            std: Tensor::from_vec(std, c, &device)?,
        })
    }

    /// Number of channels these statistics cover.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.mean.dims().first().copied().unwrap_or(0)
    }

    /// Moves the statistics to another device.
    pub fn to_device(&self, device: &Device) -> TrainResult<Self> {
        Ok(Self {
            mean: self.mean.to_device(device)?,
            std: self.std.to_device(device)?,
        })
    }

    /// `(x - mean) / std`, broadcast over batch and time.
    pub fn normalize(&self, x: &Tensor) -> TrainResult<Tensor> {
        let (mean, std) = self.broadcastable()?;
        Ok(x.broadcast_sub(&mean)?.broadcast_div(&std)?)
    }

    /// `x * std + mean`, the exact inverse of [`Self::normalize`].
    pub fn denormalize(&self, x: &Tensor) -> TrainResult<Tensor> {
        let (mean, std) = self.broadcastable()?;
        Ok(x.broadcast_mul(&std)?.broadcast_add(&mean)?)
    }

    fn broadcastable(&self) -> TrainResult<(Tensor, Tensor)> {
        let c = self.channels();
        Ok((
            self.mean.reshape((1, c, 1))?,
            self.std.reshape((1, c, 1))?,
        ))
    }
}

/// Input and target statistics, fit independently.
#[derive(Debug, Clone)]
pub struct NormalizationPair {
    /// Statistics for the model input.
    pub input: Normalization,
    /// Statistics for the regression target.
    pub target: Normalization,
}
