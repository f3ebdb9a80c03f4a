//! Adam with decoupled weight decay over named model parameters.
//!
//! The stock candle optimizers keep their moment estimates private,
//! which rules out the state round-trip the checkpoint format needs.
//! This implementation uses the same update rule but owns its moments
//! as named tensors, so the full optimizer state serializes next to
//! the model parameters and restores with an exact shape check.

use candle_core::{Tensor, Var};
use candle_nn::VarMap;
use serde::{Deserialize, Serialize};

use crate::error::{TrainError, TrainResult};
use crate::Optimizer;

/// Hyperparameters of the update rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdamParams {
    /// Initial learning rate; the schedule driver overwrites it each
    /// batch.
    pub lr: f64,
    /// Exponential decay for the first moment.
    pub beta1: f64,
    /// Exponential decay for the second moment.
    pub beta2: f64,
    /// Denominator fuzz.
    pub eps: f64,
    /// Decoupled weight decay coefficient.
    pub weight_decay: f64,
}

impl Default for AdamParams {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
        }
    }
}

struct Slot {
    name: String,
    var: Var,
    m: Tensor,
    v: Tensor,
}

/// Adam over the variables of a [`VarMap`].
pub struct Adam {
    slots: Vec<Slot>,
    params: AdamParams,
    lr: f64,
    step_count: u64,
}

impl Adam {
    /// Snapshots the named variables of `varmap` (in name order, so
    /// that saved state maps back deterministically) and initializes
    /// zero moments for each.
    pub fn new(varmap: &VarMap, params: AdamParams) -> TrainResult<Self> {
        let data = varmap.data().lock().map_err(|_| TrainError::Config {
            detail: "parameter map lock poisoned".to_string(),
        })?;
        let mut names: Vec<String> = data.keys().cloned().collect();
        names.sort_unstable();
        let mut slots = Vec::with_capacity(names.len());
        for name in names {
            let var = data[&name].clone();
            let m = var.zeros_like()?;
            let v = var.zeros_like()?;
            slots.push(Slot { name, var, m, v });
        }
        Ok(Self {
            slots,
            lr: params.lr,
            params,
            step_count: 0,
        })
    }

    /// Number of updates applied so far.
    #[must_use]
    pub fn step_count(&self) -> u64 {
        self.step_count
    }
}

impl Optimizer for Adam {
    fn backward_step(&mut self, loss: &Tensor) -> TrainResult<()> {
        let grads = loss.backward()?;
        self.step_count += 1;
        let b1 = self.params.beta1;
        let b2 = self.params.beta2;
        // Bias correction for the fresh moment estimates.
        let bc1 = 1.0 - b1.powi(self.step_count as i32);
        let bc2 = 1.0 - b2.powi(self.step_count as i32);
        for slot in &mut self.slots {
            let Some(grad) = grads.get(&slot.var) else {
                continue;
            };
            let m = ((&slot.m * b1)? + (grad * (1.0 - b1))?)?;
            let v = ((&slot.v * b2)? + (grad.sqr()? * (1.0 - b2))?)?;
            let m_hat = (&m / bc1)?;
            let v_hat = (&v / bc2)?;
            let denom = v_hat.sqrt()?.affine(1.0, self.params.eps)?;
            let mut next = (slot.var.as_tensor() - ((m_hat / denom)? * self.lr)?)?;
            if self.params.weight_decay > 0.0 {
                let decay = (slot.var.as_tensor() * (self.lr * self.params.weight_decay))?;
                next = (next - decay)?;
            }
            slot.var.set(&next)?;
            slot.m = m;
            slot.v = v;
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.lr = lr;
    }

    fn state(&self) -> TrainResult<OptimizerState> {
        let mut moments = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            moments.push(MomentBlob {
                name: slot.name.clone(),
                shape: slot.var.dims().to_vec(),
                m: slot.m.flatten_all()?.to_vec1::<f32>()?,
                v: slot.v.flatten_all()?.to_vec1::<f32>()?,
            });
        }
        Ok(OptimizerState {
            params: self.params,
            lr: self.lr,
            step_count: self.step_count,
            moments,
        })
    }

    fn load_state(&mut self, state: OptimizerState) -> TrainResult<()> {
        if state.moments.len() != self.slots.len() {
            return Err(TrainError::ConfigurationMismatch {
                name: "optimizer".to_string(),
                found: format!("{} moment entries", state.moments.len()),
                expected: format!("{} parameters", self.slots.len()),
            });
        }
        for (slot, blob) in self.slots.iter_mut().zip(&state.moments) {
            if blob.name != slot.name || blob.shape != slot.var.dims() {
                return Err(TrainError::ConfigurationMismatch {
                    name: blob.name.clone(),
                    found: format!("{:?}", blob.shape),
                    expected: format!("`{}` with shape {:?}", slot.name, slot.var.dims()),
                });
            }
            let device = slot.var.device().clone();
            slot.m = Tensor::from_vec(blob.m.clone(), blob.shape.clone(), &device)?;
            slot.v = Tensor::from_vec(blob.v.clone(), blob.shape.clone(), &device)?;
        }
        self.params = state.params;
        self.lr = state.lr;
        self.step_count = state.step_count;
        Ok(())
    }
}

/// Serializable optimizer state: hyperparameters, step count, and one
/// moment pair per parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerState {
    /// Update-rule hyperparameters at save time.
    pub params: AdamParams,
    /// Learning rate at save time (schedule-owned, restored so resume
    /// matches the saved run until the next schedule step).
    pub lr: f64,
    /// Updates applied before the save.
    pub step_count: u64,
    /// Flattened first/second moments per named parameter.
    pub moments: Vec<MomentBlob>,
}

/// Moments for a single parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentBlob {
    /// Parameter name inside the var map.
    pub name: String,
    /// Parameter shape, checked on restore.
    pub shape: Vec<usize>,
    /// Flattened first moment.
    pub m: Vec<f32>,
    /// Flattened second moment.
    pub v: Vec<f32>,
}
