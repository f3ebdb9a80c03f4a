//! Checkpoint save/restore for model parameters and optimizer state.
//!
//! A checkpoint is one JSON document holding the named model weights
//! and the optimizer state together, plus a small metadata header.
//! Restoring requires an exact match between the checkpoint's
//! parameter names/shapes and the currently constructed model; any
//! disagreement is a fatal configuration mismatch, surfaced at load
//! time before a single training step runs.
//!
//! Checkpoints are only written at epoch boundaries, which is also the
//! only point a run may be stopped without corrupting optimizer state.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use candle_core::Tensor;
use candle_nn::VarMap;
use serde::{Deserialize, Serialize};

use crate::error::{TrainError, TrainResult};
use crate::optim::OptimizerState;

const CHECKPOINT_VERSION: u32 = 1;

/// Header describing when and where a checkpoint was taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Epoch after which the checkpoint was written.
    pub epoch: usize,
    /// Model name from the configuration, for file bookkeeping.
    pub model_name: String,
    /// UTC wall-clock time of the save.
    pub saved_at: chrono::DateTime<chrono::Utc>,
}

/// One named weight: shape plus flattened data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorBlob {
    /// Parameter shape.
    pub shape: Vec<usize>,
    /// Row-major flattened values.
    pub data: Vec<f32>,
}

/// The serialized pair `(model parameters, optimizer state)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingCheckpoint {
    /// Format version, checked on load.
    pub version: u32,
    /// Save-time metadata.
    pub metadata: CheckpointMetadata,
    /// Named model parameters.
    pub tensors: BTreeMap<String, TensorBlob>,
    /// Full optimizer state.
    pub optimizer: OptimizerState,
}

impl TrainingCheckpoint {
    /// Captures the current parameters of `varmap` together with
    /// `optimizer_state`.
    pub fn capture(
        varmap: &VarMap,
        optimizer_state: OptimizerState,
        metadata: CheckpointMetadata,
    ) -> TrainResult<Self> {
        let data = lock_params(varmap)?;
        let mut tensors = BTreeMap::new();
        for (name, var) in data.iter() {
            tensors.insert(
                name.clone(),
                TensorBlob {
                    shape: var.dims().to_vec(),
                    data: var.flatten_all()?.to_vec1::<f32>()?,
                },
            );
        }
        Ok(Self {
            version: CHECKPOINT_VERSION,
            metadata,
            tensors,
            optimizer: optimizer_state,
        })
    }

    /// Writes the checkpoint as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> TrainResult<()> {
        let file = File::create(path.as_ref())?;
        serde_json::to_writer(BufWriter::new(file), self).map_err(|e| TrainError::Checkpoint {
            reason: format!("failed to serialize checkpoint: {e}"),
        })
    }

    /// Reads a checkpoint written by [`Self::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> TrainResult<Self> {
        let file = File::open(path.as_ref())?;
        let checkpoint: Self =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| TrainError::Checkpoint {
                reason: format!("failed to deserialize checkpoint: {e}"),
            })?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(TrainError::Checkpoint {
                reason: format!(
                    "unsupported checkpoint version {} (expected {CHECKPOINT_VERSION})",
                    checkpoint.version
                ),
            });
        }
        Ok(checkpoint)
    }

    /// Copies the stored weights into the model's variables.
    ///
    /// Every parameter of the constructed model must be present with
    /// an identical shape, and the checkpoint must not carry extras.
    pub fn apply(&self, varmap: &VarMap) -> TrainResult<()> {
        let data = lock_params(varmap)?;
        for name in self.tensors.keys() {
            if !data.contains_key(name) {
                return Err(TrainError::ConfigurationMismatch {
                    name: name.clone(),
                    found: "a parameter the model does not have".to_string(),
                    expected: "no such parameter".to_string(),
                });
            }
        }
        for (name, var) in data.iter() {
            let blob = self
                .tensors
                .get(name)
                .ok_or_else(|| TrainError::ConfigurationMismatch {
                    name: name.clone(),
                    found: "missing from checkpoint".to_string(),
                    expected: format!("{:?}", var.dims()),
                })?;
            if blob.shape != var.dims() {
                return Err(TrainError::ConfigurationMismatch {
                    name: name.clone(),
                    found: format!("{:?}", blob.shape),
                    expected: format!("{:?}", var.dims()),
                });
            }
            let tensor = Tensor::from_vec(blob.data.clone(), blob.shape.clone(), var.device())?;
            var.set(&tensor)?;
        }
        Ok(())
    }
}

fn lock_params(
    varmap: &VarMap,
) -> TrainResult<std::sync::MutexGuard<'_, std::collections::HashMap<String, candle_core::Var>>> {
    varmap.data().lock().map_err(|_| TrainError::Checkpoint {
        reason: "parameter map lock poisoned".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::{Adam, AdamParams};
    use crate::Optimizer;
    use candle_core::{DType, Device};

    fn metadata() -> CheckpointMetadata {
        CheckpointMetadata {
            epoch: 4,
            model_name: "test".to_string(),
            saved_at: chrono::Utc::now(),
        }
    }

    fn varmap_with(name: &str, rows: usize) -> VarMap {
        let varmap = VarMap::new();
        varmap
            .get(
                (rows, 2),
                name,
                candle_nn::init::DEFAULT_KAIMING_NORMAL,
                DType::F32,
                &Device::Cpu,
            )
            .unwrap();
        varmap
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt.json");

        let varmap = varmap_with("w", 3);
        let adam = Adam::new(&varmap, AdamParams::default()).unwrap();
        let checkpoint =
            TrainingCheckpoint::capture(&varmap, adam.state().unwrap(), metadata()).unwrap();
        checkpoint.save(&path).unwrap();

        let loaded = TrainingCheckpoint::load(&path).unwrap();
        assert_eq!(loaded.metadata.epoch, 4);
        assert_eq!(loaded.tensors["w"].shape, vec![3, 2]);
        assert_eq!(loaded.tensors["w"].data, checkpoint.tensors["w"].data);
    }

    #[test]
    fn test_apply_restores_weights() {
        let source = varmap_with("w", 3);
        let adam = Adam::new(&source, AdamParams::default()).unwrap();
        let checkpoint =
            TrainingCheckpoint::capture(&source, adam.state().unwrap(), metadata()).unwrap();

        let target = varmap_with("w", 3);
        checkpoint.apply(&target).unwrap();
        let restored = target.all_vars()[0]
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert_eq!(restored, checkpoint.tensors["w"].data);
    }

    #[test]
    fn test_apply_rejects_shape_mismatch() {
        let source = varmap_with("w", 3);
        let adam = Adam::new(&source, AdamParams::default()).unwrap();
        let checkpoint =
            TrainingCheckpoint::capture(&source, adam.state().unwrap(), metadata()).unwrap();

        let target = varmap_with("w", 5);
        assert!(matches!(
            checkpoint.apply(&target),
            Err(TrainError::ConfigurationMismatch { .. })
        ));
    }

    #[test]
    fn test_apply_rejects_unknown_parameter() {
        let source = varmap_with("w", 3);
        let adam = Adam::new(&source, AdamParams::default()).unwrap();
        let checkpoint =
            TrainingCheckpoint::capture(&source, adam.state().unwrap(), metadata()).unwrap();

        let target = varmap_with("other", 3);
        assert!(matches!(
            checkpoint.apply(&target),
            Err(TrainError::ConfigurationMismatch { .. })
        ));
    }
}
