//! Top-level training orchestration.
//!
//! Ties the pieces together the way a run script expects to use them:
//! construct once from a validated configuration, optionally resume
//! from a checkpoint, then `train` over epochs. Each epoch runs the
//! segmented window loop over the training set, reports per-criterion
//! scalars, validates over whole sequences, and periodically persists
//! the `(model parameters, optimizer state)` pair.

use std::fs;
use std::path::{Path, PathBuf};

use candle_core::Device;
use candle_nn::VarMap;

use crate::batch::Batch;
use crate::checkpoint::{CheckpointMetadata, TrainingCheckpoint};
use crate::config::TrainerConfig;
use crate::error::TrainResult;
use crate::loss::MultiCriterionLoss;
use crate::metrics::LossSummary;
use crate::normalize::NormalizationPair;
use crate::optim::{Adam, AdamParams};
use crate::registry::CriterionRegistry;
use crate::runner::SegmentedEpochRunner;
use crate::schedule::ScheduleDriver;
use crate::validate::ValidationRunner;
use crate::{Model, Optimizer, SampleWriter};

/// Orchestrates segment-wise training of one model.
pub struct Trainer<M: Model> {
    config: TrainerConfig,
    model: M,
    varmap: VarMap,
    optimizer: Adam,
    schedule: ScheduleDriver,
    loss_fn: MultiCriterionLoss,
    norms: NormalizationPair,
    runner: SegmentedEpochRunner,
    device: Device,
}

impl<M: Model> Trainer<M> {
    /// Builds a trainer using the built-in criterion registry.
    ///
    /// `varmap` must hold the trainable parameters of `model`; the
    /// optimizer and checkpoints operate on it. `norms` are the
    /// externally fit input/target statistics.
    pub fn new(
        model: M,
        varmap: VarMap,
        norms: NormalizationPair,
        config: TrainerConfig,
        device: Device,
    ) -> TrainResult<Self> {
        Self::with_registry(
            model,
            varmap,
            norms,
            config,
            device,
            &CriterionRegistry::with_defaults(),
        )
    }

    /// Builds a trainer resolving criteria against a caller-supplied
    /// registry. Unknown identifiers fail here, before any training.
    pub fn with_registry(
        model: M,
        varmap: VarMap,
        norms: NormalizationPair,
        config: TrainerConfig,
        device: Device,
        registry: &CriterionRegistry,
    ) -> TrainResult<Self> {
        config.validate_criteria(registry)?;
        let criteria = config
            .criteria
            .iter()
            .map(|spec| registry.build(&spec.id))
            .collect::<TrainResult<Vec<_>>>()?;
        let weights = config.criteria.iter().map(|spec| spec.weight).collect();
        let loss_fn = MultiCriterionLoss::new(criteria, weights)?;

        let optimizer = Adam::new(
            &varmap,
            AdamParams {
                lr: config.learning_rate,
                weight_decay: config.weight_decay,
                ..Default::default()
            },
        )?;
        let schedule = ScheduleDriver::new(config.learning_rate, config.schedule.clone())?;
        let norms = NormalizationPair {
            input: norms.input.to_device(&device)?,
            target: norms.target.to_device(&device)?,
        };
        let runner = SegmentedEpochRunner::new(&config);

        Ok(Self {
            config,
            model,
            varmap,
            optimizer,
            schedule,
            loss_fn,
            norms,
            runner,
            device,
        })
    }

    /// Restores model parameters and optimizer state from a checkpoint
    /// and returns the epoch to resume from.
    ///
    /// A parameter-name or shape disagreement with the constructed
    /// model aborts with a configuration mismatch.
    pub fn resume<P: AsRef<Path>>(&mut self, path: P) -> TrainResult<usize> {
        let checkpoint = TrainingCheckpoint::load(path.as_ref())?;
        checkpoint.apply(&self.varmap)?;
        self.optimizer.load_state(checkpoint.optimizer)?;
        tracing::info!(
            path = %path.as_ref().display(),
            epoch = checkpoint.metadata.epoch,
            "restored checkpoint"
        );
        Ok(checkpoint.metadata.epoch + 1)
    }

    /// Trains from `first_epoch` through the configured epoch count.
    ///
    /// Per epoch: segmented training over `train_set`, `loss/train`
    /// scalars (per-criterion tags when several are configured),
    /// whole-sequence validation over `valid_set`, and a checkpoint
    /// under `logdir` every `save_period` epochs.
    pub fn train<W: SampleWriter>(
        &mut self,
        train_set: &[Batch],
        valid_set: &[Batch],
        writer: &mut W,
        logdir: &Path,
        first_epoch: usize,
    ) -> TrainResult<()> {
        let n_train: usize = train_set.iter().map(Batch::len).sum();

        for epoch in first_epoch..self.config.n_epochs {
            let report = self.runner.run_epoch(
                &self.model,
                &mut self.optimizer,
                &mut self.schedule,
                &self.loss_fn,
                &self.norms,
                train_set,
                epoch,
                n_train,
                &self.device,
            )?;

            writer.add_scalar("loss/train", report.summary.total() as f32, epoch);
            if self.loss_fn.len() > 1 {
                for (i, (name, value)) in report.summary.per_criterion.iter().enumerate() {
                    writer.add_scalar(
                        &format!("loss/train/{}_{name}", i + 1),
                        *value as f32,
                        epoch,
                    );
                }
            }

            let valid = ValidationRunner::run(
                &mut self.model,
                &self.loss_fn,
                &self.norms,
                valid_set,
                writer,
                epoch,
                &self.device,
            )?;

            tracing::info!(
                epoch,
                train_loss = report.summary.total(),
                valid_loss = valid.total(),
                lr = report.lr,
                "epoch done"
            );

            if self.config.save_period > 0 && (epoch + 1) % self.config.save_period == 0 {
                self.save_checkpoint(logdir, epoch)?;
            }
        }

        writer.close();
        Ok(())
    }

    /// Runs one validation pass outside the epoch loop.
    pub fn evaluate<W: SampleWriter>(
        &mut self,
        valid_set: &[Batch],
        writer: &mut W,
        epoch: usize,
    ) -> TrainResult<LossSummary> {
        ValidationRunner::run(
            &mut self.model,
            &self.loss_fn,
            &self.norms,
            valid_set,
            writer,
            epoch,
            &self.device,
        )
    }

    /// Serializes the `(model parameters, optimizer state)` pair under
    /// `logdir` and returns the written path.
    pub fn save_checkpoint(&self, logdir: &Path, epoch: usize) -> TrainResult<PathBuf> {
        fs::create_dir_all(logdir)?;
        let metadata = CheckpointMetadata {
            epoch,
            model_name: self.config.model_name.clone(),
            saved_at: chrono::Utc::now(),
        };
        let checkpoint =
            TrainingCheckpoint::capture(&self.varmap, self.optimizer.state()?, metadata)?;
        let path = logdir.join(format!("{}_{epoch}.ckpt", self.config.model_name));
        checkpoint.save(&path)?;
        tracing::info!(path = %path.display(), epoch, "saved checkpoint");
        Ok(path)
    }

    /// The trained model.
    #[must_use]
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Mutable access to the model.
    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// The learning rate the optimizer will use next.
    #[must_use]
    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }
}
