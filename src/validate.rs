//! Whole-sequence validation.
//!
//! Validation never windows: each sample is evaluated over its full
//! valid length, with the model in eval mode and the autodiff graph
//! cut before the loss. The mode switch is scoped: training mode is
//! restored when the guard drops, including on an early error return.

use candle_core::{Device, Tensor};

use crate::batch::Batch;
use crate::error::TrainResult;
use crate::loss::MultiCriterionLoss;
use crate::metrics::{LossSummary, RunningLoss};
use crate::normalize::NormalizationPair;
use crate::{Mode, Model, SampleWriter};

/// Puts a model into eval mode and restores train mode on drop.
pub struct ModeGuard<'a, M: Model + ?Sized> {
    model: &'a mut M,
}

impl<'a, M: Model + ?Sized> ModeGuard<'a, M> {
    /// Switches `model` to [`Mode::Eval`].
    pub fn eval(model: &'a mut M) -> Self {
        model.set_mode(Mode::Eval);
        Self { model }
    }

    /// The guarded model.
    pub fn model(&self) -> &M {
        self.model
    }
}

impl<M: Model + ?Sized> Drop for ModeGuard<'_, M> {
    fn drop(&mut self) {
        self.model.set_mode(Mode::Train);
    }
}

/// Runs one full pass over a validation set.
pub struct ValidationRunner;

impl ValidationRunner {
    /// Evaluates `model` over `batches` and returns the averaged loss.
    ///
    /// For the first batch only, a denormalized sample of the model
    /// output (plus, unless the writer reports its previous sample as
    /// still representative, the raw input/target) is exported through
    /// `writer`. Scalars `loss/valid` (and per-criterion tags when more
    /// than one criterion is configured) are written at `epoch`.
    pub fn run<M, W>(
        model: &mut M,
        loss_fn: &MultiCriterionLoss,
        norms: &NormalizationPair,
        batches: &[Batch],
        writer: &mut W,
        epoch: usize,
        device: &Device,
    ) -> TrainResult<LossSummary>
    where
        M: Model + ?Sized,
        W: SampleWriter + ?Sized,
    {
        let guard = ModeGuard::eval(model);
        let mut running = RunningLoss::new(loss_fn.names());
        let mut n_samples = 0usize;

        for (i_batch, batch) in batches.iter().enumerate() {
            let batch = batch.to_device(device)?;
            let x = norms.input.normalize(&batch.x)?;
            let y = norms.target.normalize(&batch.y)?;

            // Inference only: cut the graph so no gradient state is
            // kept across the pass.
            let output = guard.model().predict(&x)?.detach();
            let t_y = y.dims3()?.2;
            let output = output.narrow(2, 0, t_y)?;

            let loss = loss_fn.compute(&y, &output, batch.t_ys())?;
            running.accumulate(&loss)?;
            n_samples += batch.len();

            if i_batch == 0 {
                Self::export_sample(&batch, &output, norms, writer, epoch)?;
            }

            tracing::debug!(epoch, batch = i_batch, "validation batch done");
        }

        let summary = running.averaged(n_samples);
        writer.add_scalar("loss/valid", summary.total() as f32, epoch);
        if loss_fn.len() > 1 {
            for (i, (name, value)) in summary.per_criterion.iter().enumerate() {
                writer.add_scalar(&format!("loss/valid/{}_{name}", i + 1), *value as f32, epoch);
            }
        }
        Ok(summary)
    }

    /// Exports the first sample of the first batch for inspection.
    fn export_sample<W>(
        batch: &Batch,
        output: &Tensor,
        norms: &NormalizationPair,
        writer: &mut W,
        epoch: usize,
    ) -> TrainResult<()>
    where
        W: SampleWriter + ?Sized,
    {
        let t_first = batch.t_ys()[0];
        let out = output.narrow(0, 0, 1)?.narrow(2, 0, t_first)?;
        let out = norms.target.denormalize(&out)?.squeeze(0)?;

        let mut arrays: Vec<(&str, Tensor)> = vec![("out", out)];
        if !writer.reused_sample() {
            let (x_raw, y_raw) = batch.decollate(0)?;
            arrays.push(("x", x_raw));
            arrays.push(("y", y_raw));
        }
        writer.write_one(epoch, &arrays)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrainError;
    use crate::loss::SumSquaredError;
    use crate::normalize::Normalization;
    use candle_core::DType;
    use std::cell::RefCell;

    struct TestModel {
        mode: Mode,
        fail: bool,
        last_mode_at_predict: RefCell<Option<Mode>>,
    }

    impl TestModel {
        fn new(fail: bool) -> Self {
            Self {
                mode: Mode::Train,
                fail,
                last_mode_at_predict: RefCell::new(None),
            }
        }
    }

    impl Model for TestModel {
        fn predict(&self, x: &Tensor) -> TrainResult<Tensor> {
            *self.last_mode_at_predict.borrow_mut() = Some(self.mode);
            if self.fail {
                return Err(TrainError::Config {
                    detail: "synthetic failure".to_string(),
                });
            }
            Ok(x.clone())
        }
        fn set_mode(&mut self, mode: Mode) {
            self.mode = mode;
        }
    }

    struct RecordingWriter {
        scalars: Vec<(String, f32, usize)>,
        writes: Vec<Vec<String>>,
        reuse: bool,
    }

    impl RecordingWriter {
        fn new(reuse: bool) -> Self {
            Self {
                scalars: Vec::new(),
                writes: Vec::new(),
                reuse,
            }
        }
    }

    impl SampleWriter for RecordingWriter {
        fn add_scalar(&mut self, tag: &str, value: f32, step: usize) {
            self.scalars.push((tag.to_string(), value, step));
        }
        fn write_one(
            &mut self,
            _step: usize,
            arrays: &[(&str, Tensor)],
        ) -> TrainResult<Option<Vec<f32>>> {
            self.writes
                .push(arrays.iter().map(|(name, _)| name.to_string()).collect());
            Ok(None)
        }
        fn add_text(&mut self, _tag: &str, _text: &str) {}
        fn reused_sample(&self) -> bool {
            self.reuse
        }
    }

    fn identity_norms() -> NormalizationPair {
        let device = Device::Cpu;
        let norm = Normalization::from_stats(
            Tensor::zeros(1, DType::F32, &device).unwrap(),
            Tensor::ones(1, DType::F32, &device).unwrap(),
        )
        .unwrap();
        NormalizationPair {
            input: norm.clone(),
            target: norm,
        }
    }

    fn batches() -> Vec<Batch> {
        let device = Device::Cpu;
        let x = Tensor::ones((2, 1, 8), DType::F32, &device).unwrap();
        let y = Tensor::zeros((2, 1, 8), DType::F32, &device).unwrap();
        vec![
            Batch::new(x.clone(), y.clone(), vec![8, 6]).unwrap(),
            Batch::new(x, y, vec![8, 8]).unwrap(),
        ]
    }

    fn loss_fn() -> MultiCriterionLoss {
        MultiCriterionLoss::new(vec![Box::new(SumSquaredError)], vec![1.0]).unwrap()
    }

    #[test]
    fn test_eval_mode_used_and_train_restored() {
        let mut model = TestModel::new(false);
        let mut writer = RecordingWriter::new(false);
        ValidationRunner::run(
            &mut model,
            &loss_fn(),
            &identity_norms(),
            &batches(),
            &mut writer,
            0,
            &Device::Cpu,
        )
        .unwrap();
        assert_eq!(*model.last_mode_at_predict.borrow(), Some(Mode::Eval));
        assert_eq!(model.mode, Mode::Train);
    }

    #[test]
    fn test_train_mode_restored_on_error() {
        let mut model = TestModel::new(true);
        let mut writer = RecordingWriter::new(false);
        let result = ValidationRunner::run(
            &mut model,
            &loss_fn(),
            &identity_norms(),
            &batches(),
            &mut writer,
            0,
            &Device::Cpu,
        );
        assert!(result.is_err());
        assert_eq!(model.mode, Mode::Train);
    }

    #[test]
    fn test_first_batch_exports_once() {
        let mut model = TestModel::new(false);
        let mut writer = RecordingWriter::new(false);
        ValidationRunner::run(
            &mut model,
            &loss_fn(),
            &identity_norms(),
            &batches(),
            &mut writer,
            3,
            &Device::Cpu,
        )
        .unwrap();
        assert_eq!(writer.writes.len(), 1);
        assert_eq!(writer.writes[0], vec!["out", "x", "y"]);
        assert_eq!(writer.scalars.len(), 1);
        assert_eq!(writer.scalars[0].0, "loss/valid");
        assert_eq!(writer.scalars[0].2, 3);
    }

    #[test]
    fn test_reused_sample_skips_raw_arrays() {
        let mut model = TestModel::new(false);
        let mut writer = RecordingWriter::new(true);
        ValidationRunner::run(
            &mut model,
            &loss_fn(),
            &identity_norms(),
            &batches(),
            &mut writer,
            0,
            &Device::Cpu,
        )
        .unwrap();
        assert_eq!(writer.writes[0], vec!["out"]);
    }

    #[test]
    fn test_average_is_per_sample() {
        let mut model = TestModel::new(false);
        let mut writer = RecordingWriter::new(false);
        let summary = ValidationRunner::run(
            &mut model,
            &loss_fn(),
            &identity_norms(),
            &batches(),
            &mut writer,
            0,
            &Device::Cpu,
        )
        .unwrap();
        // Identity model on ones against zero target: every valid
        // timestep contributes 1.0, each sample normalizes to 1.0, and
        // four samples average back to 1.0.
        assert!((summary.total() - 1.0).abs() < 1e-5);
    }
}
