//! Segment-wise training over one epoch.
//!
//! Long padded sequences are traversed in fixed-size temporal windows,
//! with one forward/backward/update per window. Because batch lengths
//! are sorted descending, finished sequences accumulate at the front
//! of the batch and the active sub-batch is always a contiguous
//! tail: shrinking it is a cursor advance, not a gather.
//!
//! Windowed backprop bounds memory on long sequences; the minimum
//! window size keeps near-empty tails from producing gradient steps;
//! the schedule advances on fractional epoch positions so warm
//! restarts need not align with epoch boundaries.
//!
//! Model and loss failures propagate unchanged: a retry inside a
//! training loop is not well-defined, so the run terminates instead.

use candle_core::Device;

use crate::batch::Batch;
use crate::config::TrainerConfig;
use crate::error::TrainResult;
use crate::loss::MultiCriterionLoss;
use crate::mask;
use crate::metrics::{LossSummary, RunningLoss};
use crate::normalize::NormalizationPair;
use crate::schedule::ScheduleDriver;
use crate::{Model, Optimizer};

/// Windows whose target extent falls below this are not worth a
/// gradient step; they end the batch's window loop.
pub const MIN_WINDOW: usize = 5;

/// What one epoch produced.
#[derive(Debug, Clone)]
pub struct EpochReport {
    /// Loss sums averaged over all training samples.
    pub summary: LossSummary,
    /// Samples consumed this epoch.
    pub n_samples: usize,
    /// Learning rate after the final schedule step.
    pub lr: f64,
}

/// Drives the window loop for every batch of an epoch.
#[derive(Debug, Clone)]
pub struct SegmentedEpochRunner {
    l_target: usize,
    l_input: usize,
}

impl SegmentedEpochRunner {
    /// Builds a runner from the window sizes in `config`.
    #[must_use]
    pub fn new(config: &TrainerConfig) -> Self {
        Self {
            l_target: config.l_target,
            l_input: config.l_input,
        }
    }

    /// Runs one training epoch.
    ///
    /// Per batch: move to `device`, normalize input and target, run
    /// the window loop, then advance `schedule` to the fractional
    /// position `epoch + samples_seen / n_train_samples` and push the
    /// new rate into `optimizer`.
    #[allow(clippy::too_many_arguments)]
    pub fn run_epoch<M, O>(
        &self,
        model: &M,
        optimizer: &mut O,
        schedule: &mut ScheduleDriver,
        loss_fn: &MultiCriterionLoss,
        norms: &NormalizationPair,
        batches: &[Batch],
        epoch: usize,
        n_train_samples: usize,
        device: &Device,
    ) -> TrainResult<EpochReport>
    where
        M: Model + ?Sized,
        O: Optimizer + ?Sized,
    {
        let mut running = RunningLoss::new(loss_fn.names());
        let mut samples_seen = 0usize;

        for (i_batch, batch) in batches.iter().enumerate() {
            let batch = batch.to_device(device)?;
            let batch = Batch::new(
                norms.input.normalize(&batch.x)?,
                norms.target.normalize(&batch.y)?,
                batch.t_ys().to_vec(),
            )?;

            let last = self.run_batch(model, optimizer, loss_fn, &batch, &mut running)?;

            samples_seen += batch.len();
            let position = epoch as f64 + samples_seen as f64 / n_train_samples.max(1) as f64;
            schedule.step(position);
            optimizer.set_learning_rate(schedule.lr());

            if let Some((values, active)) = last {
                let per_sample: Vec<f32> = values.iter().map(|v| v / active as f32).collect();
                tracing::debug!(
                    epoch,
                    batch = i_batch,
                    lr = schedule.lr(),
                    ?per_sample,
                    "window loop finished"
                );
            }
        }

        Ok(EpochReport {
            summary: running.averaged(n_train_samples),
            n_samples: samples_seen,
            lr: schedule.lr(),
        })
    }

    /// The window loop for one batch. Returns the last window's loss
    /// values and its active sub-batch size, if any window ran.
    fn run_batch<M, O>(
        &self,
        model: &M,
        optimizer: &mut O,
        loss_fn: &MultiCriterionLoss,
        batch: &Batch,
        running: &mut RunningLoss,
    ) -> TrainResult<Option<(Vec<f32>, usize)>>
    where
        M: Model + ?Sized,
        O: Optimizer + ?Sized,
    {
        let (n, _, t_max) = batch.y.dims3()?;
        let t_x = batch.x.dims3()?.2;
        let t_ys = batch.t_ys();

        let mut i_first = 0usize;
        let mut last = None;
        let mut t = 0usize;
        while t < t_max {
            optimizer.zero_grad();

            i_first = mask::first_active(t_ys, t, i_first);
            if i_first == n {
                // Padded beyond the longest sequence; nothing left.
                break;
            }
            let active = n - i_first;

            let y_len = self.l_target.min(t_max - t);
            if y_len < MIN_WINDOW {
                break;
            }
            let x_len = self.l_input.min(t_x - t);

            let seg_y = batch.y.narrow(0, i_first, active)?.narrow(2, t, y_len)?;
            let seg_x = batch.x.narrow(0, i_first, active)?.narrow(2, t, x_len)?;
            let seg_t_ys = mask::clipped_lengths(t, self.l_target, &t_ys[i_first..]);

            // The model may overproduce along time (contract: at least
            // the requested span); trim to the target window. An
            // underproducing model fails the narrow and propagates.
            let output = model.predict(&seg_x)?.narrow(2, 0, y_len)?;

            let loss = loss_fn.compute(&seg_y, &output, &seg_t_ys)?;
            optimizer.backward_step(&loss.total()?)?;

            running.accumulate(&loss)?;
            last = Some((loss.values()?, active));
            t += self.l_target;
        }
        Ok(last)
    }
}
