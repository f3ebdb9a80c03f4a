//! # segwave-trainer-rs
//!
//! Segment-wise truncated-backprop training for waveform-to-waveform
//! regression models over variable-length sequences.
//!
//! ## Overview
//!
//! Long audio sequences do not fit a single backward pass, and padded
//! batches of unequal lengths silently corrupt loss averages when the
//! padding leaks into the normalization. This crate drives training in
//! fixed-size temporal windows: the active sub-batch shrinks as shorter
//! sequences complete, every loss term is normalized by true valid
//! lengths, and a cosine-restart learning-rate schedule advances on
//! fractional epoch positions.
//!
//! ```text
//!   t=0        t=l         t=2l        t=3l
//!   ┌──────────┬───────────┬───────────┐
//!   │ sample 0 │ sample 0  │ sample 0  │   longest sequence
//!   │ sample 1 │ sample 1  │░░░░░░░░░░░│   finished after 2 windows
//!   │ sample 2 │░░░░░░░░░░░│░░░░░░░░░░░│   finished after 1 window
//!   └──────────┴───────────┴───────────┘
//!        ▲ one forward/backward/update per window,
//!          over the still-active rows only
//! ```
//!
//! The model itself, the data pipeline, and the metric sink stay
//! external: they plug in through the [`Model`], [`SampleWriter`], and
//! batch contracts below, with [`Optimizer`] implemented by the
//! built-in [`optim::Adam`] or a caller-supplied replacement.
//!
//! ## Quick start
//!
//! ```no_run
//! use candle_core::{DType, Device};
//! use candle_nn::{VarBuilder, VarMap};
//! use segwave_trainer_rs::models::{ConvRegressor, ConvRegressorConfig};
//! use segwave_trainer_rs::normalize::{Normalization, NormalizationPair};
//! use segwave_trainer_rs::{Trainer, TrainerConfig};
//!
//! # fn run(train_set: &[segwave_trainer_rs::Batch],
//! #        valid_set: &[segwave_trainer_rs::Batch],
//! #        writer: &mut impl segwave_trainer_rs::SampleWriter)
//! #        -> segwave_trainer_rs::TrainResult<()> {
//! let device = Device::Cpu;
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
//! let model = ConvRegressor::new(ConvRegressorConfig::default(), vb)?;
//!
//! let norms = NormalizationPair {
//!     input: Normalization::fit(train_set.iter().map(|b| &b.x))?,
//!     target: Normalization::fit(train_set.iter().map(|b| &b.y))?,
//! };
//!
//! let config = TrainerConfig::builder()
//!     .criterion("l1", 0.5)
//!     .l_target(4096)
//!     .l_input(4096)
//!     .build()?;
//!
//! let mut trainer = Trainer::new(model, varmap, norms, config, device)?;
//! trainer.train(train_set, valid_set, writer, "runs/denoise".as_ref(), 0)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`config`] - trainer configuration and builder
//! - [`error`] - error taxonomy
//! - [`batch`] - padded ragged batch contract
//! - [`normalize`] - invertible per-channel normalization
//! - [`mask`] - valid-length clipping for temporal windows
//! - [`loss`] - weighted multi-criterion loss
//! - [`registry`] - criterion registry
//! - [`schedule`] - cosine annealing with warm restarts
//! - [`metrics`] - per-epoch loss accumulation
//! - [`runner`] - the segmented window loop
//! - [`validate`] - whole-sequence validation
//! - [`optim`] - Adam with serializable state
//! - [`checkpoint`] - model/optimizer checkpoint pair
//! - [`models`] - reference model for validation
//! - [`trainer`] - top-level orchestration

#![warn(missing_docs)]
#![deny(unsafe_code)]
// Length-to-float casts are pervasive in loss normalization.
#![allow(clippy::cast_precision_loss)]

pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod loss;
pub mod mask;
pub mod metrics;
pub mod models;
pub mod normalize;
pub mod optim;
pub mod registry;
pub mod runner;
pub mod schedule;
pub mod trainer;
pub mod validate;

pub use batch::Batch;
pub use config::{CriterionSpec, TrainerConfig};
pub use error::{TrainError, TrainResult};
pub use loss::{LossVector, MultiCriterionLoss};
pub use metrics::LossSummary;
pub use runner::{EpochReport, SegmentedEpochRunner, MIN_WINDOW};
pub use schedule::{ScheduleConfig, ScheduleDriver};
pub use trainer::Trainer;
pub use validate::ValidationRunner;

use candle_core::Tensor;

use crate::optim::OptimizerState;

/// Train/eval switch for models with mode-dependent behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Training behavior (e.g. stochastic regularization active).
    Train,
    /// Deterministic evaluation behavior.
    Eval,
}

/// The model seam.
///
/// Maps an input window `(batch, channels_in, time)` to an output
/// `(batch, channels_out, time')` with `time'` at least the requested
/// target span; callers truncate the surplus. A multi-device fan-out
/// belongs behind this trait: the training loop sees one logical call
/// that returns one synchronized result, and never branches on device
/// count.
pub trait Model: Send {
    /// Forward pass over one input window.
    fn predict(&self, x: &Tensor) -> TrainResult<Tensor>;

    /// Switches mode-dependent behavior. Models without any may keep
    /// the default no-op.
    fn set_mode(&mut self, _mode: Mode) {}
}

/// The optimizer seam.
///
/// One implementation ships in [`optim`]; the trait exists so the loop
/// can be exercised with stubs and so callers can bring their own
/// update rule without touching the runner.
pub trait Optimizer: Send {
    /// Clears any accumulated gradients. Backends that recompute
    /// gradients per backward pass keep the default no-op; the runner
    /// still calls this at the top of every window.
    fn zero_grad(&mut self) {}

    /// Backpropagates `loss` and applies one parameter update.
    fn backward_step(&mut self, loss: &Tensor) -> TrainResult<()>;

    /// The rate the next update will use.
    fn learning_rate(&self) -> f64;

    /// Sets the rate for subsequent updates (driven by the schedule).
    fn set_learning_rate(&mut self, lr: f64);

    /// Serializable snapshot of the full optimizer state.
    fn state(&self) -> TrainResult<OptimizerState>;

    /// Restores a snapshot taken by [`Self::state`]. Shape or name
    /// disagreement with the current parameters is a configuration
    /// mismatch.
    fn load_state(&mut self, state: OptimizerState) -> TrainResult<()>;
}

/// The metric/sample sink seam.
///
/// Persistent storage (event files, databases, plots) lives outside
/// this crate; the loop only pushes scalars, occasional inspection
/// samples, and free-form text through this trait.
pub trait SampleWriter {
    /// Records one scalar under `tag` at `step`.
    fn add_scalar(&mut self, tag: &str, value: f32, step: usize);

    /// Exports named arrays for one inspection sample; may return a
    /// metric vector computed on the way out.
    fn write_one(
        &mut self,
        step: usize,
        arrays: &[(&str, Tensor)],
    ) -> TrainResult<Option<Vec<f32>>>;

    /// Records free-form text under `tag`.
    fn add_text(&mut self, tag: &str, text: &str);

    /// Whether the previously exported sample is still representative,
    /// in which case raw input/target arrays are not re-exported.
    fn reused_sample(&self) -> bool {
        false
    }

    /// Flushes and releases the sink.
    fn close(&mut self) {}
}

/// Convenient single-import surface.
///
/// ```
/// use segwave_trainer_rs::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Batch, Mode, Model, Optimizer, SampleWriter, TrainError, TrainResult, Trainer,
        TrainerConfig,
    };
}
