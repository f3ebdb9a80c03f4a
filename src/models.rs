//! Reference model for validation and tests.
//!
//! A small stack of 1-D convolutions mapping `(batch, channels_in,
//! time)` to `(batch, channels_out, time')` with `time' >= time`, as
//! the model contract requires (callers truncate). Real runs plug in
//! their own [`crate::Model`] implementation; this one exists so the
//! loop, loss, and checkpoint paths can be exercised end to end.

use candle_core::Tensor;
use candle_nn::{conv1d, Conv1d, Conv1dConfig, Module, VarBuilder};

use crate::error::TrainResult;
use crate::{Mode, Model};

/// Architecture parameters for [`ConvRegressor`].
#[derive(Debug, Clone, Copy)]
pub struct ConvRegressorConfig {
    /// Input channel count.
    pub channels_in: usize,
    /// Output channel count.
    pub channels_out: usize,
    /// Hidden channel count.
    pub hidden: usize,
    /// Convolution kernel size.
    pub kernel_size: usize,
}

impl Default for ConvRegressorConfig {
    fn default() -> Self {
        Self {
            channels_in: 1,
            channels_out: 1,
            hidden: 8,
            kernel_size: 3,
        }
    }
}

/// Two-layer convolutional waveform regressor.
pub struct ConvRegressor {
    conv_in: Conv1d,
    conv_out: Conv1d,
    mode: Mode,
}

impl ConvRegressor {
    /// Builds the model, registering its parameters under `vb`.
    pub fn new(config: ConvRegressorConfig, vb: VarBuilder) -> TrainResult<Self> {
        if config.kernel_size == 0 {
            return Err(crate::error::TrainError::Config {
                detail: "kernel size must be at least 1".to_string(),
            });
        }
        // Symmetric padding of kernel_size - 1 makes each layer's
        // output longer than its input, satisfying the overproduction
        // side of the model contract.
        let conv_cfg = || Conv1dConfig {
            padding: config.kernel_size - 1,
            ..Default::default()
        };
        let conv_in = conv1d(
            config.channels_in,
            config.hidden,
            config.kernel_size,
            conv_cfg(),
            vb.pp("conv_in"),
        )?;
        let conv_out = conv1d(
            config.hidden,
            config.channels_out,
            config.kernel_size,
            conv_cfg(),
            vb.pp("conv_out"),
        )?;
        Ok(Self {
            conv_in,
            conv_out,
            mode: Mode::Train,
        })
    }

    /// Current train/eval mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }
}

impl Model for ConvRegressor {
    fn predict(&self, x: &Tensor) -> TrainResult<Tensor> {
        let hidden = self.conv_in.forward(x)?.relu()?;
        Ok(self.conv_out.forward(&hidden)?)
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }
}
