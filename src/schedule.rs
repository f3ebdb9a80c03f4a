//! Cosine annealing with warm restarts over fractional epochs.
//!
//! The learning rate decays along a half cosine from the base rate to
//! a floor, then restarts at full strength. Positions are continuous
//! (`epoch + samples_seen / n_train_samples`), so restarts do not have
//! to align with epoch boundaries. Each cycle can optionally be a
//! fixed integer multiple longer than the previous one.
//!
//! Positions are expected to be non-decreasing across a run. This is
//! documented, not enforced: feeding the driver a position that jumps
//! backwards bends the schedule, it does not raise an error.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::{TrainError, TrainResult};

/// Shape parameters of the restart schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Length of the first cycle, in epochs.
    pub period: f64,
    /// Integer factor by which each cycle is longer than the last.
    /// `1` keeps every cycle the same length.
    pub period_mult: u32,
    /// Learning-rate floor reached at the end of each cycle.
    pub min_lr: f64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            period: 10.0,
            period_mult: 1,
            min_lr: 0.0,
        }
    }
}

/// Pure schedule: position in, learning rate out.
#[derive(Debug, Clone)]
pub struct CosineRestartSchedule {
    base_lr: f64,
    config: ScheduleConfig,
}

impl CosineRestartSchedule {
    /// Builds a schedule peaking at `base_lr`.
    pub fn new(base_lr: f64, config: ScheduleConfig) -> TrainResult<Self> {
        if !(base_lr.is_finite() && base_lr > 0.0) {
            return Err(TrainError::Config {
                detail: format!("base learning rate must be positive and finite, got {base_lr}"),
            });
        }
        if !(config.period.is_finite() && config.period > 0.0) {
            return Err(TrainError::Config {
                detail: format!("schedule period must be positive, got {}", config.period),
            });
        }
        if config.period_mult == 0 {
            return Err(TrainError::Config {
                detail: "schedule period multiplier must be at least 1".to_string(),
            });
        }
        if config.min_lr < 0.0 || config.min_lr > base_lr {
            return Err(TrainError::Config {
                detail: format!(
                    "min_lr must lie in [0, base_lr], got {} with base {base_lr}",
                    config.min_lr
                ),
            });
        }
        Ok(Self { base_lr, config })
    }

    /// Learning rate at a fractional epoch position.
    #[must_use]
    pub fn lr_at(&self, position: f64) -> f64 {
        let pos = position.max(0.0);
        let t_0 = self.config.period;
        let (t_cur, t_i) = if self.config.period_mult <= 1 {
            (pos % t_0, t_0)
        } else {
            // Completed-cycle count n is the largest n with
            // t_0 * (m^n - 1) / (m - 1) <= pos.
            let m = f64::from(self.config.period_mult);
            let n = ((pos / t_0) * (m - 1.0) + 1.0).log(m).floor();
            let mut start = t_0 * (m.powf(n) - 1.0) / (m - 1.0);
            let mut t_i = t_0 * m.powf(n);
            // The log can land one ulp short of an integer exactly at
            // a cycle boundary; re-check against the cycle end.
            if pos - start >= t_i {
                start += t_i;
                t_i *= m;
            }
            (pos - start, t_i)
        };
        let span = self.base_lr - self.config.min_lr;
        self.config.min_lr + span * (1.0 + (PI * t_cur / t_i).cos()) / 2.0
    }
}

/// Current learning rate, owned exclusively by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduleState {
    /// The rate the optimizer should use for its next update.
    pub lr: f64,
}

/// Advances the schedule and owns the resulting rate.
///
/// `step` is called once per training batch; the optimizer reads the
/// updated rate before its next parameter update.
#[derive(Debug, Clone)]
pub struct ScheduleDriver {
    schedule: CosineRestartSchedule,
    state: ScheduleState,
}

impl ScheduleDriver {
    /// Builds a driver positioned at the start of the schedule.
    pub fn new(base_lr: f64, config: ScheduleConfig) -> TrainResult<Self> {
        let schedule = CosineRestartSchedule::new(base_lr, config)?;
        let state = ScheduleState {
            lr: schedule.lr_at(0.0),
        };
        Ok(Self { schedule, state })
    }

    /// Recomputes the owned rate for a fractional epoch position.
    pub fn step(&mut self, position: f64) {
        self.state.lr = self.schedule.lr_at(position);
    }

    /// The rate computed by the most recent `step`.
    #[must_use]
    pub fn lr(&self) -> f64 {
        self.state.lr
    }
}
