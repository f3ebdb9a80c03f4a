//! Trainer configuration.
//!
//! Serializable so an outer CLI or experiment runner can load it from
//! disk, validated at build time so every structural mistake (empty
//! criterion list, window sizes that cannot produce a gradient step,
//! unknown criterion identifier) fails before training starts.

use serde::{Deserialize, Serialize};

use crate::error::{TrainError, TrainResult};
use crate::registry::CriterionRegistry;
use crate::schedule::ScheduleConfig;

/// One declared loss criterion: registry identifier plus weight.
///
/// A weight of exactly zero keeps the criterion's slot in the loss
/// vector but skips its computation entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionSpec {
    /// Identifier resolved against the criterion registry.
    pub id: String,
    /// Multiplier applied to the length-normalized loss sum.
    pub weight: f64,
}

/// Full trainer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Model name, used for checkpoint file naming.
    pub model_name: String,
    /// Declared criteria in loss-vector order.
    pub criteria: Vec<CriterionSpec>,
    /// Target window length per gradient step.
    pub l_target: usize,
    /// Input window length; may exceed `l_target` when the model needs
    /// context beyond the target span.
    pub l_input: usize,
    /// Total number of epochs.
    pub n_epochs: usize,
    /// Peak learning rate fed to the restart schedule.
    pub learning_rate: f64,
    /// Decoupled weight decay.
    pub weight_decay: f64,
    /// Restart-schedule shape.
    pub schedule: ScheduleConfig,
    /// Epochs between checkpoints; 0 disables periodic saving.
    pub save_period: usize,
}

impl TrainerConfig {
    /// Starts a builder with the defaults below.
    #[must_use]
    pub fn builder() -> TrainerConfigBuilder {
        TrainerConfigBuilder::default()
    }

    /// Checks every criterion identifier against `registry`.
    pub fn validate_criteria(&self, registry: &CriterionRegistry) -> TrainResult<()> {
        for spec in &self.criteria {
            if !registry.contains(&spec.id) {
                // Resolve through the registry so the error names the
                // known identifiers.
                registry.build(&spec.id)?;
            }
        }
        Ok(())
    }
}

/// Builder for [`TrainerConfig`].
///
/// # Defaults
///
/// | Field | Default |
/// |---|---|
/// | `model_name` | `"model"` |
/// | `criteria` | `mse` with weight 1.0 |
/// | `l_target` | 4096 |
/// | `l_input` | 4096 |
/// | `n_epochs` | 60 |
/// | `learning_rate` | 5e-4 |
/// | `weight_decay` | 1e-5 |
/// | `save_period` | 10 |
#[derive(Debug, Clone)]
pub struct TrainerConfigBuilder {
    config: TrainerConfig,
}

impl Default for TrainerConfigBuilder {
    fn default() -> Self {
        Self {
            config: TrainerConfig {
                model_name: "model".to_string(),
                criteria: vec![CriterionSpec {
                    id: "mse".to_string(),
                    weight: 1.0,
                }],
                l_target: 4096,
                l_input: 4096,
                n_epochs: 60,
                learning_rate: 5e-4,
                weight_decay: 1e-5,
                schedule: ScheduleConfig::default(),
                save_period: 10,
            },
        }
    }
}

impl TrainerConfigBuilder {
    /// Sets the model name.
    #[must_use]
    pub fn model_name(mut self, name: impl Into<String>) -> Self {
        self.config.model_name = name.into();
        self
    }

    /// Replaces the declared criteria.
    #[must_use]
    pub fn criteria(mut self, criteria: Vec<CriterionSpec>) -> Self {
        self.config.criteria = criteria;
        self
    }

    /// Appends one criterion declaration.
    #[must_use]
    pub fn criterion(mut self, id: impl Into<String>, weight: f64) -> Self {
        self.config.criteria.push(CriterionSpec {
            id: id.into(),
            weight,
        });
        self
    }

    /// Clears the default criterion list.
    #[must_use]
    pub fn no_default_criteria(mut self) -> Self {
        self.config.criteria.clear();
        self
    }

    /// Sets the target window length.
    #[must_use]
    pub fn l_target(mut self, l: usize) -> Self {
        self.config.l_target = l;
        self
    }

    /// Sets the input window length.
    #[must_use]
    pub fn l_input(mut self, l: usize) -> Self {
        self.config.l_input = l;
        self
    }

    /// Sets the epoch count.
    #[must_use]
    pub fn n_epochs(mut self, n: usize) -> Self {
        self.config.n_epochs = n;
        self
    }

    /// Sets the peak learning rate.
    #[must_use]
    pub fn learning_rate(mut self, lr: f64) -> Self {
        self.config.learning_rate = lr;
        self
    }

    /// Sets the decoupled weight decay.
    #[must_use]
    pub fn weight_decay(mut self, wd: f64) -> Self {
        self.config.weight_decay = wd;
        self
    }

    /// Sets the restart-schedule shape.
    #[must_use]
    pub fn schedule(mut self, schedule: ScheduleConfig) -> Self {
        self.config.schedule = schedule;
        self
    }

    /// Sets the checkpoint period in epochs (0 disables).
    #[must_use]
    pub fn save_period(mut self, epochs: usize) -> Self {
        self.config.save_period = epochs;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> TrainResult<TrainerConfig> {
        let config = self.config;
        if config.criteria.is_empty() {
            return Err(TrainError::Config {
                detail: "at least one criterion must be declared".to_string(),
            });
        }
        if config.criteria.iter().any(|c| !c.weight.is_finite() || c.weight < 0.0) {
            return Err(TrainError::Config {
                detail: "criterion weights must be finite and non-negative".to_string(),
            });
        }
        if config.l_target == 0 {
            return Err(TrainError::Config {
                detail: "l_target must be positive".to_string(),
            });
        }
        if config.l_input < config.l_target {
            return Err(TrainError::Config {
                detail: format!(
                    "l_input ({}) must cover at least the target window ({})",
                    config.l_input, config.l_target
                ),
            });
        }
        if config.n_epochs == 0 {
            return Err(TrainError::Config {
                detail: "n_epochs must be positive".to_string(),
            });
        }
        if !(config.learning_rate.is_finite() && config.learning_rate > 0.0) {
            return Err(TrainError::Config {
                detail: format!(
                    "learning rate must be positive and finite, got {}",
                    config.learning_rate
                ),
            });
        }
        if !(config.weight_decay.is_finite() && config.weight_decay >= 0.0) {
            return Err(TrainError::Config {
                detail: format!(
                    "weight decay must be non-negative and finite, got {}",
                    config.weight_decay
                ),
            });
        }
        Ok(config)
    }
}
