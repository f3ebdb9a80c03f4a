//! Error types for segment-wise training.
//!
//! The taxonomy follows a fail-fast philosophy: structural problems
//! (checkpoint/model shape disagreement, malformed batches, unknown
//! criterion identifiers) abort immediately with a descriptive error,
//! while numerical faults raised by the tensor backend propagate
//! untouched, since retrying inside a training loop is not well-defined.
//! Benign edge cases (a window shorter than the minimum viable size)
//! are not errors at all; the window loop simply ends.
//!
//! There are deliberately no recovery hooks and no retries anywhere in
//! this crate. Restartability comes from periodic checkpoints at epoch
//! boundaries, not from in-loop error handling.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Debug, Error)]
pub enum TrainError {
    /// A checkpoint does not match the currently constructed model or
    /// optimizer (missing parameter, extra parameter, or shape
    /// disagreement). Fatal: the run must be aborted and reconfigured.
    #[error("configuration mismatch for `{name}`: checkpoint has {found}, model expects {expected}")]
    ConfigurationMismatch {
        /// Name of the offending parameter.
        name: String,
        /// Shape or description found in the checkpoint.
        found: String,
        /// Shape or description the constructed model expects.
        expected: String,
    },

    /// Invalid configuration detected at construction time.
    #[error("configuration error: {detail}")]
    Config {
        /// Description of the configuration issue.
        detail: String,
    },

    /// A batch from the data loader violates the batch contract
    /// (lengths not sorted descending, zero-length sample, dimension
    /// mismatch between tensors and lengths).
    #[error("batch contract violation: {detail}")]
    BatchContract {
        /// Description of the violation.
        detail: String,
    },

    /// A tensor-backend failure (shape mismatch inside the model, NaN
    /// propagation, device errors). Never retried.
    #[error("numerical fault: {0}")]
    Numerical(#[from] candle_core::Error),

    /// Checkpoint serialization or deserialization failed.
    #[error("checkpoint error: {reason}")]
    Checkpoint {
        /// Description of the checkpoint failure.
        reason: String,
    },

    /// Filesystem I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result alias used throughout the crate.
pub type TrainResult<T> = Result<T, TrainError>;
