//! Error types for mellotron_train.

use thiserror::Error;

use mellotron_core::CoreError;

/// Errors that can occur while training.
///
/// Only [`TrainError::Synthesis`] is recovered inside the training loop;
/// every other variant aborts the run.
#[derive(Error, Debug)]
pub enum TrainError {
    /// Invalid or incomplete configuration, detected before training starts.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// Malformed batch input.
    #[error("shape mismatch: {message}")]
    ShapeMismatch {
        /// Description of the mismatch.
        message: String,
    },

    /// The checkpoint does not match any known schema.
    #[error("unrecognized checkpoint format: {message}")]
    CheckpointFormat {
        /// Description of the problem.
        message: String,
    },

    /// Audio synthesis from a predicted spectrogram failed.
    #[error("synthesis failed: {message}")]
    Synthesis {
        /// Description of the failure.
        message: String,
    },

    /// Gradients became NaN or infinite outside loss-scaled training.
    #[error("non-finite gradient norm {norm} at step {step}")]
    NonFiniteGradient {
        /// Global step of the failing update.
        step: usize,
        /// The offending norm.
        norm: f32,
    },

    /// Collation or scheduling error from mellotron_core.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Dataset access failed.
    #[error("dataset error: {message}")]
    Dataset {
        /// Description of the failure.
        message: String,
    },

    /// A collective operation failed or workers disagreed.
    #[error("collective error: {message}")]
    Collective {
        /// Description of the failure.
        message: String,
    },

    /// Tensor data could not be converted.
    #[error("tensor data error: {message}")]
    Tensor {
        /// Description of the failure.
        message: String,
    },

    /// Filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Burn record (optimizer state) error.
    #[error("record error: {0}")]
    Record(#[from] burn::record::RecorderError),

    /// Checkpoint encoding or decoding error.
    #[error("checkpoint codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Config file error.
    #[error("config error: {0}")]
    Config(#[from] burn::config::ConfigError),
}

impl TrainError {
    /// Build a [`TrainError::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Build a [`TrainError::ShapeMismatch`].
    pub fn shape(message: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            message: message.into(),
        }
    }

    /// Build a [`TrainError::CheckpointFormat`].
    pub fn checkpoint_format(message: impl Into<String>) -> Self {
        Self::CheckpointFormat {
            message: message.into(),
        }
    }

    /// Build a [`TrainError::Synthesis`].
    pub fn synthesis(message: impl Into<String>) -> Self {
        Self::Synthesis {
            message: message.into(),
        }
    }

    /// Build a [`TrainError::Tensor`] from a burn data error.
    pub fn tensor(err: impl std::fmt::Debug) -> Self {
        Self::Tensor {
            message: format!("{err:?}"),
        }
    }

    /// Whether this error is recoverable inside the training loop.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Synthesis { .. })
    }
}

/// Result type for mellotron_train operations.
pub type Result<T> = std::result::Result<T, TrainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_converts() {
        let err: TrainError = CoreError::EmptyBatch.into();
        assert!(matches!(err, TrainError::Core(CoreError::EmptyBatch)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_only_synthesis_recoverable() {
        assert!(TrainError::synthesis("too short").is_recoverable());
        assert!(!TrainError::configuration("no rank").is_recoverable());
        assert!(!TrainError::checkpoint_format("no model").is_recoverable());
    }
}
