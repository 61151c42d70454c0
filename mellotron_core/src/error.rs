//! Error types for mellotron_core operations.
//!
//! Provides a plain error enum with no external dependencies so the core
//! algorithms stay independent of any tensor library.

use core::fmt;

/// Error types that can occur while collating samples or validating schedules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Two samples disagree on a fixed dimension of the same field.
    ShapeMismatch {
        /// The sample field being collated.
        field: &'static str,
        /// Index of the offending sample within the batch.
        index: usize,
        /// Dimension established by the first sample.
        expected: usize,
        /// Dimension found on the offending sample.
        got: usize,
    },
    /// A field present on the first sample is missing from a later one.
    MissingField {
        /// The sample field.
        field: &'static str,
        /// Index of the sample that lacks it.
        index: usize,
    },
    /// Collation was requested for zero samples.
    EmptyBatch,
    /// A reduction-window schedule violates ordering rules.
    InvalidSchedule {
        /// Position of the offending entry.
        index: usize,
        /// Description of the violation.
        reason: &'static str,
    },
    /// A shard assignment is impossible (rank outside the world).
    InvalidShard {
        /// Requested rank.
        rank: usize,
        /// World size.
        world_size: usize,
    },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::ShapeMismatch {
                field,
                index,
                expected,
                got,
            } => write!(
                f,
                "shape mismatch in `{}` at sample {}: expected dimension {}, got {}",
                field, index, expected, got
            ),
            CoreError::MissingField { field, index } => {
                write!(f, "sample {} is missing field `{}`", index, field)
            }
            CoreError::EmptyBatch => write!(f, "cannot collate an empty batch"),
            CoreError::InvalidSchedule { index, reason } => {
                write!(f, "invalid reduction window at entry {}: {}", index, reason)
            }
            CoreError::InvalidShard { rank, world_size } => {
                write!(f, "rank {} is outside a world of size {}", rank, world_size)
            }
        }
    }
}

impl std::error::Error for CoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_shape_mismatch() {
        let err = CoreError::ShapeMismatch {
            field: "mel",
            index: 3,
            expected: 80,
            got: 40,
        };
        assert_eq!(
            err.to_string(),
            "shape mismatch in `mel` at sample 3: expected dimension 80, got 40"
        );
    }

    #[test]
    fn test_display_schedule() {
        let err = CoreError::InvalidSchedule {
            index: 1,
            reason: "until_step must increase",
        };
        assert!(err.to_string().contains("entry 1"));
    }
}
