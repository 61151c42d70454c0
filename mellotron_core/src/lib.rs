//! # mellotron_core
//!
//! Tensor-free building blocks for training Tacotron2/Mellotron-style
//! text-to-spectrogram models.
//!
//! ## Features
//!
//! - **Sample model**: optional, presence-driven per-sample fields
//! - **Host collation**: zero-padded, row-major batch buffers with gate targets
//! - **Gradual training**: validated reduction-window schedule and cursor
//! - **Samplers**: seeded per-epoch shuffles and data-parallel shards
//! - **Alignment metrics**: attention sharpness and diagonal-path scores
//!
//! ## Modules
//!
//! - [`sample`]: `Sample`, `Matrix`, `SampleFields`
//! - [`collate`]: `collate_samples` and the padded buffer types
//! - [`schedule`]: `ReductionWindow`, `ReductionWindowSchedule`, `ReductionWindowScheduler`
//! - [`sampler`]: `IndexSampler`, `Shard`
//! - [`alignment`]: `alignment_metrics`
//! - [`error`]: `CoreError`
//!
//! ## Usage
//!
//! ```
//! use mellotron_core::prelude::*;
//!
//! let samples = vec![
//!     Sample::new().with_text(vec![3, 4, 5]).with_mel(Matrix::zeros(80, 12)),
//!     Sample::new().with_text(vec![6]).with_mel(Matrix::zeros(80, 7)),
//! ];
//! let batch = collate_samples(&samples, 1).unwrap();
//! let mel = batch.mel.unwrap();
//! assert_eq!(mel.max_frames, 12);
//! assert_eq!(mel.lengths, vec![12, 7]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alignment;
pub mod collate;
pub mod error;
pub mod sample;
pub mod sampler;
pub mod schedule;

pub use alignment::{alignment_metrics, AlignmentMetrics, AlignmentShape};
pub use collate::{collate_samples, CollatedSamples};
pub use error::CoreError;
pub use sample::{Matrix, Sample, SampleFields};
pub use sampler::{IndexSampler, Shard};
pub use schedule::{ReductionWindow, ReductionWindowSchedule, ReductionWindowScheduler, WindowSettings};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::alignment::{alignment_metrics, AlignmentMetrics, AlignmentShape};
    pub use crate::collate::{
        collate_samples, fill_gate_row, round_up, CollatedSamples, PaddedF0, PaddedMels,
        PaddedTokens, Stacked,
    };
    pub use crate::error::CoreError;
    pub use crate::sample::{Matrix, Sample, SampleFields};
    pub use crate::sampler::{IndexSampler, Shard};
    pub use crate::schedule::{
        ReductionWindow, ReductionWindowSchedule, ReductionWindowScheduler, WindowSettings,
    };
}
