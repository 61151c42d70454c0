//! # mellotron_train
//!
//! Burn training driver for Tacotron2/Mellotron text-to-spectrogram models.
//!
//! This crate turns per-sample features from `mellotron_core` into padded
//! tensor batches and runs the full training loop around any model
//! implementing [`model::TextToMelModel`].
//!
//! ## Features
//!
//! - **Batching**: `Collate` builds `TextMelBatch` tensors, absent fields stay `None`
//! - **Gradual training**: reduction-window curriculum with loader rebuilds
//! - **Loss**: mel MSE (pre and post postnet) plus weighted gate cross-entropy
//! - **Strategies**: full precision or dynamic loss scaling, single or data-parallel
//! - **Checkpoints**: versioned bincode files with legacy key migration
//! - **Logging**: scalar and media events through a pluggable `LogSink`
//!
//! ## Quick Start
//!
//! ```ignore
//! use mellotron_train::prelude::*;
//! use burn::backend::{Autodiff, NdArray};
//!
//! type MyBackend = Autodiff<NdArray>;
//!
//! let device = Default::default();
//! let config = TrainingConfig::new().with_epochs(10);
//!
//! let model = ReferenceTacotronConfig::new().init::<MyBackend>(&device);
//! let optimizer = OptimizerConfig::from_training(&config).init();
//!
//! let mut trainer = Trainer::<MyBackend>::new(config, device)?;
//! let model = trainer.fit(model, optimizer, &train_set, &val_set)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! SampleDataset ──► SampleLoader ──► Collate ──► TextMelBatch
//!                        ▲                            │
//!      ReductionWindowScheduler               TextToMelModel
//!                        │                            │
//!                     Trainer ◄── Tacotron2Loss ◄─────┘
//!                        │
//!         ExecutionStrategy / Checkpoint / LogSink
//! ```
//!
//! ## Feature Flags
//!
//! - `std` (default): Standard library support
//! - `ndarray` (default): CPU backend using ndarray
//! - `wgpu`: GPU acceleration via WebGPU

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod data;
pub mod error;
pub mod loss;
pub mod model;
pub mod training;

// Re-export key types for convenience
pub use config::{LossScaleConfig, TrainingConfig};
pub use error::{Result, TrainError};
pub use loss::Tacotron2Loss;
pub use model::{ReferenceTacotron, ReferenceTacotronConfig, StateDict, TextToMelModel};
pub use training::{ExecutionStrategy, TextMelBatch, Trainer};

// Re-export from mellotron_core for convenience
pub use mellotron_core::{Matrix, ReductionWindow, Sample};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{LossScaleConfig, TrainingConfig};
    pub use crate::data::{DebugSubset, InMemorySampleDataset, SampleDataset, SampleLoader};
    pub use crate::error::{Result, TrainError};
    pub use crate::loss::{LossOutput, Tacotron2Loss};
    pub use crate::model::{
        InferenceInputs, InferenceOutput, ModelInputs, ModelOutput, ModelTargets, ParamState,
        ReferenceTacotron, ReferenceTacotronConfig, StateDict, TextToMelModel,
    };
    pub use crate::training::{
        find_latest_checkpoint, load_checkpoint, save_checkpoint, Checkpoint, Collate,
        Collective, Curve, ExecutionStrategy, GradScaler, LocalCollective, LogEvent,
        LogRecordSink, LogSink, MemorySink, NullSink, OptimizerConfig, Precision, SampleLogger,
        StepReport, TextMelBatch, Trainer, UtteranceSource, ValidationReport, Vocoder,
    };

    pub use mellotron_core::prelude::*;
}
