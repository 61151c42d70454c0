//! Training infrastructure for text-to-mel models.
//!
//! This module provides:
//! - `Trainer`: the epoch/step state machine
//! - `TextMelBatch` and `Collate`: tensor batches
//! - `ExecutionStrategy`: precision and data-parallel gradient handling
//! - Checkpoint save/load for training resumption
//! - Log sinks, rich sample logging and sampled inference
//! - The validation pass

mod batch;
pub mod checkpoint;
mod distributed;
mod grads;
mod logging;
mod metrics;
mod optimizer;
mod sampling;
mod strategy;
mod trainer;
mod validation;

pub use batch::{Collate, TextMelBatch};
pub use checkpoint::{
    checkpoint_exists, checkpoint_file_path, find_latest_checkpoint, load_checkpoint,
    read_checkpoint_file, save_checkpoint, write_checkpoint_file, Checkpoint, CheckpointFile,
    CheckpointValue, CHECKPOINT_FORMAT_VERSION,
};
pub use distributed::{Collective, LocalCollective};
pub use grads::{all_reduce_grads, clip_grad_norm, grad_norm, scale_grads};
pub use logging::{Curve, LogEvent, LogRecordSink, LogSink, MemorySink, NullSink};
pub use metrics::{LossAccumulator, StepMetrics, ValidationReport};
pub use optimizer::OptimizerConfig;
pub use sampling::{
    choose_speaker, run_sample_inference, SampleLogger, UtteranceSource, Vocoder,
    SAMPLE_INFERENCE_F0_FRAMES,
};
pub use strategy::{ExecutionStrategy, GradScaler, Precision, StepReport};
pub use trainer::Trainer;
pub use validation::{run_validation, ValidationOutcome, ValidationSample};
