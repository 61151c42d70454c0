//! Training configuration types.

use burn::config::Config;

use mellotron_core::{ReductionWindow, ReductionWindowSchedule, WindowSettings};

use crate::error::{self, TrainError};

/// Dynamic loss-scaling parameters for mixed-precision runs.
#[derive(Config, Debug)]
pub struct LossScaleConfig {
    /// Scale applied to the loss before the first backward pass.
    #[config(default = 65536.0)]
    pub init_scale: f32,

    /// Factor applied to the scale after `growth_interval` finite steps.
    #[config(default = 2.0)]
    pub growth_factor: f32,

    /// Factor applied to the scale after an overflow.
    #[config(default = 0.5)]
    pub backoff_factor: f32,

    /// Consecutive finite steps required before growing the scale.
    #[config(default = 2000)]
    pub growth_interval: usize,
}

impl Default for LossScaleConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the Mellotron trainer.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Batch size before any reduction window applies.
    #[config(default = 32)]
    pub batch_size: usize,

    /// Initial learning rate.
    #[config(default = 1e-3)]
    pub learning_rate: f64,

    /// Adam weight decay.
    #[config(default = 1e-6)]
    pub weight_decay: f64,

    /// Number of epochs to run.
    #[config(default = 500)]
    pub epochs: usize,

    /// Save a checkpoint when `epoch % epochs_per_checkpoint == 0`.
    #[config(default = 2)]
    pub epochs_per_checkpoint: usize,

    /// Rich sample logging interval in global steps.
    #[config(default = 1000)]
    pub steps_per_sample: usize,

    /// Global gradient-norm clipping threshold.
    #[config(default = 1.0)]
    pub grad_clip_thresh: f32,

    /// Train with dynamic loss scaling.
    #[config(default = false)]
    pub fp16_run: bool,

    /// Train data-parallel across workers.
    #[config(default = false)]
    pub distributed_run: bool,

    /// Seed for shuffling and sample selection.
    #[config(default = 1234)]
    pub seed: u64,

    /// Directory checkpoints are written to.
    #[config(default = "String::from(\"checkpoints\")")]
    pub checkpoint_path: String,

    /// Prefix of checkpoint names (`{prefix}_{epoch}`).
    #[config(default = "String::from(\"mellotron\")")]
    pub checkpoint_prefix: String,

    /// Checkpoint file to warm-start from.
    pub warm_start_name: Option<String>,

    /// Layer names whose weights are not restored on warm start.
    #[config(default = "Vec::new()")]
    pub ignore_layers: Vec<String>,

    /// Positive-class weight of the gate loss.
    pub pos_weight: Option<f32>,

    /// Gradual-training curriculum.
    #[config(default = "Vec::new()")]
    pub reduction_window_schedule: Vec<ReductionWindow>,

    /// Frames per decoder step before any reduction window applies.
    #[config(default = 1)]
    pub n_frames_per_step_initial: usize,

    /// Condition on F0.
    #[config(default = false)]
    pub include_f0: bool,

    /// Speakers drawn from for sampled inference.
    pub sample_inference_speaker_ids: Option<Vec<usize>>,

    /// Number of speakers the model knows.
    #[config(default = 1)]
    pub n_speakers: usize,

    /// Sample rate of synthesized audio, forwarded to the log sink.
    #[config(default = 22050)]
    pub sample_rate: u32,

    /// Truncate datasets and skip validation.
    #[config(default = false)]
    pub debug: bool,

    /// Dataset size in debug mode; defaults to `batch_size`.
    pub debug_dataset_size: Option<usize>,

    /// Create batch tensors directly on the training device.
    #[config(default = true)]
    pub collate_on_device: bool,

    /// Loss-scaling parameters used when `fp16_run` is set.
    #[config(default = "LossScaleConfig::new()")]
    pub loss_scale: LossScaleConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> error::Result<()> {
        let positive = [
            (self.batch_size, "batch_size"),
            (self.epochs_per_checkpoint, "epochs_per_checkpoint"),
            (self.steps_per_sample, "steps_per_sample"),
            (self.n_frames_per_step_initial, "n_frames_per_step_initial"),
            (self.n_speakers, "n_speakers"),
        ];
        if let Some((_, name)) = positive.iter().find(|(value, _)| *value == 0) {
            return Err(TrainError::configuration(format!("{name} must be positive")));
        }
        if self.learning_rate <= 0.0 {
            return Err(TrainError::configuration("learning_rate must be positive"));
        }
        if !(self.grad_clip_thresh > 0.0) {
            return Err(TrainError::configuration("grad_clip_thresh must be positive"));
        }
        if self.loss_scale.init_scale <= 0.0 || self.loss_scale.growth_interval == 0 {
            return Err(TrainError::configuration(
                "loss_scale needs a positive init_scale and growth_interval",
            ));
        }
        if let Some(ids) = &self.sample_inference_speaker_ids {
            if let Some(id) = ids.iter().find(|&&id| id >= self.n_speakers) {
                return Err(TrainError::configuration(format!(
                    "sample inference speaker {id} is outside 0..{}",
                    self.n_speakers
                )));
            }
        }
        self.schedule()?;
        Ok(())
    }

    /// The validated reduction-window schedule.
    pub fn schedule(&self) -> error::Result<ReductionWindowSchedule> {
        ReductionWindowSchedule::new(self.reduction_window_schedule.clone())
            .map_err(|e| TrainError::configuration(e.to_string()))
    }

    /// Loader settings before any reduction window applies.
    pub fn initial_window(&self) -> WindowSettings {
        WindowSettings {
            frames_per_step: self.n_frames_per_step_initial,
            batch_size: self.batch_size,
        }
    }

    /// Dataset size used in debug mode.
    pub fn debug_size(&self) -> usize {
        self.debug_dataset_size.unwrap_or(self.batch_size)
    }

    /// Checkpoint name for an epoch.
    pub fn checkpoint_name(&self, epoch: usize) -> String {
        format!("{}_{}", self.checkpoint_prefix, epoch)
    }
}
