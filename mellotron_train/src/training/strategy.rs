//! Precision and parallelism strategy.
//!
//! The step loop calls one interface, [`ExecutionStrategy`], whatever the
//! mode. The strategy is chosen once when training starts:
//!
//! - [`Precision::Full`]: plain backward, a non-finite gradient aborts
//! - [`Precision::LossScaled`]: dynamic loss scaling, overflowing steps are
//!   skipped and the scale backs off
//!
//! With a [`Collective`], gradients and logged losses are averaged across
//! workers.

use std::sync::Arc;

use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use crate::config::{LossScaleConfig, TrainingConfig};
use crate::error::{Result, TrainError};

use super::distributed::Collective;
use super::grads::{all_reduce_grads, clip_grad_norm, scale_grads};

/// Dynamic loss scaler.
///
/// The scale grows by `growth_factor` after `growth_interval` consecutive
/// finite steps and shrinks by `backoff_factor` on every overflow.
#[derive(Debug, Clone, PartialEq)]
pub struct GradScaler {
    scale: f32,
    growth_factor: f32,
    backoff_factor: f32,
    growth_interval: usize,
    growth_tracker: usize,
}

impl GradScaler {
    /// Create a scaler from config.
    pub fn new(config: &LossScaleConfig) -> Self {
        Self {
            scale: config.init_scale,
            growth_factor: config.growth_factor,
            backoff_factor: config.backoff_factor,
            growth_interval: config.growth_interval.max(1),
            growth_tracker: 0,
        }
    }

    /// Current loss scale.
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Update the scale after a step whose gradients were `finite` or not.
    pub fn update(&mut self, finite: bool) {
        if finite {
            self.growth_tracker += 1;
            if self.growth_tracker >= self.growth_interval {
                self.scale *= self.growth_factor;
                self.growth_tracker = 0;
            }
        } else {
            self.scale *= self.backoff_factor;
            self.growth_tracker = 0;
        }
    }
}

impl Default for GradScaler {
    fn default() -> Self {
        Self::new(&LossScaleConfig::new())
    }
}

/// Numeric precision mode.
#[derive(Debug, Clone, PartialEq)]
pub enum Precision {
    /// Full-precision gradients.
    Full,
    /// Loss-scaled gradients for reduced-precision backends.
    LossScaled(GradScaler),
}

impl Precision {
    /// Factor the loss is multiplied by before backward.
    pub fn loss_scale(&self) -> f32 {
        match self {
            Self::Full => 1.0,
            Self::LossScaled(scaler) => scaler.scale(),
        }
    }
}

/// Outcome of one backward-and-step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    /// Global gradient norm before clipping, after unscaling.
    pub grad_norm: f32,
    /// Whether the optimizer step ran.
    pub applied: bool,
    /// Loss scale used for this step.
    pub loss_scale: f32,
}

/// Selected once at startup; drives every step the same way.
#[derive(Clone)]
pub struct ExecutionStrategy {
    precision: Precision,
    collective: Option<Arc<dyn Collective>>,
}

impl std::fmt::Debug for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionStrategy")
            .field("precision", &self.precision)
            .field("world_size", &self.world_size())
            .field("rank", &self.rank())
            .finish()
    }
}

impl ExecutionStrategy {
    /// Single worker, full precision.
    pub fn single() -> Self {
        Self::new(Precision::Full, None)
    }

    /// Create a strategy.
    pub fn new(precision: Precision, collective: Option<Arc<dyn Collective>>) -> Self {
        Self {
            precision,
            collective,
        }
    }

    /// Build the strategy for `config`.
    pub fn from_config(config: &TrainingConfig, collective: Option<Arc<dyn Collective>>) -> Self {
        let precision = if config.fp16_run {
            Precision::LossScaled(GradScaler::new(&config.loss_scale))
        } else {
            Precision::Full
        };
        Self::new(precision, collective)
    }

    /// Precision mode.
    pub fn precision(&self) -> &Precision {
        &self.precision
    }

    /// The collective, when data-parallel.
    pub fn collective(&self) -> Option<&dyn Collective> {
        self.collective.as_deref()
    }

    /// This worker's rank.
    pub fn rank(&self) -> usize {
        self.collective.as_ref().map_or(0, |c| c.rank())
    }

    /// Number of workers.
    pub fn world_size(&self) -> usize {
        self.collective.as_ref().map_or(1, |c| c.world_size())
    }

    /// Whether this worker writes checkpoints and logs.
    pub fn is_primary(&self) -> bool {
        self.collective.as_ref().map_or(true, |c| c.is_primary())
    }

    /// Whether gradients and losses are averaged across workers.
    pub fn is_distributed(&self) -> bool {
        self.world_size() > 1
    }

    /// Average loss components across workers.
    pub fn reduce(&self, values: &mut [f32]) -> Result<()> {
        match &self.collective {
            Some(collective) if collective.world_size() > 1 => collective.all_reduce_mean(values),
            _ => Ok(()),
        }
    }

    /// Backpropagate `loss` and step the optimizer.
    ///
    /// Order: scale, backward, all-reduce, unscale, clip, overflow check,
    /// step, scaler update. Unscaling precedes clipping so the threshold
    /// applies to true gradient magnitudes.
    pub fn backward_and_step<B, M, O>(
        &mut self,
        loss: Tensor<B, 1>,
        model: M,
        optimizer: &mut O,
        learning_rate: f64,
        max_grad_norm: f32,
        step: usize,
    ) -> Result<(M, StepReport)>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let loss_scale = self.precision.loss_scale();
        let loss = if loss_scale != 1.0 {
            loss.mul_scalar(loss_scale)
        } else {
            loss
        };

        let mut grads = GradientsParams::from_grads(loss.backward(), &model);

        if let Some(collective) = self.collective.as_deref() {
            if collective.world_size() > 1 {
                all_reduce_grads::<B, M>(&model, &mut grads, collective)?;
            }
        }

        if loss_scale != 1.0 {
            scale_grads::<B, M>(&model, &mut grads, 1.0 / loss_scale);
        }

        let grad_norm = clip_grad_norm::<B, M>(&model, &mut grads, max_grad_norm);
        let finite = grad_norm.is_finite();

        let (model, applied) = match &mut self.precision {
            Precision::Full => {
                if !finite {
                    return Err(TrainError::NonFiniteGradient {
                        step,
                        norm: grad_norm,
                    });
                }
                (optimizer.step(learning_rate, model, grads), true)
            }
            Precision::LossScaled(scaler) => {
                let stepped = if finite {
                    (optimizer.step(learning_rate, model, grads), true)
                } else {
                    log::warn!(
                        "Step {step}: gradient overflow at loss scale {loss_scale}, skipping update"
                    );
                    (model, false)
                };
                scaler.update(finite);
                stepped
            }
        };

        Ok((
            model,
            StepReport {
                grad_norm,
                applied,
                loss_scale,
            },
        ))
    }
}
