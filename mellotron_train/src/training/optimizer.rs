//! Optimizer configuration.
//!
//! Training uses Burn's Adam with L2 weight decay. The learning rate is not
//! part of the optimizer: the trainer owns it and passes it to every step,
//! so a checkpointed learning rate takes effect on the live optimizer
//! without touching its state.

use burn::config::Config;
use burn::module::AutodiffModule;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::{AdamConfig, Optimizer};
use burn::tensor::backend::AutodiffBackend;

use crate::config::TrainingConfig;

/// Configuration for the optimizer.
#[derive(Config, Debug)]
pub struct OptimizerConfig {
    /// Adam beta 1.
    #[config(default = 0.9)]
    pub beta_1: f32,

    /// Adam beta 2.
    #[config(default = 0.999)]
    pub beta_2: f32,

    /// Epsilon for numerical stability.
    #[config(default = 1e-8)]
    pub epsilon: f32,

    /// Weight decay (L2 regularization). Zero disables it.
    #[config(default = 1e-6)]
    pub weight_decay: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizerConfig {
    /// Optimizer settings of a training run.
    pub fn from_training(config: &TrainingConfig) -> Self {
        Self::new().with_weight_decay(config.weight_decay)
    }

    /// Build the Adam optimizer for module `M`.
    pub fn init<B: AutodiffBackend, M: AutodiffModule<B>>(&self) -> impl Optimizer<M, B> {
        let weight_decay =
            (self.weight_decay > 0.0).then(|| WeightDecayConfig::new(self.weight_decay as f32));
        AdamConfig::new()
            .with_beta_1(self.beta_1)
            .with_beta_2(self.beta_2)
            .with_epsilon(self.epsilon)
            .with_weight_decay(weight_decay)
            .init::<B, M>()
    }
}
