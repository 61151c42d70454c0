//! Tacotron2 training loss.

use burn::nn::loss::{MseLoss, Reduction};
use burn::prelude::*;

use crate::model::{ModelOutput, ModelTargets};

/// Loss components of one batch.
#[derive(Debug, Clone)]
pub struct LossOutput<B: Backend> {
    /// Spectrogram reconstruction loss, before and after the postnet.
    pub mel_loss: Tensor<B, 1>,
    /// Stop-gate loss.
    pub gate_loss: Tensor<B, 1>,
}

impl<B: Backend> LossOutput<B> {
    /// Sum of both components.
    pub fn total(&self) -> Tensor<B, 1> {
        self.mel_loss.clone() + self.gate_loss.clone()
    }
}

/// Tacotron2 loss calculator.
///
/// - Mel loss: `mse(mel_out, mel) + mse(mel_out_postnet, mel)`
/// - Gate loss: sigmoid cross-entropy on the gate logits, with the positive
///   ("stop") class weighted by `pos_weight`
#[derive(Debug, Clone, Copy, Default)]
pub struct Tacotron2Loss {
    pos_weight: Option<f32>,
}

impl Tacotron2Loss {
    /// Create a loss with an optional positive-class gate weight.
    pub fn new(pos_weight: Option<f32>) -> Self {
        Self { pos_weight }
    }

    /// Positive-class gate weight.
    pub fn pos_weight(&self) -> Option<f32> {
        self.pos_weight
    }

    /// Compute both loss components.
    pub fn forward<B: Backend>(
        &self,
        output: &ModelOutput<B>,
        targets: &ModelTargets<B>,
    ) -> LossOutput<B> {
        let mse = MseLoss::new();
        let mel = targets.mel.clone().detach();
        let mel_loss = mse.forward(output.mel_out.clone(), mel.clone(), Reduction::Mean)
            + mse.forward(output.mel_out_postnet.clone(), mel, Reduction::Mean);

        let gate_loss = self.gate_loss(output.gate_out.clone(), targets.gate.clone().detach());

        LossOutput {
            mel_loss,
            gate_loss,
        }
    }

    /// Weighted binary cross-entropy on logits.
    ///
    /// L = mean(w * y * softplus(-x) + (1 - y) * softplus(x))
    pub fn gate_loss<B: Backend>(&self, logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
        let weight = self.pos_weight.unwrap_or(1.0);
        let positive = targets.clone() * stable_softplus(logits.clone().neg()).mul_scalar(weight);
        let negative = targets.neg().add_scalar(1.0) * stable_softplus(logits);
        (positive + negative).mean()
    }
}

/// softplus(x) = max(x, 0) + ln(1 + e^-|x|), finite for any logit.
fn stable_softplus<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.clone().clamp_min(0.0) + x.abs().neg().exp().log1p()
}
