//! Held-out validation pass.

use burn::prelude::*;
use burn::tensor::ElementConversion;

use crate::data::{SampleDataset, SampleLoader};
use crate::error::Result;
use crate::loss::Tacotron2Loss;
use crate::model::{ModelInputs, ModelOutput, ModelTargets, TextToMelModel};

use super::metrics::{LossAccumulator, ValidationReport};
use super::strategy::ExecutionStrategy;

/// Inputs, targets and outputs of the final validation batch, kept for
/// rich logging.
#[derive(Debug, Clone)]
pub struct ValidationSample<B: Backend> {
    /// Model inputs.
    pub inputs: ModelInputs<B>,
    /// Loss targets.
    pub targets: ModelTargets<B>,
    /// Model outputs.
    pub output: ModelOutput<B>,
}

/// Result of a validation pass.
#[derive(Debug, Clone)]
pub struct ValidationOutcome<B: Backend> {
    /// Mean losses, `None` when the set yielded no batches.
    pub report: Option<ValidationReport>,
    /// The last batch seen.
    pub last: Option<ValidationSample<B>>,
}

/// Evaluate `model` once over `dataset`.
///
/// Runs on a model without gradient tracking (the caller passes
/// `model.valid()`), so the training model is untouched however the pass
/// ends. Per-batch losses are averaged across workers before accumulating.
pub fn run_validation<B, M, D>(
    model: &M,
    dataset: &D,
    loader: &SampleLoader,
    loss: &Tacotron2Loss,
    strategy: &ExecutionStrategy,
    device: &B::Device,
) -> Result<ValidationOutcome<B>>
where
    B: Backend,
    M: TextToMelModel<B>,
    D: SampleDataset + ?Sized,
{
    let mut accumulator = LossAccumulator::new();
    let mut last = None;

    for batch in loader.batches::<B, D>(dataset, device) {
        let batch = batch?;
        let (inputs, targets) = model.parse_batch(&batch)?;
        let output = model.forward(inputs.clone());
        let losses = loss.forward(&output, &targets);

        let mut values = [
            losses.mel_loss.into_scalar().elem::<f32>(),
            losses.gate_loss.into_scalar().elem::<f32>(),
        ];
        strategy.reduce(&mut values)?;
        accumulator.add(values[0], values[1]);

        last = Some(ValidationSample {
            inputs,
            targets,
            output,
        });
    }

    if let Some(report) = accumulator.report() {
        log::info!(
            "Validation loss {:.6} (mel {:.6}, gate {:.6}) over {} batches",
            report.loss(),
            report.mel_loss,
            report.gate_loss,
            report.batches
        );
    }

    Ok(ValidationOutcome {
        report: accumulator.report(),
        last,
    })
}
