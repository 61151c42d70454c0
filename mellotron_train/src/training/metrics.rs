//! Training metrics and output types.

use super::sampling::SampleLogger;

/// Metrics of one optimization step, after all-reduce.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepMetrics {
    /// Global step.
    pub step: usize,
    /// Epoch the step belongs to.
    pub epoch: usize,
    /// Spectrogram reconstruction loss.
    pub mel_loss: f32,
    /// Stop-gate loss.
    pub gate_loss: f32,
    /// Gradient norm before clipping.
    pub grad_norm: f32,
    /// Learning rate used.
    pub learning_rate: f64,
    /// Wall-clock duration of the step.
    pub duration_secs: f32,
    /// Whether the optimizer update was applied.
    pub applied: bool,
}

impl StepMetrics {
    /// Combined loss.
    pub fn loss(&self) -> f32 {
        self.mel_loss + self.gate_loss
    }

    /// Write the per-step scalars.
    pub fn log_scalars(&self, logger: &mut SampleLogger) {
        logger.scalar("Loss/train", self.loss(), self.step);
        logger.scalar("MelLoss/train", self.mel_loss, self.step);
        logger.scalar("GateLoss/train", self.gate_loss, self.step);
        logger.scalar("GradNorm", self.grad_norm, self.step);
        logger.scalar("LearningRate", self.learning_rate as f32, self.step);
        logger.scalar("StepDurationSeconds", self.duration_secs, self.step);
    }

    /// Log metrics to standard output.
    pub fn log(&self, prefix: &str) {
        log::info!(
            "{} epoch={} step={} loss={:.6} mel={:.6} gate={:.6} grad_norm={:.4} lr={:.2e} {:.3}s{}",
            prefix,
            self.epoch,
            self.step,
            self.loss(),
            self.mel_loss,
            self.gate_loss,
            self.grad_norm,
            self.learning_rate,
            self.duration_secs,
            if self.applied { "" } else { " (skipped)" },
        );
    }
}

/// Mean losses of a validation pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationReport {
    /// Mean reconstruction loss over batches.
    pub mel_loss: f32,
    /// Mean gate loss over batches.
    pub gate_loss: f32,
    /// Batches evaluated.
    pub batches: usize,
}

impl ValidationReport {
    /// Mean combined loss.
    pub fn loss(&self) -> f32 {
        self.mel_loss + self.gate_loss
    }

    /// Write the validation scalars.
    pub fn log_scalars(&self, logger: &mut SampleLogger, step: usize) {
        logger.scalar("Loss/val", self.loss(), step);
        logger.scalar("MelLoss/val", self.mel_loss, step);
        logger.scalar("GateLoss/val", self.gate_loss, step);
    }
}

/// Sums loss components and reports their means.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossAccumulator {
    mel_sum: f64,
    gate_sum: f64,
    count: usize,
}

impl LossAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one step's losses.
    pub fn add(&mut self, mel_loss: f32, gate_loss: f32) {
        self.mel_sum += mel_loss as f64;
        self.gate_sum += gate_loss as f64;
        self.count += 1;
    }

    /// Steps added.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Means so far, or `None` before the first step.
    pub fn report(&self) -> Option<ValidationReport> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Some(ValidationReport {
            mel_loss: (self.mel_sum / n) as f32,
            gate_loss: (self.gate_sum / n) as f32,
            batches: self.count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::logging::MemorySink;

    #[test]
    fn test_step_scalars() {
        let sink = MemorySink::new();
        let mut logger = SampleLogger::new(Box::new(sink.clone()), 22050);
        let metrics = StepMetrics {
            step: 12,
            mel_loss: 0.5,
            gate_loss: 0.25,
            learning_rate: 1e-3,
            applied: true,
            ..Default::default()
        };
        metrics.log_scalars(&mut logger);
        metrics.log("train");

        assert_eq!(sink.scalars("Loss/train"), vec![(12, 0.75)]);
        assert_eq!(sink.count("GradNorm"), 1);
        assert_eq!(sink.count("StepDurationSeconds"), 1);
        assert_eq!(sink.events().len(), 6);
    }

    #[test]
    fn test_accumulator_means() {
        let mut acc = LossAccumulator::new();
        assert!(acc.report().is_none());

        acc.add(1.0, 0.5);
        acc.add(3.0, 1.5);
        let report = acc.report().unwrap();

        assert_eq!(report.batches, 2);
        assert!((report.mel_loss - 2.0).abs() < 1e-6);
        assert!((report.gate_loss - 1.0).abs() < 1e-6);
        assert!((report.loss() - 3.0).abs() < 1e-6);
    }
}
