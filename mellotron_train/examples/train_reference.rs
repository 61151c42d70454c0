//! Example: Training the reference text-to-mel model on synthetic data.
//!
//! Builds a small in-memory corpus of fake utterances, trains
//! `ReferenceTacotron` under a two-stage reduction-window curriculum and
//! writes a checkpoint per epoch.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=info cargo run -p mellotron_train --example train_reference
//! ```
//!
//! Checkpoints are saved to `checkpoints/`.

use burn::backend::{Autodiff, NdArray};

use mellotron_train::prelude::*;

type MyBackend = Autodiff<NdArray>;

const N_MEL_CHANNELS: usize = 8;
const N_SPEAKERS: usize = 2;

/// Synthetic corpus: mel frames follow a per-utterance sinusoid.
fn corpus(n: usize) -> InMemorySampleDataset {
    (0..n)
        .map(|i| {
            let text: Vec<i64> = (0..4 + i % 5).map(|t| ((i * 7 + t) % 40) as i64 + 1).collect();
            let frames = 10 + (i * 3) % 12;
            let mel = Matrix::from_fn(N_MEL_CHANNELS, frames, |r, c| {
                ((r as f32 + 1.0) * 0.3 + c as f32 * 0.15 + i as f32).sin()
            });
            let f0 = (0..frames).map(|c| 100.0 + 20.0 * (c as f32 * 0.2).cos()).collect();
            Sample::new()
                .with_text(text)
                .with_mel(mel)
                .with_f0(f0)
                .with_speaker((i % N_SPEAKERS) as i64)
        })
        .collect()
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Training failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let device = burn::backend::ndarray::NdArrayDevice::Cpu;

    let train_set = corpus(48);
    let val_set = corpus(8);

    let config = TrainingConfig::new()
        .with_epochs(6)
        .with_batch_size(8)
        .with_learning_rate(1e-2)
        .with_steps_per_sample(10)
        .with_n_speakers(N_SPEAKERS)
        .with_checkpoint_path("checkpoints".to_string())
        .with_reduction_window_schedule(vec![
            ReductionWindow::until(2, 8, 12),
            ReductionWindow::open(1, 4),
        ]);

    let model = ReferenceTacotronConfig::new()
        .with_n_mel_channels(N_MEL_CHANNELS)
        .with_n_speakers(N_SPEAKERS)
        .with_max_decoder_steps(64)
        .init::<MyBackend>(&device);
    let optimizer = OptimizerConfig::from_training(&config).init::<MyBackend, ReferenceTacotron<MyBackend>>();

    let mut trainer = Trainer::<MyBackend>::new(config, device)?
        .with_sink(LogRecordSink)
        .with_utterances(vec![3_i64, 14, 15, 9, 26]);

    let model = trainer.fit(model, optimizer, &train_set, &val_set)?;

    println!("Finished after {} steps", trainer.global_step());
    if let Some(report) = trainer.validate(&model, &val_set)? {
        println!(
            "Validation loss {:.4} (mel {:.4}, gate {:.4}) over {} batches",
            report.loss(),
            report.mel_loss,
            report.gate_loss,
            report.batches
        );
    }
    Ok(())
}
