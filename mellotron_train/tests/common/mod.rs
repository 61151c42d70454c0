//! Shared fixtures for integration tests.

#![allow(dead_code)]

use burn::backend::{Autodiff, NdArray};

use mellotron_train::data::InMemorySampleDataset;
use mellotron_train::model::{ReferenceTacotron, ReferenceTacotronConfig, StateDict};
use mellotron_train::training::Vocoder;
use mellotron_train::{Matrix, Result, Sample, TrainError};

pub type TestBackend = Autodiff<NdArray>;

pub const CHANNELS: usize = 3;

/// `n` samples with text of 2..=4 tokens, mels of 3..=6 frames and two speakers.
pub fn dataset(n: usize) -> InMemorySampleDataset {
    (0..n)
        .map(|i| {
            let text: Vec<i64> = (0..2 + i % 3).map(|t| (i + t) as i64 + 1).collect();
            let frames = 3 + i % 4;
            let mel = Matrix::from_fn(CHANNELS, frames, |r, c| ((r + c + i) as f32 * 0.37).sin());
            Sample::new()
                .with_text(text)
                .with_mel(mel)
                .with_speaker((i % 2) as i64)
        })
        .collect()
}

pub fn model(device: &<TestBackend as burn::prelude::Backend>::Device) -> ReferenceTacotron<TestBackend> {
    ReferenceTacotronConfig::new()
        .with_n_mel_channels(CHANNELS)
        .with_n_speakers(2)
        .with_max_decoder_steps(8)
        .init::<TestBackend>(device)
}

/// Parameter values by name, ignoring parameter ids.
pub fn values(state: &StateDict) -> Vec<(String, Vec<f32>)> {
    state
        .names()
        .map(|name| (name.to_string(), state.get(name).unwrap().values.clone()))
        .collect()
}

/// Four audio samples per mel frame.
pub struct FrameVocoder;

impl Vocoder for FrameVocoder {
    fn synthesize(&self, mel: &Matrix) -> Result<Vec<f32>> {
        if mel.cols() == 0 {
            return Err(TrainError::synthesis("mel too short to invert"));
        }
        Ok(vec![0.0; mel.cols() * 4])
    }
}
