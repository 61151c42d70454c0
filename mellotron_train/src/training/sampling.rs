//! Rich sample logging and sampled inference.
//!
//! Every `steps_per_sample` steps one random item of the current batch is
//! logged in detail: predicted and target spectrograms, the attention
//! matrix, gate curves, alignment metrics and, when a [`Vocoder`] is
//! available, synthesized audio. Training then decodes a fixed utterance
//! free-running and logs the result under `sample_inference`.
//!
//! Synthesis failures are reported and swallowed here; every other error
//! propagates.

use burn::prelude::*;
use burn::tensor::activation::sigmoid;
use rand::Rng;

use mellotron_core::alignment::transpose_item;
use mellotron_core::{alignment_metrics, AlignmentShape, Matrix};

use crate::error::{Result, TrainError};
use crate::model::{InferenceInputs, InferenceOutput, ModelInputs, ModelOutput, ModelTargets, TextToMelModel};

use super::logging::{Curve, LogSink};

/// Length of the all-zero F0 contour fed to sampled inference.
pub const SAMPLE_INFERENCE_F0_FRAMES: usize = 200;

/// Turns a mel spectrogram into audio.
pub trait Vocoder: Send {
    /// Synthesize `mel` (`rows` = channels, `cols` = frames).
    ///
    /// Fails with [`TrainError::Synthesis`] for spectrograms it cannot
    /// render, such as ones too short to invert.
    fn synthesize(&self, mel: &Matrix) -> Result<Vec<f32>>;
}

/// Provides the token sequence decoded by sampled inference.
pub trait UtteranceSource: Send {
    /// Token ids of the utterance.
    fn utterance(&self) -> Vec<i64>;
}

impl UtteranceSource for Vec<i64> {
    fn utterance(&self) -> Vec<i64> {
        self.clone()
    }
}

/// Pick the speaker for sampled inference.
///
/// Draws from `speaker_ids` when given and non-empty, else uniformly from
/// `0..n_speakers`.
pub fn choose_speaker<R: Rng + ?Sized>(speaker_ids: Option<&[usize]>, n_speakers: usize, rng: &mut R) -> usize {
    match speaker_ids {
        Some(ids) if !ids.is_empty() => ids[rng.random_range(0..ids.len())],
        _ => rng.random_range(0..n_speakers.max(1)),
    }
}

/// Decode `tokens` free-running as `speaker`.
pub fn run_sample_inference<B: Backend, M: TextToMelModel<B>>(
    model: &M,
    tokens: &[i64],
    speaker: usize,
    include_f0: bool,
    device: &B::Device,
) -> InferenceOutput<B> {
    let text = Tensor::<B, 2, Int>::from_data(TensorData::new(tokens.to_vec(), [1, tokens.len()]), device);
    let speaker_ids = Tensor::<B, 1, Int>::from_data(TensorData::new(vec![speaker as i64], [1]), device);
    let f0 = include_f0.then(|| Tensor::<B, 3>::zeros([1, 1, SAMPLE_INFERENCE_F0_FRAMES], device));

    model.inference(InferenceInputs {
        text,
        speaker_ids,
        f0,
    })
}

/// Writes rich samples to a [`LogSink`].
pub struct SampleLogger {
    sink: Box<dyn LogSink>,
    vocoder: Option<Box<dyn Vocoder>>,
    sample_rate: u32,
}

impl std::fmt::Debug for SampleLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleLogger")
            .field("has_vocoder", &self.vocoder.is_some())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

impl SampleLogger {
    /// Create a logger writing to `sink`.
    pub fn new(sink: Box<dyn LogSink>, sample_rate: u32) -> Self {
        Self {
            sink,
            vocoder: None,
            sample_rate,
        }
    }

    /// Replace the sink.
    pub fn set_sink(&mut self, sink: Box<dyn LogSink>) {
        self.sink = sink;
    }

    /// Set the vocoder used for audio samples.
    pub fn set_vocoder(&mut self, vocoder: Box<dyn Vocoder>) {
        self.vocoder = Some(vocoder);
    }

    /// Record a scalar.
    pub fn scalar(&mut self, tag: &str, value: f32, step: usize) {
        self.sink.scalar(tag, value, step);
    }

    /// Log batch item `item` under `/{namespace}`.
    ///
    /// Alignment metrics cover the whole batch; the images, curves and
    /// audio show only the chosen item, cropped to its true lengths.
    #[allow(clippy::too_many_arguments)]
    pub fn log_batch_sample<B: Backend>(
        &mut self,
        namespace: &str,
        step: usize,
        item: usize,
        frames_per_step: usize,
        inputs: &ModelInputs<B>,
        targets: &ModelTargets<B>,
        output: &ModelOutput<B>,
    ) -> Result<()> {
        let input_lengths = int_values(inputs.input_lengths.clone())?;
        let output_lengths = int_values(inputs.output_lengths.clone())?;
        let decoder_lengths: Vec<i64> = output_lengths
            .iter()
            .map(|&frames| (frames.max(0) as usize).div_ceil(frames_per_step.max(1)) as i64)
            .collect();

        let [batch, decoder_steps, encoder_steps] = output.alignments.dims();
        let shape = AlignmentShape {
            batch,
            decoder_steps,
            encoder_steps,
        };
        let weights = float_values(output.alignments.clone())?;
        let metrics = alignment_metrics(&weights, shape, Some(&input_lengths), Some(&decoder_lengths));
        self.sink
            .scalar(&format!("AlignmentDiagonalness/{namespace}"), metrics.diagonalness, step);
        self.sink.scalar(&format!("AlignmentMax/{namespace}"), metrics.max, step);

        let item = item.min(batch.saturating_sub(1));
        let frames = length_at(&output_lengths, item);

        let predicted = item_mel(&output.mel_out_postnet, item, frames)?;
        self.synthesize(&format!("AudioSample/{namespace}"), &predicted, step)?;
        self.sink
            .heatmap(&format!("MelPredicted/{namespace}"), &predicted, step);
        self.sink.heatmap(
            &format!("MelTarget/{namespace}"),
            &item_mel(&targets.mel, item, frames)?,
            step,
        );

        let gate = vec![
            Curve::new("target", item_row(&targets.gate, item, frames)?),
            Curve::new("predicted", item_row(&sigmoid(output.gate_out.clone()), item, frames)?),
        ];
        self.sink.curves(&format!("Gate/{namespace}"), &gate, step);

        let attention = attention_matrix(
            &weights,
            shape,
            item,
            length_at(&input_lengths, item),
            length_at(&decoder_lengths, item),
        )?;
        self.sink.heatmap(&format!("Attention/{namespace}"), &attention, step);
        Ok(())
    }

    /// Log the result of sampled inference.
    pub fn log_inference<B: Backend>(&mut self, step: usize, output: &InferenceOutput<B>) -> Result<()> {
        let [_, _, frames] = output.mel_out_postnet.dims();
        let mel = item_mel(&output.mel_out_postnet, 0, frames)?;
        self.synthesize("SampleInference", &mel, step)?;

        let [batch, decoder_steps, encoder_steps] = output.alignments.dims();
        let shape = AlignmentShape {
            batch,
            decoder_steps,
            encoder_steps,
        };
        let weights = float_values(output.alignments.clone())?;
        let attention = attention_matrix(&weights, shape, 0, encoder_steps, decoder_steps)?;
        self.sink.heatmap("Attention/sample_inference", &attention, step);
        self.sink.heatmap("MelPredicted/sample_inference", &mel, step);

        let [_, gate_frames] = output.gate_out.dims();
        let gate = item_row(&sigmoid(output.gate_out.clone()), 0, gate_frames)?;
        self.sink
            .curves("Gate/sample_inference", &[Curve::new("predicted", gate)], step);
        Ok(())
    }

    fn synthesize(&mut self, tag: &str, mel: &Matrix, step: usize) -> Result<()> {
        let Some(vocoder) = &self.vocoder else {
            return Ok(());
        };
        match vocoder.synthesize(mel) {
            Ok(audio) => {
                self.sink.audio(tag, &audio, self.sample_rate, step);
                Ok(())
            }
            Err(err) if err.is_recoverable() => {
                log::warn!(
                    "Step {step}: {tag} skipped for mel of shape {:?}: {err}",
                    mel.shape()
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

pub(crate) fn float_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(TrainError::tensor)
}

pub(crate) fn int_values<B: Backend>(tensor: Tensor<B, 1, Int>) -> Result<Vec<i64>> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(TrainError::tensor)
}

fn length_at(lengths: &[i64], item: usize) -> usize {
    lengths.get(item).map_or(0, |&l| l.max(0) as usize)
}

/// `[channels, frames]` of one batch item, cropped to `frames`.
fn item_mel<B: Backend>(mel: &Tensor<B, 3>, item: usize, frames: usize) -> Result<Matrix> {
    let [_, channels, total] = mel.dims();
    let frames = frames.min(total);
    if frames == 0 {
        return Ok(Matrix::zeros(channels, 0));
    }
    let values = float_values(mel.clone().slice([item..item + 1, 0..channels, 0..frames]))?;
    Matrix::new(channels, frames, values)
        .ok_or_else(|| TrainError::shape(format!("mel item {item} does not fill {channels}x{frames}")))
}

/// First `len` values of row `item`.
fn item_row<B: Backend>(values: &Tensor<B, 2>, item: usize, len: usize) -> Result<Vec<f32>> {
    let [_, total] = values.dims();
    let len = len.min(total);
    if len == 0 {
        return Ok(Vec::new());
    }
    float_values(values.clone().slice([item..item + 1, 0..len]))
}

fn attention_matrix(
    weights: &[f32],
    shape: AlignmentShape,
    item: usize,
    encoder_len: usize,
    decoder_len: usize,
) -> Result<Matrix> {
    let (rows, cols, data) = transpose_item(weights, shape, item, encoder_len, decoder_len);
    Matrix::new(rows, cols, data).ok_or_else(|| TrainError::shape("attention crop out of bounds"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ReferenceTacotronConfig;
    use crate::training::logging::{LogEvent, MemorySink};
    use burn::backend::NdArray;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type TestBackend = NdArray;

    struct EchoVocoder;

    impl Vocoder for EchoVocoder {
        fn synthesize(&self, mel: &Matrix) -> Result<Vec<f32>> {
            Ok(vec![0.0; mel.cols() * 4])
        }
    }

    struct ShortVocoder;

    impl Vocoder for ShortVocoder {
        fn synthesize(&self, mel: &Matrix) -> Result<Vec<f32>> {
            Err(TrainError::synthesis(format!("{} frames is too short", mel.cols())))
        }
    }

    struct BrokenVocoder;

    impl Vocoder for BrokenVocoder {
        fn synthesize(&self, _mel: &Matrix) -> Result<Vec<f32>> {
            Err(TrainError::shape("vocoder expects 80 channels"))
        }
    }

    fn batch(device: &<TestBackend as Backend>::Device) -> (ModelInputs<TestBackend>, ModelTargets<TestBackend>) {
        let mel = Tensor::<TestBackend, 3>::ones([2, 3, 4], device);
        let inputs = ModelInputs {
            text: Tensor::from_data(TensorData::new(vec![1i64, 2, 3, 4, 0, 0], [2, 3]), device),
            input_lengths: Tensor::from_data(TensorData::new(vec![3i64, 1], [2]), device),
            mel: mel.clone(),
            output_lengths: Tensor::from_data(TensorData::new(vec![4i64, 2], [2]), device),
            speaker_ids: None,
            f0: None,
            embedded_gst: None,
        };
        let targets = ModelTargets {
            mel,
            gate: Tensor::from_data(
                TensorData::new(vec![0.0f32, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 1.0], [2, 4]),
                device,
            ),
        };
        (inputs, targets)
    }

    fn logged(vocoder: Option<Box<dyn Vocoder>>) -> (MemorySink, Result<()>) {
        let device = Default::default();
        let model = ReferenceTacotronConfig::new()
            .with_n_mel_channels(3)
            .init::<TestBackend>(&device);
        let (inputs, targets) = batch(&device);
        let output = model.forward(inputs.clone());

        let sink = MemorySink::new();
        let mut logger = SampleLogger::new(Box::new(sink.clone()), 16000);
        if let Some(vocoder) = vocoder {
            logger.set_vocoder(vocoder);
        }
        let result = logger.log_batch_sample("val", 7, 1, 1, &inputs, &targets, &output);
        (sink, result)
    }

    #[test]
    fn test_batch_sample_tags() {
        let (sink, result) = logged(Some(Box::new(EchoVocoder)));
        result.unwrap();

        for tag in [
            "AlignmentDiagonalness/val",
            "AlignmentMax/val",
            "AudioSample/val",
            "MelPredicted/val",
            "MelTarget/val",
            "Gate/val",
            "Attention/val",
        ] {
            assert_eq!(sink.count(tag), 1, "{tag}");
        }
        assert!(sink.events().iter().all(|e| e.step() == 7));
    }

    #[test]
    fn test_batch_sample_crops_to_item_lengths() {
        let (sink, result) = logged(None);
        result.unwrap();

        for event in sink.events() {
            match event {
                LogEvent::Heatmap { tag, matrix, .. } if tag == "MelTarget/val" => {
                    assert_eq!(matrix.shape(), [3, 2]);
                }
                LogEvent::Heatmap { tag, matrix, .. } if tag == "Attention/val" => {
                    // Encoder x decoder for item 1: one token, two frames.
                    assert_eq!(matrix.shape(), [1, 2]);
                }
                LogEvent::Curves { curves, .. } => {
                    assert_eq!(curves[0].values, vec![0.0, 1.0]);
                    assert_eq!(curves[1].values.len(), 2);
                }
                _ => {}
            }
        }
        assert_eq!(sink.count("AudioSample/val"), 0);
    }

    #[test]
    fn test_synthesis_failure_is_swallowed() {
        let (sink, result) = logged(Some(Box::new(ShortVocoder)));
        assert!(result.is_ok());
        assert_eq!(sink.count("AudioSample/val"), 0);
        assert_eq!(sink.count("MelPredicted/val"), 1);
    }

    #[test]
    fn test_other_vocoder_errors_propagate() {
        let (_, result) = logged(Some(Box::new(BrokenVocoder)));
        assert!(matches!(result, Err(TrainError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_sample_inference_logging() {
        let device = Default::default();
        let model = ReferenceTacotronConfig::new()
            .with_n_mel_channels(3)
            .with_n_speakers(2)
            .with_max_decoder_steps(5)
            .init::<TestBackend>(&device);

        let output = run_sample_inference(&model, &[4, 5, 6], 1, true, &device);
        let sink = MemorySink::new();
        let mut logger = SampleLogger::new(Box::new(sink.clone()), 16000);
        logger.set_vocoder(Box::new(EchoVocoder));
        logger.log_inference(3, &output).unwrap();

        for tag in [
            "SampleInference",
            "Attention/sample_inference",
            "MelPredicted/sample_inference",
            "Gate/sample_inference",
        ] {
            assert_eq!(sink.count(tag), 1, "{tag}");
        }
    }

    #[test]
    fn test_choose_speaker() {
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..20 {
            assert!([3, 5].contains(&choose_speaker(Some(&[3, 5]), 10, &mut rng)));
            assert!(choose_speaker(None, 4, &mut rng) < 4);
        }
        assert_eq!(choose_speaker(Some(&[]), 1, &mut rng), 0);
    }
}
