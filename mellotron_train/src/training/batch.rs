//! Tensor batches for text-to-mel training.

use burn::prelude::*;

use mellotron_core::{collate_samples, Sample};

use crate::error::Result;

/// A padded batch of text/mel samples.
///
/// Each field is present exactly when the samples carried it, so "no mel"
/// is `None` rather than an empty tensor.
#[derive(Debug, Clone)]
pub struct TextMelBatch<B: Backend> {
    /// Number of samples.
    pub batch_size: usize,
    /// Token ids: [batch, max_text_len]
    pub text_padded: Option<Tensor<B, 2, Int>>,
    /// True text lengths: [batch]
    pub input_lengths: Option<Tensor<B, 1, Int>>,
    /// Mels: [batch, channels, max_frames]
    pub mel_padded: Option<Tensor<B, 3>>,
    /// Stop targets: [batch, max_frames]
    pub gate_target: Option<Tensor<B, 2>>,
    /// True mel lengths: [batch]
    pub output_lengths: Option<Tensor<B, 1, Int>>,
    /// Speaker ids: [batch]
    pub speaker_ids: Option<Tensor<B, 1, Int>>,
    /// F0 contours: [batch, 1, max_frames]
    pub f0_padded: Option<Tensor<B, 3>>,
    /// Style-token embeddings: [batch, width]
    pub embedded_gst: Option<Tensor<B, 2>>,
    /// Audio encodings concatenated along rows: [rows, width]
    pub audio_encodings: Option<Tensor<B, 2>>,
}

impl<B: Backend> TextMelBatch<B> {
    /// Move every present tensor to `device`.
    pub fn to_device(self, device: &B::Device) -> Self {
        Self {
            batch_size: self.batch_size,
            text_padded: self.text_padded.map(|t| t.to_device(device)),
            input_lengths: self.input_lengths.map(|t| t.to_device(device)),
            mel_padded: self.mel_padded.map(|t| t.to_device(device)),
            gate_target: self.gate_target.map(|t| t.to_device(device)),
            output_lengths: self.output_lengths.map(|t| t.to_device(device)),
            speaker_ids: self.speaker_ids.map(|t| t.to_device(device)),
            f0_padded: self.f0_padded.map(|t| t.to_device(device)),
            embedded_gst: self.embedded_gst.map(|t| t.to_device(device)),
            audio_encodings: self.audio_encodings.map(|t| t.to_device(device)),
        }
    }
}

/// Batch collator.
///
/// Pads on the host through [`collate_samples`] and wraps the buffers in
/// tensors. With device placement on, tensors are created on the training
/// device; otherwise on the backend's default device, for the caller to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Collate {
    frames_per_step: usize,
    on_device: bool,
}

impl Collate {
    /// Create a collator padding mels to whole decoder steps.
    pub fn new(frames_per_step: usize) -> Self {
        Self {
            frames_per_step: frames_per_step.max(1),
            on_device: true,
        }
    }

    /// Choose whether tensors are created on the training device.
    pub fn with_device_placement(mut self, on_device: bool) -> Self {
        self.on_device = on_device;
        self
    }

    /// Padding granularity.
    pub fn frames_per_step(&self) -> usize {
        self.frames_per_step
    }

    /// Whether tensors land on the training device.
    pub fn places_on_device(&self) -> bool {
        self.on_device
    }

    /// Collate `samples` into a tensor batch.
    pub fn collate<B: Backend>(&self, samples: &[Sample], device: &B::Device) -> Result<TextMelBatch<B>> {
        let host = collate_samples(samples, self.frames_per_step)?;
        let default_device = B::Device::default();
        let target = if self.on_device { device } else { &default_device };
        let n = host.batch_size;

        let ints1 = |data: Vec<i64>| Tensor::<B, 1, Int>::from_data(TensorData::new(data, [n]), target);

        let (text_padded, input_lengths) = match host.text {
            Some(text) => (
                Some(Tensor::<B, 2, Int>::from_data(
                    TensorData::new(text.data, [n, text.max_len]),
                    target,
                )),
                Some(ints1(text.lengths)),
            ),
            None => (None, None),
        };

        let (mel_padded, gate_target, output_lengths) = match host.mel {
            Some(mel) => (
                Some(Tensor::<B, 3>::from_data(
                    TensorData::new(mel.data, [n, mel.channels, mel.max_frames]),
                    target,
                )),
                Some(Tensor::<B, 2>::from_data(
                    TensorData::new(mel.gate, [n, mel.max_frames]),
                    target,
                )),
                Some(ints1(mel.lengths)),
            ),
            None => (None, None, None),
        };

        let f0_padded = host.f0.map(|f0| {
            Tensor::<B, 3>::from_data(TensorData::new(f0.data, [n, 1, f0.max_frames]), target)
        });
        let speaker_ids = host.speaker_ids.map(ints1);
        let embedded_gst = host.gst.map(|gst| {
            Tensor::<B, 2>::from_data(TensorData::new(gst.data, [gst.rows, gst.width]), target)
        });
        let audio_encodings = host.audio_encodings.map(|enc| {
            Tensor::<B, 2>::from_data(TensorData::new(enc.data, [enc.rows, enc.width]), target)
        });

        Ok(TextMelBatch {
            batch_size: n,
            text_padded,
            input_lengths,
            mel_padded,
            gate_target,
            output_lengths,
            speaker_ids,
            f0_padded,
            embedded_gst,
            audio_encodings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use mellotron_core::Matrix;

    type TestBackend = NdArray;

    #[test]
    fn test_collate_shapes() {
        let device = Default::default();
        let samples = vec![
            Sample::new()
                .with_text(vec![1, 2, 3])
                .with_mel(Matrix::zeros(4, 5))
                .with_speaker(2),
            Sample::new()
                .with_text(vec![4])
                .with_mel(Matrix::zeros(4, 2))
                .with_speaker(0),
        ];

        let batch = Collate::new(2).collate::<TestBackend>(&samples, &device).unwrap();

        assert_eq!(batch.batch_size, 2);
        assert_eq!(batch.text_padded.unwrap().dims(), [2, 3]);
        assert_eq!(batch.mel_padded.unwrap().dims(), [2, 4, 6]);
        assert_eq!(batch.gate_target.unwrap().dims(), [2, 6]);
        let lengths: Vec<i64> = batch.output_lengths.unwrap().into_data().to_vec().unwrap();
        assert_eq!(lengths, vec![5, 2]);
        let speakers: Vec<i64> = batch.speaker_ids.unwrap().into_data().to_vec().unwrap();
        assert_eq!(speakers, vec![2, 0]);
        assert!(batch.f0_padded.is_none());
        assert!(batch.embedded_gst.is_none());
    }

    #[test]
    fn test_f0_layout() {
        let device = Default::default();
        let samples = vec![
            Sample::new().with_f0(vec![1.0, 2.0, 3.0]),
            Sample::new().with_f0(vec![4.0]),
        ];

        let batch = Collate::new(1)
            .with_device_placement(false)
            .collate::<TestBackend>(&samples, &device)
            .unwrap();
        let f0 = batch.f0_padded.unwrap();
        assert_eq!(f0.dims(), [2, 1, 3]);
        let values: Vec<f32> = f0.into_data().to_vec().unwrap();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0, 0.0, 0.0]);
    }

    #[test]
    fn test_empty_batch_rejected() {
        let device = Default::default();
        let result = Collate::new(1).collate::<TestBackend>(&[], &device);
        assert!(result.is_err());
    }
}
