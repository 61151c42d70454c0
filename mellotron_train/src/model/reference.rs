//! A tiny Tacotron-shaped model.
//!
//! Each frame is predicted from the previous one through a per-channel affine
//! map plus a speaker offset; a residual postnet rescales it and a linear
//! map over channels emits the gate logit. Attention is a fixed Gaussian
//! band along the diagonal. It trains, checkpoints and decodes like the real
//! network without any of its cost, which is all the trainer needs from it.

use burn::config::Config;
use burn::module::{Module, Param};
use burn::prelude::*;
use burn::tensor::activation::sigmoid;
use burn::tensor::ElementConversion;

use crate::error;

use super::{
    InferenceInputs, InferenceOutput, ModelInputs, ModelOutput, StateDict, TextToMelModel,
};

/// Configuration for [`ReferenceTacotron`].
#[derive(Config, Debug)]
pub struct ReferenceTacotronConfig {
    /// Mel channels.
    #[config(default = 80)]
    pub n_mel_channels: usize,
    /// Speakers with a learned offset.
    #[config(default = 1)]
    pub n_speakers: usize,
    /// Frames per decoder step.
    #[config(default = 1)]
    pub n_frames_per_step: usize,
    /// Upper bound on decoded frames at inference.
    #[config(default = 1000)]
    pub max_decoder_steps: usize,
    /// Gate probability that stops decoding.
    #[config(default = 0.5)]
    pub gate_threshold: f32,
}

impl ReferenceTacotronConfig {
    /// Initialize the model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ReferenceTacotron<B> {
        let channels = self.n_mel_channels;
        ReferenceTacotron {
            decoder_scale: Param::from_tensor(Tensor::ones([channels], device)),
            decoder_bias: Param::from_tensor(Tensor::zeros([channels], device)),
            postnet_scale: Param::from_tensor(Tensor::zeros([channels], device)),
            gate_weight: Param::from_tensor(Tensor::zeros([channels], device)),
            gate_bias: Param::from_tensor(Tensor::zeros([1], device)),
            speaker_embedding: Param::from_tensor(Tensor::zeros(
                [self.n_speakers.max(1), channels],
                device,
            )),
            n_mel_channels: channels,
            frames_per_step: self.n_frames_per_step.max(1),
            max_decoder_steps: self.max_decoder_steps.max(1),
            gate_threshold: self.gate_threshold,
        }
    }
}

/// Reference text-to-mel model.
#[derive(Module, Debug)]
pub struct ReferenceTacotron<B: Backend> {
    decoder_scale: Param<Tensor<B, 1>>,
    decoder_bias: Param<Tensor<B, 1>>,
    postnet_scale: Param<Tensor<B, 1>>,
    gate_weight: Param<Tensor<B, 1>>,
    gate_bias: Param<Tensor<B, 1>>,
    speaker_embedding: Param<Tensor<B, 2>>,
    n_mel_channels: usize,
    frames_per_step: usize,
    max_decoder_steps: usize,
    gate_threshold: f32,
}

impl<B: Backend> ReferenceTacotron<B> {
    /// Mel channel count.
    pub fn n_mel_channels(&self) -> usize {
        self.n_mel_channels
    }

    /// Predict frames from the frames before them.
    fn decode(&self, previous: Tensor<B, 3>, speaker_ids: Option<&Tensor<B, 1, Int>>) -> Tensor<B, 3> {
        let channels = self.n_mel_channels;
        let mut out = previous * self.decoder_scale.val().reshape([1, channels, 1])
            + self.decoder_bias.val().reshape([1, channels, 1]);

        if let Some(ids) = speaker_ids {
            let [batch] = ids.dims();
            let offsets = self
                .speaker_embedding
                .val()
                .select(0, ids.clone())
                .reshape([batch, channels, 1]);
            out = out + offsets;
        }
        out
    }

    fn postnet(&self, mel: Tensor<B, 3>) -> Tensor<B, 3> {
        let scale = self.postnet_scale.val().reshape([1, self.n_mel_channels, 1]);
        mel.clone() + mel * scale
    }

    fn gate(&self, mel: Tensor<B, 3>) -> Tensor<B, 2> {
        let [batch, channels, frames] = mel.dims();
        let weight = self.gate_weight.val().reshape([1, channels, 1]);
        (mel * weight).sum_dim(1).reshape([batch, frames]) + self.gate_bias.val().reshape([1, 1])
    }
}

impl<B: Backend> TextToMelModel<B> for ReferenceTacotron<B> {
    fn forward(&self, inputs: ModelInputs<B>) -> ModelOutput<B> {
        let [batch, _, frames] = inputs.mel.dims();
        let [_, text_len] = inputs.text.dims();
        let device = inputs.mel.device();

        let mel_out = self.decode(shift_right(inputs.mel), inputs.speaker_ids.as_ref());
        let mel_out_postnet = self.postnet(mel_out.clone());
        let gate_out = self.gate(mel_out.clone());
        let decoder_steps = frames.div_ceil(self.frames_per_step).max(1);

        ModelOutput {
            mel_out,
            mel_out_postnet,
            gate_out,
            alignments: diagonal_alignment(batch, decoder_steps, text_len, &device),
        }
    }

    fn inference(&self, inputs: InferenceInputs<B>) -> InferenceOutput<B> {
        let [_, text_len] = inputs.text.dims();
        let device = inputs.text.device();

        let mut frame = Tensor::<B, 3>::zeros([1, self.n_mel_channels, 1], &device);
        let mut frames = Vec::new();
        for _ in 0..self.max_decoder_steps {
            frame = self.decode(frame, Some(&inputs.speaker_ids));
            frames.push(frame.clone());

            let stop: f32 = sigmoid(self.gate(frame.clone())).into_scalar().elem();
            if stop > self.gate_threshold {
                break;
            }
        }

        let mel_out = Tensor::cat(frames, 2);
        let decoded = mel_out.dims()[2];
        let mel_out_postnet = self.postnet(mel_out.clone());
        let gate_out = self.gate(mel_out.clone());
        let decoder_steps = decoded.div_ceil(self.frames_per_step).max(1);

        InferenceOutput {
            mel_out,
            mel_out_postnet,
            gate_out,
            alignments: diagonal_alignment(1, decoder_steps, text_len, &device),
        }
    }

    fn frames_per_step(&self) -> usize {
        self.frames_per_step
    }

    fn set_frames_per_step(&mut self, frames_per_step: usize) {
        self.frames_per_step = frames_per_step.max(1);
    }

    fn state_dict(&self) -> error::Result<StateDict> {
        let mut state = StateDict::new();
        state.insert_param("decoder.scale", &self.decoder_scale)?;
        state.insert_param("decoder.bias", &self.decoder_bias)?;
        state.insert_param("postnet.scale", &self.postnet_scale)?;
        state.insert_param("gate.weight", &self.gate_weight)?;
        state.insert_param("gate.bias", &self.gate_bias)?;
        state.insert_param("speaker_embedding.weight", &self.speaker_embedding)?;
        Ok(state)
    }

    fn from_pretrained(
        mut self,
        state: &StateDict,
        device: &B::Device,
        ignore_layers: &[String],
    ) -> error::Result<Self> {
        self.decoder_scale = state.restore("decoder.scale", self.decoder_scale, device, ignore_layers)?;
        self.decoder_bias = state.restore("decoder.bias", self.decoder_bias, device, ignore_layers)?;
        self.postnet_scale = state.restore("postnet.scale", self.postnet_scale, device, ignore_layers)?;
        self.gate_weight = state.restore("gate.weight", self.gate_weight, device, ignore_layers)?;
        self.gate_bias = state.restore("gate.bias", self.gate_bias, device, ignore_layers)?;
        self.speaker_embedding = state.restore(
            "speaker_embedding.weight",
            self.speaker_embedding,
            device,
            ignore_layers,
        )?;
        Ok(self)
    }
}

/// Delay mels by one frame, feeding zeros at the start.
fn shift_right<B: Backend>(mel: Tensor<B, 3>) -> Tensor<B, 3> {
    let [batch, channels, frames] = mel.dims();
    if frames == 0 {
        return mel;
    }
    let start = Tensor::zeros([batch, channels, 1], &mel.device());
    if frames == 1 {
        return start;
    }
    let head = mel.slice([0..batch, 0..channels, 0..frames - 1]);
    Tensor::cat(vec![start, head], 2)
}

/// Row-normalized Gaussian band around the diagonal.
fn diagonal_alignment<B: Backend>(
    batch: usize,
    decoder_steps: usize,
    encoder_steps: usize,
    device: &B::Device,
) -> Tensor<B, 3> {
    let encoder_steps = encoder_steps.max(1);
    let ratio = if decoder_steps > 1 {
        (encoder_steps - 1) as f32 / (decoder_steps - 1) as f32
    } else {
        0.0
    };

    let mut item = Vec::with_capacity(decoder_steps * encoder_steps);
    for d in 0..decoder_steps {
        let centre = d as f32 * ratio;
        let row: Vec<f32> = (0..encoder_steps)
            .map(|e| (-(e as f32 - centre).powi(2) / 2.0).exp())
            .collect();
        let total: f32 = row.iter().sum();
        item.extend(row.into_iter().map(|w| w / total));
    }

    let data: Vec<f32> = std::iter::repeat(item).take(batch).flatten().collect();
    Tensor::from_data(
        TensorData::new(data, [batch, decoder_steps, encoder_steps]),
        device,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn inputs(device: &<TestBackend as Backend>::Device) -> ModelInputs<TestBackend> {
        ModelInputs {
            text: Tensor::from_data(TensorData::new(vec![1i64, 2, 3, 4, 5, 0], [2, 3]), device),
            input_lengths: Tensor::from_data(TensorData::new(vec![3i64, 2], [2]), device),
            mel: Tensor::ones([2, 4, 6], device),
            output_lengths: Tensor::from_data(TensorData::new(vec![6i64, 4], [2]), device),
            speaker_ids: Some(Tensor::from_data(TensorData::new(vec![0i64, 1], [2]), device)),
            f0: None,
            embedded_gst: None,
        }
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = ReferenceTacotronConfig::new()
            .with_n_mel_channels(4)
            .with_max_decoder_steps(16);
        let json = config.to_string();
        let loaded = ReferenceTacotronConfig::load_binary(json.as_bytes()).unwrap();

        assert_eq!(loaded.n_mel_channels, 4);
        assert_eq!(loaded.max_decoder_steps, 16);
        assert_eq!(loaded.gate_threshold, 0.5);
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let model = ReferenceTacotronConfig::new()
            .with_n_mel_channels(4)
            .with_n_speakers(2)
            .with_n_frames_per_step(2)
            .init::<TestBackend>(&device);

        let output = model.forward(inputs(&device));

        assert_eq!(output.mel_out.dims(), [2, 4, 6]);
        assert_eq!(output.mel_out_postnet.dims(), [2, 4, 6]);
        assert_eq!(output.gate_out.dims(), [2, 6]);
        assert_eq!(output.alignments.dims(), [2, 3, 3]);
    }

    #[test]
    fn test_teacher_forcing_uses_previous_frame() {
        let device = Default::default();
        let model = ReferenceTacotronConfig::new()
            .with_n_mel_channels(4)
            .with_n_speakers(2)
            .init::<TestBackend>(&device);

        let output = model.forward(inputs(&device));
        let values: Vec<f32> = output.mel_out.into_data().to_vec().unwrap();

        // Unit scale and zero bias copy the previous frame; frame 0 sees zeros.
        assert_eq!(values[0], 0.0);
        assert_eq!(values[1], 1.0);
    }

    #[test]
    fn test_alignment_rows_sum_to_one() {
        let device = Default::default();
        let alignment = diagonal_alignment::<TestBackend>(1, 5, 7, &device);
        let sums: Vec<f32> = alignment.sum_dim(2).into_data().to_vec().unwrap();
        for sum in sums {
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_inference_stops_at_limit() {
        let device = Default::default();
        let model = ReferenceTacotronConfig::new()
            .with_n_mel_channels(3)
            .with_max_decoder_steps(12)
            .init::<TestBackend>(&device);

        let output = model.inference(InferenceInputs {
            text: Tensor::from_data(TensorData::new(vec![1i64, 2, 3], [1, 3]), &device),
            speaker_ids: Tensor::from_data(TensorData::new(vec![0i64], [1]), &device),
            f0: None,
        });

        // A zero gate probe sits exactly at the threshold and never stops early.
        assert_eq!(output.mel_out_postnet.dims(), [1, 3, 12]);
        assert_eq!(output.gate_out.dims(), [1, 12]);
    }

    #[test]
    fn test_state_dict_round_trip() {
        let device = Default::default();
        let config = ReferenceTacotronConfig::new().with_n_mel_channels(2);
        let model = config.init::<TestBackend>(&device);
        let state = model.state_dict().unwrap();
        assert_eq!(state.len(), 6);

        let restored = config
            .init::<TestBackend>(&device)
            .from_pretrained(&state, &device, &[])
            .unwrap();
        assert_eq!(restored.state_dict().unwrap(), state);
    }
}
