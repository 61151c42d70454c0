//! Model collaborator interface.
//!
//! The trainer never looks inside the network. It drives any Burn module
//! implementing [`TextToMelModel`]: batches are split into inputs and
//! targets by `parse_batch`, teacher-forced by `forward`, decoded
//! free-running by `inference`, and moved in and out of checkpoints as a
//! named [`StateDict`].

mod reference;

use std::collections::BTreeMap;

use burn::module::{Param, ParamId};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};
use crate::training::TextMelBatch;

pub use reference::{ReferenceTacotron, ReferenceTacotronConfig};

/// Teacher-forced model inputs.
#[derive(Debug, Clone)]
pub struct ModelInputs<B: Backend> {
    /// Token ids, `[batch, max_text_len]`.
    pub text: Tensor<B, 2, Int>,
    /// True text lengths, `[batch]`.
    pub input_lengths: Tensor<B, 1, Int>,
    /// Target mels used for teacher forcing, `[batch, channels, frames]`.
    pub mel: Tensor<B, 3>,
    /// True mel lengths, `[batch]`.
    pub output_lengths: Tensor<B, 1, Int>,
    /// Speaker ids, `[batch]`.
    pub speaker_ids: Option<Tensor<B, 1, Int>>,
    /// F0 contours, `[batch, 1, frames]`.
    pub f0: Option<Tensor<B, 3>>,
    /// Style-token embeddings, `[batch, width]`.
    pub embedded_gst: Option<Tensor<B, 2>>,
}

/// Training targets.
#[derive(Debug, Clone)]
pub struct ModelTargets<B: Backend> {
    /// Padded target mels, `[batch, channels, frames]`.
    pub mel: Tensor<B, 3>,
    /// Gate targets, `[batch, frames]`.
    pub gate: Tensor<B, 2>,
}

/// Output of a teacher-forced forward pass.
#[derive(Debug, Clone)]
pub struct ModelOutput<B: Backend> {
    /// Decoder mels before the postnet, `[batch, channels, frames]`.
    pub mel_out: Tensor<B, 3>,
    /// Mels after the postnet refinement, `[batch, channels, frames]`.
    pub mel_out_postnet: Tensor<B, 3>,
    /// Gate logits, `[batch, frames]`.
    pub gate_out: Tensor<B, 2>,
    /// Attention weights, `[batch, decoder_steps, encoder_steps]`.
    pub alignments: Tensor<B, 3>,
}

/// Inputs of free-running inference.
#[derive(Debug, Clone)]
pub struct InferenceInputs<B: Backend> {
    /// Token ids, `[1, text_len]`.
    pub text: Tensor<B, 2, Int>,
    /// Speaker ids, `[1]`.
    pub speaker_ids: Tensor<B, 1, Int>,
    /// F0 contour, `[1, 1, frames]`.
    pub f0: Option<Tensor<B, 3>>,
}

/// Output of free-running inference.
#[derive(Debug, Clone)]
pub struct InferenceOutput<B: Backend> {
    /// Decoder mels before the postnet.
    pub mel_out: Tensor<B, 3>,
    /// Refined mels, `[1, channels, frames]`.
    pub mel_out_postnet: Tensor<B, 3>,
    /// Gate logits, `[1, frames]`.
    pub gate_out: Tensor<B, 2>,
    /// Attention weights, `[1, decoder_steps, encoder_steps]`.
    pub alignments: Tensor<B, 3>,
}

/// A text-to-mel model the trainer can drive.
pub trait TextToMelModel<B: Backend>: Module<B> + Sized {
    /// Split a collated batch into model inputs and targets.
    ///
    /// Text and mel are required. Fails with [`TrainError::ShapeMismatch`]
    /// naming the first missing field.
    fn parse_batch(&self, batch: &TextMelBatch<B>) -> Result<(ModelInputs<B>, ModelTargets<B>)> {
        let missing = |field: &str| TrainError::shape(format!("batch has no {field}"));

        let text = batch.text_padded.clone().ok_or_else(|| missing("text_padded"))?;
        let input_lengths = batch
            .input_lengths
            .clone()
            .ok_or_else(|| missing("input_lengths"))?;
        let mel = batch.mel_padded.clone().ok_or_else(|| missing("mel_padded"))?;
        let gate = batch.gate_target.clone().ok_or_else(|| missing("gate_target"))?;
        let output_lengths = batch
            .output_lengths
            .clone()
            .ok_or_else(|| missing("output_lengths"))?;

        let inputs = ModelInputs {
            text,
            input_lengths,
            mel: mel.clone(),
            output_lengths,
            speaker_ids: batch.speaker_ids.clone(),
            f0: batch.f0_padded.clone(),
            embedded_gst: batch.embedded_gst.clone(),
        };
        Ok((inputs, ModelTargets { mel, gate }))
    }

    /// Teacher-forced forward pass.
    fn forward(&self, inputs: ModelInputs<B>) -> ModelOutput<B>;

    /// Free-running decode.
    fn inference(&self, inputs: InferenceInputs<B>) -> InferenceOutput<B>;

    /// Frames emitted per decoder step.
    fn frames_per_step(&self) -> usize;

    /// Change the reduction factor between epochs.
    fn set_frames_per_step(&mut self, frames_per_step: usize);

    /// Export named parameters.
    fn state_dict(&self) -> Result<StateDict>;

    /// Load named parameters, leaving `ignore_layers` and names absent from
    /// `state` at their current values.
    fn from_pretrained(
        self,
        state: &StateDict,
        device: &B::Device,
        ignore_layers: &[String],
    ) -> Result<Self>;
}

/// One persisted parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamState {
    /// Burn parameter id. Optimizer records are keyed by it, so it is kept
    /// to line restored moments up with restored weights.
    #[serde(default)]
    pub id: Option<u64>,
    /// Tensor shape.
    pub shape: Vec<usize>,
    /// Row-major values.
    pub values: Vec<f32>,
}

impl ParamState {
    /// Capture a parameter.
    pub fn from_param<B: Backend, const D: usize>(param: &Param<Tensor<B, D>>) -> Result<Self> {
        let tensor = param.val();
        let shape = tensor.dims().to_vec();
        let values = tensor
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(TrainError::tensor)?;
        Ok(Self {
            id: Some(param.id.val()),
            shape,
            values,
        })
    }

    /// Rebuild the tensor on `device`.
    pub fn to_tensor<B: Backend, const D: usize>(&self, device: &B::Device) -> Result<Tensor<B, D>> {
        let expected: usize = self.shape.iter().product();
        if self.shape.len() != D || expected != self.values.len() {
            return Err(TrainError::shape(format!(
                "parameter of shape {:?} holds {} values, expected rank {D}",
                self.shape,
                self.values.len()
            )));
        }
        Ok(Tensor::from_data(
            TensorData::new(self.values.clone(), self.shape.clone()),
            device,
        ))
    }
}

/// Named model parameters, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDict {
    params: BTreeMap<String, ParamState>,
}

impl StateDict {
    /// Create an empty state dict.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a parameter under `name`.
    pub fn insert_param<B: Backend, const D: usize>(
        &mut self,
        name: impl Into<String>,
        param: &Param<Tensor<B, D>>,
    ) -> Result<()> {
        self.params.insert(name.into(), ParamState::from_param(param)?);
        Ok(())
    }

    /// Persisted state of `name`.
    pub fn get(&self, name: &str) -> Option<&ParamState> {
        self.params.get(name)
    }

    /// Remove `name`.
    pub fn remove(&mut self, name: &str) -> Option<ParamState> {
        self.params.remove(name)
    }

    /// Parameter names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Restore `param` from the entry named `name`.
    ///
    /// The current value is kept when the name is ignored or absent. A
    /// present entry must match the current shape.
    pub fn restore<B: Backend, const D: usize>(
        &self,
        name: &str,
        param: Param<Tensor<B, D>>,
        device: &B::Device,
        ignore_layers: &[String],
    ) -> Result<Param<Tensor<B, D>>> {
        if is_ignored(name, ignore_layers) {
            log::debug!("Keeping {name}: listed in ignore_layers");
            return Ok(param);
        }
        let Some(state) = self.params.get(name) else {
            log::warn!("Checkpoint has no {name}; keeping current value");
            return Ok(param);
        };

        let current = param.val().dims();
        if state.shape.as_slice() != current.as_slice() {
            return Err(TrainError::shape(format!(
                "{name}: checkpoint shape {:?} does not match model shape {:?}",
                state.shape, current
            )));
        }

        let id = state.id.map_or(param.id, ParamId::from);
        let tensor = state.to_tensor::<B, D>(device)?.require_grad();
        Ok(Param::initialized(id, tensor))
    }
}

/// Whether `name` is excluded by a layer in `ignore_layers`, either exactly or
/// as a dotted prefix.
pub fn is_ignored(name: &str, ignore_layers: &[String]) -> bool {
    ignore_layers.iter().any(|layer| {
        name == layer
            || name
                .strip_prefix(layer.as_str())
                .is_some_and(|rest| rest.starts_with('.'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_is_ignored() {
        let ignore = vec!["speaker_embedding".to_string()];
        assert!(is_ignored("speaker_embedding", &ignore));
        assert!(is_ignored("speaker_embedding.weight", &ignore));
        assert!(!is_ignored("speaker_embedding_extra", &ignore));
        assert!(!is_ignored("gate_bias", &ignore));
    }

    #[test]
    fn test_param_state_round_trip() {
        let device = Default::default();
        let param = Param::from_tensor(Tensor::<TestBackend, 2>::from_data(
            [[1.0f32, 2.0], [3.0, 4.0]],
            &device,
        ));

        let state = ParamState::from_param(&param).unwrap();
        assert_eq!(state.shape, vec![2, 2]);
        assert_eq!(state.values, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(state.id, Some(param.id.val()));

        let tensor: Tensor<TestBackend, 2> = state.to_tensor(&device).unwrap();
        let values: Vec<f32> = tensor.into_data().to_vec().unwrap();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_restore_rejects_shape_change() {
        let device = Default::default();
        let mut state = StateDict::new();
        let saved = Param::from_tensor(Tensor::<TestBackend, 1>::zeros([3], &device));
        state.insert_param("bias", &saved).unwrap();

        let live = Param::from_tensor(Tensor::<TestBackend, 1>::zeros([4], &device));
        let result = state.restore("bias", live, &device, &[]);
        assert!(matches!(result, Err(TrainError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_restore_keeps_ignored_and_missing() {
        let device = Default::default();
        let mut state = StateDict::new();
        let saved = Param::from_tensor(Tensor::<TestBackend, 1>::ones([2], &device));
        state.insert_param("bias", &saved).unwrap();

        let live = Param::from_tensor(Tensor::<TestBackend, 1>::zeros([2], &device));
        let kept = state
            .restore("bias", live, &device, &["bias".to_string()])
            .unwrap();
        let values: Vec<f32> = kept.val().into_data().to_vec().unwrap();
        assert_eq!(values, vec![0.0, 0.0]);

        let live = Param::from_tensor(Tensor::<TestBackend, 1>::zeros([2], &device));
        let kept = state.restore("scale", live, &device, &[]).unwrap();
        let values: Vec<f32> = kept.val().into_data().to_vec().unwrap();
        assert_eq!(values, vec![0.0, 0.0]);
    }
}
