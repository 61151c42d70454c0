//! Host-side padding of variable-length samples.
//!
//! [`collate_samples`] turns a list of [`Sample`]s into flat, zero-padded,
//! row-major buffers. Tensor libraries wrap these buffers without further
//! copying or reshaping.
//!
//! Padded fields (`text_sequence`, `mel`, `f0`) are left-aligned in their row;
//! the tail stays zero. Fixed-size fields (`speaker_id`, `embedded_gst`,
//! `audio_encoding`) are stacked. A field absent from the first sample is
//! absent from the output.

use crate::error::CoreError;
use crate::sample::{Sample, SampleFields};

/// Zero-padded token ids, `[batch, max_len]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddedTokens {
    /// Row-major ids.
    pub data: Vec<i64>,
    /// Padded length (columns).
    pub max_len: usize,
    /// True length per sample.
    pub lengths: Vec<i64>,
}

/// Zero-padded mel spectrograms plus derived gate targets.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddedMels {
    /// Row-major values, `[batch, channels, max_frames]`.
    pub data: Vec<f32>,
    /// Mel channel count.
    pub channels: usize,
    /// Padded frame count.
    pub max_frames: usize,
    /// True frame count per sample.
    pub lengths: Vec<i64>,
    /// Stop targets, `[batch, max_frames]`.
    pub gate: Vec<f32>,
}

/// Zero-padded F0 contours, `[batch, 1, max_frames]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddedF0 {
    /// Row-major values.
    pub data: Vec<f32>,
    /// Padded frame count.
    pub max_frames: usize,
}

/// Stacked fixed-width vectors, `[rows, width]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Stacked {
    /// Row-major values.
    pub data: Vec<f32>,
    /// Number of rows.
    pub rows: usize,
    /// Row width.
    pub width: usize,
}

/// Result of collating one batch on the host.
#[derive(Debug, Clone, PartialEq)]
pub struct CollatedSamples {
    /// Number of samples.
    pub batch_size: usize,
    /// Fields the batch carries.
    pub fields: SampleFields,
    /// Padded text.
    pub text: Option<PaddedTokens>,
    /// Padded mels and gate targets.
    pub mel: Option<PaddedMels>,
    /// Padded F0.
    pub f0: Option<PaddedF0>,
    /// Speaker ids.
    pub speaker_ids: Option<Vec<i64>>,
    /// Stacked style-token embeddings, one row per sample.
    pub gst: Option<Stacked>,
    /// Audio encodings concatenated along rows.
    pub audio_encodings: Option<Stacked>,
}

/// Round `len` up to the next multiple of `granularity`.
#[inline]
pub fn round_up(len: usize, granularity: usize) -> usize {
    if granularity <= 1 {
        return len;
    }
    len.div_ceil(granularity) * granularity
}

/// Write gate (stop) targets for one sample into `row`.
///
/// Positions at and after the last valid frame are 1, earlier ones 0. A zero
/// length marks the whole row as stop.
pub fn fill_gate_row(row: &mut [f32], length: usize) {
    let first_stop = length.saturating_sub(1);
    for (t, value) in row.iter_mut().enumerate() {
        *value = if t >= first_stop { 1.0 } else { 0.0 };
    }
}

/// Collate samples into padded host buffers.
///
/// `frames_per_step` rounds the padded mel/F0 length up so a decoder that
/// emits several frames per step always consumes whole steps.
pub fn collate_samples(
    samples: &[Sample],
    frames_per_step: usize,
) -> Result<CollatedSamples, CoreError> {
    let first = samples.first().ok_or(CoreError::EmptyBatch)?;
    let fields = SampleFields::of(first);

    for (index, sample) in samples.iter().enumerate().skip(1) {
        if let Some(field) = fields.first_missing(sample) {
            return Err(CoreError::MissingField { field, index });
        }
    }

    let text = fields.text.then(|| pad_tokens(samples));
    let mel = if fields.mel {
        Some(pad_mels(samples, frames_per_step)?)
    } else {
        None
    };
    let f0 = fields.f0.then(|| pad_f0(samples, frames_per_step));
    let speaker_ids = fields
        .speaker_id
        .then(|| samples.iter().filter_map(|s| s.speaker_id).collect());
    let gst = if fields.gst {
        Some(stack_gst(samples)?)
    } else {
        None
    };
    let audio_encodings = if fields.audio_encoding {
        Some(concat_audio_encodings(samples)?)
    } else {
        None
    };

    Ok(CollatedSamples {
        batch_size: samples.len(),
        fields,
        text,
        mel,
        f0,
        speaker_ids,
        gst,
        audio_encodings,
    })
}

fn pad_tokens(samples: &[Sample]) -> PaddedTokens {
    let sequences: Vec<&[i64]> = samples
        .iter()
        .map(|s| s.text_sequence.as_deref().unwrap_or(&[]))
        .collect();
    let max_len = sequences.iter().map(|s| s.len()).max().unwrap_or(0);

    let mut data = vec![0i64; samples.len() * max_len];
    let mut lengths = Vec::with_capacity(samples.len());
    for (i, seq) in sequences.iter().enumerate() {
        data[i * max_len..i * max_len + seq.len()].copy_from_slice(seq);
        lengths.push(seq.len() as i64);
    }

    PaddedTokens {
        data,
        max_len,
        lengths,
    }
}

fn pad_mels(samples: &[Sample], frames_per_step: usize) -> Result<PaddedMels, CoreError> {
    let mels: Vec<_> = samples.iter().filter_map(|s| s.mel.as_ref()).collect();
    let channels = mels[0].rows();

    for (index, mel) in mels.iter().enumerate().skip(1) {
        if mel.rows() != channels {
            return Err(CoreError::ShapeMismatch {
                field: "mel",
                index,
                expected: channels,
                got: mel.rows(),
            });
        }
    }

    let longest = mels.iter().map(|m| m.cols()).max().unwrap_or(0);
    let max_frames = round_up(longest, frames_per_step);
    let plane = channels * max_frames;

    let mut data = vec![0.0f32; mels.len() * plane];
    let mut gate = vec![0.0f32; mels.len() * max_frames];
    let mut lengths = Vec::with_capacity(mels.len());

    for (i, mel) in mels.iter().enumerate() {
        let frames = mel.cols();
        for c in 0..channels {
            let start = i * plane + c * max_frames;
            data[start..start + frames].copy_from_slice(mel.row(c));
        }
        fill_gate_row(&mut gate[i * max_frames..(i + 1) * max_frames], frames);
        lengths.push(frames as i64);
    }

    Ok(PaddedMels {
        data,
        channels,
        max_frames,
        lengths,
        gate,
    })
}

fn pad_f0(samples: &[Sample], frames_per_step: usize) -> PaddedF0 {
    let contours: Vec<&[f32]> = samples
        .iter()
        .map(|s| s.f0.as_deref().unwrap_or(&[]))
        .collect();
    let longest = contours.iter().map(|c| c.len()).max().unwrap_or(0);
    let max_frames = round_up(longest, frames_per_step);

    let mut data = vec![0.0f32; samples.len() * max_frames];
    for (i, contour) in contours.iter().enumerate() {
        data[i * max_frames..i * max_frames + contour.len()].copy_from_slice(contour);
    }

    PaddedF0 { data, max_frames }
}

fn stack_gst(samples: &[Sample]) -> Result<Stacked, CoreError> {
    let rows: Vec<&[f32]> = samples
        .iter()
        .map(|s| s.embedded_gst.as_deref().unwrap_or(&[]))
        .collect();
    let width = rows[0].len();

    let mut data = Vec::with_capacity(rows.len() * width);
    for (index, row) in rows.iter().enumerate() {
        if row.len() != width {
            return Err(CoreError::ShapeMismatch {
                field: "embedded_gst",
                index,
                expected: width,
                got: row.len(),
            });
        }
        data.extend_from_slice(row);
    }

    Ok(Stacked {
        data,
        rows: rows.len(),
        width,
    })
}

fn concat_audio_encodings(samples: &[Sample]) -> Result<Stacked, CoreError> {
    let encodings: Vec<_> = samples
        .iter()
        .filter_map(|s| s.audio_encoding.as_ref())
        .collect();
    let width = encodings[0].cols();

    let mut data = Vec::new();
    let mut rows = 0;
    for (index, encoding) in encodings.iter().enumerate() {
        if encoding.cols() != width {
            return Err(CoreError::ShapeMismatch {
                field: "audio_encoding",
                index,
                expected: width,
                got: encoding.cols(),
            });
        }
        data.extend_from_slice(encoding.as_slice());
        rows += encoding.rows();
    }

    Ok(Stacked { data, rows, width })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Matrix;

    fn mel(channels: usize, frames: usize, fill: f32) -> Matrix {
        Matrix::from_fn(channels, frames, |c, t| fill + c as f32 * 10.0 + t as f32)
    }

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(7, 1), 7);
        assert_eq!(round_up(7, 3), 9);
        assert_eq!(round_up(9, 3), 9);
        assert_eq!(round_up(0, 4), 0);
    }

    #[test]
    fn test_gate_row() {
        let mut row = [9.0; 5];
        fill_gate_row(&mut row, 3);
        assert_eq!(row, [0.0, 0.0, 1.0, 1.0, 1.0]);

        fill_gate_row(&mut row, 1);
        assert_eq!(row, [1.0; 5]);
    }

    #[test]
    fn test_empty_batch() {
        assert_eq!(collate_samples(&[], 1), Err(CoreError::EmptyBatch));
    }

    #[test]
    fn test_text_padding() {
        let samples = vec![
            Sample::new().with_text(vec![5, 6, 7]),
            Sample::new().with_text(vec![8]),
        ];
        let out = collate_samples(&samples, 1).unwrap();
        let text = out.text.unwrap();

        assert_eq!(text.max_len, 3);
        assert_eq!(text.data, vec![5, 6, 7, 8, 0, 0]);
        assert_eq!(text.lengths, vec![3, 1]);
        assert!(out.mel.is_none());
        assert!(out.f0.is_none());
    }

    #[test]
    fn test_mel_padding_and_gate() {
        let samples = vec![
            Sample::new().with_mel(mel(2, 4, 1.0)),
            Sample::new().with_mel(mel(2, 2, 10.0)),
        ];
        let out = collate_samples(&samples, 1).unwrap();
        let mels = out.mel.unwrap();

        assert_eq!(mels.channels, 2);
        assert_eq!(mels.max_frames, 4);
        assert_eq!(mels.lengths, vec![4, 2]);
        // Second sample, channel 1: two valid frames then zeros.
        let start = 8 + 4;
        assert_eq!(&mels.data[start..start + 4], &[20.0, 21.0, 0.0, 0.0]);
        assert_eq!(&mels.gate[0..4], &[0.0, 0.0, 0.0, 1.0]);
        assert_eq!(&mels.gate[4..8], &[0.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_mel_rounded_to_frames_per_step() {
        let samples = vec![Sample::new().with_mel(mel(1, 5, 0.0))];
        let out = collate_samples(&samples, 3).unwrap();
        let mels = out.mel.unwrap();

        assert_eq!(mels.max_frames, 6);
        assert_eq!(mels.lengths, vec![5]);
        assert_eq!(mels.gate, vec![0.0, 0.0, 0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_channel_mismatch() {
        let samples = vec![
            Sample::new().with_mel(mel(80, 4, 0.0)),
            Sample::new().with_mel(mel(40, 4, 0.0)),
        ];
        let err = collate_samples(&samples, 1).unwrap_err();
        assert_eq!(
            err,
            CoreError::ShapeMismatch {
                field: "mel",
                index: 1,
                expected: 80,
                got: 40
            }
        );
    }

    #[test]
    fn test_missing_field_on_later_sample() {
        let samples = vec![
            Sample::new().with_text(vec![1]).with_speaker(0),
            Sample::new().with_text(vec![2]),
        ];
        assert_eq!(
            collate_samples(&samples, 1).unwrap_err(),
            CoreError::MissingField {
                field: "speaker_id",
                index: 1
            }
        );
    }

    #[test]
    fn test_stacked_fields() {
        let samples = vec![
            Sample::new()
                .with_speaker(3)
                .with_gst(vec![0.1, 0.2])
                .with_audio_encoding(Matrix::new(1, 3, vec![1.0, 2.0, 3.0]).unwrap()),
            Sample::new()
                .with_speaker(7)
                .with_gst(vec![0.3, 0.4])
                .with_audio_encoding(Matrix::new(2, 3, vec![4.0; 6]).unwrap()),
        ];
        let out = collate_samples(&samples, 1).unwrap();

        assert_eq!(out.speaker_ids, Some(vec![3, 7]));
        let gst = out.gst.unwrap();
        assert_eq!((gst.rows, gst.width), (2, 2));
        assert_eq!(gst.data, vec![0.1, 0.2, 0.3, 0.4]);
        let enc = out.audio_encodings.unwrap();
        assert_eq!((enc.rows, enc.width), (3, 3));
    }

    #[test]
    fn test_gst_width_mismatch() {
        let samples = vec![
            Sample::new().with_gst(vec![0.0; 4]),
            Sample::new().with_gst(vec![0.0; 3]),
        ];
        assert!(matches!(
            collate_samples(&samples, 1),
            Err(CoreError::ShapeMismatch {
                field: "embedded_gst",
                ..
            })
        ));
    }

    #[test]
    fn test_f0_padding() {
        let samples = vec![
            Sample::new().with_f0(vec![100.0, 110.0]),
            Sample::new().with_f0(vec![200.0, 210.0, 220.0]),
        ];
        let out = collate_samples(&samples, 2).unwrap();
        let f0 = out.f0.unwrap();

        assert_eq!(f0.max_frames, 4);
        assert_eq!(
            f0.data,
            vec![100.0, 110.0, 0.0, 0.0, 200.0, 210.0, 220.0, 0.0]
        );
    }
}
