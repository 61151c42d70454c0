//! Per-sample training features.
//!
//! A [`Sample`] carries every field a text-to-mel dataset may produce. All
//! fields are optional; which ones a batch carries is decided once, from the
//! first sample, by [`SampleFields::of`].

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Dense row-major 2D array of `f32` values.
///
/// Used for mel spectrograms (`rows` = channels, `cols` = frames) and for
/// audio encodings (`rows` = encoding frames, `cols` = encoding width).
///
/// Deserialization checks that `data` holds exactly `rows * cols` values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMatrix")]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

#[derive(Deserialize)]
struct RawMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl TryFrom<RawMatrix> for Matrix {
    type Error = CoreError;

    fn try_from(raw: RawMatrix) -> Result<Self, CoreError> {
        let expected = raw.rows.checked_mul(raw.cols).unwrap_or(usize::MAX);
        if raw.data.len() != expected {
            return Err(CoreError::ShapeMismatch {
                field: "matrix",
                index: 0,
                expected,
                got: raw.data.len(),
            });
        }
        Ok(Self {
            rows: raw.rows,
            cols: raw.cols,
            data: raw.data,
        })
    }
}

impl Matrix {
    /// Create a matrix from row-major data.
    ///
    /// Returns `None` when `data.len() != rows * cols`.
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Option<Self> {
        if data.len() != rows * cols {
            return None;
        }
        Some(Self { rows, cols, data })
    }

    /// Create a zero-filled matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Build a matrix by evaluating `f(row, col)` for every element.
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Self { rows, cols, data }
    }

    /// Number of rows.
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Value at `(row, col)`.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    /// One row as a slice.
    #[inline]
    pub fn row(&self, row: usize) -> &[f32] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Flat row-major storage.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Consume into flat row-major storage.
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Shape as `[rows, cols]`.
    pub fn shape(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }
}

/// One training example.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Token ids of the input text.
    pub text_sequence: Option<Vec<i64>>,
    /// Mel spectrogram, channels x frames.
    pub mel: Option<Matrix>,
    /// Fundamental-frequency contour, one value per frame.
    pub f0: Option<Vec<f32>>,
    /// Speaker id.
    pub speaker_id: Option<i64>,
    /// Fixed-length global style token embedding.
    pub embedded_gst: Option<Vec<f32>>,
    /// Audio encoding; rows are concatenated across the batch.
    pub audio_encoding: Option<Matrix>,
}

impl Sample {
    /// Create an empty sample.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the text token sequence.
    pub fn with_text(mut self, tokens: Vec<i64>) -> Self {
        self.text_sequence = Some(tokens);
        self
    }

    /// Set the mel spectrogram.
    pub fn with_mel(mut self, mel: Matrix) -> Self {
        self.mel = Some(mel);
        self
    }

    /// Set the F0 contour.
    pub fn with_f0(mut self, f0: Vec<f32>) -> Self {
        self.f0 = Some(f0);
        self
    }

    /// Set the speaker id.
    pub fn with_speaker(mut self, speaker_id: i64) -> Self {
        self.speaker_id = Some(speaker_id);
        self
    }

    /// Set the style-token embedding.
    pub fn with_gst(mut self, gst: Vec<f32>) -> Self {
        self.embedded_gst = Some(gst);
        self
    }

    /// Set the audio encoding.
    pub fn with_audio_encoding(mut self, encoding: Matrix) -> Self {
        self.audio_encoding = Some(encoding);
        self
    }

    /// Number of mel frames, if a mel is present.
    pub fn mel_frames(&self) -> Option<usize> {
        self.mel.as_ref().map(Matrix::cols)
    }
}

/// Which fields a batch carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleFields {
    /// `text_sequence` is present.
    pub text: bool,
    /// `mel` is present.
    pub mel: bool,
    /// `f0` is present.
    pub f0: bool,
    /// `speaker_id` is present.
    pub speaker_id: bool,
    /// `embedded_gst` is present.
    pub gst: bool,
    /// `audio_encoding` is present.
    pub audio_encoding: bool,
}

impl SampleFields {
    /// Inspect the fields present on one sample.
    pub fn of(sample: &Sample) -> Self {
        Self {
            text: sample.text_sequence.is_some(),
            mel: sample.mel.is_some(),
            f0: sample.f0.is_some(),
            speaker_id: sample.speaker_id.is_some(),
            gst: sample.embedded_gst.is_some(),
            audio_encoding: sample.audio_encoding.is_some(),
        }
    }

    /// Name of the first field in `self` that `sample` lacks.
    pub fn first_missing(&self, sample: &Sample) -> Option<&'static str> {
        let present = Self::of(sample);
        [
            (self.text && !present.text, "text_sequence"),
            (self.mel && !present.mel, "mel"),
            (self.f0 && !present.f0, "f0"),
            (self.speaker_id && !present.speaker_id, "speaker_id"),
            (self.gst && !present.gst, "embedded_gst"),
            (self.audio_encoding && !present.audio_encoding, "audio_encoding"),
        ]
        .into_iter()
        .find_map(|(missing, name)| missing.then_some(name))
    }
}
