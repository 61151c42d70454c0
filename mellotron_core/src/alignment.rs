//! Attention-alignment quality metrics.
//!
//! Alignments arrive as flat `[batch, decoder_steps, encoder_steps]` weights.
//! A healthy Tacotron alignment is a sharp, monotonic diagonal, so two
//! numbers are tracked:
//!
//! - `max`: mean over decoder steps of the largest attention weight
//!   (1.0 means fully focused).
//! - `diagonalness`: the length of the argmax path divided by the length of
//!   the straight diagonal. A clean diagonal scores close to 1; a path that
//!   jumps around scores higher.

/// Aggregated alignment metrics.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AlignmentMetrics {
    /// Mean per-step maximum attention weight.
    pub max: f32,
    /// Argmax path length relative to the diagonal.
    pub diagonalness: f32,
}

/// Shape of a batch of alignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentShape {
    /// Batch size.
    pub batch: usize,
    /// Decoder steps (rows per item).
    pub decoder_steps: usize,
    /// Encoder steps (columns per row).
    pub encoder_steps: usize,
}

/// Compute alignment metrics averaged over the batch.
///
/// `input_lengths` / `output_lengths`, when given, restrict each item to its
/// valid encoder columns and decoder rows. Returns default metrics for empty
/// input.
pub fn alignment_metrics(
    weights: &[f32],
    shape: AlignmentShape,
    input_lengths: Option<&[i64]>,
    output_lengths: Option<&[i64]>,
) -> AlignmentMetrics {
    let AlignmentShape {
        batch,
        decoder_steps,
        encoder_steps,
    } = shape;
    if batch == 0 || decoder_steps == 0 || encoder_steps == 0 {
        return AlignmentMetrics::default();
    }

    let clamp = |len: Option<&i64>, max: usize| {
        len.map_or(max, |&l| (l.max(1) as usize).min(max))
    };

    let mut total_max = 0.0f64;
    let mut total_diag = 0.0f64;

    for b in 0..batch {
        let enc_len = clamp(input_lengths.and_then(|l| l.get(b)), encoder_steps);
        let dec_len = clamp(output_lengths.and_then(|l| l.get(b)), decoder_steps);
        let item = &weights[b * decoder_steps * encoder_steps..(b + 1) * decoder_steps * encoder_steps];

        let mut step_max_sum = 0.0f64;
        let mut path = 0.0f64;
        let mut previous: Option<usize> = None;

        for t in 0..dec_len {
            let row = &item[t * encoder_steps..t * encoder_steps + enc_len];
            let (argmax, value) = row
                .iter()
                .copied()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, v)| if v > best.1 { (i, v) } else { best });
            step_max_sum += value as f64;

            let prev = previous.unwrap_or(argmax);
            let jump = argmax as f64 - prev as f64;
            path += (jump * jump + 1.0).sqrt();
            previous = Some(argmax);
        }

        let optimum = ((enc_len * enc_len + dec_len * dec_len) as f64).sqrt();
        total_max += step_max_sum / dec_len as f64;
        total_diag += path / optimum;
    }

    AlignmentMetrics {
        max: (total_max / batch as f64) as f32,
        diagonalness: (total_diag / batch as f64) as f32,
    }
}

/// Extract one item's alignment as an `[encoder, decoder]` matrix cropped to
/// the given lengths, the orientation used for attention plots.
pub fn transpose_item(
    weights: &[f32],
    shape: AlignmentShape,
    item: usize,
    encoder_len: usize,
    decoder_len: usize,
) -> (usize, usize, Vec<f32>) {
    let enc = encoder_len.min(shape.encoder_steps);
    let dec = decoder_len.min(shape.decoder_steps);
    let base = item * shape.decoder_steps * shape.encoder_steps;

    let mut out = Vec::with_capacity(enc * dec);
    for e in 0..enc {
        for d in 0..dec {
            out.push(weights[base + d * shape.encoder_steps + e]);
        }
    }
    (enc, dec, out)
}
