//! Property tests for collation, samplers and the reduction-window cursor.

use mellotron_core::prelude::*;
use proptest::prelude::*;

fn mel_strategy(channels: usize) -> impl Strategy<Value = Matrix> {
    (1usize..40).prop_flat_map(move |frames| {
        prop::collection::vec(-4.0f32..4.0, channels * frames)
            .prop_map(move |data| Matrix::new(channels, frames, data).unwrap())
    })
}

fn batch_strategy() -> impl Strategy<Value = Vec<Sample>> {
    (1usize..6).prop_flat_map(|channels| {
        prop::collection::vec(mel_strategy(channels), 1..8)
            .prop_map(|mels| mels.into_iter().map(|m| Sample::new().with_mel(m)).collect())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every sample occupies the left of its row and the tail is zero.
    #[test]
    fn mel_rows_left_aligned(samples in batch_strategy()) {
        let collated = collate_samples(&samples, 1).unwrap();
        let mel = collated.mel.unwrap();
        let n = samples.len();
        let max_len = samples.iter().map(|s| s.mel_frames().unwrap()).max().unwrap();

        prop_assert_eq!(mel.max_frames, max_len);
        prop_assert_eq!(mel.data.len(), n * mel.channels * max_len);

        for (i, sample) in samples.iter().enumerate() {
            let original = sample.mel.as_ref().unwrap();
            for c in 0..mel.channels {
                let row = &mel.data[(i * mel.channels + c) * max_len..(i * mel.channels + c + 1) * max_len];
                prop_assert_eq!(&row[..original.cols()], original.row(c));
                prop_assert!(row[original.cols()..].iter().all(|&v| v == 0.0));
            }
        }
    }

    /// Gate targets switch to 1 exactly at the last valid frame.
    #[test]
    fn gate_marks_last_frame(samples in batch_strategy()) {
        let mel = collate_samples(&samples, 1).unwrap().mel.unwrap();
        for (i, &len) in mel.lengths.iter().enumerate() {
            let row = &mel.gate[i * mel.max_frames..(i + 1) * mel.max_frames];
            for (t, &g) in row.iter().enumerate() {
                let expected = if t as i64 >= len - 1 { 1.0 } else { 0.0 };
                prop_assert_eq!(g, expected);
            }
        }
    }

    /// Recorded lengths reproduce the originals.
    #[test]
    fn lengths_round_trip(lengths in prop::collection::vec(0usize..30, 1..10)) {
        let samples: Vec<Sample> = lengths
            .iter()
            .map(|&l| Sample::new().with_text((0..l as i64).collect()))
            .collect();
        let text = collate_samples(&samples, 1).unwrap().text.unwrap();
        let recovered: Vec<usize> = text.lengths.iter().map(|&l| l as usize).collect();
        prop_assert_eq!(recovered, lengths);
    }

    /// Rounding keeps every frame inside the padded plane.
    #[test]
    fn padded_length_is_multiple(samples in batch_strategy(), fps in 1usize..5) {
        let mel = collate_samples(&samples, fps).unwrap().mel.unwrap();
        prop_assert_eq!(mel.max_frames % fps, 0);
        prop_assert!(mel.lengths.iter().all(|&l| l as usize <= mel.max_frames));
    }

    /// Crossing any number of boundaries in one call reports one transition.
    #[test]
    fn scheduler_signals_once(step in 0usize..5000) {
        let schedule = ReductionWindowSchedule::new(vec![
            ReductionWindow::until(4, 64, 500),
            ReductionWindow::until(3, 48, 1000),
            ReductionWindow::until(2, 32, 2000),
            ReductionWindow::open(1, 16),
        ]).unwrap();
        let initial = schedule.get(0).unwrap().settings();
        let mut scheduler = ReductionWindowScheduler::new(schedule, initial);

        let first = scheduler.adjust(step);
        prop_assert_eq!(first.is_some(), step >= 500);
        prop_assert_eq!(scheduler.adjust(step), None);
    }

    /// Shards cover the dataset and are the same size.
    #[test]
    fn shards_cover_dataset(len in 1usize..200, world in 1usize..5, seed in any::<u64>()) {
        let mut all = Vec::new();
        let mut sizes = Vec::new();
        for rank in 0..world {
            let sampler = IndexSampler::shuffled(seed).with_shard(Shard::new(rank, world).unwrap());
            let indices = sampler.indices(len);
            sizes.push(indices.len());
            all.extend(indices);
        }
        prop_assert!(sizes.windows(2).all(|w| w[0] == w[1]));
        for i in 0..len {
            prop_assert!(all.contains(&i));
        }
    }
}

#[test]
fn schedule_deserializes_from_json() {
    let json = r#"[
        {"n_frames_per_step": 2, "batch_size": 64, "until_step": 1000},
        {"n_frames_per_step": 1, "batch_size": 32, "until_step": null}
    ]"#;
    let windows: Vec<ReductionWindow> = serde_json::from_str(json).unwrap();
    let schedule = ReductionWindowSchedule::new(windows).unwrap();

    assert_eq!(schedule.len(), 2);
    assert_eq!(schedule.get(1).unwrap().until_step, None);
}

#[test]
fn absent_fields_are_not_produced() {
    let samples = vec![Sample::new().with_text(vec![1, 2])];
    let collated = collate_samples(&samples, 1).unwrap();

    assert!(collated.mel.is_none());
    assert!(collated.f0.is_none());
    assert!(collated.speaker_ids.is_none());
    assert!(collated.gst.is_none());
    assert!(collated.audio_encodings.is_none());
}

#[test]
fn single_frame_mel_gate_is_stop() {
    let samples = vec![Sample::new().with_mel(Matrix::zeros(3, 1))];
    let mel = collate_samples(&samples, 1).unwrap().mel.unwrap();
    assert_eq!(mel.gate, vec![1.0]);
}
