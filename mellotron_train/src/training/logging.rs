//! Metric and media event sinks.
//!
//! The trainer reports everything it observes through [`LogSink`]: scalars
//! every step, and spectrogram/attention heatmaps, gate curves and
//! synthesized audio at the sampling interval. Storage and rendering belong
//! to the sink implementation.

use std::sync::{Arc, Mutex};

use mellotron_core::Matrix;

/// A named series for curve figures.
#[derive(Debug, Clone, PartialEq)]
pub struct Curve {
    /// Legend label.
    pub label: String,
    /// One value per x position.
    pub values: Vec<f32>,
}

impl Curve {
    /// Create a curve.
    pub fn new(label: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            label: label.into(),
            values,
        }
    }
}

/// Receives tagged training events.
pub trait LogSink: Send {
    /// Record a scalar.
    fn scalar(&mut self, tag: &str, value: f32, step: usize);

    /// Record an audio clip.
    fn audio(&mut self, tag: &str, samples: &[f32], sample_rate: u32, step: usize);

    /// Record a 2-D matrix to be shown as an image.
    fn heatmap(&mut self, tag: &str, matrix: &Matrix, step: usize);

    /// Record a figure of line curves.
    fn curves(&mut self, tag: &str, curves: &[Curve], step: usize);
}

/// Forwards events to the `log` facade.
///
/// Scalars are logged at debug level; media events are summarized by shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogRecordSink;

impl LogSink for LogRecordSink {
    fn scalar(&mut self, tag: &str, value: f32, step: usize) {
        log::debug!("[{step}] {tag} = {value:.6}");
    }

    fn audio(&mut self, tag: &str, samples: &[f32], sample_rate: u32, step: usize) {
        log::debug!(
            "[{step}] {tag}: audio {} samples ({:.2}s)",
            samples.len(),
            samples.len() as f32 / sample_rate.max(1) as f32
        );
    }

    fn heatmap(&mut self, tag: &str, matrix: &Matrix, step: usize) {
        log::debug!("[{step}] {tag}: heatmap {}x{}", matrix.rows(), matrix.cols());
    }

    fn curves(&mut self, tag: &str, curves: &[Curve], step: usize) {
        let labels: Vec<&str> = curves.iter().map(|c| c.label.as_str()).collect();
        log::debug!("[{step}] {tag}: curves {labels:?}");
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn scalar(&mut self, _tag: &str, _value: f32, _step: usize) {}
    fn audio(&mut self, _tag: &str, _samples: &[f32], _sample_rate: u32, _step: usize) {}
    fn heatmap(&mut self, _tag: &str, _matrix: &Matrix, _step: usize) {}
    fn curves(&mut self, _tag: &str, _curves: &[Curve], _step: usize) {}
}

/// A recorded event.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    /// Scalar value.
    Scalar {
        /// Event tag.
        tag: String,
        /// Value.
        value: f32,
        /// Global step.
        step: usize,
    },
    /// Audio clip.
    Audio {
        /// Event tag.
        tag: String,
        /// Samples.
        samples: Vec<f32>,
        /// Sample rate.
        sample_rate: u32,
        /// Global step.
        step: usize,
    },
    /// Heatmap.
    Heatmap {
        /// Event tag.
        tag: String,
        /// Matrix shown.
        matrix: Matrix,
        /// Global step.
        step: usize,
    },
    /// Curve figure.
    Curves {
        /// Event tag.
        tag: String,
        /// Curves drawn.
        curves: Vec<Curve>,
        /// Global step.
        step: usize,
    },
}

impl LogEvent {
    /// The event tag.
    pub fn tag(&self) -> &str {
        match self {
            Self::Scalar { tag, .. }
            | Self::Audio { tag, .. }
            | Self::Heatmap { tag, .. }
            | Self::Curves { tag, .. } => tag,
        }
    }

    /// The global step.
    pub fn step(&self) -> usize {
        match self {
            Self::Scalar { step, .. }
            | Self::Audio { step, .. }
            | Self::Heatmap { step, .. }
            | Self::Curves { step, .. } => *step,
        }
    }
}

/// Keeps events in memory.
///
/// Clones share one buffer, so a handle kept by the caller sees the events
/// of a sink moved into the trainer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<LogEvent>>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events.
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Values of scalar `tag`, in recording order, with their steps.
    pub fn scalars(&self, tag: &str) -> Vec<(usize, f32)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                LogEvent::Scalar { tag: t, value, step } if t == tag => Some((step, value)),
                _ => None,
            })
            .collect()
    }

    /// Number of events with `tag`.
    pub fn count(&self, tag: &str) -> usize {
        self.events().iter().filter(|e| e.tag() == tag).count()
    }

    fn push(&self, event: LogEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl LogSink for MemorySink {
    fn scalar(&mut self, tag: &str, value: f32, step: usize) {
        self.push(LogEvent::Scalar {
            tag: tag.to_string(),
            value,
            step,
        });
    }

    fn audio(&mut self, tag: &str, samples: &[f32], sample_rate: u32, step: usize) {
        self.push(LogEvent::Audio {
            tag: tag.to_string(),
            samples: samples.to_vec(),
            sample_rate,
            step,
        });
    }

    fn heatmap(&mut self, tag: &str, matrix: &Matrix, step: usize) {
        self.push(LogEvent::Heatmap {
            tag: tag.to_string(),
            matrix: matrix.clone(),
            step,
        });
    }

    fn curves(&mut self, tag: &str, curves: &[Curve], step: usize) {
        self.push(LogEvent::Curves {
            tag: tag.to_string(),
            curves: curves.to_vec(),
            step,
        });
    }
}
