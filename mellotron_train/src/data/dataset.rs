//! Sample datasets.

use mellotron_core::Sample;

use crate::error::{Result, TrainError};

/// An indexable collection of training samples.
pub trait SampleDataset {
    /// Number of samples.
    fn len(&self) -> usize;

    /// Load the sample at `index`.
    fn get(&self, index: usize) -> Result<Sample>;

    /// Check if empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<D: SampleDataset + ?Sized> SampleDataset for &D {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        (**self).get(index)
    }
}

/// Samples held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySampleDataset {
    /// Samples in the dataset.
    pub samples: Vec<Sample>,
}

impl InMemorySampleDataset {
    /// Create a dataset from samples.
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// Add a sample.
    pub fn add(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    /// Iterate over samples.
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }
}

impl FromIterator<Sample> for InMemorySampleDataset {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl SampleDataset for InMemorySampleDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        self.samples.get(index).cloned().ok_or_else(|| TrainError::Dataset {
            message: format!("index {index} out of range for {} samples", self.samples.len()),
        })
    }
}

/// The first `size` samples of a dataset, for fast debug iteration.
#[derive(Debug, Clone)]
pub struct DebugSubset<D> {
    inner: D,
    size: usize,
}

impl<D: SampleDataset> DebugSubset<D> {
    /// Truncate `inner` to at most `size` samples.
    pub fn new(inner: D, size: usize) -> Self {
        Self { inner, size }
    }
}

impl<D: SampleDataset> SampleDataset for DebugSubset<D> {
    fn len(&self) -> usize {
        self.inner.len().min(self.size)
    }

    fn get(&self, index: usize) -> Result<Sample> {
        if index >= self.len() {
            return Err(TrainError::Dataset {
                message: format!("index {index} out of range for debug subset of {}", self.len()),
            });
        }
        self.inner.get(index)
    }
}
