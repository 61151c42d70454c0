//! Datasets and batch loading for training.

mod dataset;
mod loader;

pub use dataset::{DebugSubset, InMemorySampleDataset, SampleDataset};
pub use loader::{Batches, SampleLoader};
