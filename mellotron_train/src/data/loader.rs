//! Batching loader over a [`SampleDataset`].

use std::marker::PhantomData;

use burn::prelude::*;

use mellotron_core::IndexSampler;

use crate::error::Result;
use crate::training::{Collate, TextMelBatch};

use super::SampleDataset;

/// Draws samples in sampler order and collates them into batches.
///
/// A loader is rebuilt, not mutated, when the reduction window changes its
/// batch size or collator.
#[derive(Debug, Clone)]
pub struct SampleLoader {
    sampler: IndexSampler,
    batch_size: usize,
    collate: Collate,
}

impl SampleLoader {
    /// Create a loader.
    pub fn new(sampler: IndexSampler, batch_size: usize, collate: Collate) -> Self {
        Self {
            sampler,
            batch_size: batch_size.max(1),
            collate,
        }
    }

    /// Reseed the sampler for `epoch`.
    pub fn set_epoch(&mut self, epoch: usize) {
        self.sampler.set_epoch(epoch);
    }

    /// Samples per batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// The collator.
    pub fn collate(&self) -> &Collate {
        &self.collate
    }

    /// The sampler.
    pub fn sampler(&self) -> &IndexSampler {
        &self.sampler
    }

    /// Batches produced for a dataset of `len` samples. The last short batch
    /// counts.
    pub fn num_batches(&self, len: usize) -> usize {
        self.sampler.num_samples(len).div_ceil(self.batch_size)
    }

    /// Iterate over the batches of `dataset`.
    pub fn batches<'a, B: Backend, D: SampleDataset + ?Sized>(
        &self,
        dataset: &'a D,
        device: &'a B::Device,
    ) -> Batches<'a, B, D> {
        Batches {
            dataset,
            device,
            indices: self.sampler.indices(dataset.len()),
            position: 0,
            batch_size: self.batch_size,
            collate: self.collate,
            _backend: PhantomData,
        }
    }
}

/// Iterator over collated batches.
pub struct Batches<'a, B: Backend, D: ?Sized> {
    dataset: &'a D,
    device: &'a B::Device,
    indices: Vec<usize>,
    position: usize,
    batch_size: usize,
    collate: Collate,
    _backend: PhantomData<B>,
}

impl<B: Backend, D: SampleDataset + ?Sized> Iterator for Batches<'_, B, D> {
    type Item = Result<TextMelBatch<B>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.indices.len() {
            return None;
        }
        let end = (self.position + self.batch_size).min(self.indices.len());
        let chunk = &self.indices[self.position..end];
        self.position = end;

        let samples = chunk
            .iter()
            .map(|&i| self.dataset.get(i))
            .collect::<Result<Vec<_>>>();
        Some(samples.and_then(|samples| self.collate.collate::<B>(&samples, self.device)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.indices.len() - self.position).div_ceil(self.batch_size);
        (remaining, Some(remaining))
    }
}
