//! Dataset index ordering for single-process and data-parallel training.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::CoreError;

/// A worker's slice of the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shard {
    /// Worker rank, `0..world_size`.
    pub rank: usize,
    /// Number of workers.
    pub world_size: usize,
}

impl Shard {
    /// The whole dataset as one shard.
    pub const WHOLE: Shard = Shard {
        rank: 0,
        world_size: 1,
    };

    /// Create a shard, checking `rank < world_size`.
    pub fn new(rank: usize, world_size: usize) -> Result<Self, CoreError> {
        if world_size == 0 || rank >= world_size {
            return Err(CoreError::InvalidShard { rank, world_size });
        }
        Ok(Self { rank, world_size })
    }
}

impl Default for Shard {
    fn default() -> Self {
        Self::WHOLE
    }
}

/// Produces the per-epoch index order for one worker.
///
/// With shuffling enabled, the permutation is a pure function of
/// `seed + epoch`, so every worker computes the same permutation and then
/// takes its own interleaved slice. When sharded, the index list is padded
/// by wrapping around so each worker receives the same number of indices.
#[derive(Debug, Clone)]
pub struct IndexSampler {
    shuffle: bool,
    seed: u64,
    epoch: u64,
    shard: Shard,
}

impl IndexSampler {
    /// Sequential, unsharded order.
    pub fn sequential() -> Self {
        Self {
            shuffle: false,
            seed: 0,
            epoch: 0,
            shard: Shard::WHOLE,
        }
    }

    /// Shuffled, unsharded order.
    pub fn shuffled(seed: u64) -> Self {
        Self {
            shuffle: true,
            seed,
            epoch: 0,
            shard: Shard::WHOLE,
        }
    }

    /// Restrict this sampler to one shard.
    pub fn with_shard(mut self, shard: Shard) -> Self {
        self.shard = shard;
        self
    }

    /// Set the epoch used to seed the shuffle.
    pub fn set_epoch(&mut self, epoch: usize) {
        self.epoch = epoch as u64;
    }

    /// Current epoch.
    pub fn epoch(&self) -> usize {
        self.epoch as usize
    }

    /// The shard this sampler draws from.
    pub fn shard(&self) -> Shard {
        self.shard
    }

    /// Whether the order is shuffled.
    pub fn is_shuffled(&self) -> bool {
        self.shuffle
    }

    /// Number of indices this worker receives for a dataset of `len` items.
    pub fn num_samples(&self, len: usize) -> usize {
        len.div_ceil(self.shard.world_size)
    }

    /// Indices for this worker and epoch.
    pub fn indices(&self, len: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..len).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.epoch));
            order.shuffle(&mut rng);
        }

        if self.shard.world_size == 1 || len == 0 {
            return order;
        }

        let total = self.num_samples(len) * self.shard.world_size;
        let mut padded = order.clone();
        while padded.len() < total {
            let needed = total - padded.len();
            padded.extend(order.iter().take(needed));
        }

        padded
            .into_iter()
            .skip(self.shard.rank)
            .step_by(self.shard.world_size)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential() {
        assert_eq!(IndexSampler::sequential().indices(4), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_shuffle_deterministic_per_epoch() {
        let mut sampler = IndexSampler::shuffled(7);
        let first = sampler.indices(50);
        assert_eq!(first, sampler.indices(50));

        sampler.set_epoch(1);
        let second = sampler.indices(50);
        assert_ne!(first, second);

        let mut sorted = second.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_shards_partition_dataset() {
        let len = 10;
        let mut seen = Vec::new();
        for rank in 0..3 {
            let sampler = IndexSampler::shuffled(1).with_shard(Shard::new(rank, 3).unwrap());
            let indices = sampler.indices(len);
            assert_eq!(indices.len(), 4);
            seen.extend(indices);
        }
        // 12 slots over 10 items: every item appears, two are repeated.
        assert_eq!(seen.len(), 12);
        for i in 0..len {
            assert!(seen.contains(&i));
        }
    }

    #[test]
    fn test_sequential_shards_interleave() {
        let sampler = IndexSampler::sequential().with_shard(Shard::new(1, 2).unwrap());
        assert_eq!(sampler.indices(5), vec![1, 3, 0]);
    }

    #[test]
    fn test_invalid_shard() {
        assert!(Shard::new(2, 2).is_err());
        assert!(Shard::new(0, 0).is_err());
    }
}
