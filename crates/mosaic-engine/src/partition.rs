//! Capability-weighted work partitioning
//!
//! Heterogeneous devices train at different speeds. Giving each rank a batch
//! proportional to its compute capability keeps them finishing iterations
//! together. Every rank runs the same number of iterations; the dataset is
//! padded by wrapping around to the front so that count is whole.
//!
//! With shuffling on, the dataset order is a permutation seeded by
//! `seed + epoch`. Every rank derives the same permutation from the same
//! plan, so the shares stay disjoint; bump the epoch to reshuffle.

use mosaic_types::{MosaicError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Capability score of the fastest supported device
pub const MAX_COMPUTE_CAPABILITY: f64 = 10.0;

/// Per-rank batch sizes derived from capability scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityPlan {
    base_batch_size: usize,
    max_capability: f64,
    batch_sizes: Vec<usize>,
    #[serde(default)]
    shuffle: bool,
    #[serde(default)]
    seed: u64,
    #[serde(default)]
    epoch: u64,
}

impl CapabilityPlan {
    /// Plan with the default capability ceiling
    pub fn new(base_batch_size: usize, capabilities: &[f64]) -> Result<Self> {
        Self::with_max_capability(base_batch_size, capabilities, MAX_COMPUTE_CAPABILITY)
    }

    pub fn with_max_capability(
        base_batch_size: usize,
        capabilities: &[f64],
        max_capability: f64,
    ) -> Result<Self> {
        if base_batch_size == 0 {
            return Err(MosaicError::config("Base batch size must be greater than 0"));
        }
        if !(max_capability.is_finite() && max_capability > 0.0) {
            return Err(MosaicError::config(format!(
                "Maximum capability must be positive, got {}",
                max_capability
            )));
        }
        if capabilities.is_empty() {
            return Err(MosaicError::config("At least one rank capability is required"));
        }

        let batch_sizes = capabilities
            .iter()
            .enumerate()
            .map(|(rank, &cap)| {
                if !(cap.is_finite() && cap > 0.0) {
                    return Err(MosaicError::config(format!(
                        "Capability of rank {} must be positive, got {}",
                        rank, cap
                    )));
                }
                Ok(batch_size_for(base_batch_size, cap, max_capability))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            base_batch_size,
            max_capability,
            batch_sizes,
            shuffle: false,
            seed: 0,
            epoch: 0,
        })
    }

    /// Shuffle the dataset order with `seed`; the seed must match on every rank
    pub fn with_shuffle(mut self, seed: u64) -> Self {
        self.shuffle = true;
        self.seed = seed;
        self
    }

    /// Select the epoch whose permutation `indices` walks
    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffle
    }

    pub fn world_size(&self) -> usize {
        self.batch_sizes.len()
    }

    pub fn batch_sizes(&self) -> &[usize] {
        &self.batch_sizes
    }

    pub fn batch_size(&self, rank: usize) -> Result<usize> {
        self.batch_sizes.get(rank).copied().ok_or_else(|| {
            MosaicError::config(format!(
                "rank {} outside plan of {} rank(s)",
                rank,
                self.world_size()
            ))
        })
    }

    /// Samples consumed by all ranks in one iteration
    pub fn global_batch_size(&self) -> usize {
        self.batch_sizes.iter().sum()
    }

    /// Iterations needed to cover `dataset_len` samples
    pub fn iterations(&self, dataset_len: usize) -> usize {
        dataset_len.div_ceil(self.global_batch_size())
    }

    /// Padded dataset length every rank together walks through
    pub fn total_size(&self, dataset_len: usize) -> usize {
        self.iterations(dataset_len) * self.global_batch_size()
    }

    pub fn num_samples(&self, dataset_len: usize, rank: usize) -> Result<usize> {
        Ok(self.iterations(dataset_len) * self.batch_size(rank)?)
    }

    /// Position of `rank`'s share within the padded dataset
    pub fn index_range(&self, dataset_len: usize, rank: usize) -> Result<Range<usize>> {
        let len = self.num_samples(dataset_len, rank)?;
        let start = self.iterations(dataset_len) * self.batch_sizes[..rank].iter().sum::<usize>();
        Ok(start..start + len)
    }

    /// Dataset order for the current epoch, before padding
    pub fn order(&self, dataset_len: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..dataset_len).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.epoch));
            order.shuffle(&mut rng);
        }
        order
    }

    /// Dataset indices for `rank`; the padded tail wraps to the front of the order
    pub fn indices(&self, dataset_len: usize, rank: usize) -> Result<Vec<usize>> {
        if dataset_len == 0 {
            return Ok(Vec::new());
        }
        let range = self.index_range(dataset_len, rank)?;
        let order = self.order(dataset_len);
        Ok(range.map(|i| order[i % dataset_len]).collect())
    }
}

/// `round(base * cap / max_cap)`, never below one sample
pub fn batch_size_for(base_batch_size: usize, capability: f64, max_capability: f64) -> usize {
    let scaled = (base_batch_size as f64 * capability / max_capability).round();
    (scaled as usize).max(1)
}
