//! Pluggable clustering strategies.
//!
//! A [`ClusterComputer`] turns one shard into a [`ClusterResult`]. The
//! dispatch layer only depends on this contract:
//!
//! - `compute(records, k)` returns exactly `k` centroids whenever
//!   `records.len() >= k`.
//! - An empty shard (or `k == 0`) yields an empty result.
//! - With a fixed seed, repeated calls on the same input return the same
//!   centroids.
//!
//! ## Strategies
//!
//! - [`RandomSampler`] - picks `k` records with replacement. Cheap and useful
//!   in tests, but may return duplicate centroids.
//! - [`KMeansRefiner`] - Lloyd iterations over latitude/longitude.
//!
//! [`Strategy`] selects between them from configuration.

mod kmeans;
mod sampler;

pub use kmeans::*;
pub use sampler::*;

use crate::{ClusterResult, Record};
use rand::{SeedableRng, rngs::StdRng};
use std::sync::Arc;

/// Computes a partial clustering for one shard.
pub trait ClusterComputer: Send + Sync {
    /// Returns the centroids summarizing `records`.
    fn compute(&self, records: &[Record], k: usize) -> ClusterResult;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Configurable choice of [`ClusterComputer`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Strategy {
    /// [`RandomSampler`].
    Sample,
    /// [`KMeansRefiner`].
    #[default]
    KMeans,
}

impl Strategy {
    /// Builds the selected computer. `max_iterations` only applies to
    /// [`Strategy::KMeans`].
    pub fn build(self, seed: Option<u64>, max_iterations: usize) -> Arc<dyn ClusterComputer> {
        match self {
            Self::Sample => Arc::new(RandomSampler::new(seed)),
            Self::KMeans => {
                Arc::new(KMeansRefiner::new(seed).with_max_iterations(max_iterations))
            }
        }
    }
}

/// Returns a generator seeded from `seed`, or from the thread RNG when no seed
/// is configured.
pub(crate) fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    }
}
