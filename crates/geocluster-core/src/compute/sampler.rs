use super::{ClusterComputer, seeded_rng};
use crate::{ClusterResult, Record};
use rand::Rng;

/// Picks `k` records uniformly at random, with replacement.
///
/// This is a placeholder policy rather than a clustering: duplicate
/// centroids are possible, including when the shard holds fewer than `k`
/// records. Every call with the same seed draws the same sequence.
#[derive(Clone, Debug, Default)]
pub struct RandomSampler {
    seed: Option<u64>,
}

impl RandomSampler {
    pub const fn new(seed: Option<u64>) -> Self {
        Self { seed }
    }
}

impl ClusterComputer for RandomSampler {
    fn compute(&self, records: &[Record], k: usize) -> ClusterResult {
        if records.is_empty() || k == 0 {
            return ClusterResult::empty();
        }

        let mut rng = seeded_rng(self.seed);
        let centroids = (0..k)
            .map(|_| records[rng.random_range(0..records.len())].clone())
            .collect();

        ClusterResult::new(centroids)
    }

    fn name(&self) -> &'static str {
        "sample"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<Record> {
        (0..20)
            .map(|i| Record::new(i as f64, i as f64 * 2.0, "theft", format!("t{i}")))
            .collect()
    }

    #[test]
    fn returns_k_centroids_drawn_from_the_shard() {
        let records = records();
        let result = RandomSampler::new(Some(7)).compute(&records, 4);
        assert_eq!(result.len(), 4);
        assert!(result.centroids.iter().all(|c| records.contains(c)));
    }

    #[test]
    fn fixed_seed_is_repeatable() {
        let records = records();
        let sampler = RandomSampler::new(Some(42));
        let first = sampler.compute(&records, 5);
        for _ in 0..10 {
            assert_eq!(sampler.compute(&records, 5), first);
        }
    }

    #[test]
    fn small_shard_samples_with_replacement() {
        let records = vec![Record::new(1.0, 1.0, "a", "t")];
        let result = RandomSampler::new(Some(1)).compute(&records, 3);
        assert_eq!(result.len(), 3);
        assert!(result.centroids.iter().all(|c| c == &records[0]));
    }

    #[test]
    fn empty_shard_yields_empty_result() {
        assert!(RandomSampler::new(None).compute(&[], 4).is_empty());
        assert!(RandomSampler::new(None).compute(&records(), 0).is_empty());
    }
}
