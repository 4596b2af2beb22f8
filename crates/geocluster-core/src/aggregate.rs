//! Merging partial results into the job's final output.
//!
//! Partial results arrive in completion order, which varies from run to run.
//! Aggregators must not depend on shard order.

use crate::{ClusterResult, compute::ClusterComputer};
use std::sync::Arc;

/// How partial results are combined.
#[derive(Clone, Default)]
pub enum Aggregator {
    /// Concatenates all centroids in arrival order.
    #[default]
    Concatenate,
    /// Concatenates, then clusters the union again down to `k` centroids.
    Recluster {
        k: usize,
        computer: Arc<dyn ClusterComputer>,
    },
}

impl core::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Concatenate => f.write_str("Concatenate"),
            Self::Recluster { k, computer } => f
                .debug_struct("Recluster")
                .field("k", k)
                .field("computer", &computer.name())
                .finish(),
        }
    }
}

impl Aggregator {
    pub fn aggregate(&self, results: Vec<ClusterResult>) -> ClusterResult {
        let combined = concatenate(results);
        match self {
            Self::Concatenate => combined,
            Self::Recluster { k, computer } => computer.compute(&combined.centroids, *k),
        }
    }
}

fn concatenate(results: Vec<ClusterResult>) -> ClusterResult {
    let total = results.iter().map(ClusterResult::len).sum();
    let mut centroids = Vec::with_capacity(total);
    for result in results {
        centroids.extend(result.centroids);
    }
    ClusterResult::new(centroids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Record, compute::KMeansRefiner};

    fn result(points: &[(f64, f64)]) -> ClusterResult {
        ClusterResult::new(
            points
                .iter()
                .map(|&(lat, lon)| Record::new(lat, lon, "c", "t"))
                .collect(),
        )
    }

    #[test]
    fn concatenation_keeps_arrival_order() {
        let a = result(&[(1.0, 1.0), (2.0, 2.0)]);
        let b = result(&[(3.0, 3.0)]);
        let combined = Aggregator::Concatenate.aggregate(vec![b.clone(), a.clone()]);

        let mut expected = b.centroids;
        expected.extend(a.centroids);
        assert_eq!(combined.centroids, expected);
    }

    #[test]
    fn no_results_aggregate_to_empty() {
        assert!(Aggregator::Concatenate.aggregate(Vec::new()).is_empty());
    }

    #[test]
    fn recluster_reduces_to_final_k() {
        let aggregator = Aggregator::Recluster {
            k: 2,
            computer: Arc::new(KMeansRefiner::new(Some(11))),
        };
        let combined = aggregator.aggregate(vec![
            result(&[(10.0, 10.0), (-10.0, -10.0)]),
            result(&[(10.2, 10.2), (-10.2, -10.2)]),
        ]);

        assert_eq!(combined.len(), 2);
        let mut lats: Vec<f64> = combined.centroids.iter().map(|c| c.latitude).collect();
        lats.sort_by(f64::total_cmp);
        assert!((lats[0] - (-10.1)).abs() < 1e-9);
        assert!((lats[1] - 10.1).abs() < 1e-9);
    }
}
