use super::{ClusterComputer, seeded_rng};
use crate::{ClusterResult, Record};
use rand::{Rng, seq::SliceRandom};

/// Iterative k-means (Lloyd's algorithm) over latitude/longitude.
///
/// Initial centroids are `k` records at distinct positions, chosen with the
/// configured seed. Each iteration assigns every record to its nearest centroid and moves
/// each centroid to the mean of its members, stopping once no centroid moves
/// further than `tolerance` or after `max_iterations`.
///
/// Distances are euclidean in degree space. That is adequate for the city
/// scale datasets this is aimed at but distorts near the poles and across the
/// antimeridian.
///
/// A centroid's coordinates are the cluster mean; its `category` and
/// `timestamp` are taken from the member nearest to that mean. Clusters that
/// lose all members keep their previous position.
///
/// Shards with fewer than `k` records return their records cyclically
/// repeated up to `k`.
#[derive(Clone, Debug)]
pub struct KMeansRefiner {
    seed: Option<u64>,
    max_iterations: usize,
    tolerance: f64,
}

impl Default for KMeansRefiner {
    fn default() -> Self {
        Self::new(None)
    }
}

impl KMeansRefiner {
    pub const DEFAULT_MAX_ITERATIONS: usize = 100;
    pub const DEFAULT_TOLERANCE: f64 = 1e-9;

    pub const fn new(seed: Option<u64>) -> Self {
        Self {
            seed,
            max_iterations: Self::DEFAULT_MAX_ITERATIONS,
            tolerance: Self::DEFAULT_TOLERANCE,
        }
    }

    #[must_use]
    pub const fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    #[must_use]
    pub const fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Center {
    lat: f64,
    lon: f64,
}

impl Center {
    fn of(record: &Record) -> Self {
        Self {
            lat: record.latitude,
            lon: record.longitude,
        }
    }

    fn distance_squared(&self, record: &Record) -> f64 {
        let dlat = self.lat - record.latitude;
        let dlon = self.lon - record.longitude;
        dlat * dlat + dlon * dlon
    }
}

fn nearest_center(centers: &[Center], record: &Record) -> usize {
    centers
        .iter()
        .enumerate()
        .map(|(i, c)| (i, c.distance_squared(record)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map_or(0, |(i, _)| i)
}

/// Picks `k` centers from `records` in random order, skipping positions
/// already taken. Duplicates are only used once distinct positions run out.
fn initial_centers<R: Rng + ?Sized>(records: &[Record], k: usize, rng: &mut R) -> Vec<Center> {
    let mut order: Vec<usize> = (0..records.len()).collect();
    order.shuffle(rng);

    let mut centers: Vec<Center> = Vec::with_capacity(k);
    for &i in &order {
        let candidate = Center::of(&records[i]);
        if !centers.contains(&candidate) {
            centers.push(candidate);
            if centers.len() == k {
                return centers;
            }
        }
    }

    let missing = k - centers.len();
    centers.extend(order.iter().take(missing).map(|&i| Center::of(&records[i])));
    centers
}

impl ClusterComputer for KMeansRefiner {
    fn compute(&self, records: &[Record], k: usize) -> ClusterResult {
        if records.is_empty() || k == 0 {
            return ClusterResult::empty();
        }

        if records.len() < k {
            return ClusterResult::new(records.iter().cycle().take(k).cloned().collect());
        }

        let mut rng = seeded_rng(self.seed);
        let mut centers = initial_centers(records, k, &mut rng);
        let mut assignment = vec![0_usize; records.len()];
        let tolerance_sq = self.tolerance * self.tolerance;

        for iteration in 0..self.max_iterations {
            for (slot, record) in assignment.iter_mut().zip(records) {
                *slot = nearest_center(&centers, record);
            }

            // Running means: a plain sum overflows for coordinates near f64::MAX.
            let mut means = vec![(0.0_f64, 0.0_f64, 0_usize); k];
            for (&cluster, record) in assignment.iter().zip(records) {
                let mean = &mut means[cluster];
                mean.2 += 1;
                let n = mean.2 as f64;
                mean.0 += record.latitude / n - mean.0 / n;
                mean.1 += record.longitude / n - mean.1 / n;
            }

            let mut max_shift = 0.0_f64;
            for (center, &(lat, lon, count)) in centers.iter_mut().zip(&means) {
                if count == 0 {
                    continue;
                }
                let next = Center { lat, lon };
                let shift = (next.lat - center.lat).powi(2) + (next.lon - center.lon).powi(2);
                max_shift = max_shift.max(shift);
                *center = next;
            }

            if max_shift <= tolerance_sq {
                tracing::trace!(iteration, "k-means converged");
                break;
            }
        }

        for (slot, record) in assignment.iter_mut().zip(records) {
            *slot = nearest_center(&centers, record);
        }

        let centroids = centers
            .iter()
            .enumerate()
            .map(|(cluster, center)| {
                let closest = |a: &&Record, b: &&Record| {
                    center
                        .distance_squared(a)
                        .total_cmp(&center.distance_squared(b))
                };
                let representative = assignment
                    .iter()
                    .zip(records)
                    .filter(|&(&c, _)| c == cluster)
                    .map(|(_, r)| r)
                    .min_by(closest)
                    .or_else(|| records.iter().min_by(closest))
                    .unwrap_or(&records[0]);

                Record {
                    latitude: center.lat,
                    longitude: center.lon,
                    category: representative.category.clone(),
                    timestamp: representative.timestamp.clone(),
                }
            })
            .collect();

        ClusterResult::new(centroids)
    }

    fn name(&self) -> &'static str {
        "kmeans"
    }
}
