//! # Record, Shard and ClusterResult
//!
//! These are the values that move through a clustering job:
//!
//! - [`Record`] - one geotagged event observation. Also used as the shape of a
//!   centroid.
//! - [`Shard`] - a contiguous, indexed slice of the input records, owned by
//!   exactly one dispatch task.
//! - [`ClusterResult`] - the centroids a worker computed for one shard.
//!
//! `Record` and `ClusterResult` are serialized on the wire with exactly the
//! field names declared here (`latitude`, `longitude`, `category`,
//! `timestamp`, `centroids`).

use serde::{Deserialize, Serialize};

/// One geotagged event observation.
///
/// Records are immutable once parsed. A centroid is represented with the same
/// shape: a representative point plus the category and timestamp of the
/// record it was derived from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub latitude: f64,
    pub longitude: f64,
    pub category: String,
    pub timestamp: String,
}

impl Record {
    pub fn new(
        latitude: f64,
        longitude: f64,
        category: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            latitude,
            longitude,
            category: category.into(),
            timestamp: timestamp.into(),
        }
    }

    /// Returns `true` if both coordinates are finite.
    ///
    /// JSON has no representation for `NaN` or infinities, so records failing
    /// this check cannot be shipped to a worker.
    pub fn has_finite_coordinates(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }

    /// Squared euclidean distance between the coordinates of two records.
    pub fn distance_squared(&self, other: &Self) -> f64 {
        let dlat = self.latitude - other.latitude;
        let dlon = self.longitude - other.longitude;
        dlat * dlat + dlon * dlon
    }
}

/// An ordered, contiguous subsequence of the input records.
#[derive(Clone, Debug, PartialEq)]
pub struct Shard {
    /// Position of this shard in the partition, `0..n`.
    pub index: usize,
    pub records: Vec<Record>,
}

impl Shard {
    pub const fn new(index: usize, records: Vec<Record>) -> Self {
        Self { index, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The representative points computed for one shard.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterResult {
    pub centroids: Vec<Record>,
}

impl ClusterResult {
    pub const fn new(centroids: Vec<Record>) -> Self {
        Self { centroids }
    }

    /// The result produced for a shard with no records.
    pub const fn empty() -> Self {
        Self {
            centroids: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.centroids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }
}
