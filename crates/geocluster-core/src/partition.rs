//! Contiguous shard partitioning.
//!
//! [`partition`] splits a record sequence into exactly `n` shards. Every shard
//! but the last holds `len / n` records; the last shard also absorbs the
//! remainder. Concatenating the shards in index order reproduces the input.

use crate::{Error, Record, Result, Shard};

/// Splits `records` into `n` contiguous, non-overlapping shards.
///
/// Ownership of each record moves into exactly one shard. The partition is
/// deterministic: the same input and `n` always yield the same shards.
///
/// When `records.len() < n` the leading shards are empty and the last shard
/// holds everything. An empty input yields `n` empty shards.
///
/// # Errors
///
/// Returns [`Error::InvalidPartitionCount`] if `n == 0`.
pub fn partition(records: Vec<Record>, n: usize) -> Result<Vec<Shard>> {
    if n == 0 {
        return Err(Error::InvalidPartitionCount);
    }

    let chunk_size = records.len() / n;
    let mut shards = Vec::with_capacity(n);
    let mut remaining = records.into_iter();

    for index in 0..n {
        let shard_records: Vec<Record> = if index == n - 1 {
            remaining.by_ref().collect()
        } else {
            remaining.by_ref().take(chunk_size).collect()
        };
        shards.push(Shard::new(index, shard_records));
    }

    Ok(shards)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(count: usize) -> Vec<Record> {
        (0..count)
            .map(|i| {
                Record::new(
                    i as f64,
                    -(i as f64),
                    format!("category-{}", i % 3),
                    format!("2024-01-01T00:00:{:02}", i % 60),
                )
            })
            .collect()
    }

    #[test]
    fn rejects_zero_shards() {
        assert_eq!(partition(records(4), 0), Err(Error::InvalidPartitionCount));
    }

    #[test]
    fn concatenation_reproduces_input() {
        for len in 0..40 {
            for n in 1..10 {
                let input = records(len);
                let shards = partition(input.clone(), n).unwrap();
                assert_eq!(shards.len(), n);

                let rebuilt: Vec<Record> = shards.into_iter().flat_map(|s| s.records).collect();
                assert_eq!(rebuilt, input, "len={len} n={n}");
            }
        }
    }

    #[test]
    fn last_shard_absorbs_remainder() {
        for len in 0..40 {
            for n in 1..10 {
                let shards = partition(records(len), n).unwrap();
                let base = len / n;
                let remainder = len % n;

                for shard in &shards[..n - 1] {
                    assert_eq!(shard.len(), base, "len={len} n={n}");
                }
                assert_eq!(shards[n - 1].len(), base + remainder, "len={len} n={n}");
            }
        }
    }

    #[test]
    fn shards_are_indexed_in_order() {
        let shards = partition(records(10), 3).unwrap();
        let indices: Vec<usize> = shards.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn empty_input_yields_empty_shards() {
        let shards = partition(Vec::new(), 4).unwrap();
        assert_eq!(shards.len(), 4);
        assert!(shards.iter().all(Shard::is_empty));
    }

    #[test]
    fn fewer_records_than_shards_land_in_last_shard() {
        let shards = partition(records(2), 5).unwrap();
        assert_eq!(shards.len(), 5);
        assert!(shards[..4].iter().all(Shard::is_empty));
        assert_eq!(shards[4].len(), 2);
    }

    #[test]
    fn partition_is_deterministic() {
        let a = partition(records(17), 4).unwrap();
        let b = partition(records(17), 4).unwrap();
        assert_eq!(a, b);
    }
}
