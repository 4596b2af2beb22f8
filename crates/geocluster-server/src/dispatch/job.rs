use super::{
    client::ShardClient,
    dispatcher::{Dispatcher, ShardFailure},
};
use crate::source::RecordSource;
use geocluster_core::{ClusterResult, Error, Result, aggregate::Aggregator, partition::partition};
use serde::Serialize;

/// Summary of one clustering job.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JobReport {
    pub aggregate: ClusterResult,
    pub total_shards: usize,
    pub succeeded: usize,
    pub failures: Vec<ShardFailure>,
}

impl JobReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Loads, partitions, dispatches and aggregates one dataset.
///
/// # Errors
///
/// Fails before anything is dispatched when the source cannot be loaded
/// ([`Error::SourceLoadFailure`]) or `num_shards` is zero
/// ([`Error::InvalidPartitionCount`]). Worker failures do not fail the job;
/// they are listed in [`JobReport::failures`].
#[tracing::instrument(skip(source, dispatcher, aggregator))]
pub async fn run_job<S, C>(
    source: &S,
    num_shards: usize,
    dispatcher: &Dispatcher<C>,
    aggregator: &Aggregator,
) -> Result<JobReport>
where
    S: RecordSource,
    C: ShardClient,
{
    let records = source.load().await.map_err(|e| match e {
        e @ Error::SourceLoadFailure { .. } => e,
        other => Error::SourceLoadFailure {
            context: other.to_string(),
        },
    })?;
    tracing::info!(records = records.len(), "Loaded records");

    let shards = partition(records, num_shards)?;
    let report = dispatcher.dispatch(shards).await?;

    let total_shards = report.total();
    let succeeded = report.succeeded();
    let failures = report.failures.clone();
    let aggregate = aggregator.aggregate(report.into_results());

    tracing::info!(
        total_shards,
        succeeded,
        failed = failures.len(),
        centroids = aggregate.len(),
        "Job finished"
    );

    Ok(JobReport {
        aggregate,
        total_shards,
        succeeded,
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::DispatchConfig, source::MemorySource};
    use geocluster_core::Record;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Echoes the first record of each shard, failing on endpoint `down`.
    #[derive(Default)]
    struct Echo {
        calls: AtomicUsize,
    }

    impl ShardClient for Echo {
        async fn submit(&self, endpoint: &str, records: &[Record]) -> Result<ClusterResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if endpoint == "down" {
                return Err(Error::WorkerUnreachable {
                    endpoint: endpoint.to_string(),
                    context: "connection refused".to_string(),
                });
            }
            Ok(ClusterResult::new(records[..1].to_vec()))
        }
    }

    struct Broken;

    impl RecordSource for Broken {
        async fn load(&self) -> Result<Vec<Record>> {
            Err(Error::Codec {
                context: "disk on fire".to_string(),
            })
        }
    }

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::new(i as f64, 0.0, "c", "t"))
            .collect()
    }

    #[tokio::test]
    async fn aggregates_successful_shards_and_reports_failures() {
        let dispatcher = Dispatcher::with_client(DispatchConfig::new(["up", "down"]), Echo::default());
        let report = run_job(
            &MemorySource::new(records(6)),
            3,
            &dispatcher,
            &Aggregator::Concatenate,
        )
        .await
        .unwrap();

        assert_eq!(report.total_shards, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures[0].index, 1);

        let mut lats: Vec<f64> = report.aggregate.centroids.iter().map(|c| c.latitude).collect();
        lats.sort_by(f64::total_cmp);
        assert_eq!(lats, vec![0.0, 4.0]);
    }

    #[tokio::test]
    async fn source_failure_dispatches_nothing() {
        let dispatcher = Dispatcher::with_client(DispatchConfig::new(["up"]), Echo::default());
        let err = run_job(&Broken, 2, &dispatcher, &Aggregator::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SourceLoadFailure { context } if context.contains("disk on fire")));
        assert_eq!(dispatcher.client().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn zero_shards_is_rejected() {
        let dispatcher = Dispatcher::with_client(DispatchConfig::new(["up"]), Echo::default());
        let err = run_job(&MemorySource::new(records(2)), 0, &dispatcher, &Aggregator::default())
            .await
            .unwrap_err();

        assert_eq!(err, Error::InvalidPartitionCount);
    }
}
