use super::client::{ShardClient, TcpShardClient};
use crate::{
    config::DispatchConfig,
    telemetry::{increment_shards_dispatched, increment_shards_failed, record_dispatch_duration},
};
use core::time::Duration;
use futures::future::join_all;
use geocluster_core::{ClusterResult, Error, Result, Shard};
use serde::{Serialize, Serializer};
use std::sync::Arc;
use tokio::{
    sync::{Semaphore, mpsc},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// A shard that came back with a result.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ShardResult {
    pub index: usize,
    pub endpoint: String,
    pub result: ClusterResult,
}

/// A shard that produced no result.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ShardFailure {
    pub index: usize,
    pub endpoint: String,
    #[serde(serialize_with = "serialize_error")]
    pub error: Error,
}

fn serialize_error<S: Serializer>(error: &Error, serializer: S) -> core::result::Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// Outcome of one dispatch cycle, in arrival order.
///
/// Every shard handed to [`Dispatcher::dispatch`] appears exactly once, in
/// either `results` or `failures`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DispatchReport {
    pub results: Vec<ShardResult>,
    pub failures: Vec<ShardFailure>,
    /// Time from the first task spawned to the last outcome collected.
    pub elapsed: Duration,
}

impl DispatchReport {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            results: Vec::with_capacity(capacity),
            failures: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn total(&self) -> usize {
        self.results.len() + self.failures.len()
    }

    pub fn succeeded(&self) -> usize {
        self.results.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Drops the shard bookkeeping and keeps only the cluster results.
    pub fn into_results(self) -> Vec<ClusterResult> {
        self.results.into_iter().map(|r| r.result).collect()
    }

    fn record(&mut self, outcome: ShardOutcome) {
        match outcome.result {
            Ok(result) => self.results.push(ShardResult {
                index: outcome.index,
                endpoint: outcome.endpoint,
                result,
            }),
            Err(error) => self.failures.push(ShardFailure {
                index: outcome.index,
                endpoint: outcome.endpoint,
                error,
            }),
        }
    }
}

/// Message from a shard task to the collector.
struct ShardOutcome {
    index: usize,
    endpoint: String,
    result: Result<ClusterResult>,
}

/// Everything one spawned task needs to deliver its shard.
struct ShardTask<C> {
    shard: Shard,
    endpoint: String,
    client: Arc<C>,
    permits: Arc<Semaphore>,
    task_timeout: Duration,
    shutdown_token: CancellationToken,
}

impl<C: ShardClient> ShardTask<C> {
    async fn run(self) -> ShardOutcome {
        let result = if self.shard.is_empty() {
            tracing::trace!("Empty shard, skipping RPC");
            Ok(ClusterResult::empty())
        } else {
            tokio::select! {
                biased;
                () = self.shutdown_token.cancelled() => Err(Error::JobCancelled),
                result = self.deliver() => result,
            }
        };

        match &result {
            Ok(result) => {
                tracing::debug!(centroids = result.len(), "Shard completed");
                increment_shards_dispatched();
            }
            Err(e) => {
                tracing::warn!(kind = e.kind(), "Shard failed: {e}");
                increment_shards_failed(e.kind());
            }
        }

        ShardOutcome {
            index: self.shard.index,
            endpoint: self.endpoint,
            result,
        }
    }

    /// Waits for a connection permit, then runs the RPC under the task
    /// deadline. Dropping this future drops the connection.
    async fn deliver(&self) -> Result<ClusterResult> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::JobCancelled)?;

        tokio::time::timeout(
            self.task_timeout,
            self.client.submit(&self.endpoint, &self.shard.records),
        )
        .await
        .map_err(|_| Error::WorkerTimeout {
            endpoint: self.endpoint.clone(),
            timeout: self.task_timeout,
        })?
    }
}

/// Fans shards out to worker endpoints and collects their results.
///
/// Shard `i` goes to `endpoints[i % endpoints.len()]`. Each shard runs in its
/// own task; a failing shard is recorded in the report and never affects its
/// siblings.
///
/// Shutdown is terminal. Once [`shutdown`](Self::shutdown) has been called,
/// every later [`dispatch`](Self::dispatch) reports all of its shards as
/// [`Error::JobCancelled`] without contacting a worker. Build a new dispatcher
/// to run another job.
pub struct Dispatcher<C = TcpShardClient> {
    config: DispatchConfig,
    client: Arc<C>,
    shutdown_token: CancellationToken,
}

impl Dispatcher<TcpShardClient> {
    /// Creates a dispatcher speaking the TCP frame protocol.
    pub fn new(config: DispatchConfig) -> Self {
        let client = TcpShardClient::new(config.max_frame_bytes);
        Self::with_client(config, client)
    }
}

impl<C: ShardClient> Dispatcher<C> {
    pub fn with_client(config: DispatchConfig, client: C) -> Self {
        Self {
            config,
            client: Arc::new(client),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Token that cancels in-flight shards when triggered.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Cancels every in-flight shard and every future dispatch. Each shard
    /// is reported as [`Error::JobCancelled`].
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Endpoint assigned to shard `index`, or `None` without endpoints.
    pub fn endpoint_for(&self, index: usize) -> Option<&str> {
        let endpoints = &self.config.endpoints;
        if endpoints.is_empty() {
            return None;
        }
        Some(endpoints[index % endpoints.len()].as_str())
    }

    /// Delivers every shard and waits until each has succeeded or failed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when no endpoints are configured.
    /// Worker failures are never returned here; they are listed in
    /// [`DispatchReport::failures`].
    pub async fn dispatch(&self, shards: Vec<Shard>) -> Result<DispatchReport> {
        if self.config.endpoints.is_empty() {
            return Err(Error::InvalidConfig {
                reason: "dispatcher has no worker endpoints".to_string(),
            });
        }

        if self.is_shut_down() {
            tracing::warn!(shards = shards.len(), "Dispatcher is shut down, cancelling all shards");
        }

        let started = Instant::now();
        let total = shards.len();
        let limit = self.config.max_concurrency.unwrap_or(total).max(1);
        let permits = Arc::new(Semaphore::new(limit));
        let (tx, mut rx) = mpsc::channel::<ShardOutcome>(total.max(1));

        tracing::info!(
            shards = total,
            endpoints = self.config.endpoints.len(),
            max_concurrency = limit,
            "Dispatching shards"
        );

        let mut assignments = Vec::with_capacity(total);
        let mut handles = Vec::with_capacity(total);
        for shard in shards {
            let index = shard.index;
            let endpoint = self.endpoint_for(index).unwrap_or_default().to_string();
            let span = tracing::info_span!("shard", index, endpoint = %endpoint);
            assignments.push((index, endpoint.clone()));

            let task = ShardTask {
                shard,
                endpoint,
                client: Arc::clone(&self.client),
                permits: Arc::clone(&permits),
                task_timeout: self.config.task_timeout,
                shutdown_token: self.shutdown_token.clone(),
            };
            let tx = tx.clone();
            handles.push(tokio::spawn(
                async move {
                    let outcome = task.run().await;
                    // The collector outlives every sender.
                    let _ = tx.send(outcome).await;
                }
                .instrument(span),
            ));
        }
        drop(tx);

        let mut report = DispatchReport::with_capacity(total);
        while let Some(outcome) = rx.recv().await {
            report.record(outcome);
        }

        // A task that panicked dropped its sender without reporting.
        for ((index, endpoint), joined) in assignments.into_iter().zip(join_all(handles).await) {
            if let Err(e) = joined {
                tracing::error!(index, %endpoint, "Shard task aborted: {e}");
                increment_shards_failed("worker_protocol_failure");
                report.failures.push(ShardFailure {
                    index,
                    error: Error::WorkerProtocolFailure {
                        endpoint: endpoint.clone(),
                        context: format!("shard task aborted: {e}"),
                    },
                    endpoint,
                });
            }
        }

        report.elapsed = started.elapsed();
        record_dispatch_duration(report.elapsed.as_secs_f64() * 1000.0);
        tracing::info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Dispatch finished"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geocluster_core::Record;
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    /// Scripted worker pool keyed by endpoint name.
    #[derive(Default)]
    struct MockClient {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: Mutex<Vec<(String, usize)>>,
    }

    impl ShardClient for MockClient {
        async fn submit(&self, endpoint: &str, records: &[Record]) -> Result<ClusterResult> {
            self.calls
                .lock()
                .unwrap()
                .push((endpoint.to_string(), records.len()));

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match endpoint {
                "down" => Err(Error::WorkerUnreachable {
                    endpoint: endpoint.to_string(),
                    context: "connection refused".to_string(),
                }),
                "silent" => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
                "panic" => panic!("worker exploded"),
                _ => Ok(ClusterResult::new(records[..1].to_vec())),
            }
        }
    }

    fn shards(count: usize, per_shard: usize) -> Vec<Shard> {
        (0..count)
            .map(|index| {
                let records = (0..per_shard)
                    .map(|i| Record::new(index as f64, i as f64, "c", "t"))
                    .collect();
                Shard::new(index, records)
            })
            .collect()
    }

    fn dispatcher(endpoints: &[&str]) -> Dispatcher<MockClient> {
        Dispatcher::with_client(
            DispatchConfig::new(endpoints.iter().copied()),
            MockClient::default(),
        )
    }

    #[tokio::test]
    async fn failing_endpoint_does_not_affect_siblings() {
        let report = dispatcher(&["up", "down"])
            .dispatch(shards(4, 3))
            .await
            .unwrap();

        assert_eq!(report.total(), 4);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 2);

        let mut failed: Vec<usize> = report.failures.iter().map(|f| f.index).collect();
        failed.sort_unstable();
        assert_eq!(failed, vec![1, 3]);
        assert!(
            report
                .failures
                .iter()
                .all(|f| matches!(f.error, Error::WorkerUnreachable { .. }))
        );
    }

    #[tokio::test]
    async fn shards_are_assigned_round_robin() {
        let dispatcher = dispatcher(&["a", "b", "c"]);
        let report = dispatcher.dispatch(shards(5, 1)).await.unwrap();

        for result in &report.results {
            assert_eq!(
                Some(result.endpoint.as_str()),
                dispatcher.endpoint_for(result.index)
            );
        }
        let mut calls = dispatcher.client.calls.lock().unwrap().clone();
        calls.sort();
        let endpoints: Vec<&str> = calls.iter().map(|(e, _)| e.as_str()).collect();
        assert_eq!(endpoints, vec!["a", "a", "b", "b", "c"]);
    }

    #[tokio::test]
    async fn concurrency_limit_is_respected() {
        let dispatcher = Dispatcher::with_client(
            DispatchConfig::new(["a", "b"]).with_max_concurrency(Some(2)),
            MockClient::default(),
        );
        let report = dispatcher.dispatch(shards(8, 2)).await.unwrap();

        assert_eq!(report.succeeded(), 8);
        assert!(dispatcher.client.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn empty_shards_skip_the_rpc() {
        let dispatcher = dispatcher(&["a"]);
        let mut input = shards(2, 0);
        input.push(Shard::new(2, vec![Record::new(1.0, 1.0, "c", "t")]));

        let report = dispatcher.dispatch(input).await.unwrap();

        assert_eq!(report.succeeded(), 3);
        assert_eq!(dispatcher.client.calls.lock().unwrap().len(), 1);
        let centroids: usize = report.results.iter().map(|r| r.result.len()).sum();
        assert_eq!(centroids, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_worker_times_out() {
        let dispatcher = Dispatcher::with_client(
            DispatchConfig::new(["up", "silent"]).with_task_timeout(Duration::from_secs(2)),
            MockClient::default(),
        );
        let report = dispatcher.dispatch(shards(2, 1)).await.unwrap();

        assert_eq!(report.succeeded(), 1);
        assert_eq!(
            report.failures,
            vec![ShardFailure {
                index: 1,
                endpoint: "silent".to_string(),
                error: Error::WorkerTimeout {
                    endpoint: "silent".to_string(),
                    timeout: Duration::from_secs(2),
                },
            }]
        );
    }

    #[tokio::test]
    async fn shutdown_cancels_in_flight_shards() {
        let dispatcher = dispatcher(&["silent"]);
        let token = dispatcher.shutdown_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let report = dispatcher.dispatch(shards(3, 1)).await.unwrap();

        assert_eq!(report.failed(), 3);
        assert!(report.failures.iter().all(|f| f.error == Error::JobCancelled));
    }

    #[tokio::test]
    async fn dispatch_after_shutdown_cancels_without_contacting_workers() {
        let dispatcher = dispatcher(&["up"]);
        dispatcher.shutdown();
        assert!(dispatcher.is_shut_down());

        let report = dispatcher.dispatch(shards(2, 1)).await.unwrap();

        assert_eq!(report.failed(), 2);
        assert!(report.failures.iter().all(|f| f.error == Error::JobCancelled));
        assert!(dispatcher.client.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_time_follows_the_tokio_clock() {
        let report = dispatcher(&["up"]).dispatch(shards(1, 1)).await.unwrap();

        assert_eq!(report.succeeded(), 1);
        // The mock sleeps 10ms of paused tokio time and no wall-clock time.
        assert!(report.elapsed >= Duration::from_millis(10), "{:?}", report.elapsed);
        assert!(report.elapsed < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn panicking_task_is_recorded_as_failure() {
        let report = dispatcher(&["up", "panic"])
            .dispatch(shards(2, 1))
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures[0].index, 1);
        assert!(matches!(
            report.failures[0].error,
            Error::WorkerProtocolFailure { .. }
        ));
    }

    #[tokio::test]
    async fn no_endpoints_is_a_config_error() {
        let err = dispatcher(&[]).dispatch(shards(1, 1)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn failures_serialize_error_as_message() {
        let failure = ShardFailure {
            index: 3,
            endpoint: "w:1".to_string(),
            error: Error::JobCancelled,
        };
        assert_eq!(
            serde_json::to_string(&failure).unwrap(),
            r#"{"index":3,"endpoint":"w:1","error":"Job cancelled"}"#
        );
    }
}
