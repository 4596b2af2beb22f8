//! Coordinator side of a clustering job.
//!
//! - [`ShardClient`] delivers one shard to one worker ([`TcpShardClient`],
//!   optionally wrapped in [`RetryingClient`]).
//! - [`Dispatcher`] fans shards out concurrently and collects a
//!   [`DispatchReport`].
//! - [`run_job`] ties source, partitioner, dispatcher and aggregator together.

pub mod client;
pub mod dispatcher;
pub mod job;

pub use client::{RetryingClient, ShardClient, TcpShardClient};
pub use dispatcher::{DispatchReport, Dispatcher, ShardFailure, ShardResult};
pub use job::{JobReport, run_job};
