//! Error types for the clustering job.
//!
//! This module defines the central `Error` enum. The variants split into two
//! groups:
//!
//! ## Fatal to the job
//! - `InvalidPartitionCount`: the partitioner was asked for zero shards.
//! - `SourceLoadFailure`: the record source could not produce a dataset.
//! - `InvalidConfig`: the dispatcher or a strategy was misconfigured.
//!
//! ## Isolated to one shard
//! - `WorkerUnreachable`: the connection to an endpoint was never established.
//! - `WorkerProtocolFailure`: the connection broke or carried an undecodable
//!   frame.
//! - `WorkerTimeout`: the endpoint did not answer within the task deadline.
//! - `JobCancelled`: the job was shut down while the shard was in flight.
//!
//! `FrameTooLarge` and `Codec` are raised by [`crate::wire`] and wrapped into
//! `WorkerProtocolFailure` by the dispatch side.

use core::time::Duration;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for partitioning, transport and dispatch.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The partitioner was called with a shard count of zero.
    #[error("Invalid partition count: shard count must be greater than 0")]
    InvalidPartitionCount,

    /// The upstream record source failed before dispatch started.
    #[error("Source load failure: {context}")]
    SourceLoadFailure { context: String },

    /// A configuration value is out of range.
    #[error("Invalid config: {reason}")]
    InvalidConfig { reason: String },

    /// The connection to a worker could not be established.
    #[error("Worker {endpoint} unreachable: {context}")]
    WorkerUnreachable { endpoint: String, context: String },

    /// The exchange with a worker failed after the connection was opened.
    #[error("Worker {endpoint} protocol failure: {context}")]
    WorkerProtocolFailure { endpoint: String, context: String },

    /// The worker did not respond within the task deadline.
    #[error("Worker {endpoint} timed out after {timeout:?}")]
    WorkerTimeout { endpoint: String, timeout: Duration },

    /// The job was cancelled while the shard was in flight.
    #[error("Job cancelled")]
    JobCancelled,

    /// A frame exceeded the configured maximum size.
    #[error("Frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    /// A frame could not be encoded, decoded, or read from the stream.
    #[error("Codec error: {context}")]
    Codec { context: String },
}

impl Error {
    /// Returns `true` for errors that only affect a single shard.
    ///
    /// Everything else aborts the job before or instead of dispatch.
    pub const fn is_shard_local(&self) -> bool {
        matches!(
            self,
            Self::WorkerUnreachable { .. }
                | Self::WorkerProtocolFailure { .. }
                | Self::WorkerTimeout { .. }
                | Self::JobCancelled
        )
    }

    /// Stable snake_case name of the variant, for logs and metric labels.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidPartitionCount => "invalid_partition_count",
            Self::SourceLoadFailure { .. } => "source_load_failure",
            Self::InvalidConfig { .. } => "invalid_config",
            Self::WorkerUnreachable { .. } => "worker_unreachable",
            Self::WorkerProtocolFailure { .. } => "worker_protocol_failure",
            Self::WorkerTimeout { .. } => "worker_timeout",
            Self::JobCancelled => "job_cancelled",
            Self::FrameTooLarge { .. } => "frame_too_large",
            Self::Codec { .. } => "codec",
        }
    }

    /// Wraps a codec-level error into a [`Error::WorkerProtocolFailure`] for
    /// `endpoint`. Errors that already carry an endpoint pass through.
    pub fn into_protocol_failure(self, endpoint: &str) -> Self {
        match self {
            Self::FrameTooLarge { .. } | Self::Codec { .. } => Self::WorkerProtocolFailure {
                endpoint: endpoint.to_string(),
                context: self.to_string(),
            },
            other => other,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec {
            context: err.to_string(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Codec {
            context: err.to_string(),
        }
    }
}
