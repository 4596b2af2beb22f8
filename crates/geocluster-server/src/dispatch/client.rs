//! The dispatch side of the shard RPC.
//!
//! [`ShardClient`] is the seam between the [`Dispatcher`] and the transport.
//! [`TcpShardClient`] speaks the frame protocol over one TCP connection per
//! shard; [`RetryingClient`] wraps any client with bounded retries.
//!
//! [`Dispatcher`]: super::Dispatcher

use core::time::Duration;
use geocluster_core::{
    ClusterResult, Error, Record, Result,
    wire::{DEFAULT_MAX_FRAME_BYTES, read_frame, write_frame},
};
use tokio::{io::BufReader, net::TcpStream};

/// Delivers one shard to one endpoint and returns its result.
pub trait ShardClient: Send + Sync + 'static {
    /// Sends `records` to `endpoint` and waits for the cluster result.
    ///
    /// # Errors
    ///
    /// Implementations report transport failures as
    /// [`Error::WorkerUnreachable`] or [`Error::WorkerProtocolFailure`]. The
    /// dispatcher applies the deadline, so clients need not time out on their
    /// own.
    fn submit(
        &self,
        endpoint: &str,
        records: &[Record],
    ) -> impl Future<Output = Result<ClusterResult>> + Send;
}

/// One TCP connection per shard: connect, send one frame, read one frame,
/// close.
#[derive(Clone, Debug)]
pub struct TcpShardClient {
    max_frame_bytes: usize,
}

impl Default for TcpShardClient {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl TcpShardClient {
    pub const fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }
}

impl ShardClient for TcpShardClient {
    async fn submit(&self, endpoint: &str, records: &[Record]) -> Result<ClusterResult> {
        let mut stream =
            TcpStream::connect(endpoint)
                .await
                .map_err(|e| Error::WorkerUnreachable {
                    endpoint: endpoint.to_string(),
                    context: e.to_string(),
                })?;
        // Frames are written whole; Nagle would only delay the last segment.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::trace!(endpoint, "set_nodelay failed: {e}");
        }

        let (reader, mut writer) = stream.split();
        write_frame(&mut writer, records)
            .await
            .map_err(|e| e.into_protocol_failure(endpoint))?;

        let mut reader = BufReader::new(reader);
        read_frame(&mut reader, self.max_frame_bytes)
            .await
            .map_err(|e| e.into_protocol_failure(endpoint))
    }
}

/// Retries shard-local failures of an inner client.
///
/// Attempt `n` (starting at 1) is preceded by a sleep of `backoff * n`. Only
/// errors for which [`Error::is_shard_local`] holds are retried. The
/// dispatcher's deadline covers all attempts together.
#[derive(Clone, Debug)]
pub struct RetryingClient<C> {
    inner: C,
    retries: usize,
    backoff: Duration,
}

impl<C: ShardClient> RetryingClient<C> {
    pub const fn new(inner: C, retries: usize, backoff: Duration) -> Self {
        Self {
            inner,
            retries,
            backoff,
        }
    }
}

impl<C: ShardClient> ShardClient for RetryingClient<C> {
    async fn submit(&self, endpoint: &str, records: &[Record]) -> Result<ClusterResult> {
        let mut attempt = 0;
        loop {
            match self.inner.submit(endpoint, records).await {
                Ok(result) => return Ok(result),
                Err(e) if attempt < self.retries && e.is_shard_local() => {
                    attempt += 1;
                    tracing::debug!(endpoint, attempt, "Retrying shard after error: {e}");
                    tokio::time::sleep(self.backoff * attempt as u32).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
