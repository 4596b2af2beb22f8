use crate::telemetry::{increment_requests_rejected, increment_requests_served};
use geocluster_core::{
    Record,
    compute::ClusterComputer,
    wire::{read_frame, write_frame},
};
use core::time::Duration;
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::TcpStream,
};

/// Serves exactly one shard request on `stream`.
///
/// Reads one request frame, runs `computer` on the blocking pool and writes
/// one response frame. A request that cannot be read or decoded, or that does
/// not arrive within `read_timeout`, gets no response at all: the connection
/// is simply closed, which the caller sees as a transport failure.
///
/// The stream is owned by this function and is closed on every return path.
#[tracing::instrument(skip_all, fields(%peer))]
pub async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    computer: Arc<dyn ClusterComputer>,
    k: usize,
    max_frame_bytes: usize,
    read_timeout: Duration,
) {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);

    let request = tokio::time::timeout(read_timeout, read_frame(&mut reader, max_frame_bytes));
    let records: Vec<Record> = match request.await {
        Ok(Ok(records)) => records,
        Ok(Err(e)) => {
            tracing::warn!("Closing connection without response: {e}");
            increment_requests_rejected();
            return;
        }
        Err(_) => {
            tracing::warn!(?read_timeout, "No request received in time, closing connection");
            increment_requests_rejected();
            return;
        }
    };

    let shard_len = records.len();
    let strategy = computer.name();
    let result = match tokio::task::spawn_blocking(move || computer.compute(&records, k)).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("Clustering task failed: {e}");
            increment_requests_rejected();
            return;
        }
    };

    tracing::debug!(
        records = shard_len,
        centroids = result.len(),
        strategy,
        "Shard clustered"
    );

    if let Err(e) = write_frame(&mut writer, &result).await {
        tracing::warn!("Failed to send result: {e}");
        return;
    }

    if let Err(e) = writer.shutdown().await {
        tracing::debug!("Shutdown after response failed: {e}");
    }

    increment_requests_served();
}
