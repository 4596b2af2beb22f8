//! TCP accept loop for shard requests.
//!
//! [`WorkerEndpoint`] accepts connections until its shutdown token is
//! cancelled, handing each one to its own task. Shutdown happens in phases:
//!
//! 1. Stop accepting (the listener is dropped).
//! 2. Wait up to `shutdown_timeout` for in-flight connections to finish.
//! 3. Return; connections still running are abandoned with the runtime.

use super::handler::handle_connection;
use crate::config::WorkerConfig;
use core::time::Duration;
use geocluster_core::compute::ClusterComputer;
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, time::timeout};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Delay after a failed `accept` before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// A worker process's listening side: one TCP address, one RPC.
pub struct WorkerEndpoint {
    config: WorkerConfig,
    computer: Arc<dyn ClusterComputer>,
    shutdown_token: CancellationToken,
    tracker: TaskTracker,
}

impl WorkerEndpoint {
    /// Creates an endpoint running the strategy selected in `config`.
    pub fn new(config: WorkerConfig) -> Self {
        let computer = config.strategy.build(config.seed, config.max_iterations);
        Self::with_computer(config, computer)
    }

    /// Creates an endpoint running a caller-supplied strategy.
    pub fn with_computer(config: WorkerConfig, computer: Arc<dyn ClusterComputer>) -> Self {
        Self {
            config,
            computer,
            shutdown_token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub const fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Token that stops [`serve`](Self::serve) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Requests a graceful shutdown.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    /// Accepts connections on `listener` until shutdown is requested, then
    /// drains in-flight connections.
    ///
    /// Accept errors are logged and the loop keeps going.
    pub async fn serve(&self, listener: TcpListener) {
        let local_addr = listener.local_addr().ok();
        tracing::info!(
            addr = ?local_addr,
            k = self.config.k,
            strategy = self.computer.name(),
            "Worker endpoint accepting shard requests"
        );

        loop {
            tokio::select! {
                biased;
                () = self.shutdown_token.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(e) => {
                        tracing::warn!("Failed to accept connection: {e}");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        drop(listener);
        self.drain().await;
    }

    fn spawn_connection(&self, stream: tokio::net::TcpStream, peer: SocketAddr) {
        tracing::trace!(%peer, "Accepted connection");
        self.tracker.spawn(handle_connection(
            stream,
            peer,
            Arc::clone(&self.computer),
            self.config.k,
            self.config.max_frame_bytes,
            self.config.read_timeout,
        ));
    }

    async fn drain(&self) {
        self.tracker.close();
        tracing::info!(
            "Draining in-flight connections ({} active)",
            self.tracker.len()
        );

        match timeout(self.config.shutdown_timeout, self.tracker.wait()).await {
            Ok(()) => tracing::debug!("All in-flight connections drained"),
            Err(_) => tracing::warn!(
                "Graceful drain timed out ({} connections still active)",
                self.tracker.len()
            ),
        }

        tracing::info!("Worker endpoint shut down");
    }
}
