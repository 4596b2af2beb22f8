use clap::Parser;
use geocluster_server::{
    config::{CoordinatorArgs, CoordinatorConfig},
    dispatch::{Dispatcher, RetryingClient, TcpShardClient, run_job},
    shutdown::shutdown_signal,
    source::InputSource,
    telemetry::{init_telemetry, shutdown_telemetry},
};
use std::io::Write;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CoordinatorArgs::parse();
    let config = CoordinatorConfig::try_from(args)?;

    let providers = init_telemetry("geocluster-coordinator")?;

    if cfg!(debug_assertions) {
        tracing::info!("Starting coordinator with full config: {config:#?}");
    } else {
        tracing::info!(
            "Starting coordinator: {} shards over {} workers",
            config.num_shards,
            config.dispatch.endpoints.len()
        );
    }

    let source = InputSource::from_config(&config);
    let client = RetryingClient::new(
        TcpShardClient::new(config.dispatch.max_frame_bytes),
        config.retries,
        config.retry_backoff,
    );
    let aggregator = config.aggregator();
    let dispatcher = Dispatcher::with_client(config.dispatch.clone(), client);

    let token = dispatcher.shutdown_token();
    let watcher = tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            tracing::error!("Failed to install signal handler: {e}");
            return;
        }
        tracing::info!("Shutdown signal received, cancelling in-flight shards...");
        token.cancel();
    });

    let outcome = run_job(&source, config.num_shards, &dispatcher, &aggregator).await;
    watcher.abort();

    let report = match outcome {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Job failed: {e}");
            shutdown_telemetry(providers);
            return Err(e.into());
        }
    };

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &report)?;
    writeln!(stdout)?;

    if report.failed() > 0 {
        tracing::warn!(
            "{} of {} shards failed; aggregate covers {} shards",
            report.failed(),
            report.total_shards,
            report.succeeded
        );
    }

    shutdown_telemetry(providers);
    Ok(())
}
