use clap::Parser;
use geocluster_server::{
    config::{WorkerArgs, WorkerConfig},
    shutdown::shutdown_signal,
    telemetry::{init_telemetry, shutdown_telemetry},
    worker::WorkerEndpoint,
};
use tokio::net::TcpListener;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = WorkerArgs::parse();
    let config = WorkerConfig::try_from(args)?;

    let providers = init_telemetry("geocluster-worker")?;

    let listener = TcpListener::bind(&config.listen_addr).await?;
    log_startup_info(&config);

    let endpoint = WorkerEndpoint::new(config);
    let token = endpoint.shutdown_token();
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            tracing::error!("Failed to install signal handler: {e}");
        }
        tracing::info!("Shutdown signal received, terminating gracefully...");
        token.cancel();
    });

    endpoint.serve(listener).await;

    shutdown_telemetry(providers);
    Ok(())
}

fn log_startup_info(config: &WorkerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting worker on {} with full config: {:#?}",
            config.listen_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting worker on {} with k={} ({:?})",
            config.listen_addr,
            config.k,
            config.strategy
        );
    }
}
