//! # Telemetry
//!
//! Console logging is always on: [`init_telemetry`] installs a
//! `tracing_subscriber` fmt layer filtered by `RUST_LOG` (default `info`).
//!
//! ## Feature matrix
//!
//! - `metrics`: Enables OpenTelemetry metrics (counters and histograms for
//!   dispatched shards, failed shards, dispatch duration and served requests).
//! - `stdout`: Exports those metrics to stdout every 5 seconds.
//!
//! Without `metrics`, the recording helpers below compile to no-ops, so call
//! sites never need their own `cfg` guards.
//!
//! ```bash
//! cargo run --bin geocluster-worker --features metrics,stdout
//! ```

// Disallow using `stdout` without `metrics`
#[cfg(all(feature = "stdout", not(feature = "metrics")))]
compile_error!("The 'stdout' feature requires 'metrics' to be enabled.");

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "metrics")]
use opentelemetry::{
    InstrumentationScope, KeyValue,
    metrics::{Counter, Histogram, Meter},
};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::{Resource, metrics as sdkmetrics};
#[cfg(feature = "metrics")]
use opentelemetry_semantic_conventions as semvcns;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

pub struct TelemetryProviders {
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

/// Installs the global subscriber and, with `metrics`, the meter provider.
///
/// Call once per process, before any work is started.
pub fn init_telemetry(service_name: &'static str) -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics(service_name);
    #[cfg(not(feature = "metrics"))]
    let _ = service_name;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .with_writer(std::io::stderr)
                .pretty(),
        )
        .try_init()?;

    #[cfg(feature = "metrics")]
    {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let scope = InstrumentationScope::builder(service_name)
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_schema_url(semvcns::SCHEMA_URL)
            .build();
        init_metric_handles(opentelemetry::global::meter_with_scope(scope));
    }

    Ok(TelemetryProviders {
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

/// Flushes and shuts down exporters. Errors are reported on stderr because
/// the subscriber may already be gone.
pub fn shutdown_telemetry(providers: TelemetryProviders) {
    #[cfg(feature = "metrics")]
    {
        if let Err(err) = providers.meter_provider.force_flush() {
            eprintln!("Error flushing metrics: {err:#?}");
        }
        if let Err(err) = providers.meter_provider.shutdown() {
            eprintln!("Error shutting down meter: {err:#?}");
        }
    }
    #[cfg(not(feature = "metrics"))]
    let _ = providers;
}

#[cfg(feature = "metrics")]
fn init_metrics(service_name: &'static str) -> sdkmetrics::SdkMeterProvider {
    let resource = Resource::builder()
        .with_service_name(service_name)
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build();
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource);

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = sdkmetrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    builder.build()
}

// Metric handles - only compiled when metrics feature is enabled
#[cfg(feature = "metrics")]
static SHARDS_DISPATCHED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static SHARDS_FAILED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static DISPATCH_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static REQUESTS_SERVED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static REQUESTS_REJECTED: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = SHARDS_DISPATCHED.set(
        meter
            .u64_counter("shards_dispatched")
            .with_description("Shards that returned a cluster result")
            .build(),
    );

    let _ = SHARDS_FAILED.set(
        meter
            .u64_counter("shards_failed")
            .with_description("Shards dropped after a worker failure")
            .build(),
    );

    let _ = DISPATCH_DURATION_MS.set(
        meter
            .f64_histogram("dispatch_duration")
            .with_unit("ms")
            .with_description("Time from first shard sent to last outcome collected")
            .build(),
    );

    let _ = REQUESTS_SERVED.set(
        meter
            .u64_counter("requests_served")
            .with_description("Shard requests answered by this worker")
            .build(),
    );

    let _ = REQUESTS_REJECTED.set(
        meter
            .u64_counter("requests_rejected")
            .with_description("Connections closed without a response")
            .build(),
    );
}

// Convenience functions that compile to no-ops when metrics are disabled
#[cfg(feature = "metrics")]
pub fn increment_shards_dispatched() {
    if let Some(counter) = SHARDS_DISPATCHED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_shards_dispatched() {}

#[cfg(feature = "metrics")]
pub fn increment_shards_failed(kind: &'static str) {
    if let Some(counter) = SHARDS_FAILED.get() {
        counter.add(1, &[KeyValue::new("kind", kind)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_shards_failed(_kind: &'static str) {}

#[cfg(feature = "metrics")]
pub fn record_dispatch_duration(duration_ms: f64) {
    if let Some(histogram) = DISPATCH_DURATION_MS.get() {
        histogram.record(duration_ms, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_dispatch_duration(_duration_ms: f64) {}

#[cfg(feature = "metrics")]
pub fn increment_requests_served() {
    if let Some(counter) = REQUESTS_SERVED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_requests_served() {}

#[cfg(feature = "metrics")]
pub fn increment_requests_rejected() {
    if let Some(counter) = REQUESTS_REJECTED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_requests_rejected() {}
