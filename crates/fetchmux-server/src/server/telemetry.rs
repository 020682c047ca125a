//! # Telemetry Features
//!
//! Logging is always on and goes through `tracing-subscriber`. Metrics are
//! optional and use OpenTelemetry.
//!
//! ## Feature matrix
//!
//! - `metrics`: Enables OpenTelemetry metrics (counters, histograms, gauges).
//! - `stdout`: Periodically prints collected metrics to stdout.
//!
//! ## Feature constraints
//!
//! - `stdout` requires `metrics`.
//!
//! ## Metrics behavior
//!
//! - Request, rejection and fetch-error counters, an in-flight gauge, request
//!   duration and batch size histograms, and a jobs-executed counter.
//! - Without the `metrics` feature every recording function is a no-op.
//!
//! ## Example usage
//!
//! ```bash
//! RUST_LOG=debug cargo run --features metrics,stdout
//! ```

// Disallow using `stdout` without `metrics`
#[cfg(all(feature = "stdout", not(feature = "metrics")))]
compile_error!("The 'stdout' feature requires the 'metrics' feature to be enabled.");

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "metrics")]
use opentelemetry::{
    InstrumentationScope, KeyValue,
    metrics::{Counter, Histogram, Meter, UpDownCounter},
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

impl TelemetryProviders {
    /// Flushes and stops exporters. Call once, after the server has stopped.
    pub fn shutdown(&self) {
        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics();

    // Always subscribe to standard tracing logs printed to the console.
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(feature = "metrics")]
    {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let scope = InstrumentationScope::builder("fetchmux")
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_schema_url(semvcns::SCHEMA_URL)
            .build();
        init_metric_handles(opentelemetry::global::meter_with_scope(scope));
    }

    registry.try_init()?;

    Ok(TelemetryProviders {
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(feature = "metrics")]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("fetchmux")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> sdkmetrics::SdkMeterProvider {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

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
static REQUESTS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static REQUESTS_REJECTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static REQUESTS_INFLIGHT: OnceLock<UpDownCounter<i64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static FETCH_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static REQUEST_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static URLS_PER_REQUEST: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static JOBS_EXECUTED: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = REQUESTS.set(
        meter
            .u64_counter("requests")
            .with_description("Admitted multiplex requests")
            .build(),
    );

    let _ = REQUESTS_REJECTED.set(
        meter
            .u64_counter("requests_rejected")
            .with_description("Requests shed by the admission limiter")
            .build(),
    );

    let _ = REQUESTS_INFLIGHT.set(
        meter
            .i64_up_down_counter("requests_inflight")
            .with_description("Requests currently being served")
            .build(),
    );

    let _ = FETCH_ERRORS.set(
        meter
            .u64_counter("fetch_errors")
            .with_description("Batches failed by a fetch error")
            .build(),
    );

    let _ = REQUEST_DURATION_MS.set(
        meter
            .f64_histogram("request_duration")
            .with_unit("ms")
            .with_description("End-to-end request duration")
            .build(),
    );

    let _ = URLS_PER_REQUEST.set(
        meter
            .f64_histogram("urls_per_request")
            .with_description("URLs per accepted batch")
            .build(),
    );

    let _ = JOBS_EXECUTED.set(
        meter
            .u64_counter("jobs_executed")
            .with_description("Jobs run by pool workers")
            .build(),
    );
}

// Convenience functions that compile to no-ops when metrics are disabled
#[cfg(feature = "metrics")]
pub fn increment_requests() {
    if let Some(counter) = REQUESTS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_requests() {}

#[cfg(feature = "metrics")]
pub fn increment_requests_rejected() {
    if let Some(counter) = REQUESTS_REJECTED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_requests_rejected() {}

#[cfg(feature = "metrics")]
pub fn increment_requests_inflight() {
    if let Some(counter) = REQUESTS_INFLIGHT.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_requests_inflight() {}

#[cfg(feature = "metrics")]
pub fn decrement_requests_inflight() {
    if let Some(counter) = REQUESTS_INFLIGHT.get() {
        counter.add(-1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn decrement_requests_inflight() {}

#[cfg(feature = "metrics")]
pub fn increment_fetch_errors() {
    if let Some(counter) = FETCH_ERRORS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_fetch_errors() {}

#[cfg(feature = "metrics")]
pub fn record_request_duration(duration_ms: f64) {
    if let Some(histogram) = REQUEST_DURATION_MS.get() {
        histogram.record(duration_ms, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_request_duration(_duration_ms: f64) {}

#[cfg(feature = "metrics")]
pub fn record_urls_per_request(count: f64) {
    if let Some(histogram) = URLS_PER_REQUEST.get() {
        histogram.record(count, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_urls_per_request(_count: f64) {}

#[cfg(feature = "metrics")]
pub fn increment_jobs_executed() {
    if let Some(counter) = JOBS_EXECUTED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_jobs_executed() {}
