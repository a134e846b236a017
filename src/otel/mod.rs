//! OpenTelemetry integration for legis-sync
//!
//! This module provides observability through OpenTelemetry, including
//! tracing and sync metrics export to OTLP endpoints, plus the
//! `tracing-subscriber` setup used by the binary.

use crate::config::{LoggingConfig, OtelConfig};
use crate::models::{ChangeType, ErrorSeverity, ErrorType, ResourceType, Significance, SyncCounts, SyncRunStatus};
use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter, MeterProvider as _},
    trace::TracerProvider as TracerProviderTrait,
    KeyValue,
};
use opentelemetry_sdk::{metrics::SdkMeterProvider, trace::TracerProvider, Resource};
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{
    filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// OpenTelemetry error types
#[derive(Debug, Error)]
pub enum OtelError {
    /// Failed to initialize tracer
    #[error("Failed to initialize tracer: {0}")]
    TracerInit(String),

    /// Failed to initialize meter
    #[error("Failed to initialize meter: {0}")]
    MeterInit(String),

    /// Failed to shutdown
    #[error("Failed to shutdown: {0}")]
    Shutdown(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// OpenTelemetry provider
///
/// Manages tracing and metrics providers with OTLP export capability.
/// When disabled, the meter provider has no reader and every instrument is a no-op.
pub struct OtelProvider {
    tracer_provider: Option<TracerProvider>,
    meter_provider: SdkMeterProvider,
    config: OtelConfig,
}

impl OtelProvider {
    /// Create a new OtelProvider with the given configuration
    pub fn new(config: &OtelConfig) -> Result<Self, OtelError> {
        let resource = Resource::new(vec![KeyValue::new(
            "service.name",
            config.service_name.clone(),
        )]);

        let (tracer_provider, meter_provider) = if config.enabled {
            let endpoint = config.endpoint.as_ref().ok_or_else(|| {
                OtelError::Config("OTLP endpoint is required when enabled".into())
            })?;

            let tracer_provider = Self::init_tracer_provider(endpoint, &resource)?;
            let meter_provider = Self::init_meter_provider(endpoint, &resource)?;

            (Some(tracer_provider), meter_provider)
        } else {
            let meter_provider = SdkMeterProvider::builder().with_resource(resource).build();
            (None, meter_provider)
        };

        if let Some(ref tp) = tracer_provider {
            global::set_tracer_provider(tp.clone());
        }

        Ok(Self {
            tracer_provider,
            meter_provider,
            config: config.clone(),
        })
    }

    fn init_tracer_provider(
        endpoint: &str,
        resource: &Resource,
    ) -> Result<TracerProvider, OtelError> {
        use opentelemetry_otlp::WithExportConfig;
        use opentelemetry_sdk::runtime;
        use opentelemetry_sdk::trace::{Config, Sampler};

        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(endpoint)
            .build_span_exporter()
            .map_err(|e| OtelError::TracerInit(e.to_string()))?;

        let trace_config = Config::default()
            .with_sampler(Sampler::AlwaysOn)
            .with_resource(resource.clone());

        Ok(TracerProvider::builder()
            .with_batch_exporter(exporter, runtime::Tokio)
            .with_config(trace_config)
            .build())
    }

    fn init_meter_provider(
        endpoint: &str,
        resource: &Resource,
    ) -> Result<SdkMeterProvider, OtelError> {
        use opentelemetry_otlp::{MetricsExporterBuilder, WithExportConfig};
        use opentelemetry_sdk::metrics::reader::{
            DefaultAggregationSelector, DefaultTemporalitySelector,
        };
        use opentelemetry_sdk::{metrics::PeriodicReader, runtime};

        let exporter = MetricsExporterBuilder::from(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .build_metrics_exporter(
            Box::new(DefaultTemporalitySelector::new()),
            Box::new(DefaultAggregationSelector::new()),
        )
        .map_err(|e| OtelError::MeterInit(e.to_string()))?;

        let reader = PeriodicReader::builder(exporter, runtime::Tokio).build();

        Ok(SdkMeterProvider::builder()
            .with_resource(resource.clone())
            .with_reader(reader)
            .build())
    }

    /// Get a tracer from the provider
    pub fn tracer(&self, name: &'static str) -> opentelemetry_sdk::trace::Tracer {
        if let Some(ref tp) = self.tracer_provider {
            tp.tracer(name)
        } else {
            TracerProvider::builder().build().tracer(name)
        }
    }

    /// Get the meter for creating metrics
    pub fn meter(&self) -> Meter {
        self.meter_provider.meter(self.config.service_name.clone())
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Shutdown the OpenTelemetry providers gracefully
    pub fn shutdown(&self) -> Result<(), OtelError> {
        if let Err(e) = self.meter_provider.shutdown() {
            return Err(OtelError::Shutdown(format!(
                "Meter shutdown failed: {:?}",
                e
            )));
        }

        if let Some(ref tp) = self.tracer_provider {
            for result in tp.force_flush() {
                if let Err(e) = result {
                    return Err(OtelError::Shutdown(format!("Tracer flush failed: {:?}", e)));
                }
            }
        }

        Ok(())
    }
}

impl Drop for OtelProvider {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Sync engine metrics
pub struct SyncMetrics {
    /// Records processed, by resource and outcome
    pub records_total: Counter<u64>,

    /// Finished sync runs, by resource and terminal status
    pub runs_total: Counter<u64>,

    /// Classified errors, by type and severity
    pub errors_total: Counter<u64>,

    /// Retry sequences, by outcome
    pub retries_total: Counter<u64>,

    /// Detected change events, by type and significance
    pub changes_total: Counter<u64>,

    /// Upstream page fetch duration in seconds
    pub upstream_duration: Histogram<f64>,
}

impl SyncMetrics {
    pub fn new(meter: &Meter) -> Self {
        let records_total = meter
            .u64_counter("legis_sync_records_total")
            .with_description("Upstream records processed by outcome")
            .init();

        let runs_total = meter
            .u64_counter("legis_sync_runs_total")
            .with_description("Finished sync runs by status")
            .init();

        let errors_total = meter
            .u64_counter("legis_sync_errors_total")
            .with_description("Classified errors by type and severity")
            .init();

        let retries_total = meter
            .u64_counter("legis_sync_retries_total")
            .with_description("Retry sequences by outcome")
            .init();

        let changes_total = meter
            .u64_counter("legis_sync_changes_total")
            .with_description("Detected change events")
            .init();

        let upstream_duration = meter
            .f64_histogram("legis_sync_upstream_duration_seconds")
            .with_description("Upstream page fetch duration in seconds")
            .init();

        Self {
            records_total,
            runs_total,
            errors_total,
            retries_total,
            changes_total,
            upstream_duration,
        }
    }

    /// Metrics on the global meter provider (no-op unless one was installed)
    pub fn global() -> Self {
        Self::new(&global::meter("legis-sync"))
    }

    pub fn record_counts(&self, resource: ResourceType, counts: &SyncCounts) {
        for (outcome, value) in [
            ("fetched", counts.fetched),
            ("created", counts.created),
            ("updated", counts.updated),
            ("unchanged", counts.unchanged),
        ] {
            if value > 0 {
                self.records_total.add(
                    value,
                    &[
                        KeyValue::new("resource", resource.as_str()),
                        KeyValue::new("outcome", outcome),
                    ],
                );
            }
        }
    }

    pub fn record_run(&self, resource: ResourceType, status: SyncRunStatus) {
        self.runs_total.add(
            1,
            &[
                KeyValue::new("resource", resource.as_str()),
                KeyValue::new("status", status.as_str()),
            ],
        );
    }

    pub fn record_error(&self, error_type: ErrorType, severity: ErrorSeverity) {
        self.errors_total.add(
            1,
            &[
                KeyValue::new("error_type", error_type.to_string()),
                KeyValue::new("severity", severity.to_string()),
            ],
        );
    }

    pub fn record_retry_outcome(&self, succeeded: bool) {
        let outcome = if succeeded { "succeeded" } else { "failed" };
        self.retries_total
            .add(1, &[KeyValue::new("outcome", outcome)]);
    }

    pub fn record_change(&self, change_type: ChangeType, significance: Significance) {
        self.changes_total.add(
            1,
            &[
                KeyValue::new("change_type", change_type.as_str()),
                KeyValue::new("significance", significance.as_str()),
            ],
        );
    }

    pub fn record_upstream_duration(&self, resource: ResourceType, duration_secs: f64) {
        self.upstream_duration.record(
            duration_secs,
            &[KeyValue::new("resource", resource.as_str())],
        );
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize the tracing subscriber
///
/// `RUST_LOG` overrides the configured level when set. Output is JSON unless
/// `logging.format` is `pretty`.
pub fn init_tracing(otel: &OtelProvider, logging: &LoggingConfig) -> Result<(), OtelError> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(parse_level(&logging.level)).into())
        .from_env_lossy();

    let json = logging.format != "pretty";
    let json_layer = json.then(|| tracing_subscriber::fmt::layer().json());
    let pretty_layer = (!json).then(tracing_subscriber::fmt::layer);

    let otel_layer = otel
        .is_enabled()
        .then(|| tracing_opentelemetry::layer().with_tracer(otel.tracer("legis-sync")));

    tracing_subscriber::registry()
        .with(filter)
        .with(otel_layer)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()
        .map_err(|e| OtelError::TracerInit(e.to_string()))
}
