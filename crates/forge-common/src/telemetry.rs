//! Process-wide logging, tracing and metrics setup
//!
//! Logs go to stdout through `tracing-subscriber`, as JSON unless
//! `FORGE_LOG_FORMAT=text`. When `OTEL_EXPORTER_OTLP_ENDPOINT` is set, spans
//! and the reconcile metrics are also exported over OTLP/gRPC. Hold the
//! returned [`TelemetryGuard`] for the life of the process so buffered
//! telemetry is flushed on exit.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "info,forge=debug,kube=info,tower=warn,hyper=warn";

/// Environment variable selecting the log format (`json` or `text`)
pub const LOG_FORMAT_ENV: &str = "FORGE_LOG_FORMAT";

/// Environment variable naming the OTLP collector
pub const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

// Downward API variables copied onto the telemetry resource
const POD_ATTRIBUTES: [(&str, &str); 2] = [
    ("POD_NAME", "k8s.pod.name"),
    ("POD_NAMESPACE", "k8s.namespace.name"),
];

/// Errors from telemetry setup
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The OTLP span or metric exporter could not be built
    #[error("failed to build OTLP {signal} exporter: {message}")]
    Exporter {
        /// "trace" or "metrics"
        signal: &'static str,
        /// Exporter error
        message: String,
    },

    /// The log filter did not parse
    #[error("invalid log filter {filter:?}: {message}")]
    Filter {
        /// The rejected directive string
        filter: String,
        /// Parser error
        message: String,
    },

    /// A global subscriber was already installed
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(String),
}

/// How log lines are rendered
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, with the current span's fields
    #[default]
    Json,
    /// Human readable lines for local runs
    Text,
}

impl LogFormat {
    /// Parse a format name; anything other than `text` means JSON
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("text") {
            Self::Text
        } else {
            Self::Json
        }
    }
}

/// Telemetry settings
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// `service.name` on exported spans and metrics
    pub service_name: String,
    /// OTLP collector endpoint; local logging only when `None`
    pub otlp_endpoint: Option<String>,
    /// Filter directives used when `RUST_LOG` is unset
    pub log_filter: String,
    /// Log line rendering
    pub log_format: LogFormat,
}

impl TelemetryConfig {
    /// Settings for `service_name`, read from the environment
    pub fn from_env(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            otlp_endpoint: std::env::var(OTLP_ENDPOINT_ENV)
                .ok()
                .filter(|v| !v.trim().is_empty()),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_format: std::env::var(LOG_FORMAT_ENV)
                .map(|v| LogFormat::parse(&v))
                .unwrap_or_default(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::from_env("forge")
    }
}

/// Flushes exported telemetry when dropped
#[must_use = "dropping the guard immediately shuts down telemetry export"]
pub struct TelemetryGuard {
    tracer: Option<TracerProvider>,
    meter: Option<SdkMeterProvider>,
}

impl TelemetryGuard {
    /// Whether spans and metrics are being exported
    pub fn is_exporting(&self) -> bool {
        self.tracer.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(tracer) = self.tracer.take() {
            if let Err(e) = tracer.shutdown() {
                eprintln!("failed to flush traces: {e}");
            }
        }
        if let Some(meter) = self.meter.take() {
            if let Err(e) = meter.shutdown() {
                eprintln!("failed to flush metrics: {e}");
            }
        }
    }
}

/// Install the global subscriber, and the OTLP pipeline when configured
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_filter).map_err(|e| TelemetryError::Filter {
            filter: config.log_filter.clone(),
            message: e.to_string(),
        })?,
    };

    let mut guard = TelemetryGuard {
        tracer: None,
        meter: None,
    };
    if let Some(endpoint) = &config.otlp_endpoint {
        global::set_text_map_propagator(TraceContextPropagator::new());
        let resource = build_resource(&config.service_name);
        guard.meter = Some(otlp_meter_provider(endpoint, resource.clone())?);
        guard.tracer = Some(otlp_tracer_provider(endpoint, resource)?);
    }
    let otel_layer = guard.tracer.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    let json_layer = (config.log_format == LogFormat::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
    });
    let text_layer = (config.log_format == LogFormat::Text)
        .then(|| tracing_subscriber::fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    Ok(guard)
}

fn build_resource(service_name: &str) -> Resource {
    let mut attributes = vec![
        KeyValue::new(SERVICE_NAME, service_name.to_string()),
        KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
    ];
    for (var, key) in POD_ATTRIBUTES {
        if let Ok(value) = std::env::var(var) {
            attributes.push(KeyValue::new(key, value));
        }
    }
    Resource::new(attributes)
}

fn otlp_tracer_provider(
    endpoint: &str,
    resource: Resource,
) -> Result<TracerProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::Exporter {
            signal: "trace",
            message: e.to_string(),
        })?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(resource)
        .build();
    global::set_tracer_provider(provider.clone());
    Ok(provider)
}

fn otlp_meter_provider(
    endpoint: &str,
    resource: Resource,
) -> Result<SdkMeterProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::Exporter {
            signal: "metrics",
            message: e.to_string(),
        })?;

    let provider = SdkMeterProvider::builder()
        .with_reader(PeriodicReader::builder(exporter, runtime::Tokio).build())
        .with_resource(resource)
        .build();
    global::set_meter_provider(provider.clone());
    Ok(provider)
}
