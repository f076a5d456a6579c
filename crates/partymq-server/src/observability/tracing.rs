//! Logging and Distributed Tracing
//!
//! Console logging is always on; spans are additionally exported over OTLP
//! when a collector endpoint is configured.
//!
//! Environment variables:
//! - `RUST_LOG` - Log filter directives (default: `info`)
//! - `LOG_FORMAT` - Set to `json` for JSON output (default: `text`)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT` - OTLP gRPC endpoint (unset disables export)
//! - `OTEL_SERVICE_NAME` - Service name (default: `partymq`)

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
    Resource,
};
use std::sync::OnceLock;
use tracing::level_filters::LevelFilter;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Global tracer provider for shutdown
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

const DEFAULT_SERVICE_NAME: &str = "partymq";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Configuration for tracing initialization
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// OTLP endpoint for trace export (None = disabled)
    pub otlp_endpoint: Option<String>,
    /// Service name for traces
    pub service_name: String,
    pub log_format: LogFormat,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl TracingConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .ok()
                .filter(|endpoint| !endpoint.is_empty()),
            service_name: std::env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string()),
            log_format: std::env::var("LOG_FORMAT")
                .map(|value| LogFormat::parse(&value))
                .unwrap_or(LogFormat::Text),
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
}

/// Initialize the global subscriber.
///
/// Installs the `RUST_LOG` filter, a text or JSON console layer and, if an
/// endpoint is configured, an OpenTelemetry layer with a batch exporter.
pub fn init_tracing(config: TracingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let console = match config.log_format {
        LogFormat::Json => fmt::layer().json().boxed(),
        LogFormat::Text => fmt::layer().boxed(),
    };

    let Some(endpoint) = &config.otlp_endpoint else {
        tracing_subscriber::registry()
            .with(console)
            .with(env_filter())
            .try_init()?;
        tracing::debug!("Tracing initialized (no OTLP export)");
        return Ok(());
    };

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let resource = Resource::builder()
        .with_service_name(config.service_name.clone())
        .build();

    let provider = SdkTracerProvider::builder()
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build();

    let tracer = provider.tracer(DEFAULT_SERVICE_NAME);
    let _ = TRACER_PROVIDER.set(provider);

    tracing_subscriber::registry()
        .with(console)
        .with(OpenTelemetryLayer::new(tracer))
        .with(env_filter())
        .try_init()?;

    tracing::info!(
        endpoint = %endpoint,
        service_name = %config.service_name,
        "OpenTelemetry tracing initialized"
    );

    Ok(())
}

/// Flush pending spans and shut the exporter down.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = %e, "Error shutting down tracer provider");
        }
    }
}
