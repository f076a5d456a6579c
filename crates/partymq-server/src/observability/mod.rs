//! Observability Module
//!
//! Logging, metrics and fault-tolerance helpers for the router:
//! - `events`: Structured event logging with consistent fields
//! - `metrics`: Prometheus metrics for routing, clients and the consumer
//! - `tracing`: Subscriber setup with optional OpenTelemetry export
//! - `supervision`: Restart policy bounding consumer start retries

pub mod events;
pub mod metrics;
pub mod supervision;
pub mod tracing;

pub use metrics::{init_metrics, MetricsState};
pub use supervision::{RestartPolicy, RestartTracker};
pub use tracing::{init_tracing, shutdown_tracing, TracingConfig};
