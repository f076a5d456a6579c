//! Prometheus Metrics
//!
//! Defines and initializes all Prometheus metrics for the router.
//!
//! Metrics tracked:
//! - `partymq_messages_routed_total` - counter of messages published to a partition
//! - `partymq_messages_requeued_total` - counter of deliveries returned to the source queue
//! - `partymq_publish_duration_seconds` - histogram of publish latencies
//! - `partymq_ready_clients` - gauge of clients receiving traffic
//! - `partymq_pending_clients` - gauge of clients waiting to become ready
//! - `partymq_assigned_keys` - gauge of keys with a partition assignment
//! - `partymq_clients_expired_total` - counter of clients reaped by the heartbeat sweep
//! - `partymq_rebalanced_keys_total` - counter of keys moved by rebalancing
//! - `partymq_consumer_running` - 1 while the source queue is being consumed

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use partymq_core::CacheStats;
use std::time::Duration;

/// State containing the Prometheus handle for metrics export
#[derive(Clone)]
pub struct MetricsState {
    pub prometheus_handle: PrometheusHandle,
}

/// Install the Prometheus recorder and register metric descriptions.
pub fn init_metrics() -> Result<MetricsState, Box<dyn std::error::Error + Send + Sync>> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_metric_descriptions();

    Ok(MetricsState {
        prometheus_handle: handle,
    })
}

fn register_metric_descriptions() {
    // Routing
    describe_counter!(
        "partymq_messages_routed_total",
        "Total number of messages published to a partition"
    );
    describe_counter!(
        "partymq_messages_requeued_total",
        "Total number of deliveries requeued on the source queue"
    );
    describe_histogram!(
        "partymq_publish_duration_seconds",
        "Duration of partition publishes in seconds"
    );

    // Clients
    describe_gauge!("partymq_ready_clients", "Number of ready clients");
    describe_gauge!("partymq_pending_clients", "Number of pending clients");
    describe_gauge!("partymq_assigned_keys", "Number of assigned partition keys");
    describe_counter!(
        "partymq_clients_expired_total",
        "Total number of clients expired by the heartbeat sweep"
    );
    describe_counter!(
        "partymq_rebalanced_keys_total",
        "Total number of keys moved by rebalancing"
    );

    // Consumer
    describe_gauge!(
        "partymq_consumer_running",
        "Whether the source queue is being consumed"
    );
}

/// Record a message routed to a partition
pub fn record_message_routed() {
    counter!("partymq_messages_routed_total").increment(1);
}

/// Record a delivery requeued on the source queue
pub fn record_message_requeued(reason: &str) {
    counter!("partymq_messages_requeued_total", "reason" => reason.to_string()).increment(1);
}

/// Record how long a publish took
pub fn record_publish_duration(duration: Duration) {
    histogram!("partymq_publish_duration_seconds").record(duration.as_secs_f64());
}

/// Update the client and key gauges from a cache snapshot
pub fn set_cache_stats(stats: &CacheStats) {
    gauge!("partymq_ready_clients").set(stats.ready_clients as f64);
    gauge!("partymq_pending_clients").set(stats.pending_clients as f64);
    gauge!("partymq_assigned_keys").set(stats.assigned_keys as f64);
}

/// Record a client reaped by the heartbeat sweep
pub fn record_client_expired() {
    counter!("partymq_clients_expired_total").increment(1);
}

/// Record keys moved by a rebalance
pub fn record_rebalance(moved_keys: usize) {
    counter!("partymq_rebalanced_keys_total").increment(moved_keys as u64);
}

/// Update the consumer running gauge
pub fn set_consumer_running(running: bool) {
    gauge!("partymq_consumer_running").set(if running { 1.0 } else { 0.0 });
}
