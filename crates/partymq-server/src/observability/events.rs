//! Structured Events
//!
//! One function per domain event so field names stay consistent across the
//! router. Every event carries an `event_type` field.
//!
//! Event types:
//! - `client_bound` - Client reserved a routing key
//! - `client_ready` - Client started receiving traffic
//! - `client_unbound` - Client removed itself
//! - `client_expired` - Client missed its heartbeat TTL
//! - `partition_rebalanced` - Keys moved onto a new client
//! - `consumer_started` - Source queue consumption began
//! - `consumer_stopped` - Source queue consumption ended
//! - `broker_connection_lost` - Broker connection closed underneath us

use tracing::{error, info, warn};

/// Emit a client bound event
pub fn client_bound(hostname: &str, routing_key: &str) {
    info!(
        event_type = "client_bound",
        hostname = %hostname,
        routing_key = %routing_key,
        "Client requested a binding"
    );
}

/// Emit a client ready event
pub fn client_ready(hostname: &str, routing_key: &str, ready_clients: usize) {
    info!(
        event_type = "client_ready",
        hostname = %hostname,
        routing_key = %routing_key,
        ready_clients = ready_clients,
        "Binding successful"
    );
}

/// Emit a client unbound event
pub fn client_unbound(hostname: &str, was_ready: bool, purged_keys: usize) {
    info!(
        event_type = "client_unbound",
        hostname = %hostname,
        was_ready = was_ready,
        purged_keys = purged_keys,
        "Client unbound"
    );
}

/// Emit a client expired event
pub fn client_expired(hostname: &str, purged_keys: usize) {
    warn!(
        event_type = "client_expired",
        hostname = %hostname,
        purged_keys = purged_keys,
        "Client expired"
    );
}

/// Emit a partition rebalanced event
pub fn partition_rebalanced(hostname: &str, moved_keys: usize) {
    info!(
        event_type = "partition_rebalanced",
        hostname = %hostname,
        moved_keys = moved_keys,
        "Keys rebalanced onto new client"
    );
}

/// Emit a consumer started event
pub fn consumer_started(queue: &str, consumer_tag: &str, prefetch: u16) {
    info!(
        event_type = "consumer_started",
        queue = %queue,
        consumer_tag = %consumer_tag,
        prefetch = prefetch,
        "Consumer started"
    );
}

/// Emit a consumer stopped event
pub fn consumer_stopped(queue: &str, reason: &str) {
    info!(
        event_type = "consumer_stopped",
        queue = %queue,
        reason = %reason,
        "Consumer stopped"
    );
}

/// Emit a broker connection lost event
pub fn broker_connection_lost(error: &str) {
    error!(
        event_type = "broker_connection_lost",
        error = %error,
        "Broker connection lost"
    );
}
