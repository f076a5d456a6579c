//! HTTP API Module
//!
//! Control plane for partition clients plus operational endpoints.
//!
//! This module contains:
//! - `state`: Shared application state
//! - `clients`: Bind, ready, unbind and heartbeat for partition clients
//! - `partitions`: Current routing table summary
//! - `health`: Liveness, readiness and version
//! - `metrics`: Prometheus metrics endpoint

mod clients;
mod health;
mod metrics;
mod partitions;
mod state;

pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health checks
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/version", get(health::get_version))
        // Observability
        .route("/metrics", get(metrics::get_metrics))
        .route("/partitions", get(partitions::get_partitions))
        // Client lifecycle
        .route("/clients/{hostname}/bind", post(clients::bind))
        .route("/clients/{hostname}/ready", post(clients::ready))
        .route("/clients/{hostname}/unbind", post(clients::unbind))
        .route("/clients/{hostname}/heartbeat", post(clients::heartbeat))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::ROUTING_EXCHANGE;
    use crate::consumer::ConsumerState;
    use crate::heartbeat::HeartbeatMonitor;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use partymq_core::PartitionCache;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let cache = Arc::new(PartitionCache::new());
        let heartbeat = Arc::new(HeartbeatMonitor::new(
            Arc::clone(&cache),
            Duration::from_secs(120),
        ));
        let (_, consumer) = watch::channel(ConsumerState::Stopped);
        AppState {
            cache,
            heartbeat,
            exchange: ROUTING_EXCHANGE.to_string(),
            consumer,
            readiness: Arc::new(AtomicBool::new(true)),
            metrics_state: None,
        }
    }

    async fn call(state: &AppState, method: &str, uri: &str) -> (StatusCode, String) {
        let response = create_router(state.clone())
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn json(body: &str) -> Value {
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test]
    async fn test_health_and_readiness() {
        let state = test_state();
        assert_eq!(call(&state, "GET", "/health").await, (StatusCode::OK, "OK".to_string()));
        assert_eq!(call(&state, "GET", "/ready").await.0, StatusCode::OK);

        state.readiness.store(false, Ordering::Release);
        assert_eq!(
            call(&state, "GET", "/ready").await.0,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_bind_returns_routing_key_and_exchange() {
        let state = test_state();
        let (status, body) = call(&state, "POST", "/clients/worker-1/bind").await;

        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["routingKey"], "partymq.r.partition-worker-1");
        assert_eq!(body["exchange"], "partymq.ex.write");
        assert_eq!(state.cache.stats().await.pending_clients, 1);
    }

    #[tokio::test]
    async fn test_double_bind_conflicts() {
        let state = test_state();
        call(&state, "POST", "/clients/worker-1/bind").await;
        let (status, _) = call(&state, "POST", "/clients/worker-1/bind").await;
        assert_eq!(status, StatusCode::CONFLICT);

        call(&state, "POST", "/clients/worker-1/ready").await;
        let (status, _) = call(&state, "POST", "/clients/worker-1/bind").await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_ready_lifecycle() {
        let state = test_state();

        let (status, _) = call(&state, "POST", "/clients/worker-1/ready").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        call(&state, "POST", "/clients/worker-1/bind").await;
        let (status, body) = call(&state, "POST", "/clients/worker-1/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["routingKey"], "partymq.r.partition-worker-1");
        assert!(state.cache.any_clients().await);
        assert_eq!(state.heartbeat.tracked().await, 1);

        let (status, _) = call(&state, "POST", "/clients/worker-1/ready").await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_ready_reports_rebalanced_keys() {
        let state = test_state();
        call(&state, "POST", "/clients/a/bind").await;
        call(&state, "POST", "/clients/a/ready").await;
        for i in 0..10 {
            state
                .cache
                .assign_to_free_partition(&format!("k{i}"))
                .await
                .unwrap();
        }

        call(&state, "POST", "/clients/b/bind").await;
        let (_, body) = call(&state, "POST", "/clients/b/ready").await;
        assert_eq!(json(&body)["movedKeys"], 5);
    }

    #[tokio::test]
    async fn test_unbind_is_unconditional() {
        let state = test_state();

        let (status, body) = call(&state, "POST", "/clients/ghost/unbind").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["removed"], false);

        call(&state, "POST", "/clients/worker-1/bind").await;
        call(&state, "POST", "/clients/worker-1/ready").await;
        state.cache.assign_to_free_partition("k1").await.unwrap();

        let (status, body) = call(&state, "POST", "/clients/worker-1/unbind").await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["removed"], true);
        assert_eq!(body["purgedKeys"], 1);
        assert!(!state.cache.any_clients().await);
        assert_eq!(state.heartbeat.tracked().await, 0);
    }

    #[tokio::test]
    async fn test_heartbeat_tracks_hostname() {
        let state = test_state();
        let (status, _) = call(&state, "POST", "/clients/worker-1/heartbeat").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state.heartbeat.tracked().await, 1);
    }

    #[tokio::test]
    async fn test_partitions_listing() {
        let state = test_state();
        for hostname in ["a", "b"] {
            call(&state, "POST", &format!("/clients/{hostname}/bind")).await;
            call(&state, "POST", &format!("/clients/{hostname}/ready")).await;
        }
        call(&state, "POST", "/clients/c/bind").await;
        state.cache.assign_to_free_partition("k1").await.unwrap();

        let (status, body) = call(&state, "GET", "/partitions").await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["consumer"], "stopped");
        assert_eq!(body["anyClients"], true);
        assert_eq!(body["readyClients"], 2);
        assert_eq!(body["pendingClients"], 1);
        assert_eq!(body["assignedKeys"], 1);
        assert_eq!(body["partitions"].as_array().unwrap().len(), 2);
        assert_eq!(body["clients"][0]["hostname"], "a");
        assert_eq!(body["clients"][0]["load"], 1);
    }

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let state = test_state();
        let (status, _) = call(&state, "GET", "/metrics").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_version() {
        let state = test_state();
        let (status, body) = call(&state, "GET", "/version").await;
        assert_eq!(status, StatusCode::OK);
        assert!(json(&body)["version"].as_str().unwrap().starts_with(env!("CARGO_PKG_VERSION")));
    }
}
