//! Client Lifecycle Endpoints
//!
//! Clients bind to reserve a routing key, declare and bind their queue, then
//! report ready to start receiving traffic. Heartbeats keep them alive.

use super::state::AppState;
use crate::broker::routing_key_for;
use crate::observability::{events, metrics};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use partymq_core::CacheError;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BindResponse {
    pub routing_key: String,
    pub exchange: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyResponse {
    pub routing_key: String,
    /// Keys moved onto this client by rebalancing
    pub moved_keys: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnbindResponse {
    /// Whether the hostname was known at all
    pub removed: bool,
    pub purged_keys: usize,
}

fn error_response(err: CacheError) -> (StatusCode, String) {
    let status = match err {
        CacheError::AlreadyPending(_) | CacheError::AlreadyReady(_) => StatusCode::CONFLICT,
        CacheError::NotPending(_) => StatusCode::BAD_REQUEST,
        CacheError::NoClients => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, err.to_string())
}

async fn publish_stats(state: &AppState) {
    metrics::set_cache_stats(&state.cache.stats().await);
}

/// POST /clients/{hostname}/bind
#[tracing::instrument(skip(state))]
pub async fn bind(
    State(state): State<AppState>,
    Path(hostname): Path<String>,
) -> Result<Json<BindResponse>, (StatusCode, String)> {
    let routing_key = routing_key_for(&hostname);
    state
        .cache
        .add_pending(&hostname, &routing_key)
        .await
        .map_err(error_response)?;

    events::client_bound(&hostname, &routing_key);
    publish_stats(&state).await;

    Ok(Json(BindResponse {
        routing_key,
        exchange: state.exchange.clone(),
    }))
}

/// POST /clients/{hostname}/ready
#[tracing::instrument(skip(state))]
pub async fn ready(
    State(state): State<AppState>,
    Path(hostname): Path<String>,
) -> Result<Json<ReadyResponse>, (StatusCode, String)> {
    let outcome = state
        .cache
        .add_ready(&hostname)
        .await
        .map_err(error_response)?;
    state.heartbeat.beat(&hostname).await;

    let stats = state.cache.stats().await;
    events::client_ready(&hostname, &outcome.routing_key, stats.ready_clients);
    if outcome.moved_keys > 0 {
        events::partition_rebalanced(&hostname, outcome.moved_keys);
        metrics::record_rebalance(outcome.moved_keys);
    }
    metrics::set_cache_stats(&stats);

    Ok(Json(ReadyResponse {
        routing_key: outcome.routing_key,
        moved_keys: outcome.moved_keys,
    }))
}

/// POST /clients/{hostname}/unbind
#[tracing::instrument(skip(state))]
pub async fn unbind(
    State(state): State<AppState>,
    Path(hostname): Path<String>,
) -> Json<UnbindResponse> {
    let outcome = state.cache.delete(&hostname).await;
    state.heartbeat.forget(&hostname).await;
    let response = match outcome {
        Some(outcome) => {
            events::client_unbound(&hostname, outcome.was_ready, outcome.purged_keys);
            UnbindResponse {
                removed: true,
                purged_keys: outcome.purged_keys,
            }
        }
        None => UnbindResponse {
            removed: false,
            purged_keys: 0,
        },
    };
    publish_stats(&state).await;
    Json(response)
}

/// POST /clients/{hostname}/heartbeat
#[tracing::instrument(skip(state))]
pub async fn heartbeat(State(state): State<AppState>, Path(hostname): Path<String>) -> StatusCode {
    state.heartbeat.beat(&hostname).await;
    StatusCode::OK
}
