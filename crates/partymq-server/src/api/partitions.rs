//! Partition Listing Endpoint

use super::state::AppState;
use crate::consumer::ConsumerState;
use axum::{extract::State, response::Json};
use partymq_core::{CacheStats, ClientLoad};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionsResponse {
    pub consumer: ConsumerState,
    pub any_clients: bool,
    /// Routing keys of ready clients
    pub partitions: Vec<String>,
    pub clients: Vec<ClientLoad>,
    #[serde(flatten)]
    pub stats: CacheStats,
}

/// GET /partitions - Ready clients, their loads and cache totals
#[tracing::instrument(skip(state))]
pub async fn get_partitions(State(state): State<AppState>) -> Json<PartitionsResponse> {
    let consumer = *state.consumer.borrow();
    Json(PartitionsResponse {
        consumer,
        any_clients: state.cache.any_clients().await,
        partitions: state.cache.partitions().await,
        clients: state.cache.client_loads().await,
        stats: state.cache.stats().await,
    })
}
