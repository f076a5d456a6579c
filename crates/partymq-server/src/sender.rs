//! Partition Sender
//!
//! Resolves the partition for a key and publishes the message to it.
//! Keys without an assignment are placed on the least-loaded ready client.

use crate::broker::{BrokerError, Headers, OutboundMessage, Publisher, ROUTING_EXCHANGE};
use crate::observability::metrics;
use partymq_core::{CacheError, PartitionCache};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl SendError {
    /// Whether the send failed because no client is ready.
    pub fn is_no_clients(&self) -> bool {
        matches!(self, SendError::Cache(CacheError::NoClients))
    }
}

pub struct Sender<P> {
    cache: Arc<PartitionCache>,
    publisher: Arc<P>,
    exchange: String,
}

impl<P: Publisher> Sender<P> {
    pub fn new(cache: Arc<PartitionCache>, publisher: Arc<P>) -> Self {
        Self {
            cache,
            publisher,
            exchange: ROUTING_EXCHANGE.to_string(),
        }
    }

    /// Publish `payload` to the partition owning `key`, returning its routing key.
    pub async fn send(&self, payload: &[u8], headers: Headers, key: &str) -> Result<String, SendError> {
        let routing_key = match self.cache.routing_key(key).await? {
            Some(routing_key) => routing_key,
            None => self.cache.assign_to_free_partition(key).await?,
        };

        let message = OutboundMessage::new(payload.to_vec(), headers);
        let started = Instant::now();
        self.publisher
            .publish(&self.exchange, &routing_key, message)
            .await?;
        metrics::record_publish_duration(started.elapsed());
        metrics::record_message_routed();

        trace!(key = %key, routing_key = %routing_key, "Message routed");
        Ok(routing_key)
    }

    /// Whether any client can receive traffic.
    pub async fn ready(&self) -> bool {
        self.cache.any_clients().await
    }
}
