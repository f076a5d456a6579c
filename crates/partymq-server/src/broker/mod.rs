//! Message Broker Boundary
//!
//! The router talks to its broker through a small set of traits so the
//! consumer controller and the sender can run against RabbitMQ in production
//! and against an in-process broker in tests.
//!
//! - `Publisher`: publish to an exchange with a routing key
//! - `Broker`: open a consumer subscription on a queue
//! - `Subscription`: stream deliveries, cancel when done
//! - `Delivery`: inspect and settle one message

pub mod amqp;
pub mod memory;
pub mod message;

use std::future::Future;
use thiserror::Error;

pub use amqp::AmqpBroker;
pub use memory::{MemoryBroker, MemoryMessage};
pub use message::{HeaderValue, Headers, OutboundMessage};

/// Exchange every partition queue is bound to
pub const ROUTING_EXCHANGE: &str = "partymq.ex.write";

/// `app_id` stamped on every published message
pub const APP_ID: &str = "party-mq";

/// Prefix of the source queue consumer tag
pub const CONSUMER_TAG_PREFIX: &str = "party-mq";

/// Routing key a client with `hostname` binds its queue with.
pub fn routing_key_for(hostname: &str) -> String {
    format!("partymq.r.partition-{hostname}")
}

/// Errors surfaced by broker operations
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("queue {0} does not exist")]
    QueueNotFound(String),

    #[error("no queue bound to {exchange} with routing key {routing_key}")]
    Unroutable {
        exchange: String,
        routing_key: String,
    },

    #[error("publish failed: {0}")]
    PublishFailed(String),

    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
}

/// Publishes messages to an exchange.
pub trait Publisher: Send + Sync + 'static {
    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

/// Opens consumer subscriptions on queues.
pub trait Broker: Send + Sync + 'static {
    type Subscription: Subscription;

    /// Start consuming `queue` with at most `prefetch` unacknowledged deliveries.
    fn subscribe(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch: u16,
    ) -> impl Future<Output = Result<Self::Subscription, BrokerError>> + Send;
}

/// An active consumer on a queue.
pub trait Subscription: Send + 'static {
    type Delivery: Delivery;

    /// Next delivery, or `None` once the broker ended the subscription.
    fn next_delivery(
        &mut self,
    ) -> impl Future<Output = Option<Result<Self::Delivery, BrokerError>>> + Send;

    /// Cancel the consumer. Unsettled deliveries are returned to the queue.
    fn cancel(self) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

/// A single consumed message awaiting settlement.
pub trait Delivery: Send + 'static {
    fn body(&self) -> &[u8];

    fn headers(&self) -> &Headers;

    fn ack(self) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Negative-acknowledge and requeue after a failed publish.
    fn nack_requeue(self) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Reject and requeue when no client can take the message.
    fn reject_requeue(self) -> impl Future<Output = Result<(), BrokerError>> + Send;
}
