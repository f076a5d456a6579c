//! In-process broker
//!
//! Direct-exchange routing, per-queue ready and unacked sets and prefetch
//! accounting, enough to drive the router end to end without RabbitMQ.
//! Publishing with a routing key that has no bound queue fails instead of
//! silently dropping the message.

use super::{Broker, BrokerError, Delivery, Headers, OutboundMessage, Publisher, Subscription};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// A message stored in a memory queue
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryMessage {
    pub payload: Vec<u8>,
    pub headers: Headers,
    pub timestamp: u64,
    pub app_id: Option<String>,
    pub redelivered: bool,
}

/// Operation counters, for asserting on consumer behavior
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub subscribed: usize,
    pub cancelled: usize,
    pub published: usize,
    pub acked: usize,
    pub nacked: usize,
    pub rejected: usize,
}

#[derive(Debug, Default)]
struct MemoryQueue {
    ready: VecDeque<MemoryMessage>,
    unacked: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    queues: HashMap<String, MemoryQueue>,
    /// (exchange, routing key) -> bound queues
    bindings: HashMap<(String, String), Vec<String>>,
    stats: MemoryStats,
    failing_publishes: usize,
    failing_subscribes: usize,
    /// (queue, cancelled flag) of every subscription handed out
    consumers: Vec<(String, Arc<AtomicBool>)>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<MemoryState>,
    changed: Notify,
}

/// Cloneable handle to an in-process broker
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // State stays consistent across a panicking test thread
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn declare_queue(&self, queue: &str) {
        self.lock().queues.entry(queue.to_string()).or_default();
    }

    /// Bind `queue` to `exchange` with `routing_key`, declaring it if needed.
    pub fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) {
        let mut state = self.lock();
        state.queues.entry(queue.to_string()).or_default();
        let bound = state
            .bindings
            .entry((exchange.to_string(), routing_key.to_string()))
            .or_default();
        if !bound.iter().any(|name| name == queue) {
            bound.push(queue.to_string());
        }
    }

    /// Enqueue a message directly, as a producer on the source queue would.
    pub fn push(&self, queue: &str, payload: impl Into<Vec<u8>>, headers: Headers) {
        let message = MemoryMessage {
            payload: payload.into(),
            headers,
            timestamp: 0,
            app_id: None,
            redelivered: false,
        };
        self.lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .ready
            .push_back(message);
        self.shared.changed.notify_waiters();
    }

    /// Remove and return every ready message on `queue`.
    pub fn drain(&self, queue: &str) -> Vec<MemoryMessage> {
        self.lock()
            .queues
            .get_mut(queue)
            .map(|q| q.ready.drain(..).collect())
            .unwrap_or_default()
    }

    /// Number of ready messages on `queue`
    pub fn queue_len(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.ready.len())
    }

    /// Number of delivered but unsettled messages on `queue`
    pub fn unacked(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.unacked)
    }

    pub fn stats(&self) -> MemoryStats {
        self.lock().stats
    }

    /// End every subscription on `queue` from the broker side, as a deleted
    /// queue would.
    pub fn close_consumers(&self, queue: &str) {
        let mut state = self.lock();
        state.consumers.retain(|(name, cancelled)| {
            if name == queue {
                cancelled.store(true, Ordering::Release);
            }
            name != queue
        });
        drop(state);
        self.shared.changed.notify_waiters();
    }

    /// Make the next `count` publishes fail.
    pub fn fail_publishes(&self, count: usize) {
        self.lock().failing_publishes = count;
    }

    /// Make the next `count` subscribes fail.
    pub fn fail_subscribes(&self, count: usize) {
        self.lock().failing_subscribes = count;
    }

    fn settle(&self, queue: &str, requeue: Option<MemoryMessage>, record: fn(&mut MemoryStats)) {
        let mut state = self.lock();
        record(&mut state.stats);
        if let Some(q) = state.queues.get_mut(queue) {
            q.unacked = q.unacked.saturating_sub(1);
            if let Some(mut message) = requeue {
                message.redelivered = true;
                q.ready.push_front(message);
            }
        }
        drop(state);
        self.shared.changed.notify_waiters();
    }
}

impl Publisher for MemoryBroker {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), BrokerError> {
        {
            let mut state = self.lock();
            if state.failing_publishes > 0 {
                state.failing_publishes -= 1;
                return Err(BrokerError::PublishFailed("injected failure".to_string()));
            }

            let bound = state
                .bindings
                .get(&(exchange.to_string(), routing_key.to_string()))
                .cloned()
                .unwrap_or_default();
            if bound.is_empty() {
                return Err(BrokerError::Unroutable {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                });
            }

            for queue in bound {
                state
                    .queues
                    .entry(queue)
                    .or_default()
                    .ready
                    .push_back(MemoryMessage {
                        payload: message.payload.clone(),
                        headers: message.headers.clone(),
                        timestamp: message.timestamp,
                        app_id: Some(message.app_id.clone()),
                        redelivered: false,
                    });
            }
            state.stats.published += 1;
        }
        self.shared.changed.notify_waiters();
        Ok(())
    }
}

impl Broker for MemoryBroker {
    type Subscription = MemorySubscription;

    async fn subscribe(
        &self,
        queue: &str,
        _consumer_tag: &str,
        prefetch: u16,
    ) -> Result<MemorySubscription, BrokerError> {
        let mut state = self.lock();
        if state.failing_subscribes > 0 {
            state.failing_subscribes -= 1;
            return Err(BrokerError::SubscribeFailed("injected failure".to_string()));
        }
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::QueueNotFound(queue.to_string()));
        }
        state.stats.subscribed += 1;

        let cancelled = Arc::new(AtomicBool::new(false));
        state
            .consumers
            .push((queue.to_string(), Arc::clone(&cancelled)));

        Ok(MemorySubscription {
            broker: self.clone(),
            queue: queue.to_string(),
            prefetch: usize::from(prefetch.max(1)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            cancelled,
        })
    }
}

pub struct MemorySubscription {
    broker: MemoryBroker,
    queue: String,
    prefetch: usize,
    in_flight: Arc<AtomicUsize>,
    cancelled: Arc<AtomicBool>,
}

impl MemorySubscription {
    fn try_take(&self) -> Option<MemoryDelivery> {
        if self.in_flight.load(Ordering::Acquire) >= self.prefetch {
            return None;
        }
        let mut state = self.broker.lock();
        let queue = state.queues.get_mut(&self.queue)?;
        let message = queue.ready.pop_front()?;
        queue.unacked += 1;
        self.in_flight.fetch_add(1, Ordering::AcqRel);

        Some(MemoryDelivery {
            broker: self.broker.clone(),
            queue: self.queue.clone(),
            in_flight: Arc::clone(&self.in_flight),
            message,
        })
    }
}

impl Subscription for MemorySubscription {
    type Delivery = MemoryDelivery;

    async fn next_delivery(&mut self) -> Option<Result<MemoryDelivery, BrokerError>> {
        let shared = Arc::clone(&self.broker.shared);
        loop {
            let notified = shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.cancelled.load(Ordering::Acquire) {
                return None;
            }
            if let Some(delivery) = self.try_take() {
                return Some(Ok(delivery));
            }

            notified.await;
        }
    }

    async fn cancel(self) -> Result<(), BrokerError> {
        self.cancelled.store(true, Ordering::Release);
        let mut state = self.broker.lock();
        state.stats.cancelled += 1;
        state
            .consumers
            .retain(|(_, cancelled)| !Arc::ptr_eq(cancelled, &self.cancelled));
        drop(state);
        self.broker.shared.changed.notify_waiters();
        Ok(())
    }
}

pub struct MemoryDelivery {
    broker: MemoryBroker,
    queue: String,
    in_flight: Arc<AtomicUsize>,
    message: MemoryMessage,
}

impl MemoryDelivery {
    fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn redelivered(&self) -> bool {
        self.message.redelivered
    }
}

impl Delivery for MemoryDelivery {
    fn body(&self) -> &[u8] {
        &self.message.payload
    }

    fn headers(&self) -> &Headers {
        &self.message.headers
    }

    async fn ack(self) -> Result<(), BrokerError> {
        self.release();
        self.broker.settle(&self.queue, None, |stats| stats.acked += 1);
        Ok(())
    }

    async fn nack_requeue(self) -> Result<(), BrokerError> {
        self.release();
        self.broker
            .settle(&self.queue, Some(self.message), |stats| stats.nacked += 1);
        Ok(())
    }

    async fn reject_requeue(self) -> Result<(), BrokerError> {
        self.release();
        self.broker
            .settle(&self.queue, Some(self.message), |stats| stats.rejected += 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::HeaderValue;

    fn headers(key: &str) -> Headers {
        let mut headers = Headers::new();
        headers.insert("partitionKey".to_string(), HeaderValue::from(key));
        headers
    }

    #[tokio::test]
    async fn test_publish_routes_to_bound_queue() {
        let broker = MemoryBroker::new();
        broker.bind_queue("q-a", "ex", "rk-a");
        broker.bind_queue("q-b", "ex", "rk-b");

        broker
            .publish("ex", "rk-a", OutboundMessage::new(b"one".to_vec(), headers("k1")))
            .await
            .unwrap();

        let delivered = broker.drain("q-a");
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].payload, b"one");
        assert_eq!(delivered[0].headers, headers("k1"));
        assert_eq!(delivered[0].app_id.as_deref(), Some("party-mq"));
        assert_eq!(broker.queue_len("q-b"), 0);
    }

    #[tokio::test]
    async fn test_unroutable_publish_fails() {
        let broker = MemoryBroker::new();
        let result = broker
            .publish("ex", "nowhere", OutboundMessage::new(Vec::new(), Headers::new()))
            .await;
        assert!(matches!(result, Err(BrokerError::Unroutable { .. })));
    }

    #[tokio::test]
    async fn test_subscribe_unknown_queue_fails() {
        let broker = MemoryBroker::new();
        let result = broker.subscribe("missing", "tag", 10).await;
        assert!(matches!(result, Err(BrokerError::QueueNotFound(_))));
    }

    #[tokio::test]
    async fn test_prefetch_limits_unacked() {
        let broker = MemoryBroker::new();
        broker.declare_queue("src");
        for i in 0..3 {
            broker.push("src", format!("m{i}"), Headers::new());
        }

        let mut subscription = broker.subscribe("src", "tag", 2).await.unwrap();
        let first = subscription.next_delivery().await.unwrap().unwrap();
        let _second = subscription.next_delivery().await.unwrap().unwrap();
        assert_eq!(broker.unacked("src"), 2);

        // Third delivery only arrives after a settlement frees a slot
        let third = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            subscription.next_delivery(),
        )
        .await;
        assert!(third.is_err());

        first.ack().await.unwrap();
        let third = subscription.next_delivery().await.unwrap().unwrap();
        assert_eq!(third.body(), b"m2");
    }

    #[tokio::test]
    async fn test_requeue_goes_to_front() {
        let broker = MemoryBroker::new();
        broker.declare_queue("src");
        broker.push("src", "first", Headers::new());
        broker.push("src", "second", Headers::new());

        let mut subscription = broker.subscribe("src", "tag", 1).await.unwrap();
        let delivery = subscription.next_delivery().await.unwrap().unwrap();
        delivery.reject_requeue().await.unwrap();

        let again = subscription.next_delivery().await.unwrap().unwrap();
        assert_eq!(again.body(), b"first");
        assert!(again.redelivered());
        again.nack_requeue().await.unwrap();

        let stats = broker.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.nacked, 1);
        assert_eq!(broker.queue_len("src"), 2);
        assert_eq!(broker.unacked("src"), 0);
    }

    #[tokio::test]
    async fn test_delivery_wakes_waiting_consumer() {
        let broker = MemoryBroker::new();
        broker.declare_queue("src");
        let mut subscription = broker.subscribe("src", "tag", 10).await.unwrap();

        let producer = broker.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            producer.push("src", "late", Headers::new());
        });

        let delivery = subscription.next_delivery().await.unwrap().unwrap();
        assert_eq!(delivery.body(), b"late");
    }

    #[tokio::test]
    async fn test_closed_subscription_ends_stream() {
        let broker = MemoryBroker::new();
        broker.declare_queue("src");
        let mut subscription = broker.subscribe("src", "tag", 10).await.unwrap();

        broker.close_consumers("src");
        assert!(subscription.next_delivery().await.is_none());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let broker = MemoryBroker::new();
        broker.declare_queue("src");
        broker.bind_queue("dst", "ex", "rk");
        broker.fail_publishes(1);
        broker.fail_subscribes(1);

        let message = OutboundMessage::new(Vec::new(), Headers::new());
        assert!(broker.publish("ex", "rk", message.clone()).await.is_err());
        assert!(broker.publish("ex", "rk", message).await.is_ok());

        assert!(broker.subscribe("src", "tag", 1).await.is_err());
        assert!(broker.subscribe("src", "tag", 1).await.is_ok());
        assert_eq!(broker.stats().subscribed, 1);
    }
}
