//! End-to-end routing through the consumer controller on the in-memory broker.

use partymq_core::PartitionCache;
use partymq_server::broker::{
    routing_key_for, HeaderValue, Headers, MemoryBroker, MemoryMessage, ROUTING_EXCHANGE,
};
use partymq_server::consumer::{ConsumerConfig, ConsumerController, KeyExtractor, KeySource};
use partymq_server::sender::Sender;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const SOURCE: &str = "partymq.q.source";

struct Router {
    cache: Arc<PartitionCache>,
    broker: MemoryBroker,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Router {
    fn start() -> Self {
        let cache = Arc::new(PartitionCache::new());
        let broker = MemoryBroker::new();
        broker.declare_queue(SOURCE);

        let sender = Arc::new(Sender::new(Arc::clone(&cache), Arc::new(broker.clone())));
        let controller = ConsumerController::new(
            Arc::new(broker.clone()),
            sender,
            KeyExtractor::new(KeySource::Header, "partitionKey"),
            ConsumerConfig {
                queue: SOURCE.to_string(),
                poll_interval: Duration::from_secs(1),
                ..ConsumerConfig::default()
            },
        );
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(controller.run(shutdown_rx));

        Self {
            cache,
            broker,
            shutdown,
            handle,
        }
    }

    async fn join(&self, hostname: &str) {
        let routing_key = routing_key_for(hostname);
        self.broker.bind_queue(hostname, ROUTING_EXCHANGE, &routing_key);
        self.cache.add_pending(hostname, &routing_key).await.unwrap();
        self.cache.add_ready(hostname).await.unwrap();
    }

    fn publish(&self, range: std::ops::Range<usize>, keys: usize) {
        for i in range {
            let mut headers = Headers::new();
            headers.insert(
                "partitionKey".to_string(),
                HeaderValue::from(format!("key-{}", i % keys)),
            );
            self.broker.push(SOURCE, i.to_string(), headers);
        }
    }

    async fn wait_routed(&self, hostnames: &[&str], total: usize) {
        loop {
            let routed: usize = hostnames.iter().map(|h| self.broker.queue_len(h)).sum();
            if routed >= total {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        self.handle.await.unwrap();
    }
}

fn key_of(message: &MemoryMessage) -> String {
    message.headers["partitionKey"].as_str().unwrap().to_string()
}

fn index_of(message: &MemoryMessage) -> usize {
    std::str::from_utf8(&message.payload).unwrap().parse().unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_three_clients_hundred_thousand_messages() {
    const MESSAGES: usize = 100_000;
    const KEYS: usize = 25_000;
    let hostnames = ["alpha", "beta", "gamma"];

    let router = Router::start();
    for hostname in hostnames {
        router.join(hostname).await;
    }
    router.publish(0..MESSAGES, KEYS);
    router.wait_routed(&hostnames, MESSAGES).await;

    let mut owner: HashMap<String, &str> = HashMap::new();
    let mut seen = HashSet::new();
    let mut per_client = Vec::new();

    for hostname in hostnames {
        let delivered = router.broker.drain(hostname);
        per_client.push(delivered.len());

        let mut last_index: HashMap<String, usize> = HashMap::new();
        for message in &delivered {
            let key = key_of(message);
            let index = index_of(message);

            // Each key lands on exactly one partition
            let previous = owner.entry(key.clone()).or_insert(hostname);
            assert_eq!(*previous, hostname, "key {key} split across partitions");

            // Per-key order is preserved
            if let Some(last) = last_index.insert(key.clone(), index) {
                assert!(last < index, "key {key} reordered: {last} before {index}");
            }

            assert!(seen.insert(index), "message {index} delivered twice");
            assert_eq!(message.app_id.as_deref(), Some("party-mq"));
        }
    }

    assert_eq!(seen.len(), MESSAGES);
    assert_eq!(per_client.iter().sum::<usize>(), MESSAGES);
    assert_eq!(owner.len(), KEYS);
    assert!(per_client.iter().all(|count| *count > 0));

    let loads: Vec<usize> = router
        .cache
        .client_loads()
        .await
        .iter()
        .map(|client| client.load)
        .collect();
    assert_eq!(loads.iter().sum::<usize>(), KEYS);
    let (min, max) = (loads.iter().min().unwrap(), loads.iter().max().unwrap());
    assert!(max - min <= 1, "unbalanced loads {loads:?}");

    let stats = router.broker.stats();
    assert_eq!(stats.acked, MESSAGES);
    assert_eq!(stats.nacked + stats.rejected, 0);
    assert_eq!(router.broker.queue_len(SOURCE), 0);

    router.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_late_joiner_takes_over_keys_without_loss() {
    const KEYS: usize = 1_000;
    let router = Router::start();
    router.join("alpha").await;
    router.join("beta").await;

    router.publish(0..5_000, KEYS);
    router.wait_routed(&["alpha", "beta"], 5_000).await;
    let before: usize = ["alpha", "beta"]
        .iter()
        .map(|h| router.broker.drain(h).len())
        .sum();
    assert_eq!(before, 5_000);

    router.join("gamma").await;
    router.publish(5_000..10_000, KEYS);
    router.wait_routed(&["alpha", "beta", "gamma"], 5_000).await;

    let mut owner: HashMap<String, &str> = HashMap::new();
    let mut after = 0;
    for hostname in ["alpha", "beta", "gamma"] {
        for message in router.broker.drain(hostname) {
            after += 1;
            let key = key_of(&message);
            let previous = owner.entry(key.clone()).or_insert(hostname);
            assert_eq!(*previous, hostname, "key {key} split after rebalance");
        }
    }
    assert_eq!(after, 5_000);

    let gamma_keys = owner.values().filter(|h| **h == "gamma").count();
    assert_eq!(gamma_keys, KEYS / 3);

    router.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_messages_wait_for_first_client() {
    let router = Router::start();
    router.publish(0..100, 10);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(router.broker.queue_len(SOURCE), 100);
    assert_eq!(router.broker.stats().subscribed, 0);

    router.join("alpha").await;
    router.wait_routed(&["alpha"], 100).await;
    assert_eq!(router.broker.queue_len(SOURCE), 0);

    router.stop().await;
}
