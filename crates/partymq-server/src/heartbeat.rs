//! Heartbeat Monitor
//!
//! Tracks the last heartbeat of every client and evicts clients whose TTL has
//! elapsed. Eviction deletes the client from the partition cache, which also
//! purges its key assignments.

use crate::observability::{events, metrics};
use partymq_core::PartitionCache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

pub struct HeartbeatMonitor {
    cache: Arc<PartitionCache>,
    /// hostname -> expiry deadline
    deadlines: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl HeartbeatMonitor {
    pub fn new(cache: Arc<PartitionCache>, ttl: Duration) -> Self {
        Self {
            cache,
            deadlines: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Record a heartbeat, extending the client's deadline by the TTL.
    pub async fn beat(&self, hostname: &str) {
        let deadline = Instant::now() + self.ttl;
        self.deadlines
            .lock()
            .await
            .insert(hostname.to_string(), deadline);
        debug!(hostname = %hostname, "Heartbeat");
    }

    /// Drop the client's deadline without touching the cache.
    pub async fn forget(&self, hostname: &str) {
        if self.deadlines.lock().await.remove(hostname).is_some() {
            debug!(hostname = %hostname, "Heartbeat forgotten");
        }
    }

    /// Evict every client past its deadline. Returns the evicted hostnames.
    pub async fn sweep(&self) -> Vec<String> {
        let now = Instant::now();
        let mut deadlines = self.deadlines.lock().await;

        let expired: Vec<String> = deadlines
            .iter()
            .filter(|(_, deadline)| now > **deadline)
            .map(|(hostname, _)| hostname.clone())
            .collect();

        // Deadlines stay locked until the cache delete completes
        for hostname in &expired {
            deadlines.remove(hostname);
            let purged_keys = self
                .cache
                .delete(hostname)
                .await
                .map_or(0, |outcome| outcome.purged_keys);
            events::client_expired(hostname, purged_keys);
            metrics::record_client_expired();
        }
        drop(deadlines);

        if !expired.is_empty() {
            metrics::set_cache_stats(&self.cache.stats().await);
        }
        expired
    }

    /// Number of clients with a live deadline
    pub async fn tracked(&self) -> usize {
        self.deadlines.lock().await.len()
    }
}

/// Run `sweep` every `check_interval` until shutdown is signalled.
pub fn spawn_sweep_loop(
    monitor: Arc<HeartbeatMonitor>,
    check_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + check_interval, check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            check_interval_secs = check_interval.as_secs(),
            ttl_secs = monitor.ttl.as_secs(),
            "Heartbeat sweep started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let expired = monitor.sweep().await;
                    if !expired.is_empty() {
                        debug!(count = expired.len(), "Sweep evicted clients");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("Heartbeat sweep stopping");
                    break;
                }
            }
        }
    })
}
