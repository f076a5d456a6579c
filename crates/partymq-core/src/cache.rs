//! Partition Cache
//!
//! Registry of pending and ready clients, the key to client routing table and
//! the per-client load counters used for least-loaded assignment.
//!
//! A client first reserves a routing key (`add_pending`), then becomes eligible
//! for traffic (`add_ready`). Promotion rebalances existing assignments onto the
//! newcomer under the same write guard, so readers never observe a partial
//! rebalance.
//!
//! Ordering of a single key is only guaranteed between rebalances: a key moved
//! to the newcomer (or orphaned by a deleted client) starts a fresh stream on
//! its new client.
//!
//! Selection policies are explicit so routing is reproducible:
//! - empty keys are spread round-robin over ready clients ordered by id
//! - least-loaded ties resolve to the lowest client id
//! - rebalance candidates are taken in lexicographic key order

use crate::error::CacheError;
use crate::hasher::{client_id, ClientId};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

/// A client eligible to receive routed traffic
#[derive(Debug, Clone)]
struct ReadyClient {
    hostname: String,
    routing_key: String,
    /// Number of keys currently assigned to this client
    load: usize,
}

#[derive(Debug, Default)]
struct CacheState {
    /// hostname -> reserved routing key
    pending: HashMap<String, String>,
    /// Ready clients ordered by id
    ready: BTreeMap<ClientId, ReadyClient>,
    /// Application key -> owning client
    keys: BTreeMap<String, ClientId>,
}

/// Result of promoting a client to ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyOutcome {
    pub client_id: ClientId,
    pub routing_key: String,
    /// Keys moved onto the new client by the rebalance
    pub moved_keys: usize,
}

/// Result of deleting a known client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub client_id: ClientId,
    /// Whether the client was ready (as opposed to only pending)
    pub was_ready: bool,
    /// Assignments purged along with the client
    pub purged_keys: usize,
}

/// Snapshot of cache sizes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub pending_clients: usize,
    pub ready_clients: usize,
    pub assigned_keys: usize,
}

/// Load of a single ready client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientLoad {
    pub client_id: ClientId,
    pub hostname: String,
    pub routing_key: String,
    pub load: usize,
}

/// Shared partition routing table.
///
/// Reads take the shared lock, every mutation takes the exclusive lock.
#[derive(Debug, Default)]
pub struct PartitionCache {
    state: RwLock<CacheState>,
    /// Round-robin position for keyless messages
    cursor: AtomicUsize,
}

impl PartitionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `routing_key` for `hostname`.
    pub async fn add_pending(&self, hostname: &str, routing_key: &str) -> Result<(), CacheError> {
        let mut state = self.state.write().await;

        if state.pending.contains_key(hostname) {
            return Err(CacheError::AlreadyPending(hostname.to_string()));
        }
        if state.is_ready(hostname) {
            return Err(CacheError::AlreadyReady(hostname.to_string()));
        }

        state
            .pending
            .insert(hostname.to_string(), routing_key.to_string());
        debug!(hostname = %hostname, routing_key = %routing_key, "Client pending");
        Ok(())
    }

    /// Promote a pending client to ready and rebalance existing keys onto it.
    pub async fn add_ready(&self, hostname: &str) -> Result<ReadyOutcome, CacheError> {
        let mut state = self.state.write().await;

        if state.is_ready(hostname) {
            return Err(CacheError::AlreadyReady(hostname.to_string()));
        }

        let Some(routing_key) = state.pending.get(hostname).cloned() else {
            return Err(CacheError::NotPending(hostname.to_string()));
        };

        // Another hostname hashing to the same id already holds the slot
        let id = client_id(hostname);
        if state.ready.contains_key(&id) {
            return Err(CacheError::AlreadyReady(hostname.to_string()));
        }

        state.pending.remove(hostname);
        state.ready.insert(
            id,
            ReadyClient {
                hostname: hostname.to_string(),
                routing_key: routing_key.clone(),
                load: 0,
            },
        );

        let moved_keys = state.rebalance(id);

        debug!(
            hostname = %hostname,
            client_id = %id,
            moved_keys = moved_keys,
            ready_clients = state.ready.len(),
            "Client ready"
        );

        Ok(ReadyOutcome {
            client_id: id,
            routing_key,
            moved_keys,
        })
    }

    /// Remove a client and every key assigned to it.
    ///
    /// Returns `None` when the hostname was unknown.
    pub async fn delete(&self, hostname: &str) -> Option<DeleteOutcome> {
        let mut state = self.state.write().await;
        let id = client_id(hostname);

        let was_pending = state.pending.remove(hostname).is_some();
        let was_ready = if state.is_ready(hostname) {
            state.ready.remove(&id);
            true
        } else {
            false
        };

        if !was_pending && !was_ready {
            return None;
        }

        // A pending client owns no keys, and its id may collide with a ready one
        let purged_keys = if was_ready {
            let before = state.keys.len();
            state.keys.retain(|_, owner| *owner != id);
            before - state.keys.len()
        } else {
            0
        };

        debug!(
            hostname = %hostname,
            client_id = %id,
            was_ready = was_ready,
            purged_keys = purged_keys,
            "Client deleted"
        );

        Some(DeleteOutcome {
            client_id: id,
            was_ready,
            purged_keys,
        })
    }

    /// Resolve the routing key for `key`.
    ///
    /// An empty key resolves to any ready client. `Ok(None)` means the key has
    /// no assignment yet and the caller should use `assign_to_free_partition`.
    pub async fn routing_key(&self, key: &str) -> Result<Option<String>, CacheError> {
        let state = self.state.read().await;

        if state.ready.is_empty() {
            return Err(CacheError::NoClients);
        }

        if key.is_empty() {
            let index = self.cursor.fetch_add(1, Ordering::Relaxed) % state.ready.len();
            return Ok(state
                .ready
                .values()
                .nth(index)
                .map(|client| client.routing_key.clone()));
        }

        Ok(state
            .keys
            .get(key)
            .and_then(|id| state.ready.get(id))
            .map(|client| client.routing_key.clone()))
    }

    /// Assign `key` to the least-loaded ready client and return its routing key.
    ///
    /// A key that was assigned concurrently keeps its existing owner.
    pub async fn assign_to_free_partition(&self, key: &str) -> Result<String, CacheError> {
        let mut state = self.state.write().await;

        if let Some(client) = state.keys.get(key).and_then(|id| state.ready.get(id)) {
            return Ok(client.routing_key.clone());
        }

        // BTreeMap iterates by id and min_by_key keeps the first minimum
        let Some((&id, client)) = state
            .ready
            .iter_mut()
            .min_by_key(|(_, client)| client.load)
        else {
            return Err(CacheError::NoClients);
        };

        client.load += 1;
        let routing_key = client.routing_key.clone();
        state.keys.insert(key.to_string(), id);

        trace!(key = %key, client_id = %id, "Key assigned");
        Ok(routing_key)
    }

    /// Routing keys of all ready clients.
    pub async fn partitions(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .ready
            .values()
            .map(|client| client.routing_key.clone())
            .collect()
    }

    /// Whether any client is ready to receive traffic.
    pub async fn any_clients(&self) -> bool {
        !self.state.read().await.ready.is_empty()
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        CacheStats {
            pending_clients: state.pending.len(),
            ready_clients: state.ready.len(),
            assigned_keys: state.keys.len(),
        }
    }

    /// Per-client load, ordered by client id.
    pub async fn client_loads(&self) -> Vec<ClientLoad> {
        self.state
            .read()
            .await
            .ready
            .iter()
            .map(|(id, client)| ClientLoad {
                client_id: *id,
                hostname: client.hostname.clone(),
                routing_key: client.routing_key.clone(),
                load: client.load,
            })
            .collect()
    }
}

impl CacheState {
    fn is_ready(&self, hostname: &str) -> bool {
        self.ready
            .get(&client_id(hostname))
            .is_some_and(|client| client.hostname == hostname)
    }

    /// Move up to `assigned / ready` keys onto `newcomer`.
    ///
    /// Keys are only taken from clients whose load is above the average, so a
    /// donor never drops below it.
    fn rebalance(&mut self, newcomer: ClientId) -> usize {
        let CacheState { ready, keys, .. } = self;
        let average = keys.len() / ready.len().max(1);

        let mut moved = 0;
        for (key, owner) in keys.iter_mut() {
            if moved == average {
                break;
            }
            if *owner == newcomer {
                continue;
            }
            let Some(donor) = ready.get_mut(owner) else {
                continue;
            };
            if donor.load <= average {
                continue;
            }

            match donor.load.checked_sub(1) {
                Some(load) => donor.load = load,
                None => warn!(client_id = %owner, key = %key, "Rebalance load underflow, clamped at zero"),
            }
            trace!(key = %key, from = %owner, to = %newcomer, "Key rebalanced");
            *owner = newcomer;
            moved += 1;
        }

        if let Some(client) = ready.get_mut(&newcomer) {
            client.load += moved;
        }
        moved
    }
}
