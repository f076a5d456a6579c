//! Partition cache errors

use thiserror::Error;

/// State-transition violations and routing failures reported by the cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The hostname already reserved a routing key.
    #[error("client {0} is already pending")]
    AlreadyPending(String),

    /// The hostname is already receiving traffic.
    #[error("client {0} is already ready")]
    AlreadyReady(String),

    /// The hostname never requested a binding.
    #[error("client {0} is not pending")]
    NotPending(String),

    /// No client is ready to receive traffic.
    #[error("no ready clients")]
    NoClients,
}
