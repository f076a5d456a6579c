//! Application State
//!
//! Shared state passed to all API handlers.

use crate::consumer::ConsumerState;
use crate::heartbeat::HeartbeatMonitor;
use crate::observability::MetricsState;
use partymq_core::PartitionCache;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::watch;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<PartitionCache>,
    pub heartbeat: Arc<HeartbeatMonitor>,
    /// Exchange clients bind their partition queues to
    pub exchange: String,
    pub consumer: watch::Receiver<ConsumerState>,
    pub readiness: Arc<AtomicBool>,
    pub metrics_state: Option<MetricsState>,
}
