//! partymq Server Library
//!
//! Broker adapters, the source queue consumer, partition sender, heartbeat
//! sweeper and HTTP control plane around the `partymq-core` routing engine.

pub mod api;
pub mod broker;
pub mod config;
pub mod consumer;
pub mod heartbeat;
pub mod observability;
pub mod sender;
pub mod version;
