//! Core routing engine for partymq
//!
//! This crate contains the partition routing engine shared by the server:
//! the client registry, the key to client assignment table, and the
//! least-loaded assignment and rebalance algorithms.

pub mod cache;
pub mod error;
pub mod hasher;

pub use cache::{CacheStats, ClientLoad, DeleteOutcome, PartitionCache, ReadyOutcome};
pub use error::CacheError;
pub use hasher::{client_id, ClientId};
