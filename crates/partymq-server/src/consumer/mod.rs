//! Source Queue Consumer
//!
//! Consumes the source queue only while at least one client is ready, and
//! forwards every delivery to its partition through the sender.

pub mod controller;
pub mod key;
pub mod state;

pub use controller::{ConsumerConfig, ConsumerController};
pub use key::{KeyExtractor, KeySource};
pub use state::{Action, ConsumerState, ControllerEvent};
