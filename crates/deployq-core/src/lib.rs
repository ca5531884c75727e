//! Per-channel deploy slot coordination.
//!
//! Each channel has one deploy slot and a FIFO queue of actors waiting for
//! it. [`engine::ChannelDeploys`] runs the queue state machine on top of a
//! [`store::Store`]; [`coordinator::Coordinator`] adds event fan-out to
//! observers such as [`notifier::ImNotifier`].

pub mod config;
pub mod coordinator;
pub mod deploy;
pub mod engine;
pub mod error;
pub mod events;
pub mod notifier;
pub mod queue;
pub mod references;
pub mod store;
pub mod types;

pub use error::{DeployError, NotifyError, Result, StoreError};
