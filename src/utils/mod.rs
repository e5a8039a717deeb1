//! # Utility Modules
//!
//! Supporting utilities shared by the client and server.
//!
//! ## Components
//! - **TsQueue**: blocking double-ended queue bridging the reactor and application threads
//! - **Metrics**: thread-safe observability counters
//! - **Logging**: structured logging configuration

pub mod logging;
pub mod metrics;
pub mod tsqueue;

pub use metrics::{Metrics, MetricsSnapshot};
pub use tsqueue::TsQueue;
