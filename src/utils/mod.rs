//! # Utility Modules
//!
//! Supporting utilities for logging, metrics, and timeouts.
//!
//! ## Components
//! - **Logging**: structured logging configuration
//! - **Metrics**: thread-safe observability counters
//! - **Timeout**: async timeout wrappers and default intervals

pub mod logging;
pub mod metrics;
pub mod timeout;

pub use metrics::{MetricsSnapshot, SessionMetrics};
