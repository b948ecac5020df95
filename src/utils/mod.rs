//! # Utility Modules
//!
//! Supporting utilities for logging, timing and observability.
//!
//! This module provides reusable utilities used throughout the runtime.
//!
//! ## Components
//! - **Logging**: Structured logging configuration
//! - **Time**: Wall-clock timestamps for keepalive pings
//! - **Timeout**: Async timeout wrappers
//! - **Metrics**: Thread-safe observability counters

pub mod logging;
pub mod metrics;
pub mod time;
pub mod timeout;

pub use metrics::{Metrics, MetricsSnapshot};
