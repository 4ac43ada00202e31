//! # Utility Modules
//!
//! Supporting utilities for observability.
//!
//! ## Components
//! - **Logging**: structured `tracing` subscriber setup from `LoggingConfig`
//! - **Metrics**: thread-safe protocol counters and an operation timer

pub mod logging;
pub mod metrics;
