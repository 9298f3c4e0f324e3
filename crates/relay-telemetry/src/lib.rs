//! # Relay Telemetry
//!
//! Observability for the relay orchestrator:
//! - Cost tracking with an atomic running total
//! - Structured-logging bootstrap

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cost;
pub mod logging;

// Re-export main types
pub use cost::{CostReport, CostTracker};
pub use logging::{init_logging, LoggingConfig};
