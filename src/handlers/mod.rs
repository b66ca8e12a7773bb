//! HTTP endpoint handlers for the exporter.
//!
//! - metrics path (default `/metrics`): Prometheus metrics endpoint
//! - `/health`: Health check endpoint

pub mod health;
pub mod metrics;

pub use health::health_handler;
pub use metrics::metrics_handler;
