//! Application state shared by the HTTP handlers.

use herakles_qemu_exporter::aggregator::MetricsAggregator;
use herakles_qemu_exporter::exposition::PrometheusExposition;
use herakles_qemu_exporter::health_stats::HealthStats;
use prometheus::Registry;
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::metrics::ExporterMetrics;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

/// Global application state shared across requests.
pub struct AppState {
    pub aggregator: MetricsAggregator,
    pub exposition: PrometheusExposition,
    /// Long-lived registry of the exporter's own metrics.
    pub registry: Registry,
    pub metrics: ExporterMetrics,
    pub health_stats: Arc<HealthStats>,
    pub config: Arc<Config>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}
