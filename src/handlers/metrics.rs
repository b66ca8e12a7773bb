//! Metrics endpoint handler for Prometheus scraping.
//!
//! Every request runs one collection cycle through the aggregator and renders
//! its samples followed by the exporter's own metrics.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, error, instrument, warn};

use crate::state::SharedState;

/// Error type for metrics endpoint failures.
#[derive(Debug)]
pub enum MetricsError {
    EncodingFailed,
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> axum::response::Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response()
    }
}

/// Handler for the metrics path.
#[instrument(skip(state))]
pub async fn metrics_handler(State(state): State<SharedState>) -> Result<String, MetricsError> {
    debug!("Processing metrics request");
    state.health_stats.record_http_request();
    state.health_stats.record_metrics_endpoint_call();

    let scrape = state.aggregator.collect().await;

    if scrape.timed_out {
        warn!(
            "Scrape returned partial results after {:.3}s",
            scrape.duration.as_secs_f64()
        );
    }

    state.metrics.observe(&scrape);
    state.health_stats.record_scrape(&scrape);

    let body = state
        .exposition
        .render(&scrape.samples, state.registry.gather())
        .map_err(|e| {
            error!("Failed to encode metrics: {}", e);
            MetricsError::EncodingFailed
        })?;

    debug!(
        "Served {} samples ({} bytes) in {:.3}s",
        scrape.samples.len(),
        body.len(),
        scrape.duration.as_secs_f64()
    );
    Ok(body)
}
