//! Self-monitoring metrics of herakles-qemu-exporter.
//!
//! These live in a long-lived registry next to the per-scrape domain metrics
//! and are appended to every metrics response.

use herakles_qemu_exporter::aggregator::Scrape;
use herakles_qemu_exporter::model::CycleEvent;
use prometheus::{Counter, Gauge, Registry};

/// Exporter metrics updated after every scrape.
#[derive(Clone)]
pub struct ExporterMetrics {
    pub scrape_duration_seconds: Gauge,
    pub last_scrape_success: Gauge,
    pub scrape_timeouts_total: Counter,
    pub domain_fetch_errors_total: Counter,
    pub handle_release_errors_total: Counter,
}

impl ExporterMetrics {
    pub fn new(registry: &Registry) -> Result<Self, Box<dyn std::error::Error>> {
        let scrape_duration_seconds = Gauge::new(
            "qemu_exporter_scrape_duration_seconds",
            "Time spent collecting domain statistics for the last scrape",
        )?;
        let last_scrape_success = Gauge::new(
            "qemu_exporter_last_scrape_success",
            "Whether the last scrape completed without collection errors (1) or not (0)",
        )?;
        let scrape_timeouts_total = Counter::new(
            "qemu_exporter_scrape_timeouts_total",
            "Scrapes that returned before their collection cycle finished",
        )?;
        let domain_fetch_errors_total = Counter::new(
            "qemu_exporter_domain_fetch_errors_total",
            "Domains whose block statistics could not be fetched",
        )?;
        let handle_release_errors_total = Counter::new(
            "qemu_exporter_handle_release_errors_total",
            "Domain handles whose release failed",
        )?;

        registry.register(Box::new(scrape_duration_seconds.clone()))?;
        registry.register(Box::new(last_scrape_success.clone()))?;
        registry.register(Box::new(scrape_timeouts_total.clone()))?;
        registry.register(Box::new(domain_fetch_errors_total.clone()))?;
        registry.register(Box::new(handle_release_errors_total.clone()))?;

        Ok(Self {
            scrape_duration_seconds,
            last_scrape_success,
            scrape_timeouts_total,
            domain_fetch_errors_total,
            handle_release_errors_total,
        })
    }

    pub fn observe(&self, scrape: &Scrape) {
        self.scrape_duration_seconds
            .set(scrape.duration.as_secs_f64());
        self.last_scrape_success
            .set(if scrape.is_success() { 1.0 } else { 0.0 });

        if scrape.timed_out {
            self.scrape_timeouts_total.inc();
        }

        for event in &scrape.events {
            match event {
                CycleEvent::FetchFailed { .. } => self.domain_fetch_errors_total.inc(),
                CycleEvent::ReleaseFailed { .. } => self.handle_release_errors_total.inc(),
            }
        }
    }
}
