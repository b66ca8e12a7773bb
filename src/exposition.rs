//! Prometheus text exposition of scrape samples.
//!
//! Every render builds a fresh [`Registry`] from the static descriptor set and
//! fills it from one scrape's samples, so overlapping scrapes never share
//! mutable metric state. Invalid samples are exposed as
//! `qemu_exporter_collect_error{metric="..."} 1`.

use prometheus::proto::MetricFamily;
use prometheus::{Counter, CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::model::{MetricDescriptor, MetricKind, MetricSample, Sample};

/// Gauge reporting descriptors whose collection failed during a scrape.
pub const COLLECT_ERROR_METRIC: &str = "qemu_exporter_collect_error";

/// Buffer capacity for metrics encoding.
const BUFFER_CAP: usize = 64 * 1024;

/// Error type for exposition failures.
#[derive(Debug, thiserror::Error)]
pub enum ExpositionError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("encoded metrics are not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Registered metric for one descriptor.
///
/// Unlabelled descriptors are registered as vectors without labels too, so a
/// metric that received no sample in a scrape is omitted rather than
/// exposed as zero.
enum Family {
    Gauge(GaugeVec),
    Counter(CounterVec),
}

impl Family {
    fn register(registry: &Registry, desc: &MetricDescriptor) -> Result<Self, prometheus::Error> {
        let opts = Opts::new(desc.name(), desc.help());
        let labels: Vec<&str> = desc.label_names().iter().map(String::as_str).collect();

        let family = match desc.kind() {
            MetricKind::Gauge => {
                let g = GaugeVec::new(opts, &labels)?;
                registry.register(Box::new(g.clone()))?;
                Family::Gauge(g)
            }
            MetricKind::Counter => {
                let c = CounterVec::new(opts, &labels)?;
                registry.register(Box::new(c.clone()))?;
                Family::Counter(c)
            }
        };
        Ok(family)
    }

    /// Records a sample; the last sample per label set wins.
    fn observe(&self, sample: &MetricSample) {
        let value = sample.value();
        let labels: Vec<&str> = sample.labels().iter().map(String::as_str).collect();

        match self {
            Family::Gauge(g) => g.with_label_values(&labels).set(value),
            Family::Counter(c) => set_counter(&c.with_label_values(&labels), value, sample),
        }
    }
}

fn set_counter(counter: &Counter, value: f64, sample: &MetricSample) {
    if !value.is_finite() || value < 0.0 {
        warn!(
            metric = sample.descriptor().name(),
            "Dropping invalid counter value {}", value
        );
        return;
    }
    counter.reset();
    counter.inc_by(value);
}

/// Converts scrape samples into Prometheus metric families.
pub struct PrometheusExposition {
    descriptors: Vec<Arc<MetricDescriptor>>,
}

impl PrometheusExposition {
    /// Takes the static descriptor set once, at registration time.
    pub fn new(descriptors: Vec<Arc<MetricDescriptor>>) -> Self {
        Self { descriptors }
    }

    pub fn descriptors(&self) -> &[Arc<MetricDescriptor>] {
        &self.descriptors
    }

    /// Builds the metric families of one scrape.
    pub fn gather(&self, samples: &[Sample]) -> Result<Vec<MetricFamily>, ExpositionError> {
        let registry = Registry::new();

        let mut families: HashMap<&str, Family> = HashMap::with_capacity(self.descriptors.len());
        for desc in &self.descriptors {
            families.insert(desc.name(), Family::register(&registry, desc)?);
        }

        let collect_errors = GaugeVec::new(
            Opts::new(
                COLLECT_ERROR_METRIC,
                "Set to 1 for every metric whose collection failed during this scrape",
            ),
            &["metric"],
        )?;
        registry.register(Box::new(collect_errors.clone()))?;

        for sample in samples {
            match sample {
                Sample::Valid(s) => match families.get(s.descriptor().name()) {
                    Some(family) => family.observe(s),
                    None => warn!(
                        metric = s.descriptor().name(),
                        "Dropping sample of undescribed metric"
                    ),
                },
                Sample::Invalid(invalid) => {
                    debug!(
                        metric = invalid.descriptor.name(),
                        "Exposing collection error: {}", invalid.error
                    );
                    collect_errors
                        .with_label_values(&[invalid.descriptor.name()])
                        .set(1.0);
                }
            }
        }

        Ok(registry.gather())
    }

    /// Renders one scrape plus `extra` families in the text format.
    pub fn render(
        &self,
        samples: &[Sample],
        extra: Vec<MetricFamily>,
    ) -> Result<String, ExpositionError> {
        let mut families = self.gather(samples)?;
        families.extend(extra);

        let mut buffer = Vec::with_capacity(BUFFER_CAP);
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
