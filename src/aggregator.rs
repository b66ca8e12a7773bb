//! Serialized composition of collectors.
//!
//! The aggregator owns an immutable list of collectors and runs them one
//! cycle at a time. Each cycle runs on its own task holding the cycle lock,
//! so a scrape that gives up waiting does not cut a cycle short: handles are
//! still released and the session still disconnected before the next cycle
//! may start. A cycle whose scrape was abandoned before it got the lock does
//! not touch the host at all.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, instrument, warn};

use crate::collectors::Collector;
use crate::model::{CycleEvent, Emission, InvalidMetric, MetricDescriptor, Sample, SampleSink};

/// Name of the descriptor tagging scrapes that returned before their cycle ended.
pub const SCRAPE_INCOMPLETE_METRIC: &str = "qemu_exporter_scrape_incomplete";

/// Result of one scrape.
#[derive(Debug, Default)]
pub struct Scrape {
    pub samples: Vec<Sample>,
    pub events: Vec<CycleEvent>,
    /// The scrape deadline passed before the cycle finished.
    pub timed_out: bool,
    pub duration: Duration,
}

impl Scrape {
    pub fn invalid_count(&self) -> usize {
        self.samples.iter().filter(|s| s.is_invalid()).count()
    }

    /// True when every collector finished without a fatal error.
    pub fn is_success(&self) -> bool {
        !self.timed_out && self.invalid_count() == 0
    }

    /// Value of the first valid, unlabelled sample of `metric`.
    pub fn value_of(&self, metric: &str) -> Option<f64> {
        self.samples
            .iter()
            .filter_map(Sample::as_valid)
            .find(|s| s.descriptor().name() == metric && s.labels().is_empty())
            .map(|s| s.value())
    }
}

/// Runs collectors strictly one cycle at a time.
pub struct MetricsAggregator {
    collectors: Arc<[Arc<dyn Collector>]>,
    cycle_lock: Arc<Mutex<()>>,
    scrape_timeout: Duration,
    incomplete: Arc<MetricDescriptor>,
}

impl MetricsAggregator {
    pub fn new(collectors: Vec<Arc<dyn Collector>>, scrape_timeout: Duration) -> Self {
        Self {
            collectors: collectors.into(),
            cycle_lock: Arc::new(Mutex::new(())),
            scrape_timeout,
            incomplete: MetricDescriptor::gauge(
                SCRAPE_INCOMPLETE_METRIC,
                "Set when a scrape returned before its collection cycle finished",
                &[],
            ),
        }
    }

    pub fn scrape_timeout(&self) -> Duration {
        self.scrape_timeout
    }

    /// Descriptors of every owned collector, followed by the aggregator's own.
    pub fn describe(&self) -> Vec<Arc<MetricDescriptor>> {
        let mut descriptors: Vec<Arc<MetricDescriptor>> = self
            .collectors
            .iter()
            .flat_map(|c| c.describe())
            .collect();
        descriptors.push(Arc::clone(&self.incomplete));
        descriptors
    }

    /// Runs one cycle over all collectors and returns what it produced.
    ///
    /// Never fails: collector errors and timeouts turn into invalid samples.
    #[instrument(skip(self))]
    pub async fn collect(&self) -> Scrape {
        let start = Instant::now();
        let (sink, mut stream) = SampleSink::channel();

        let collectors = Arc::clone(&self.collectors);
        let lock = Arc::clone(&self.cycle_lock);
        let cycle = tokio::spawn(async move {
            let wait = Instant::now();
            let _guard = lock.lock_owned().await;
            if sink.is_closed() {
                debug!(
                    "Scrape abandoned after {:.3}s waiting for the cycle lock, skipping cycle",
                    wait.elapsed().as_secs_f64()
                );
                return;
            }
            debug!(
                "Cycle lock acquired after {:.3}s",
                wait.elapsed().as_secs_f64()
            );
            run_collectors(&collectors, &sink).await;
        });

        let mut scrape = Scrape::default();
        let deadline = tokio::time::sleep(self.scrape_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                emission = stream.recv() => match emission {
                    Some(Emission::Sample(sample)) => scrape.samples.push(sample),
                    Some(Emission::Event(event)) => scrape.events.push(event),
                    None => break,
                },
                _ = &mut deadline => {
                    scrape.timed_out = true;
                    break;
                }
            }
        }

        if scrape.timed_out {
            warn!(
                "Collection did not finish within {:?}, returning {} partial samples",
                self.scrape_timeout,
                scrape.samples.len()
            );
            scrape.samples.push(Sample::Invalid(InvalidMetric {
                descriptor: Arc::clone(&self.incomplete),
                error: format!(
                    "collection did not finish within {:?}",
                    self.scrape_timeout
                ),
            }));
        } else if let Err(e) = cycle.await {
            error!("Collection cycle aborted: {}", e);
            scrape.samples.push(Sample::Invalid(InvalidMetric {
                descriptor: Arc::clone(&self.incomplete),
                error: format!("collection cycle aborted: {}", e),
            }));
        }

        scrape.duration = start.elapsed();
        debug!(
            "Scrape finished in {:.3}s with {} samples, {} events",
            scrape.duration.as_secs_f64(),
            scrape.samples.len(),
            scrape.events.len()
        );
        scrape
    }
}

async fn run_collectors(collectors: &[Arc<dyn Collector>], sink: &SampleSink) {
    for collector in collectors {
        if let Err(err) = collector.collect(sink).await {
            error!(
                collector = collector.name(),
                "Failed collecting metric {}: {}",
                err.descriptor.name(),
                err
            );
            sink.emit(Sample::Invalid(err.to_invalid_metric()));
        } else {
            debug!(collector = collector.name(), "Collection cycle completed");
        }
    }
}
