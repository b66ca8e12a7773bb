//! Per-domain block I/O collector.
//!
//! One cycle enumerates the running domains, emits the domain count, then
//! spawns one task per domain that fetches its block statistics and releases
//! the handle. The tasks are joined before the host session is disconnected.
//! A failing domain only costs its own samples.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, instrument, warn};

use super::{CollectionError, CollectionStage, Collector};
use crate::host::{BlockDeviceStat, DomainHandle, HostClient, HostError};
use crate::model::{CycleEvent, MetricDescriptor, MetricSample, SampleError, SampleSink};

/// Metric namespace shared by all exported metrics.
pub const NAMESPACE: &str = "qemu";

const SUBSYSTEM: &str = "domains";

/// Fully qualified name of the domain count gauge.
pub const DOMAINS_METRIC: &str = "qemu_domains";

/// Label names of every block device metric, in order.
pub const BLOCK_LABELS: [&str; 2] = ["domain", "device"];

/// Joins non-empty name parts with underscores.
pub fn fq_name(namespace: &str, subsystem: &str, name: &str) -> String {
    [namespace, subsystem, name]
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("_")
}

/// Descriptors of the domain collector.
pub struct DomainDescriptors {
    pub domains: Arc<MetricDescriptor>,

    pub block_read_bytes: Arc<MetricDescriptor>,
    pub block_write_bytes: Arc<MetricDescriptor>,

    pub block_read_operations: Arc<MetricDescriptor>,
    pub block_write_operations: Arc<MetricDescriptor>,
    pub block_flush_operations: Arc<MetricDescriptor>,

    pub block_read_time_ns: Arc<MetricDescriptor>,
    pub block_write_time_ns: Arc<MetricDescriptor>,
    pub block_flush_time_ns: Arc<MetricDescriptor>,
    pub block_idle_time_ns: Arc<MetricDescriptor>,
}

impl DomainDescriptors {
    pub fn new() -> Self {
        let block = |name: &str, help: &str| {
            MetricDescriptor::counter(fq_name(NAMESPACE, SUBSYSTEM, name), help, &BLOCK_LABELS)
        };

        Self {
            // Subsystem is used as name so we get "qemu_domains"
            domains: MetricDescriptor::gauge(
                fq_name(NAMESPACE, "", SUBSYSTEM),
                "Total number of domains",
                &[],
            ),
            block_read_bytes: block(
                "block_read_bytes_total",
                "Number of bytes read from block device",
            ),
            block_write_bytes: block(
                "block_write_bytes_total",
                "Number of bytes written to block device",
            ),
            block_read_operations: block(
                "block_read_operations_total",
                "Number of read operations from block device",
            ),
            block_write_operations: block(
                "block_write_operations_total",
                "Number of write operations to block device",
            ),
            block_flush_operations: block(
                "block_flush_operations_total",
                "Number of flush operations to block device",
            ),
            block_read_time_ns: block(
                "block_read_time_nanoseconds_total",
                "Time in nanoseconds spent reading from block device",
            ),
            block_write_time_ns: block(
                "block_write_time_nanoseconds_total",
                "Time in nanoseconds spent writing to block device",
            ),
            block_flush_time_ns: block(
                "block_flush_time_nanoseconds_total",
                "Time in nanoseconds spent flushing to block device",
            ),
            block_idle_time_ns: block(
                "block_idle_time_nanoseconds_total",
                "Time in nanoseconds the block device has spent idle",
            ),
        }
    }

    /// All descriptors, domain count first.
    pub fn all(&self) -> Vec<Arc<MetricDescriptor>> {
        vec![
            Arc::clone(&self.domains),
            Arc::clone(&self.block_read_bytes),
            Arc::clone(&self.block_write_bytes),
            Arc::clone(&self.block_read_operations),
            Arc::clone(&self.block_write_operations),
            Arc::clone(&self.block_flush_operations),
            Arc::clone(&self.block_read_time_ns),
            Arc::clone(&self.block_write_time_ns),
            Arc::clone(&self.block_flush_time_ns),
            Arc::clone(&self.block_idle_time_ns),
        ]
    }

    pub fn domain_count(&self, count: usize) -> Result<MetricSample, SampleError> {
        MetricSample::new(&self.domains, count as f64, Vec::new())
    }

    /// The nine counter samples of one (domain, device) pair.
    pub fn block_samples(
        &self,
        domain: &str,
        stat: &BlockDeviceStat,
    ) -> Result<Vec<MetricSample>, SampleError> {
        let values = [
            (&self.block_read_bytes, stat.read_bytes),
            (&self.block_write_bytes, stat.write_bytes),
            (&self.block_read_operations, stat.read_operations),
            (&self.block_write_operations, stat.write_operations),
            (&self.block_flush_operations, stat.flush_operations),
            (&self.block_read_time_ns, stat.read_total_time_ns),
            (&self.block_write_time_ns, stat.write_total_time_ns),
            (&self.block_flush_time_ns, stat.flush_total_time_ns),
            (&self.block_idle_time_ns, stat.idle_time_ns),
        ];

        values
            .into_iter()
            .map(|(desc, value)| {
                MetricSample::new(
                    desc,
                    value as f64,
                    vec![domain.to_string(), stat.device.clone()],
                )
            })
            .collect()
    }
}

impl Default for DomainDescriptors {
    fn default() -> Self {
        Self::new()
    }
}

/// Tuning knobs of the domain collector.
#[derive(Debug, Clone)]
pub struct CollectorOptions {
    /// Upper bound for every single host call.
    pub host_timeout: Duration,
    /// Maximum number of concurrent stat fetches (`None` = one per domain).
    pub max_concurrency: Option<usize>,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            host_timeout: Duration::from_secs(5),
            max_concurrency: None,
        }
    }
}

/// Collector of per-domain block device statistics.
pub struct DomainStatCollector<H: HostClient> {
    host: Arc<H>,
    descriptors: Arc<DomainDescriptors>,
    options: CollectorOptions,
    permits: Option<Arc<Semaphore>>,
}

impl<H: HostClient> DomainStatCollector<H> {
    pub fn new(host: Arc<H>, options: CollectorOptions) -> Self {
        let permits = options
            .max_concurrency
            .filter(|n| *n > 0)
            .map(|n| Arc::new(Semaphore::new(n)));

        Self {
            host,
            descriptors: Arc::new(DomainDescriptors::new()),
            options,
            permits,
        }
    }

    pub fn descriptors(&self) -> &DomainDescriptors {
        &self.descriptors
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }
}

#[async_trait]
impl<H: HostClient> Collector for DomainStatCollector<H> {
    fn name(&self) -> &'static str {
        "domain"
    }

    fn describe(&self) -> Vec<Arc<MetricDescriptor>> {
        self.descriptors.all()
    }

    #[instrument(skip(self, sink), name = "domain_cycle")]
    async fn collect(&self, sink: &SampleSink) -> Result<(), CollectionError> {
        let start = Instant::now();
        let timeout = self.options.host_timeout;

        let domains = bounded(timeout, "domain enumeration", self.host.enumerate_domains())
            .await
            .map_err(|e| {
                CollectionError::new(CollectionStage::Enumerate, &self.descriptors.domains, e)
            })?;

        let domain_count = domains.len();
        debug!("Enumerated {} domains", domain_count);

        match self.descriptors.domain_count(domain_count) {
            Ok(sample) => {
                sink.emit(sample);
            }
            Err(e) => error!("Failed to build domain count sample: {}", e),
        }

        let mut tasks = JoinSet::new();
        for domain in domains {
            tasks.spawn(collect_domain(
                Arc::clone(&self.host),
                Arc::clone(&self.descriptors),
                domain,
                sink.clone(),
                self.permits.clone(),
                timeout,
            ));
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Domain task terminated abnormally: {}", e);
            }
        }

        bounded(timeout, "session disconnect", self.host.disconnect_session())
            .await
            .map_err(|e| {
                error!("Failed to disconnect host session: {}", e);
                CollectionError::new(
                    CollectionStage::Cleanup,
                    &self.descriptors.block_write_bytes,
                    e,
                )
            })?;

        debug!(
            "Collected {} domains in {:.3}s",
            domain_count,
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }
}

/// Fetches one domain's stats, emits its samples and releases the handle.
async fn collect_domain<H: HostClient>(
    host: Arc<H>,
    descriptors: Arc<DomainDescriptors>,
    mut domain: H::Domain,
    sink: SampleSink,
    permits: Option<Arc<Semaphore>>,
    timeout: Duration,
) {
    let name = domain.name().to_string();

    let fetch = async {
        let _permit = match permits {
            Some(p) => p.acquire_owned().await.ok(),
            None => None,
        };
        bounded(timeout, "block stats fetch", host.fetch_block_stats(&mut domain)).await
    };

    // The fetch is dropped once nobody reads the samples; release still runs.
    let fetched = tokio::select! {
        fetched = fetch => Some(fetched),
        _ = sink.closed() => None,
    };

    match fetched {
        Some(Ok(stats)) => emit_block_stats(&descriptors, &name, &stats, &sink),
        Some(Err(e)) => {
            warn!(domain = %name, "Failed to fetch block stats: {}", e);
            sink.report(CycleEvent::FetchFailed {
                domain: name.clone(),
                error: e.to_string(),
            });
        }
        None => debug!(domain = %name, "Sample consumer gone, fetch cancelled"),
    }

    if let Err(e) = bounded(timeout, "handle release", host.release_handle(domain)).await {
        warn!(domain = %name, "Failed to release domain handle: {}", e);
        sink.report(CycleEvent::ReleaseFailed {
            domain: name,
            error: e.to_string(),
        });
    }
}

fn emit_block_stats(
    descriptors: &DomainDescriptors,
    domain: &str,
    stats: &[BlockDeviceStat],
    sink: &SampleSink,
) {
    for stat in stats {
        match descriptors.block_samples(domain, stat) {
            Ok(samples) => {
                for sample in samples {
                    if !sink.emit(sample) {
                        debug!(domain, "Sample consumer gone, dropping remaining samples");
                        return;
                    }
                }
            }
            Err(e) => error!(domain, device = %stat.device, "Failed to build block samples: {}", e),
        }
    }
}

/// Bounds a host call by `timeout`.
async fn bounded<T, F>(timeout: Duration, operation: &'static str, call: F) -> Result<T, HostError>
where
    F: Future<Output = Result<T, HostError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(HostError::Timeout { operation, timeout }),
    }
}
