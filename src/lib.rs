//! Herakles QEMU Exporter Library
//!
//! Collects block I/O statistics of the running QEMU domains of a host and
//! turns them into Prometheus metrics. The library is framework-agnostic: the
//! binary wires it into an axum server, but every piece can be driven directly.
//!
//! # Features
//!
//! - **Concurrent collection**: one task per domain, joined before the host
//!   session is closed
//! - **Failure isolation**: a failing domain only loses its own samples
//! - **Serialized cycles**: overlapping scrapes never overlap host access
//! - **Pluggable hosts**: QMP monitor sockets or a YAML/JSON fixture file
//!
//! # Usage
//!
//! ```no_run
//! use herakles_qemu_exporter::aggregator::MetricsAggregator;
//! use herakles_qemu_exporter::collectors::{CollectorOptions, DomainStatCollector};
//! use herakles_qemu_exporter::exposition::PrometheusExposition;
//! use herakles_qemu_exporter::host::QmpHost;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let host = Arc::new(QmpHost::new("/run/qemu"));
//! let collector = DomainStatCollector::new(host, CollectorOptions::default());
//! let aggregator = MetricsAggregator::new(vec![Arc::new(collector)], Duration::from_secs(10));
//!
//! let exposition = PrometheusExposition::new(aggregator.describe());
//! let scrape = aggregator.collect().await;
//! println!("{}", exposition.render(&scrape.samples, Vec::new())?);
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod collectors;
pub mod exposition;
pub mod health_stats;
pub mod host;
pub mod model;

// Re-export main types for convenience
pub use aggregator::{MetricsAggregator, Scrape};
pub use collectors::{CollectionError, Collector, CollectorOptions, DomainStatCollector};
pub use exposition::PrometheusExposition;
pub use host::{BlockDeviceStat, DomainHandle, FixtureHost, HostClient, HostError, QmpHost};
pub use model::{MetricDescriptor, MetricSample, Sample, SampleSink};
