//! Wiring of host client, collector and aggregator from the configuration.

use herakles_qemu_exporter::aggregator::MetricsAggregator;
use herakles_qemu_exporter::collectors::{Collector, CollectorOptions, DomainStatCollector};
use herakles_qemu_exporter::host::{self, FixtureHost, HostError, QmpHost};
use std::fmt;
use std::sync::Arc;

use crate::config::Config;

/// The host backend selected by the configuration.
pub enum Host {
    Qmp(Arc<QmpHost>),
    Fixture(Arc<FixtureHost>),
}

impl Host {
    /// Fixture when `test_data_file` is set, QMP otherwise.
    pub fn from_config(config: &Config) -> Self {
        match &config.test_data_file {
            Some(path) => Host::Fixture(Arc::new(FixtureHost::new(path.clone()))),
            // A single monitor handshake gets half the enumeration budget.
            None => Host::Qmp(Arc::new(
                QmpHost::new(config.qmp_socket_dir())
                    .with_connect_timeout(config.host_timeout() / 2),
            )),
        }
    }

    /// Runs one full session and returns the running domain names.
    pub async fn probe(&self) -> Result<Vec<String>, HostError> {
        match self {
            Host::Qmp(h) => host::probe(h.as_ref()).await,
            Host::Fixture(h) => host::probe(h.as_ref()).await,
        }
    }

    pub fn collector(&self, options: CollectorOptions) -> Arc<dyn Collector> {
        match self {
            Host::Qmp(h) => Arc::new(DomainStatCollector::new(Arc::clone(h), options)),
            Host::Fixture(h) => Arc::new(DomainStatCollector::new(Arc::clone(h), options)),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Qmp(h) => write!(f, "QMP sockets in {}", h.socket_dir().display()),
            Host::Fixture(h) => write!(f, "fixture file {}", h.path().display()),
        }
    }
}

/// Builds the host and the aggregator owning its collector.
pub fn build_aggregator(config: &Config) -> (Host, MetricsAggregator) {
    let host = Host::from_config(config);
    let collector = host.collector(config.collector_options());
    let aggregator = MetricsAggregator::new(vec![collector], config.scrape_timeout());
    (host, aggregator)
}
