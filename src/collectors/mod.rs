//! Collectors turning host state into metric samples.
//!
//! A collector owns its descriptors and emits samples into a [`SampleSink`].
//! Collectors are composed once into the
//! [`MetricsAggregator`](crate::aggregator::MetricsAggregator).

pub mod domain;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::host::HostError;
use crate::model::{InvalidMetric, MetricDescriptor, SampleSink};

pub use domain::{CollectorOptions, DomainDescriptors, DomainStatCollector};

/// Describe/collect capability of a metrics source.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Descriptors of every metric this collector may emit.
    fn describe(&self) -> Vec<Arc<MetricDescriptor>>;

    /// Runs one collection cycle, sending samples into `sink`.
    async fn collect(&self, sink: &SampleSink) -> Result<(), CollectionError>;
}

/// Stage of a cycle that failed fatally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionStage {
    Enumerate,
    Cleanup,
}

impl fmt::Display for CollectionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionStage::Enumerate => write!(f, "domain enumeration"),
            CollectionStage::Cleanup => write!(f, "session cleanup"),
        }
    }
}

/// Fatal cycle error, tagged with the descriptor it invalidates.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {source}")]
pub struct CollectionError {
    pub stage: CollectionStage,
    pub descriptor: Arc<MetricDescriptor>,
    #[source]
    pub source: HostError,
}

impl CollectionError {
    pub fn new(stage: CollectionStage, descriptor: &Arc<MetricDescriptor>, source: HostError) -> Self {
        Self {
            stage,
            descriptor: Arc::clone(descriptor),
            source,
        }
    }

    /// Converts the error into the marker delivered on the sample stream.
    pub fn to_invalid_metric(&self) -> InvalidMetric {
        InvalidMetric {
            descriptor: Arc::clone(&self.descriptor),
            error: self.to_string(),
        }
    }
}
