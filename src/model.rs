//! Metric descriptors, samples and the sink collectors emit into.
//!
//! Descriptors are built once when a collector is constructed and shared via
//! `Arc` for the lifetime of the process. Samples are produced fresh on every
//! collection cycle and travel through a [`SampleSink`], which many tasks may
//! write to concurrently while a single consumer drains the matching
//! [`SampleStream`].

use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Kind of an exposed metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::Counter => write!(f, "counter"),
        }
    }
}

/// Static identity of an exposed metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDescriptor {
    name: String,
    help: String,
    label_names: Vec<String>,
    kind: MetricKind,
}

impl MetricDescriptor {
    pub fn new(
        name: impl Into<String>,
        help: impl Into<String>,
        label_names: &[&str],
        kind: MetricKind,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            help: help.into(),
            label_names: label_names.iter().map(|l| l.to_string()).collect(),
            kind,
        })
    }

    pub fn gauge(name: impl Into<String>, help: impl Into<String>, label_names: &[&str]) -> Arc<Self> {
        Self::new(name, help, label_names, MetricKind::Gauge)
    }

    pub fn counter(
        name: impl Into<String>,
        help: impl Into<String>,
        label_names: &[&str],
    ) -> Arc<Self> {
        Self::new(name, help, label_names, MetricKind::Counter)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }
}

impl fmt::Display for MetricDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, labels: [{}])",
            self.name,
            self.kind,
            self.label_names.join(", ")
        )
    }
}

/// Errors raised while building a sample.
#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("metric {metric} expects {expected} label values, got {got}")]
    LabelArity {
        metric: String,
        expected: usize,
        got: usize,
    },
}

/// One concrete observation of a descriptor for a single cycle.
#[derive(Debug, Clone)]
pub struct MetricSample {
    descriptor: Arc<MetricDescriptor>,
    value: f64,
    labels: Vec<String>,
}

impl MetricSample {
    /// Builds a sample, rejecting label tuples that do not match the descriptor.
    pub fn new(
        descriptor: &Arc<MetricDescriptor>,
        value: f64,
        labels: Vec<String>,
    ) -> Result<Self, SampleError> {
        if labels.len() != descriptor.label_names.len() {
            return Err(SampleError::LabelArity {
                metric: descriptor.name.clone(),
                expected: descriptor.label_names.len(),
                got: labels.len(),
            });
        }

        Ok(Self {
            descriptor: Arc::clone(descriptor),
            value,
            labels,
        })
    }

    pub fn descriptor(&self) -> &Arc<MetricDescriptor> {
        &self.descriptor
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Looks up a label value by label name.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.descriptor
            .label_names
            .iter()
            .position(|l| l == name)
            .map(|idx| self.labels[idx].as_str())
    }
}

/// Marker delivered in place of data when collecting a descriptor failed.
#[derive(Debug, Clone)]
pub struct InvalidMetric {
    pub descriptor: Arc<MetricDescriptor>,
    pub error: String,
}

/// Anything a collector can put on the sample stream.
#[derive(Debug, Clone)]
pub enum Sample {
    Valid(MetricSample),
    Invalid(InvalidMetric),
}

impl Sample {
    pub fn descriptor(&self) -> &Arc<MetricDescriptor> {
        match self {
            Sample::Valid(s) => s.descriptor(),
            Sample::Invalid(i) => &i.descriptor,
        }
    }

    pub fn as_valid(&self) -> Option<&MetricSample> {
        match self {
            Sample::Valid(s) => Some(s),
            Sample::Invalid(_) => None,
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Sample::Invalid(_))
    }
}

impl From<MetricSample> for Sample {
    fn from(sample: MetricSample) -> Self {
        Sample::Valid(sample)
    }
}

/// Non-fatal, per-domain problems observed during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleEvent {
    FetchFailed { domain: String, error: String },
    ReleaseFailed { domain: String, error: String },
}

impl CycleEvent {
    pub fn domain(&self) -> &str {
        match self {
            CycleEvent::FetchFailed { domain, .. } | CycleEvent::ReleaseFailed { domain, .. } => {
                domain
            }
        }
    }
}

/// A single item received from a [`SampleStream`].
#[derive(Debug, Clone)]
pub enum Emission {
    Sample(Sample),
    Event(CycleEvent),
}

/// Producer side of the sample stream. Cheap to clone, one clone per task.
#[derive(Debug, Clone)]
pub struct SampleSink {
    tx: mpsc::UnboundedSender<Emission>,
}

impl SampleSink {
    /// Creates a connected sink/stream pair.
    pub fn channel() -> (SampleSink, SampleStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SampleSink { tx }, SampleStream { rx })
    }

    /// Sends a sample. Returns `false` once the consumer has gone away.
    pub fn emit(&self, sample: impl Into<Sample>) -> bool {
        self.tx.send(Emission::Sample(sample.into())).is_ok()
    }

    /// Reports a non-fatal cycle event.
    pub fn report(&self, event: CycleEvent) -> bool {
        self.tx.send(Emission::Event(event)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the consumer has gone away.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Consumer side of the sample stream.
#[derive(Debug)]
pub struct SampleStream {
    rx: mpsc::UnboundedReceiver<Emission>,
}

impl SampleStream {
    /// Receives the next emission, or `None` once every sink clone is dropped.
    pub async fn recv(&mut self) -> Option<Emission> {
        self.rx.recv().await
    }

    /// Drains the stream until all producers are gone.
    pub async fn collect_all(mut self) -> (Vec<Sample>, Vec<CycleEvent>) {
        let mut samples = Vec::new();
        let mut events = Vec::new();
        while let Some(emission) = self.rx.recv().await {
            match emission {
                Emission::Sample(s) => samples.push(s),
                Emission::Event(e) => events.push(e),
            }
        }
        (samples, events)
    }
}
