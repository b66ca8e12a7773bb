//! Instrumented in-memory host shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use herakles_qemu_exporter::host::{BlockDeviceStat, DomainHandle, HostClient, HostError};
use herakles_qemu_exporter::model::{CycleEvent, Sample};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Behavior of one fake domain.
#[derive(Debug, Clone, Default)]
pub struct DomainSpec {
    pub name: String,
    pub devices: Vec<BlockDeviceStat>,
    pub fetch_error: Option<String>,
    pub fetch_delay: Option<Duration>,
    pub release_error: bool,
}

impl DomainSpec {
    /// A healthy domain with one device per name in `devices`.
    pub fn healthy(name: &str, devices: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            devices: devices.iter().map(|d| device(d, 1)).collect(),
            ..Self::default()
        }
    }

    pub fn failing(name: &str, error: &str) -> Self {
        Self {
            name: name.to_string(),
            fetch_error: Some(error.to_string()),
            ..Self::default()
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub fn release_fails(mut self) -> Self {
        self.release_error = true;
        self
    }
}

/// A device whose counters are all derived from `base`.
pub fn device(name: &str, base: u64) -> BlockDeviceStat {
    BlockDeviceStat {
        device: name.to_string(),
        read_bytes: base * 1024,
        write_bytes: base * 2048,
        read_operations: base * 10,
        write_operations: base * 20,
        flush_operations: base,
        read_total_time_ns: base * 1_000,
        write_total_time_ns: base * 2_000,
        flush_total_time_ns: base * 500,
        idle_time_ns: base * 9_000,
    }
}

pub struct FakeDomain {
    spec: DomainSpec,
}

impl DomainHandle for FakeDomain {
    fn name(&self) -> &str {
        &self.spec.name
    }
}

/// Host client that records every call made against it.
#[derive(Default)]
pub struct FakeHost {
    domains: Mutex<Vec<DomainSpec>>,
    enumerate_error: Mutex<Option<String>>,
    disconnect_error: Mutex<Option<String>>,
    enumerate_delay: Mutex<Option<Duration>>,

    open_handles: AtomicUsize,
    in_flight_fetches: AtomicUsize,
    max_in_flight_fetches: AtomicUsize,
    active_sessions: AtomicUsize,
    max_active_sessions: AtomicUsize,

    enumerations: AtomicUsize,
    disconnects: AtomicUsize,
    fetches: Mutex<HashMap<String, usize>>,
    releases: Mutex<HashMap<String, usize>>,
}

impl FakeHost {
    pub fn new(domains: Vec<DomainSpec>) -> Self {
        let host = Self::default();
        *host.domains.lock().unwrap() = domains;
        host
    }

    pub fn set_domains(&self, domains: Vec<DomainSpec>) {
        *self.domains.lock().unwrap() = domains;
    }

    pub fn fail_enumeration(&self, error: &str) {
        *self.enumerate_error.lock().unwrap() = Some(error.to_string());
    }

    pub fn fail_disconnect(&self, error: &str) {
        *self.disconnect_error.lock().unwrap() = Some(error.to_string());
    }

    pub fn set_enumerate_delay(&self, delay: Option<Duration>) {
        *self.enumerate_delay.lock().unwrap() = delay;
    }

    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    pub fn max_in_flight_fetches(&self) -> usize {
        self.max_in_flight_fetches.load(Ordering::SeqCst)
    }

    pub fn max_active_sessions(&self) -> usize {
        self.max_active_sessions.load(Ordering::SeqCst)
    }

    pub fn enumerations(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self, domain: &str) -> usize {
        self.fetches.lock().unwrap().get(domain).copied().unwrap_or(0)
    }

    pub fn release_count(&self, domain: &str) -> usize {
        self.releases.lock().unwrap().get(domain).copied().unwrap_or(0)
    }

    fn end_session(&self) {
        self.active_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl HostClient for FakeHost {
    type Domain = FakeDomain;

    async fn enumerate_domains(&self) -> Result<Vec<FakeDomain>, HostError> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        let active = self.active_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_sessions.fetch_max(active, Ordering::SeqCst);

        // Give overlapping callers a chance to interleave.
        let enumerate_delay = *self.enumerate_delay.lock().unwrap();
        match enumerate_delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }

        let enumerate_error = self.enumerate_error.lock().unwrap().clone();
        if let Some(error) = enumerate_error {
            self.end_session();
            return Err(HostError::Unavailable(error));
        }

        let specs = self.domains.lock().unwrap().clone();
        self.open_handles.fetch_add(specs.len(), Ordering::SeqCst);
        Ok(specs.into_iter().map(|spec| FakeDomain { spec }).collect())
    }

    async fn fetch_block_stats(
        &self,
        domain: &mut FakeDomain,
    ) -> Result<Vec<BlockDeviceStat>, HostError> {
        *self
            .fetches
            .lock()
            .unwrap()
            .entry(domain.spec.name.clone())
            .or_default() += 1;

        let in_flight = self.in_flight_fetches.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight_fetches
            .fetch_max(in_flight, Ordering::SeqCst);

        struct InFlight<'a>(&'a AtomicUsize);
        impl Drop for InFlight<'_> {
            fn drop(&mut self) {
                self.0.fetch_sub(1, Ordering::SeqCst);
            }
        }
        let _in_flight = InFlight(&self.in_flight_fetches);

        if let Some(delay) = domain.spec.fetch_delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        match &domain.spec.fetch_error {
            Some(error) => Err(HostError::Unavailable(error.clone())),
            None => Ok(domain.spec.devices.clone()),
        }
    }

    async fn release_handle(&self, domain: FakeDomain) -> Result<(), HostError> {
        *self
            .releases
            .lock()
            .unwrap()
            .entry(domain.spec.name.clone())
            .or_default() += 1;
        self.open_handles.fetch_sub(1, Ordering::SeqCst);

        if domain.spec.release_error {
            Err(HostError::Session(format!(
                "failed to free {}",
                domain.spec.name
            )))
        } else {
            Ok(())
        }
    }

    async fn disconnect_session(&self) -> Result<(), HostError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.end_session();

        let open = self.open_handles();
        if open > 0 {
            return Err(HostError::Session(format!(
                "{} handles still open at disconnect",
                open
            )));
        }

        let disconnect_error = self.disconnect_error.lock().unwrap().clone();
        match disconnect_error {
            Some(error) => Err(HostError::Session(error)),
            None => Ok(()),
        }
    }
}

/// Valid samples of `metric` as `(labels, value)` pairs, sorted by labels.
pub fn series(samples: &[Sample], metric: &str) -> Vec<(Vec<String>, f64)> {
    let mut out: Vec<(Vec<String>, f64)> = samples
        .iter()
        .filter_map(Sample::as_valid)
        .filter(|s| s.descriptor().name() == metric)
        .map(|s| (s.labels().to_vec(), s.value()))
        .collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

/// Domains that appear in the `domain` label of any valid sample.
pub fn sampled_domains(samples: &[Sample]) -> Vec<String> {
    let mut domains: Vec<String> = samples
        .iter()
        .filter_map(Sample::as_valid)
        .filter_map(|s| s.label("domain").map(str::to_string))
        .collect();
    domains.sort();
    domains.dedup();
    domains
}

pub fn fetch_failures(events: &[CycleEvent]) -> Vec<&str> {
    events
        .iter()
        .filter(|e| matches!(e, CycleEvent::FetchFailed { .. }))
        .map(CycleEvent::domain)
        .collect()
}
