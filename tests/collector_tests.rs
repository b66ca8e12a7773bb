//! Integration tests for the per-domain collection cycle.

mod common;

use common::{fetch_failures, sampled_domains, series, DomainSpec, FakeHost};
use herakles_qemu_exporter::collectors::domain::DOMAINS_METRIC;
use herakles_qemu_exporter::collectors::{
    CollectionError, CollectionStage, Collector, CollectorOptions, DomainStatCollector,
};
use herakles_qemu_exporter::model::{CycleEvent, Sample, SampleSink};
use std::sync::Arc;
use std::time::Duration;

fn collector(host: &Arc<FakeHost>, options: CollectorOptions) -> DomainStatCollector<FakeHost> {
    DomainStatCollector::new(Arc::clone(host), options)
}

async fn run_cycle(
    collector: &DomainStatCollector<FakeHost>,
) -> (Result<(), CollectionError>, Vec<Sample>, Vec<CycleEvent>) {
    let (sink, stream) = SampleSink::channel();
    let result = collector.collect(&sink).await;
    drop(sink);
    let (samples, events) = stream.collect_all().await;
    (result, samples, events)
}

#[tokio::test]
async fn test_domain_count_matches_enumeration() {
    let host = Arc::new(FakeHost::new(vec![
        DomainSpec::healthy("a", &["vda"]),
        DomainSpec::healthy("b", &["vda"]),
        DomainSpec::healthy("c", &["vda"]),
    ]));
    let collector = collector(&host, CollectorOptions::default());

    let (result, samples, events) = run_cycle(&collector).await;

    assert!(result.is_ok());
    assert!(events.is_empty());
    assert_eq!(series(&samples, DOMAINS_METRIC), vec![(vec![], 3.0)]);
    assert_eq!(sampled_domains(&samples), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_no_domains_yields_only_zero_count() {
    let host = Arc::new(FakeHost::new(Vec::new()));
    let collector = collector(&host, CollectorOptions::default());

    let (result, samples, _) = run_cycle(&collector).await;

    assert!(result.is_ok());
    assert_eq!(samples.len(), 1);
    assert_eq!(series(&samples, DOMAINS_METRIC), vec![(vec![], 0.0)]);
    assert_eq!(host.disconnects(), 1);
}

#[tokio::test]
async fn test_count_gauge_is_emitted_first() {
    let host = Arc::new(FakeHost::new(vec![
        DomainSpec::healthy("a", &["vda", "vdb"]),
        DomainSpec::healthy("b", &["vda"]),
    ]));
    let collector = collector(&host, CollectorOptions::default());

    let (_, samples, _) = run_cycle(&collector).await;

    assert_eq!(samples[0].descriptor().name(), DOMAINS_METRIC);
    assert!(samples[1..]
        .iter()
        .all(|s| s.descriptor().name() != DOMAINS_METRIC));
}

#[tokio::test]
async fn test_failing_domain_only_loses_its_own_samples() {
    let host = Arc::new(FakeHost::new(vec![
        DomainSpec::healthy("a", &["vda"]),
        DomainSpec::failing("b", "monitor not responding"),
        DomainSpec::healthy("c", &["vda"]),
    ]));
    let collector = collector(&host, CollectorOptions::default());

    let (result, samples, events) = run_cycle(&collector).await;

    assert!(result.is_ok());
    // count + 9 counters for a + 9 counters for c
    assert_eq!(samples.len(), 19);
    assert!(samples.iter().all(|s| !s.is_invalid()));
    assert_eq!(series(&samples, DOMAINS_METRIC), vec![(vec![], 3.0)]);
    assert_eq!(sampled_domains(&samples), vec!["a", "c"]);
    assert_eq!(fetch_failures(&events), vec!["b"]);

    for name in ["a", "b", "c"] {
        assert_eq!(host.fetch_count(name), 1, "fetches of {}", name);
        assert_eq!(host.release_count(name), 1, "releases of {}", name);
    }
    assert_eq!(host.open_handles(), 0);
    assert_eq!(host.disconnects(), 1);
}

#[tokio::test]
async fn test_block_values_are_exported_per_device() {
    let host = Arc::new(FakeHost::new(vec![DomainSpec::healthy(
        "web01",
        &["vda", "vdb"],
    )]));
    let collector = collector(&host, CollectorOptions::default());

    let (_, samples, _) = run_cycle(&collector).await;

    let read_bytes = series(&samples, "qemu_domains_block_read_bytes_total");
    assert_eq!(
        read_bytes,
        vec![
            (vec!["web01".to_string(), "vda".to_string()], 1024.0),
            (vec!["web01".to_string(), "vdb".to_string()], 1024.0),
        ]
    );

    let idle = series(&samples, "qemu_domains_block_idle_time_nanoseconds_total");
    assert_eq!(idle.len(), 2);
    assert!(idle.iter().all(|(_, v)| *v == 9000.0));
}

#[tokio::test]
async fn test_enumeration_failure_is_fatal() {
    let host = Arc::new(FakeHost::new(vec![DomainSpec::healthy("a", &["vda"])]));
    host.fail_enumeration("host unreachable");
    let collector = collector(&host, CollectorOptions::default());

    let (result, samples, events) = run_cycle(&collector).await;

    let err = result.unwrap_err();
    assert_eq!(err.stage, CollectionStage::Enumerate);
    assert_eq!(err.descriptor.name(), DOMAINS_METRIC);
    assert!(err.to_string().contains("host unreachable"));

    assert!(samples.is_empty());
    assert!(events.is_empty());
    assert_eq!(host.fetch_count("a"), 0);
    assert_eq!(host.disconnects(), 0);
}

#[tokio::test]
async fn test_release_failure_is_reported_not_fatal() {
    let host = Arc::new(FakeHost::new(vec![
        DomainSpec::healthy("a", &["vda"]).release_fails(),
        DomainSpec::healthy("b", &["vda"]),
    ]));
    let collector = collector(&host, CollectorOptions::default());

    let (result, samples, events) = run_cycle(&collector).await;

    assert!(result.is_ok());
    assert_eq!(sampled_domains(&samples), vec!["a", "b"]);
    assert_eq!(
        events,
        vec![CycleEvent::ReleaseFailed {
            domain: "a".to_string(),
            error: "session error: failed to free a".to_string(),
        }]
    );
    assert_eq!(host.release_count("a"), 1);
}

#[tokio::test]
async fn test_disconnect_failure_after_all_samples() {
    let host = Arc::new(FakeHost::new(vec![
        DomainSpec::healthy("a", &["vda"]),
        DomainSpec::healthy("b", &["vda"]),
    ]));
    host.fail_disconnect("connection reset");
    let collector = collector(&host, CollectorOptions::default());

    let (result, samples, _) = run_cycle(&collector).await;

    let err = result.unwrap_err();
    assert_eq!(err.stage, CollectionStage::Cleanup);
    assert_eq!(err.descriptor.name(), "qemu_domains_block_write_bytes_total");
    assert!(err.to_string().contains("connection reset"));

    assert_eq!(samples.len(), 19);
    assert_eq!(host.release_count("a"), 1);
    assert_eq!(host.release_count("b"), 1);
}

#[tokio::test]
async fn test_slow_fetch_is_bounded_by_host_timeout() {
    let host = Arc::new(FakeHost::new(vec![
        DomainSpec::healthy("fast", &["vda"]),
        DomainSpec::healthy("stuck", &["vda"]).slow(Duration::from_secs(5)),
    ]));
    let options = CollectorOptions {
        host_timeout: Duration::from_millis(50),
        max_concurrency: None,
    };
    let collector = collector(&host, options);

    let (result, samples, events) = tokio::time::timeout(Duration::from_secs(2), run_cycle(&collector))
        .await
        .expect("cycle should not wait for the stuck domain");

    assert!(result.is_ok());
    assert_eq!(sampled_domains(&samples), vec!["fast"]);
    assert_eq!(fetch_failures(&events), vec!["stuck"]);
    match &events[0] {
        CycleEvent::FetchFailed { error, .. } => assert!(error.contains("timed out"), "{}", error),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(host.release_count("stuck"), 1);
    assert_eq!(host.open_handles(), 0);
}

#[tokio::test]
async fn test_fetches_stop_when_consumer_is_gone() {
    let host = Arc::new(FakeHost::new(vec![
        DomainSpec::healthy("a", &["vda"]).slow(Duration::from_secs(5)),
        DomainSpec::healthy("b", &["vda"]).slow(Duration::from_secs(5)),
    ]));
    let options = CollectorOptions {
        host_timeout: Duration::from_secs(10),
        max_concurrency: None,
    };
    let collector = collector(&host, options);

    let (sink, stream) = SampleSink::channel();
    drop(stream);

    let result = tokio::time::timeout(Duration::from_secs(2), collector.collect(&sink))
        .await
        .expect("fetches should be cancelled");

    assert!(result.is_ok());
    assert_eq!(host.release_count("a"), 1);
    assert_eq!(host.release_count("b"), 1);
    assert_eq!(host.open_handles(), 0);
    assert_eq!(host.disconnects(), 1);
}

#[tokio::test]
async fn test_max_concurrency_limits_in_flight_fetches() {
    let domains: Vec<DomainSpec> = (0..6)
        .map(|i| {
            DomainSpec::healthy(&format!("vm{}", i), &["vda"]).slow(Duration::from_millis(30))
        })
        .collect();

    let limited = Arc::new(FakeHost::new(domains.clone()));
    let options = CollectorOptions {
        host_timeout: Duration::from_secs(5),
        max_concurrency: Some(2),
    };
    let (result, samples, _) = run_cycle(&collector(&limited, options)).await;
    assert!(result.is_ok());
    assert_eq!(sampled_domains(&samples).len(), 6);
    assert!(limited.max_in_flight_fetches() <= 2);

    let unlimited = Arc::new(FakeHost::new(domains));
    let (result, _, _) = run_cycle(&collector(&unlimited, CollectorOptions::default())).await;
    assert!(result.is_ok());
    assert_eq!(unlimited.max_in_flight_fetches(), 6);
}

#[tokio::test]
async fn test_repeated_cycles_are_independent() {
    let host = Arc::new(FakeHost::new(vec![
        DomainSpec::healthy("a", &["vda"]),
        DomainSpec::failing("b", "paused"),
    ]));
    let collector = collector(&host, CollectorOptions::default());

    let (_, first, first_events) = run_cycle(&collector).await;
    let (_, second, second_events) = run_cycle(&collector).await;

    assert_eq!(first.len(), second.len());
    assert_eq!(first_events, second_events);
    assert_eq!(
        series(&first, "qemu_domains_block_read_bytes_total"),
        series(&second, "qemu_domains_block_read_bytes_total")
    );

    host.set_domains(vec![DomainSpec::healthy("a", &["vda"])]);
    let (_, third, third_events) = run_cycle(&collector).await;
    assert_eq!(series(&third, DOMAINS_METRIC), vec![(vec![], 1.0)]);
    assert!(third_events.is_empty());

    assert_eq!(host.enumerations(), 3);
    assert_eq!(host.disconnects(), 3);
    assert_eq!(host.release_count("a"), 3);
}

#[tokio::test]
async fn test_describe_lists_every_descriptor() {
    let host = Arc::new(FakeHost::new(Vec::new()));
    let collector = collector(&host, CollectorOptions::default());

    let described = collector.describe();
    assert_eq!(described.len(), 10);
    assert_eq!(described[0].name(), DOMAINS_METRIC);
    assert_eq!(host.enumerations(), 0);
}
