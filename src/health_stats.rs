//! Scrape and cycle statistics for the `/health` endpoint.
//!
//! Tracks how collection cycles behave over the lifetime of the process:
//! domain counts, cycle durations, per-domain failures and scrape timeouts.
//! The numbers are rendered as a plain-text table.

use std::collections::VecDeque;
use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock as StdRwLock};
use std::time::{Duration, Instant, SystemTime};

use crate::aggregator::Scrape;
use crate::collectors::domain::DOMAINS_METRIC;
use crate::model::CycleEvent;

/// Running statistics for a single value.
#[derive(Clone, Copy, Default)]
pub struct RunningStat {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
}

impl RunningStat {
    pub fn add(&mut self, value: f64) {
        if self.count == 0 {
            *self = RunningStat {
                count: 1,
                sum: value,
                min: value,
                max: value,
                last: value,
            };
            return;
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / (self.count as f64)
        }
    }
}

/// Thread-safe wrapper for running statistics.
#[derive(Default)]
pub struct Stat {
    inner: Mutex<RunningStat>,
}

impl Stat {
    pub fn add_sample(&self, value: f64) {
        if let Ok(mut s) = self.inner.lock() {
            s.add(value);
        }
    }

    /// Returns `(last, avg, max, min, count)`.
    pub fn snapshot(&self) -> (f64, f64, f64, f64, u64) {
        match self.inner.lock() {
            Ok(s) => (s.last, s.avg(), s.max, s.min, s.count),
            Err(_) => (0.0, 0.0, 0.0, 0.0, 0),
        }
    }
}

/// Timestamps of recent HTTP requests, pruned to the last ten minutes.
pub struct RequestTimestamps {
    inner: Mutex<VecDeque<Instant>>,
}

impl Default for RequestTimestamps {
    fn default() -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(256)),
        }
    }
}

impl RequestTimestamps {
    const RETENTION: Duration = Duration::from_secs(600);

    pub fn record(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            let now = Instant::now();
            guard.push_back(now);
            while guard
                .front()
                .is_some_and(|&t| now.duration_since(t) > Self::RETENTION)
            {
                guard.pop_front();
            }
        }
    }

    pub fn count_last_minute(&self) -> u64 {
        match self.inner.lock() {
            Ok(guard) => guard
                .iter()
                .filter(|t| t.elapsed() <= Duration::from_secs(60))
                .count() as u64,
            Err(_) => 0,
        }
    }
}

/// Lifetime statistics of the exporter.
pub struct HealthStats {
    pub domains_per_cycle: Stat,
    pub cycle_duration_seconds: Stat,
    pub samples_per_scrape: Stat,

    pub total_cycles: AtomicU64,
    pub cycle_success_count: AtomicU64,
    pub cycle_failure_count: AtomicU64,
    pub scrape_timeouts: AtomicU64,

    pub fetch_failures: AtomicU64,
    pub release_failures: AtomicU64,

    pub http_request_timestamps: RequestTimestamps,
    pub metrics_endpoint_calls: AtomicU64,

    pub start_time: Instant,
    pub last_scrape_time: StdRwLock<Option<SystemTime>>,
    last_scrape_success: AtomicBool,
}

impl Default for HealthStats {
    fn default() -> Self {
        Self {
            domains_per_cycle: Stat::default(),
            cycle_duration_seconds: Stat::default(),
            samples_per_scrape: Stat::default(),
            total_cycles: AtomicU64::new(0),
            cycle_success_count: AtomicU64::new(0),
            cycle_failure_count: AtomicU64::new(0),
            scrape_timeouts: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            release_failures: AtomicU64::new(0),
            http_request_timestamps: RequestTimestamps::default(),
            metrics_endpoint_calls: AtomicU64::new(0),
            start_time: Instant::now(),
            last_scrape_time: StdRwLock::new(None),
            last_scrape_success: AtomicBool::new(false),
        }
    }
}

impl HealthStats {
    pub fn new() -> Self {
        Default::default()
    }

    /// Folds one finished scrape into the statistics.
    pub fn record_scrape(&self, scrape: &Scrape) {
        self.total_cycles.fetch_add(1, Ordering::Relaxed);
        self.cycle_duration_seconds
            .add_sample(scrape.duration.as_secs_f64());
        self.samples_per_scrape
            .add_sample(scrape.samples.len() as f64);

        if let Some(count) = scrape.value_of(DOMAINS_METRIC) {
            self.domains_per_cycle.add_sample(count);
        }

        for event in &scrape.events {
            match event {
                CycleEvent::FetchFailed { .. } => {
                    self.fetch_failures.fetch_add(1, Ordering::Relaxed);
                }
                CycleEvent::ReleaseFailed { .. } => {
                    self.release_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if scrape.timed_out {
            self.scrape_timeouts.fetch_add(1, Ordering::Relaxed);
        }

        let success = scrape.is_success();
        if success {
            self.cycle_success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cycle_failure_count.fetch_add(1, Ordering::Relaxed);
        }
        self.last_scrape_success.store(success, Ordering::Relaxed);

        if let Ok(mut guard) = self.last_scrape_time.write() {
            *guard = Some(SystemTime::now());
        }
    }

    pub fn record_http_request(&self) {
        self.http_request_timestamps.record();
    }

    pub fn record_metrics_endpoint_call(&self) {
        self.metrics_endpoint_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// True once a scrape has run and the most recent one succeeded.
    pub fn last_scrape_success(&self) -> bool {
        self.last_scrape_success.load(Ordering::Relaxed)
    }

    pub fn has_scraped(&self) -> bool {
        self.total_cycles.load(Ordering::Relaxed) > 0
    }

    pub fn get_cycle_success_rate(&self) -> f64 {
        let success = self.cycle_success_count.load(Ordering::Relaxed);
        let failure = self.cycle_failure_count.load(Ordering::Relaxed);
        let total = success + failure;
        if total == 0 {
            100.0
        } else {
            (success as f64 / total as f64) * 100.0
        }
    }

    pub fn get_uptime_hours(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64() / 3600.0
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Wall-clock time of the last scrape as `HH:MM:SS` UTC, or `N/A`.
    pub fn get_last_scrape_time_str(&self) -> String {
        const SECS_PER_DAY: u64 = 86400;
        const SECS_PER_HOUR: u64 = 3600;
        const SECS_PER_MINUTE: u64 = 60;

        let last = match self.last_scrape_time.read() {
            Ok(guard) => *guard,
            Err(_) => None,
        };

        match last.and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok()) {
            Some(since_epoch) => {
                let secs = since_epoch.as_secs();
                format!(
                    "{:02}:{:02}:{:02}",
                    (secs % SECS_PER_DAY) / SECS_PER_HOUR,
                    (secs % SECS_PER_HOUR) / SECS_PER_MINUTE,
                    secs % SECS_PER_MINUTE
                )
            }
            None => "N/A".to_string(),
        }
    }

    pub fn render_table(&self) -> String {
        let mut table = Table::default();

        table.title("HEALTH ENDPOINT - EXPORTER INTERNAL STATS");
        table.header();

        table.section("COLLECTION CYCLES");
        table.stat("domains", &self.domains_per_cycle, 0);
        table.stat("cycle_duration (s)", &self.cycle_duration_seconds, 3);
        table.stat("samples_per_scrape", &self.samples_per_scrape, 0);
        table.value(
            "cycle_success_rate (%)",
            format!("{:.1}", self.get_cycle_success_rate()),
        );

        table.section("ERROR TRACKING");
        table.counter("failed_cycles", &self.cycle_failure_count);
        table.counter("scrape_timeouts", &self.scrape_timeouts);
        table.counter("domain_fetch_errors", &self.fetch_failures);
        table.counter("handle_release_errors", &self.release_failures);

        table.section("HTTP SERVER");
        table.value(
            "http_requests_last_minute",
            self.http_request_timestamps.count_last_minute().to_string(),
        );
        table.counter("metrics_endpoint_calls", &self.metrics_endpoint_calls);

        let mut out = table.finish();
        writeln!(out).ok();
        writeln!(
            out,
            "number of done cycles: {} | last scrape: {} | last scrape ok: {} | uptime: {:.1}h",
            self.total_cycles.load(Ordering::Relaxed),
            self.get_last_scrape_time_str(),
            if self.last_scrape_success() { "yes" } else { "no" },
            self.get_uptime_hours()
        )
        .ok();

        out
    }
}

/// Fixed-width text table used by [`HealthStats::render_table`].
struct Table {
    out: String,
}

impl Default for Table {
    fn default() -> Self {
        Self {
            out: String::with_capacity(2048),
        }
    }
}

impl Table {
    const LEFT: usize = 26;
    const COL: usize = 12;

    fn title(&mut self, title: &str) {
        writeln!(self.out, "{}", title).ok();
        writeln!(self.out, "{}", "=".repeat(title.len())).ok();
        writeln!(self.out).ok();
    }

    fn header(&mut self) {
        self.row("", ["current", "average", "max", "min"].map(String::from));
    }

    fn section(&mut self, name: &str) {
        writeln!(self.out).ok();
        writeln!(self.out, "{}", name).ok();
        writeln!(self.out, "{}", "-".repeat(name.len())).ok();
    }

    fn stat(&mut self, label: &str, stat: &Stat, precision: usize) {
        let (cur, avg, max, min, _) = stat.snapshot();
        let avg_precision = precision.max(1);
        self.row(
            label,
            [
                format!("{:.*}", precision, cur),
                format!("{:.*}", avg_precision, avg),
                format!("{:.*}", precision, max),
                format!("{:.*}", precision, min),
            ],
        );
    }

    fn counter(&mut self, label: &str, counter: &AtomicU64) {
        self.value(label, counter.load(Ordering::Relaxed).to_string());
    }

    fn value(&mut self, label: &str, value: String) {
        self.row(label, [value, "N/A".into(), "N/A".into(), "N/A".into()]);
    }

    fn row(&mut self, label: &str, cols: [String; 4]) {
        writeln!(
            self.out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            label,
            cols[0],
            cols[1],
            cols[2],
            cols[3],
            left = Self::LEFT,
            col = Self::COL
        )
        .ok();
    }

    fn finish(self) -> String {
        self.out
    }
}
