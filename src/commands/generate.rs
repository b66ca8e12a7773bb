//! Generate testdata command implementation.
//!
//! Writes a synthetic fixture file that `--test-data-file` can serve.

use chrono::Utc;
use herakles_qemu_exporter::host::fixture::{Fixture, FixtureDomain};
use herakles_qemu_exporter::host::BlockDeviceStat;
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

// Constants for byte conversions
const GB: u64 = 1024 * 1024 * 1024;

// Ranges of generated counters
const MAX_BLOCK_IO_BYTES: u64 = 500 * GB;
const MAX_BLOCK_IO_OPS: u64 = 50_000_000;
const MAX_FLUSH_OPS: u64 = 1_000_000;
/// Upper bound of any accumulated time counter: 30 days in nanoseconds.
const MAX_TIME_NS: u64 = 30 * 24 * 3600 * 1_000_000_000;

const FIXTURE_VERSION: &str = "1.0";

const DOMAIN_PREFIXES: [&str; 6] = ["web", "db", "cache", "build", "mail", "proxy"];

/// Generates a random fixture with `domains` domains of `devices_per_domain` devices.
///
/// The last `failing` domains carry a `fetch_error` instead of devices.
pub fn command_generate_testdata(
    output: PathBuf,
    domains: usize,
    devices_per_domain: usize,
    failing: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    if failing > domains {
        return Err(format!(
            "--failing ({}) cannot exceed --domains ({})",
            failing, domains
        )
        .into());
    }

    debug!(
        "Generating fixture: domains={}, devices_per_domain={}, failing={}, output={}",
        domains,
        devices_per_domain,
        failing,
        output.display()
    );

    let fixture = generate_fixture(&mut rand::thread_rng(), domains, devices_per_domain, failing);
    let content = render_fixture(&output, &fixture)?;
    fs::write(&output, content)?;

    println!(
        "✅ Generated test data: {} domains ({} failing) in {}",
        fixture.domains.len(),
        failing,
        output.display()
    );

    Ok(())
}

/// Builds a fixture from random counters.
pub fn generate_fixture(
    rng: &mut impl Rng,
    domains: usize,
    devices_per_domain: usize,
    failing: usize,
) -> Fixture {
    let healthy = domains.saturating_sub(failing);

    let domains = (0..domains)
        .map(|i| {
            let prefix = DOMAIN_PREFIXES[i % DOMAIN_PREFIXES.len()];
            let name = format!("{}{:02}", prefix, i + 1);

            if i >= healthy {
                FixtureDomain {
                    name,
                    devices: Vec::new(),
                    fetch_error: Some("monitor socket not responding".to_string()),
                }
            } else {
                FixtureDomain {
                    name,
                    devices: (0..devices_per_domain)
                        .map(|d| generate_random_device(rng, device_name(d)))
                        .collect(),
                    fetch_error: None,
                }
            }
        })
        .collect();

    Fixture {
        version: FIXTURE_VERSION.to_string(),
        generated_at: Some(Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()),
        domains,
    }
}

/// virtio disk names: vda, vdb, ..., vdz, vdaa, ...
fn device_name(index: usize) -> String {
    let mut suffix = String::new();
    let mut n = index;
    loop {
        suffix.insert(0, (b'a' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    format!("vd{}", suffix)
}

fn generate_random_device(rng: &mut impl Rng, device: String) -> BlockDeviceStat {
    let read_operations = rng.gen_range(0..MAX_BLOCK_IO_OPS);
    let write_operations = rng.gen_range(0..MAX_BLOCK_IO_OPS);

    BlockDeviceStat {
        device,
        read_bytes: rng.gen_range(0..MAX_BLOCK_IO_BYTES),
        write_bytes: rng.gen_range(0..MAX_BLOCK_IO_BYTES),
        read_operations,
        write_operations,
        flush_operations: rng.gen_range(0..MAX_FLUSH_OPS),
        read_total_time_ns: rng.gen_range(0..MAX_TIME_NS),
        write_total_time_ns: rng.gen_range(0..MAX_TIME_NS),
        flush_total_time_ns: rng.gen_range(0..MAX_TIME_NS),
        idle_time_ns: rng.gen_range(0..MAX_TIME_NS),
    }
}

fn render_fixture(path: &Path, fixture: &Fixture) -> Result<String, Box<dyn std::error::Error>> {
    let content = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::to_string_pretty(fixture)?,
        _ => serde_yaml::to_string(fixture)?,
    };
    Ok(content)
}
