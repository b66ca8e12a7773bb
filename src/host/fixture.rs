//! Fixture-backed host client.
//!
//! Reads domains and their block devices from a YAML or JSON file instead of
//! talking to QEMU. The file is re-read on every enumeration, so edits show up
//! on the next scrape. A domain may carry `fetch_error` to simulate a domain
//! whose statistics cannot be fetched.
//!
//! ```yaml
//! version: "1.0"
//! domains:
//!   - name: web01
//!     devices:
//!       - device: vda
//!         read_bytes: 1048576
//!         write_bytes: 524288
//!   - name: broken
//!     fetch_error: "monitor not responding"
//! ```

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::{BlockDeviceStat, DomainHandle, HostClient, HostError};

/// Root structure of a fixture file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub generated_at: Option<String>,
    #[serde(default)]
    pub domains: Vec<FixtureDomain>,
}

/// One domain entry of a fixture file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureDomain {
    pub name: String,
    #[serde(default)]
    pub devices: Vec<BlockDeviceStat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<String>,
}

/// Parses fixture content; JSON when the path ends in `.json`, YAML otherwise.
pub fn parse_fixture(path: &Path, content: &str) -> anyhow::Result<Fixture> {
    let fixture = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(content)
            .with_context(|| format!("Failed to parse fixture JSON {}", path.display()))?,
        _ => serde_yaml::from_str(content)
            .with_context(|| format!("Failed to parse fixture YAML {}", path.display()))?,
    };
    Ok(fixture)
}

/// Loads a fixture file from disk.
pub fn load_fixture(path: &Path) -> anyhow::Result<Fixture> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read fixture file {}", path.display()))?;
    let fixture = parse_fixture(path, &content)?;
    info!(
        "Loaded fixture version {} with {} domains from {}",
        fixture.version,
        fixture.domains.len(),
        path.display()
    );
    Ok(fixture)
}

/// Host client serving domains from a fixture file.
pub struct FixtureHost {
    path: PathBuf,
    open_handles: Arc<AtomicUsize>,
}

impl FixtureHost {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            open_handles: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::Acquire)
    }
}

/// Handle to one fixture domain.
pub struct FixtureDomainHandle {
    domain: FixtureDomain,
    open_handles: Arc<AtomicUsize>,
}

impl DomainHandle for FixtureDomainHandle {
    fn name(&self) -> &str {
        &self.domain.name
    }
}

impl Drop for FixtureDomainHandle {
    fn drop(&mut self) {
        self.open_handles.fetch_sub(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl HostClient for FixtureHost {
    type Domain = FixtureDomainHandle;

    async fn enumerate_domains(&self) -> Result<Vec<FixtureDomainHandle>, HostError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| HostError::io(self.path.display(), e))?;
        let fixture =
            parse_fixture(&self.path, &content).map_err(|e| HostError::Fixture(format!("{:#}", e)))?;

        debug!(
            "Fixture {} lists {} domains",
            self.path.display(),
            fixture.domains.len()
        );

        Ok(fixture
            .domains
            .into_iter()
            .map(|domain| {
                self.open_handles.fetch_add(1, Ordering::AcqRel);
                FixtureDomainHandle {
                    domain,
                    open_handles: Arc::clone(&self.open_handles),
                }
            })
            .collect())
    }

    async fn fetch_block_stats(
        &self,
        domain: &mut FixtureDomainHandle,
    ) -> Result<Vec<BlockDeviceStat>, HostError> {
        match &domain.domain.fetch_error {
            Some(error) => Err(HostError::Unavailable(format!(
                "{}: {}",
                domain.domain.name, error
            ))),
            None => Ok(domain.domain.devices.clone()),
        }
    }

    async fn release_handle(&self, domain: FixtureDomainHandle) -> Result<(), HostError> {
        drop(domain);
        Ok(())
    }

    async fn disconnect_session(&self) -> Result<(), HostError> {
        match self.open_handles() {
            0 => Ok(()),
            open => Err(HostError::Session(format!(
                "{} fixture domain handles still open",
                open
            ))),
        }
    }
}
