//! Virtualization host access.
//!
//! The collector talks to the host exclusively through the [`HostClient`]
//! trait. Two implementations ship with the exporter:
//! - [`QmpHost`]: QEMU Machine Protocol over per-domain monitor sockets
//! - [`FixtureHost`]: domains read from a YAML/JSON fixture file

pub mod fixture;
pub mod qmp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

pub use fixture::FixtureHost;
pub use qmp::QmpHost;

/// Block I/O counters of one device attached to one domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockDeviceStat {
    pub device: String,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_operations: u64,
    pub write_operations: u64,
    pub flush_operations: u64,
    pub read_total_time_ns: u64,
    pub write_total_time_ns: u64,
    pub flush_total_time_ns: u64,
    pub idle_time_ns: u64,
}

/// Errors returned by host clients.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("I/O error on {target}: {source}")]
    Io {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("QMP protocol error: {0}")]
    Protocol(String),

    #[error("QMP command {command} failed: {class}: {desc}")]
    Command {
        command: String,
        class: String,
        desc: String,
    },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("fixture error: {0}")]
    Fixture(String),

    #[error("domain unavailable: {0}")]
    Unavailable(String),

    #[error("session error: {0}")]
    Session(String),
}

impl HostError {
    pub fn io(target: impl std::fmt::Display, source: std::io::Error) -> Self {
        HostError::Io {
            target: target.to_string(),
            source,
        }
    }
}

/// A domain handle owned by the collection cycle that enumerated it.
pub trait DomainHandle: Send + 'static {
    fn name(&self) -> &str;
}

/// Access to the domains of one virtualization host.
///
/// A session spans one collection cycle: domains are enumerated, each handle
/// is released exactly once, and the session is disconnected at the end.
#[async_trait]
pub trait HostClient: Send + Sync + 'static {
    type Domain: DomainHandle;

    /// Lists the currently running domains.
    async fn enumerate_domains(&self) -> Result<Vec<Self::Domain>, HostError>;

    /// Fetches the block device statistics of one domain.
    async fn fetch_block_stats(
        &self,
        domain: &mut Self::Domain,
    ) -> Result<Vec<BlockDeviceStat>, HostError>;

    /// Releases a domain handle.
    async fn release_handle(&self, domain: Self::Domain) -> Result<(), HostError>;

    /// Ends the session opened by the last enumeration.
    async fn disconnect_session(&self) -> Result<(), HostError>;
}

/// Runs one full session and returns the names of the running domains.
///
/// Used at startup and by the `check` command to verify that the host is
/// reachable before serving metrics.
pub async fn probe<H: HostClient>(host: &H) -> Result<Vec<String>, HostError> {
    let domains = host.enumerate_domains().await?;
    let mut names = Vec::with_capacity(domains.len());

    for domain in domains {
        names.push(domain.name().to_string());
        if let Err(e) = host.release_handle(domain).await {
            warn!("Failed to release domain handle during probe: {}", e);
        }
    }

    host.disconnect_session().await?;
    debug!("Host probe found {} domains", names.len());
    Ok(names)
}
