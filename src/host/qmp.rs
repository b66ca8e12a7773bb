//! QMP (QEMU Machine Protocol) host client.
//!
//! Every running domain exposes a QMP monitor on a unix socket. The client
//! discovers monitors below a socket directory, either as sockets placed
//! directly in the directory (`/run/qemu/<vm>.sock`) or in the libvirt
//! layout (`<dir>/domain-<id>-<vm>/monitor.sock`).
//!
//! QMP is newline-delimited JSON: the server greets with a `QMP` object, the
//! client negotiates with `qmp_capabilities`, then issues `execute` requests.
//! Asynchronous `event` messages may arrive between requests and responses
//! and are skipped.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::os::unix::fs::FileTypeExt;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

use super::{BlockDeviceStat, DomainHandle, HostClient, HostError};

/// File name of the monitor socket in the libvirt directory layout.
pub const MONITOR_SOCKET_NAME: &str = "monitor.sock";

/// Default bound for opening one monitor (connect, greeting, capabilities, name).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Host client speaking QMP to every monitor socket below a directory.
pub struct QmpHost {
    socket_dir: PathBuf,
    open_connections: Arc<AtomicUsize>,
    connect_timeout: Duration,
}

impl QmpHost {
    pub fn new(socket_dir: impl Into<PathBuf>) -> Self {
        Self {
            socket_dir: socket_dir.into(),
            open_connections: Arc::new(AtomicUsize::new(0)),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sets the bound for opening a single monitor during enumeration.
    ///
    /// A monitor that does not finish its handshake in time is skipped like
    /// an unreachable one.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn socket_dir(&self) -> &Path {
        &self.socket_dir
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Number of monitor connections handed out and not yet dropped.
    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::Acquire)
    }

    async fn discover_sockets(&self) -> Result<Vec<PathBuf>, HostError> {
        let dir = &self.socket_dir;
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| HostError::io(dir.display(), e))?;

        let mut sockets = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| HostError::io(dir.display(), e))?
        {
            let path = entry.path();
            let file_type = match entry.file_type().await {
                Ok(t) => t,
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            if file_type.is_socket() {
                sockets.push(path);
            } else if file_type.is_dir() {
                let nested = path.join(MONITOR_SOCKET_NAME);
                let is_socket = tokio::fs::metadata(&nested)
                    .await
                    .map(|m| m.file_type().is_socket())
                    .unwrap_or(false);
                if is_socket {
                    sockets.push(nested);
                }
            }
        }

        sockets.sort();
        Ok(sockets)
    }
}

/// Opens one monitor and resolves the domain name behind it.
async fn open_domain(
    socket: &Path,
    open_connections: &Arc<AtomicUsize>,
) -> Result<QmpDomain, HostError> {
    let mut conn = QmpConnection::connect(socket).await?;
    let guard = OpenConnection::new(open_connections);

    let info: NameInfo = conn.execute("query-name").await?;
    let name = info
        .name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| fallback_domain_name(socket));

    Ok(QmpDomain {
        name,
        socket: socket.to_path_buf(),
        conn,
        _guard: guard,
    })
}

#[async_trait]
impl HostClient for QmpHost {
    type Domain = QmpDomain;

    async fn enumerate_domains(&self) -> Result<Vec<QmpDomain>, HostError> {
        let sockets = self.discover_sockets().await?;
        let timeout = self.connect_timeout;

        // Monitors are opened concurrently; a hung one only costs its own domain.
        let mut pending = JoinSet::new();
        for (idx, socket) in sockets.into_iter().enumerate() {
            let counter = Arc::clone(&self.open_connections);
            pending.spawn(async move {
                let handshake = open_domain(&socket, &counter);
                let opened = match tokio::time::timeout(timeout, handshake).await {
                    Ok(result) => result,
                    Err(_) => Err(HostError::Timeout {
                        operation: "QMP monitor handshake",
                        timeout,
                    }),
                };
                (idx, socket, opened)
            });
        }

        let mut domains = Vec::with_capacity(pending.len());
        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok((idx, socket, Ok(domain))) => {
                    debug!(domain = %domain.name, socket = %socket.display(), "Connected to QMP monitor");
                    domains.push((idx, domain));
                }
                Ok((_, socket, Err(e))) => {
                    warn!(socket = %socket.display(), "Skipping unreachable QMP monitor: {}", e);
                }
                Err(e) => warn!("QMP monitor handshake task failed: {}", e),
            }
        }

        domains.sort_by_key(|(idx, _)| *idx);
        Ok(domains.into_iter().map(|(_, domain)| domain).collect())
    }

    async fn fetch_block_stats(
        &self,
        domain: &mut QmpDomain,
    ) -> Result<Vec<BlockDeviceStat>, HostError> {
        let entries: Vec<BlockStatsEntry> = domain.conn.execute("query-blockstats").await?;
        Ok(entries.into_iter().map(BlockDeviceStat::from).collect())
    }

    async fn release_handle(&self, domain: QmpDomain) -> Result<(), HostError> {
        let QmpDomain { socket, conn, .. } = domain;
        conn.close()
            .await
            .map_err(|e| HostError::io(socket.display(), e))
    }

    async fn disconnect_session(&self) -> Result<(), HostError> {
        match self.open_connections() {
            0 => Ok(()),
            open => Err(HostError::Session(format!(
                "{} QMP monitor connections still open",
                open
            ))),
        }
    }
}

/// Handle to one domain's QMP monitor.
pub struct QmpDomain {
    name: String,
    socket: PathBuf,
    conn: QmpConnection,
    _guard: OpenConnection,
}

impl QmpDomain {
    pub fn socket(&self) -> &Path {
        &self.socket
    }
}

impl fmt::Debug for QmpDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QmpDomain")
            .field("name", &self.name)
            .field("socket", &self.socket)
            .finish_non_exhaustive()
    }
}

impl DomainHandle for QmpDomain {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Keeps the host's open connection count in step with live handles.
struct OpenConnection(Arc<AtomicUsize>);

impl OpenConnection {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for OpenConnection {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

struct QmpConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    target: String,
    line: String,
}

impl QmpConnection {
    async fn connect(socket: &Path) -> Result<Self, HostError> {
        let stream = UnixStream::connect(socket)
            .await
            .map_err(|e| HostError::io(socket.display(), e))?;
        let (read, write) = stream.into_split();

        let mut conn = Self {
            reader: BufReader::new(read),
            writer: write,
            target: socket.display().to_string(),
            line: String::new(),
        };

        let greeting = conn.read_message().await?;
        if greeting.get("QMP").is_none() {
            return Err(HostError::Protocol(format!(
                "{} did not send a QMP greeting",
                conn.target
            )));
        }

        let _: Value = conn.execute("qmp_capabilities").await?;
        Ok(conn)
    }

    async fn read_message(&mut self) -> Result<Value, HostError> {
        loop {
            self.line.clear();
            let read = self
                .reader
                .read_line(&mut self.line)
                .await
                .map_err(|e| HostError::io(&self.target, e))?;
            if read == 0 {
                return Err(HostError::Protocol(format!(
                    "{} closed the connection",
                    self.target
                )));
            }

            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }

            return serde_json::from_str(trimmed)
                .map_err(|e| HostError::Protocol(format!("invalid JSON from {}: {}", self.target, e)));
        }
    }

    async fn execute<T: DeserializeOwned>(&mut self, command: &str) -> Result<T, HostError> {
        let mut request = json!({ "execute": command }).to_string();
        request.push('\n');
        self.writer
            .write_all(request.as_bytes())
            .await
            .map_err(|e| HostError::io(&self.target, e))?;
        self.writer
            .flush()
            .await
            .map_err(|e| HostError::io(&self.target, e))?;

        loop {
            let raw = self.read_message().await?;
            let message: QmpMessage = serde_json::from_value(raw)
                .map_err(|e| HostError::Protocol(format!("malformed QMP message: {}", e)))?;

            if let Some(event) = message.event {
                trace!(target_socket = %self.target, "Skipping QMP event {}", event);
                continue;
            }

            if let Some(error) = message.error {
                return Err(HostError::Command {
                    command: command.to_string(),
                    class: error.class,
                    desc: error.desc,
                });
            }

            return match message.ret {
                Some(ret) => serde_json::from_value(ret).map_err(|e| {
                    HostError::Protocol(format!("unexpected {} response: {}", command, e))
                }),
                None => Err(HostError::Protocol(format!(
                    "{} response carries neither return nor error",
                    command
                ))),
            };
        }
    }

    async fn close(mut self) -> std::io::Result<()> {
        self.writer.shutdown().await
    }
}

#[derive(Deserialize)]
struct QmpMessage {
    #[serde(rename = "return")]
    ret: Option<Value>,
    error: Option<QmpErrorBody>,
    event: Option<String>,
}

#[derive(Deserialize)]
struct QmpErrorBody {
    #[serde(default)]
    class: String,
    #[serde(default)]
    desc: String,
}

#[derive(Deserialize)]
struct NameInfo {
    name: Option<String>,
}

#[derive(Deserialize)]
struct BlockStatsEntry {
    #[serde(default)]
    device: String,
    #[serde(default)]
    qdev: Option<String>,
    #[serde(rename = "node-name", default)]
    node_name: Option<String>,
    #[serde(default)]
    stats: RawBlockStats,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawBlockStats {
    rd_bytes: u64,
    wr_bytes: u64,
    rd_operations: u64,
    wr_operations: u64,
    flush_operations: u64,
    rd_total_time_ns: u64,
    wr_total_time_ns: u64,
    flush_total_time_ns: u64,
    idle_time_ns: u64,
}

impl From<BlockStatsEntry> for BlockDeviceStat {
    fn from(entry: BlockStatsEntry) -> Self {
        // Drives configured with -blockdev report an empty device name.
        let device = if !entry.device.is_empty() {
            entry.device
        } else {
            entry
                .qdev
                .filter(|q| !q.is_empty())
                .or(entry.node_name)
                .unwrap_or_default()
        };

        let s = entry.stats;
        BlockDeviceStat {
            device,
            read_bytes: s.rd_bytes,
            write_bytes: s.wr_bytes,
            read_operations: s.rd_operations,
            write_operations: s.wr_operations,
            flush_operations: s.flush_operations,
            read_total_time_ns: s.rd_total_time_ns,
            write_total_time_ns: s.wr_total_time_ns,
            flush_total_time_ns: s.flush_total_time_ns,
            idle_time_ns: s.idle_time_ns,
        }
    }
}

/// Derives a domain name from a monitor socket path.
///
/// `/run/qemu/web01.sock` yields `web01`; the libvirt layout
/// `/var/lib/libvirt/qemu/domain-3-web01/monitor.sock` yields `web01`.
fn fallback_domain_name(socket: &Path) -> String {
    let from_dir = socket.file_name().and_then(|n| n.to_str()) == Some(MONITOR_SOCKET_NAME);

    let raw = if from_dir {
        socket
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    } else {
        socket
            .file_stem()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    };

    strip_libvirt_prefix(raw).to_string()
}

fn strip_libvirt_prefix(name: &str) -> &str {
    if let Some(rest) = name.strip_prefix("domain-") {
        if let Some((id, vm)) = rest.split_once('-') {
            if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) && !vm.is_empty() {
                return vm;
            }
        }
    }
    name
}
