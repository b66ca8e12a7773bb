//! Configuration management for herakles-qemu-exporter.
//!
//! This module handles loading, merging, and validating configuration from files
//! and CLI arguments. It supports YAML, JSON, and TOML formats.

use crate::cli::{Args, ConfigFormat};
use herakles_qemu_exporter::collectors::CollectorOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// Default configuration constants
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9137;
pub const DEFAULT_METRICS_PATH: &str = "/metrics";
pub const DEFAULT_QMP_SOCKET_DIR: &str = "/run/qemu";
pub const DEFAULT_HOST_TIMEOUT_SECONDS: u64 = 5;
pub const DEFAULT_SCRAPE_TIMEOUT_SECONDS: u64 = 10;

/// Paths reserved for other endpoints.
const RESERVED_PATHS: [&str; 2] = ["/", "/health"];

const DEFAULT_CONFIG_PATHS: [&str; 6] = [
    "/etc/herakles/qemu-exporter.yaml",
    "/etc/herakles/qemu-exporter.yml",
    "/etc/herakles/qemu-exporter.json",
    "./herakles-qemu-exporter.yaml",
    "./herakles-qemu-exporter.yml",
    "./herakles-qemu-exporter.json",
];

/// Exporter configuration. Unset fields fall back to the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub port: Option<u16>,
    pub bind: Option<String>,
    #[serde(alias = "metrics-path")]
    pub metrics_path: Option<String>,

    // Host access
    /// Directory holding one QMP monitor socket per domain
    #[serde(alias = "qmp-socket-dir")]
    pub qmp_socket_dir: Option<PathBuf>,
    /// Fixture file served instead of QMP when set
    #[serde(alias = "test-data-file")]
    pub test_data_file: Option<PathBuf>,

    // Collection tuning
    #[serde(alias = "host-timeout-seconds")]
    pub host_timeout_seconds: Option<u64>,
    #[serde(alias = "scrape-timeout-seconds")]
    pub scrape_timeout_seconds: Option<u64>,
    /// Upper bound of concurrent block stat fetches (unset = one per domain)
    #[serde(alias = "max-concurrency")]
    pub max_concurrency: Option<usize>,

    // Feature flags
    #[serde(alias = "enable-health")]
    pub enable_health: Option<bool>,

    // Logging
    #[serde(alias = "log-level")]
    pub log_level: Option<String>,

    // TLS/SSL Configuration
    #[serde(alias = "enable-tls")]
    pub enable_tls: Option<bool>,
    #[serde(alias = "tls-cert-path")]
    pub tls_cert_path: Option<String>,
    #[serde(alias = "tls-key-path")]
    pub tls_key_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            port: Some(DEFAULT_PORT),
            metrics_path: Some(DEFAULT_METRICS_PATH.to_string()),
            qmp_socket_dir: Some(PathBuf::from(DEFAULT_QMP_SOCKET_DIR)),
            test_data_file: None,
            host_timeout_seconds: Some(DEFAULT_HOST_TIMEOUT_SECONDS),
            scrape_timeout_seconds: Some(DEFAULT_SCRAPE_TIMEOUT_SECONDS),
            max_concurrency: None,
            enable_health: Some(true),
            log_level: Some("info".into()),
            enable_tls: Some(false),
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

impl Config {
    pub fn bind_addr(&self) -> &str {
        self.bind.as_deref().unwrap_or(DEFAULT_BIND_ADDR)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn metrics_path(&self) -> &str {
        self.metrics_path.as_deref().unwrap_or(DEFAULT_METRICS_PATH)
    }

    pub fn qmp_socket_dir(&self) -> PathBuf {
        self.qmp_socket_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_QMP_SOCKET_DIR))
    }

    pub fn host_timeout(&self) -> Duration {
        Duration::from_secs(
            self.host_timeout_seconds
                .unwrap_or(DEFAULT_HOST_TIMEOUT_SECONDS),
        )
    }

    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_secs(
            self.scrape_timeout_seconds
                .unwrap_or(DEFAULT_SCRAPE_TIMEOUT_SECONDS),
        )
    }

    pub fn health_enabled(&self) -> bool {
        self.enable_health.unwrap_or(true)
    }

    pub fn tls_enabled(&self) -> bool {
        self.enable_tls.unwrap_or(false)
    }

    pub fn collector_options(&self) -> CollectorOptions {
        CollectorOptions {
            host_timeout: self.host_timeout(),
            max_concurrency: self.max_concurrency,
        }
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let metrics_path = cfg.metrics_path();
    if !metrics_path.starts_with('/') {
        return Err(format!("metrics_path must start with '/', got '{}'", metrics_path).into());
    }
    if RESERVED_PATHS.contains(&metrics_path) {
        return Err(format!(
            "metrics_path '{}' collides with a built-in endpoint",
            metrics_path
        )
        .into());
    }

    if cfg.host_timeout_seconds == Some(0) {
        return Err("host_timeout_seconds must be greater than 0".into());
    }
    if cfg.scrape_timeout_seconds == Some(0) {
        return Err("scrape_timeout_seconds must be greater than 0".into());
    }
    if cfg.host_timeout() > cfg.scrape_timeout() {
        return Err(format!(
            "host_timeout_seconds ({}) must not exceed scrape_timeout_seconds ({})",
            cfg.host_timeout().as_secs(),
            cfg.scrape_timeout().as_secs()
        )
        .into());
    }

    if cfg.max_concurrency == Some(0) {
        return Err("max_concurrency must be greater than 0 when set".into());
    }

    if let Some(level) = cfg.log_level.as_deref() {
        if !["off", "error", "warn", "info", "debug", "trace"].contains(&level) {
            return Err(format!("Invalid log_level '{}'", level).into());
        }
    }

    // TLS validation
    if cfg.tls_enabled() {
        let cert_path = cfg.tls_cert_path.as_deref();
        let key_path = cfg.tls_key_path.as_deref();

        match (cert_path, key_path) {
            (None, None) => {
                return Err(
                    "TLS is enabled but neither tls_cert_path nor tls_key_path are set".into(),
                );
            }
            (Some(_), None) => {
                return Err("TLS is enabled but tls_key_path is not set".into());
            }
            (None, Some(_)) => {
                return Err("TLS is enabled but tls_cert_path is not set".into());
            }
            (Some(cert), Some(key)) => {
                check_pem_file(cert, "certificate")?;
                check_pem_file(key, "private key")?;
            }
        }
    }

    Ok(())
}

/// Checks that a TLS file exists, is readable and not empty.
fn check_pem_file(path: &str, what: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        return Err(format!("TLS {} file not found: {}", what, path).into());
    }
    match fs::metadata(path) {
        Ok(meta) if meta.len() == 0 => Err(format!("TLS {} file is empty: {}", what, path).into()),
        Err(e) => Err(format!("TLS {} file is not readable: {} ({})", what, path, e).into()),
        Ok(_) => Ok(()),
    }
}

/// Resolves configuration from CLI args, config file, and defaults.
/// This enforces precedence: CLI (if provided) > config file > default.
pub fn resolve_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(cli_port) = args.port {
        config.port = Some(cli_port);
    }
    if let Some(path) = &args.metrics_path {
        config.metrics_path = Some(path.clone());
    }

    if let Some(dir) = &args.qmp_socket_dir {
        config.qmp_socket_dir = Some(dir.clone());
    }
    if let Some(test_file) = &args.test_data_file {
        config.test_data_file = Some(test_file.clone());
    }

    if let Some(secs) = args.host_timeout {
        config.host_timeout_seconds = Some(secs);
    }
    if let Some(secs) = args.scrape_timeout {
        config.scrape_timeout_seconds = Some(secs);
    }
    if let Some(n) = args.max_concurrency {
        config.max_concurrency = Some(n);
    }

    if args.disable_health {
        config.enable_health = Some(false);
    }

    if let Some(level) = args.log_level {
        config.log_level = Some(format!("{:?}", level).to_lowercase());
    }

    // TLS configuration: CLI wins if provided
    if args.enable_tls {
        config.enable_tls = Some(true);
    }
    if let Some(cert_path) = &args.tls_cert {
        config.tls_cert_path = Some(cert_path.to_string_lossy().to_string());
    }
    if let Some(key_path) = &args.tls_key {
        config.tls_key_path = Some(key_path.to_string_lossy().to_string());
    }

    Ok(config)
}

/// Loads a config file; without an explicit path the default locations are tried.
pub fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    let path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(format!("Config file not found: {}", p.display()).into());
            }
            p.to_path_buf()
        }
        None => match DEFAULT_CONFIG_PATHS.iter().find(|p| Path::new(p).exists()) {
            Some(p) => PathBuf::from(p),
            None => return Ok(Config::default()),
        },
    };

    let content = fs::read_to_string(&path)?;
    let config = parse_config(&path, &content)?;
    info!("Loaded configuration from: {}", path.display());
    Ok(config)
}

/// Parses config content, picking the format from the file extension (YAML by default).
pub fn parse_config(path: &Path, content: &str) -> Result<Config, Box<dyn std::error::Error>> {
    let config = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(content)?,
        Some("toml") => toml::from_str(content)?,
        _ => serde_yaml::from_str(content)?,
    };
    Ok(config)
}

/// Serializes a config in the requested format.
pub fn render_config(
    config: &Config,
    format: &ConfigFormat,
) -> Result<String, Box<dyn std::error::Error>> {
    let output = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    };
    Ok(output)
}

/// Shows configuration in requested format
pub fn show_config(
    config: &Config,
    format: ConfigFormat,
    user_config: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let output = render_config(config, &format)?;

    if user_config {
        println!("User configuration (effective values):");
    }
    println!("{output}");
    Ok(())
}
