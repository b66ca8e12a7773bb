//! Config command implementation.
//!
//! Generates configuration files in various formats.

use std::fs;
use std::path::PathBuf;

use crate::cli::ConfigFormat;
use crate::config::{render_config, Config};

/// Generates configuration files.
pub fn command_config(
    output: Option<PathBuf>,
    format: ConfigFormat,
    commented: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    let output = output.unwrap_or_else(|| PathBuf::from(default_file_name(&format)));

    let mut content = render_config(&config, &format)?;
    if commented && matches!(format, ConfigFormat::Yaml) {
        content = add_config_comments(content);
    }

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

fn default_file_name(format: &ConfigFormat) -> &'static str {
    match format {
        ConfigFormat::Yaml => "herakles-qemu-exporter.yaml",
        ConfigFormat::Json => "herakles-qemu-exporter.json",
        ConfigFormat::Toml => "herakles-qemu-exporter.toml",
    }
}

/// Adds comments to YAML configuration.
fn add_config_comments(yaml: String) -> String {
    let comments = r#"# Herakles QEMU Exporter Configuration
# ====================================
#
# Server Configuration
# --------------------
# bind: "0.0.0.0"              # Bind IP (0.0.0.0 = all interfaces)
# port: 9137                   # HTTP port
# metrics_path: "/metrics"     # Path serving the metrics (not "/" or "/health")
#
# Host Access
# -----------
# qmp_socket_dir: "/run/qemu"  # One QMP monitor socket per domain, either
#                              # <dir>/<name>.sock or <dir>/<name>/monitor.sock
# test_data_file: null         # YAML/JSON fixture served instead of QMP
#
# Collection Tuning
# -----------------
# host_timeout_seconds: 5      # Timeout of every single host call
# scrape_timeout_seconds: 10   # Timeout of a whole scrape (>= host timeout)
# max_concurrency: null        # Concurrent stat fetches (null = one per domain)
#
# Feature Flags
# -------------
# enable_health: true          # Enable /health endpoint
#
# Logging
# -------
# log_level: "info"            # off, error, warn, info, debug, trace
#
# TLS/SSL Configuration
# ---------------------
# enable_tls: false            # Enable HTTPS (default: false)
# tls_cert_path: null          # Path to TLS certificate (PEM format)
# tls_key_path: null           # Path to TLS private key (PEM format)
"#;

    format!("{comments}\n{yaml}")
}
