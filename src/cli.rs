//! CLI arguments and subcommands for herakles-qemu-exporter.
//!
//! This module defines the command-line interface structure using the clap library,
//! including all flags, options, and subcommands.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Parses the `log_level` value of a config file.
    pub fn from_config(value: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(value, true).ok()
    }
}

/// Configuration format options for output
#[derive(Debug, Clone, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "herakles-qemu-exporter",
    about = "Prometheus exporter for QEMU domain block I/O statistics",
    long_about = "Prometheus exporter for QEMU domain block I/O statistics.\n\n\
                  Enumerates the running QEMU domains of a host on every scrape, fetches the \
                  block device counters of all domains concurrently and exposes them as \
                  Prometheus metrics labelled by domain and device.",
    author = "Michael Moll <exporter@herakles.now> - Herakles",
    version = "0.1.0",
    propagate_version = true,
    after_help = "Project: https://github.com/cansp-dev/herakles-qemu-exporter | More info: https://www.herakles.now | Support: exporter@herakles.now"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Log level (default: config file value, then info)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Print only the loaded user config file + full path and exit
    #[arg(long)]
    pub show_user_config: bool,

    /// Output format for --show-config*
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// HTTP path serving the metrics
    #[arg(long)]
    pub metrics_path: Option<String>,

    /// Directory containing the QMP monitor sockets of the domains
    #[arg(long)]
    pub qmp_socket_dir: Option<PathBuf>,

    /// Path to a YAML/JSON fixture file (serves fixture domains instead of QMP)
    #[arg(short = 't', long)]
    pub test_data_file: Option<PathBuf>,

    /// Timeout in seconds for every single host call
    #[arg(long)]
    pub host_timeout: Option<u64>,

    /// Timeout in seconds for a whole scrape
    #[arg(long)]
    pub scrape_timeout: Option<u64>,

    /// Maximum number of concurrent block stat fetches (default: one per domain)
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Disable /health endpoint
    #[arg(long)]
    pub disable_health: bool,

    /// Enable TLS/SSL for HTTPS
    #[arg(long)]
    pub enable_tls: bool,

    /// Path to TLS certificate file (PEM format)
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM format)
    #[arg(long)]
    pub tls_key: Option<PathBuf>,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate configuration and host connectivity
    Check,

    /// Generate configuration files
    Config {
        /// Output file path ("-" for stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments and examples
        #[arg(long)]
        commented: bool,
    },

    /// Test metrics collection
    Test {
        /// Number of collection cycles to run
        #[arg(short = 'n', long, default_value_t = 1)]
        iterations: usize,

        /// Print every sample of the last cycle
        #[arg(long)]
        verbose: bool,
    },

    /// Generate a synthetic fixture file
    GenerateTestdata {
        /// Output file path (.yaml/.yml or .json)
        #[arg(short = 'o', long, default_value = "testdata.yaml")]
        output: PathBuf,

        /// Number of domains to generate
        #[arg(long, default_value_t = 4)]
        domains: usize,

        /// Number of block devices per domain
        #[arg(long, default_value_t = 2)]
        devices_per_domain: usize,

        /// Number of domains whose stats fetch fails
        #[arg(long, default_value_t = 0)]
        failing: usize,
    },
}
