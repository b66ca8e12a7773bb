//! herakles-qemu-exporter - version 0.1.0
//!
//! Prometheus exporter for QEMU domain block I/O statistics with tracing logging.
//! This is the main entry point that initializes the server and handles subcommands.

mod cli;
mod commands;
mod config;
mod handlers;
mod metrics;
mod setup;
mod state;

use axum::{response::Redirect, routing::get, Router};
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use herakles_qemu_exporter::exposition::PrometheusExposition;
use herakles_qemu_exporter::health_stats::HealthStats;
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::{net::TcpListener, signal};
use tracing::{debug, error, info, level_filters::LevelFilter};

use cli::{Args, Commands, LogLevel};
use commands::{command_check, command_config, command_generate_testdata, command_test};
use config::{resolve_config, show_config, validate_effective_config, Config};
use handlers::{health_handler, metrics_handler};
use metrics::ExporterMetrics;
use setup::build_aggregator;
use state::{AppState, SharedState};

/// Initializes tracing logging subsystem with configured log level.
fn setup_logging(config: &Config) {
    let level = config
        .log_level
        .as_deref()
        .and_then(LogLevel::from_config)
        .unwrap_or(LogLevel::Info);

    let filter = match level {
        LogLevel::Off => LevelFilter::OFF,
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return;
    }

    info!("Logging initialized with level: {:?}", level);
}

/// Helper function to load and validate configuration.
/// Exits the process with error code 1 if validation fails.
fn load_validated_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let config = resolve_config(args)?;
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }
    Ok(config)
}

/// Resolves once SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

/// Builds the HTTP router: metrics path, `/` redirect and optional `/health`.
fn build_router(state: SharedState) -> Router {
    let metrics_path = state.config.metrics_path().to_string();
    let redirect_target = metrics_path.clone();

    let mut app = Router::new()
        .route(&metrics_path, get(metrics_handler))
        .route(
            "/",
            get(move || {
                let target = redirect_target.clone();
                async move { Redirect::permanent(&target) }
            }),
        );

    if state.config.health_enabled() {
        app = app.route("/health", get(health_handler));
    }

    app.with_state(state)
}

/// Main application entry point.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.show_user_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        if args.show_config {
            return show_config(&config, args.config_format, false);
        }

        if args.show_user_config {
            return show_config(&config, args.config_format, true);
        }
    }

    // Handle subcommands
    if let Some(command) = &args.command {
        return match command {
            Commands::Config {
                output,
                format,
                commented,
            } => command_config(output.clone(), format.clone(), *commented),

            Commands::GenerateTestdata {
                output,
                domains,
                devices_per_domain,
                failing,
            } => command_generate_testdata(output.clone(), *domains, *devices_per_domain, *failing),

            Commands::Check => {
                let config = resolve_config(&args)?;
                setup_logging(&config);
                command_check(&config).await
            }

            Commands::Test {
                iterations,
                verbose,
            } => {
                let config = load_validated_config(&args)?;
                setup_logging(&config);
                command_test(*iterations, *verbose, &config).await
            }
        };
    }

    // Load configuration for main server mode
    let config = load_validated_config(&args)?;

    setup_logging(&config);

    info!("Starting herakles-qemu-exporter");

    let (host, aggregator) = build_aggregator(&config);
    info!("Collecting domain statistics from {}", host);

    // Fail fast when the host cannot be reached at all
    match tokio::time::timeout(config.scrape_timeout(), host.probe()).await {
        Ok(Ok(domains)) => {
            info!(
                "Host reachable, {} running domains: [{}]",
                domains.len(),
                domains.join(", ")
            );
        }
        Ok(Err(e)) => {
            error!("❌ Startup connectivity check failed: {}", e);
            std::process::exit(1);
        }
        Err(_) => {
            error!(
                "❌ Startup connectivity check timed out after {}s",
                config.scrape_timeout().as_secs()
            );
            std::process::exit(1);
        }
    }

    // Initialize Prometheus metrics registry
    let registry = Registry::new();
    let metrics = ExporterMetrics::new(&registry)?;
    let exposition = PrometheusExposition::new(aggregator.describe());
    debug!(
        "Registered {} domain metric descriptors",
        exposition.descriptors().len()
    );

    let addr: SocketAddr = format!("{}:{}", config.bind_addr(), config.port()).parse()?;
    let metrics_path = config.metrics_path().to_string();

    let state = Arc::new(AppState {
        aggregator,
        exposition,
        registry,
        metrics,
        health_stats: Arc::new(HealthStats::new()),
        config: Arc::new(config.clone()),
        start_time: Instant::now(),
    });

    let app = build_router(state);

    if config.tls_enabled() {
        let (Some(cert_path), Some(key_path)) = (&config.tls_cert_path, &config.tls_key_path)
        else {
            return Err("TLS is enabled but certificate or key path is missing".into());
        };

        info!("Loading TLS certificate from: {}", cert_path);
        info!("Loading TLS private key from: {}", key_path);

        let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .map_err(|e| {
                error!("Failed to load TLS configuration: {}", e);
                e
            })?;

        info!(
            "herakles-qemu-exporter listening on https://{}{}",
            addr, metrics_path
        );

        let server = axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service());

        tokio::select! {
            result = server => {
                if let Err(e) = result {
                    error!("Server error: {}", e);
                    return Err(e.into());
                }
            }
            _ = shutdown_signal() => {
                info!("Shutdown signal received, exiting...");
            }
        }
    } else {
        let listener = TcpListener::bind(addr).await?;
        info!(
            "herakles-qemu-exporter listening on http://{}{}",
            addr, metrics_path
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| {
                error!("Server error: {}", e);
                e
            })?;
    }

    info!("herakles-qemu-exporter stopped gracefully");
    Ok(())
}
