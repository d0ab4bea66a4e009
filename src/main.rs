//! Directory Statistics Exporter
//!
//! Serves directory file counts and oldest-file ages on `/metrics`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dirstat_exporter::config::ExporterConfig;
use dirstat_exporter::coordinator::RefreshCoordinator;
use dirstat_exporter::error::Result;
use dirstat_exporter::scanner::FsScanner;
use dirstat_exporter::server;
use dirstat_exporter::telemetry::ExporterMetrics;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Directory statistics exporter for Prometheus
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "DIRSTAT_CONFIG", default_value = "config.yml")]
    config: PathBuf,

    /// Override the configured service port
    #[arg(long, env = "DIRSTAT_PORT")]
    port: Option<String>,

    /// Override the configured cache time in minutes
    #[arg(long, env = "DIRSTAT_CACHE_TIME", allow_negative_numbers = true)]
    cache_time: Option<i64>,

    /// Address to bind the metrics server on
    #[arg(long, env = "DIRSTAT_LISTEN_HOST", default_value = "0.0.0.0")]
    listen_host: String,

    /// Do not append the exporter's own metrics to scrapes
    #[arg(long, env = "DIRSTAT_DISABLE_EXPORTER_METRICS")]
    disable_exporter_metrics: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args);

    if let Err(e) = run(args).await {
        error!("{}", e);
        std::process::exit(if e.is_fatal() { 2 } else { 1 });
    }
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    let addr = config.listen_addr(&args.listen_host)?;

    info!("Starting directory statistics exporter");
    info!("  Config file: {}", args.config.display());
    info!("  Cache time: {} minutes", config.cache_time);
    for dir in &config.directories {
        info!(
            "  Directory '{}': {} (recursive: {})",
            dir.name,
            dir.path.display(),
            dir.recursive
        );
    }

    let scanner = Arc::new(FsScanner::new());
    let coordinator = if args.disable_exporter_metrics {
        RefreshCoordinator::new(config.directories.clone(), config.cache_ttl(), scanner)
    } else {
        RefreshCoordinator::with_metrics(
            config.directories.clone(),
            config.cache_ttl(),
            scanner,
            ExporterMetrics::new()?,
        )
    };

    spawn_reload_handler(&args, Arc::clone(&coordinator));

    let listener = server::bind(addr).await?;
    server::serve(listener, coordinator, shutdown_signal()).await?;

    info!("Exporter shutdown complete");
    Ok(())
}

/// Parse the file, apply command-line overrides, then validate once
fn load_config(args: &Args) -> Result<ExporterConfig> {
    let mut config = ExporterConfig::parse_file(&args.config)?;

    if let Some(port) = &args.port {
        config.service_port = port.clone();
    }
    if let Some(minutes) = args.cache_time {
        config.cache_time = minutes;
    }
    config.validate()?;

    Ok(config)
}

// =============================================================================
// Signals
// =============================================================================

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Re-read the directory list on SIGHUP
#[cfg(unix)]
fn spawn_reload_handler(args: &Args, coordinator: Arc<RefreshCoordinator>) {
    use tokio::signal::unix::{signal, SignalKind};

    let args = args.clone();
    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Configuration reload disabled: {}", e);
            return;
        }
    };

    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            match load_config(&args) {
                Ok(config) => {
                    info!("Reloaded configuration from {}", args.config.display());
                    coordinator.replace_directories(config.directories);
                }
                Err(e) => warn!("Keeping previous configuration: {}", e),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_handler(_args: &Args, _coordinator: Arc<RefreshCoordinator>) {}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "hyper_util=warn"] {
        match directive.parse::<Directive>() {
            Ok(d) => filter = filter.add_directive(d),
            Err(e) => eprintln!("ignoring log directive {}: {}", directive, e),
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
