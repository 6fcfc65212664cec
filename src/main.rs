//! Service Registry Server
//!
//! Serves the registry API, runs the liveness sweeper and exposes metrics.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use service_registry::{
    config::LoggingConfig, ApiServer, EventHub, FileStore, InstanceStore, MemoryStore, Registry,
    RegistryMetrics, Settings, SettingsOverrides, Sweeper, SystemClock,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Service Registry - heartbeat-based service discovery
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML config file; explicit flags and environment override it
    #[arg(long, env = "CONFIG")]
    config: Option<PathBuf>,

    /// REST API bind address [default: 0.0.0.0:4000]
    #[arg(long, env = "API_ADDR")]
    api_addr: Option<SocketAddr>,

    /// Metrics server bind address [default: 0.0.0.0:9090]
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    /// Seconds without a heartbeat before an instance is dead [default: 30]
    #[arg(long, env = "HEARTBEAT_TTL_SECS")]
    heartbeat_ttl_secs: Option<u64>,

    /// Seconds between liveness sweeps [default: 10]
    #[arg(long, env = "SWEEP_INTERVAL_SECS")]
    sweep_interval_secs: Option<u64>,

    /// Persist instances to this JSON file instead of keeping them in memory
    #[arg(long, env = "STORE_PATH")]
    store_path: Option<PathBuf>,

    /// Per-watcher event queue capacity [default: 64]
    #[arg(long, env = "SUBSCRIBER_QUEUE")]
    subscriber_queue: Option<usize>,

    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            api_addr: self.api_addr,
            metrics_addr: self.metrics_addr,
            heartbeat_ttl_secs: self.heartbeat_ttl_secs,
            sweep_interval_secs: self.sweep_interval_secs,
            store_path: self.store_path.clone(),
            subscriber_queue: self.subscriber_queue,
            log_level: self.log_level.clone(),
            log_json: self.log_json.then_some(true),
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Settings::default(),
    }
    .apply(args.overrides());
    settings.validate().context("invalid configuration")?;

    // Initialize logging
    init_logging(&settings.logging);

    info!("Starting Service Registry");
    info!("  Version: {}", service_registry::VERSION);
    info!("  Heartbeat TTL: {}s", settings.registry.heartbeat_ttl_secs);
    info!("  Sweep interval: {}s", settings.sweeper.interval_secs);

    // Create instance store
    let store: Arc<dyn InstanceStore> = match &settings.store.path {
        Some(path) => {
            let store = FileStore::open(path)
                .await
                .with_context(|| format!("opening store {}", path.display()))?;
            info!("File store initialized at {}", path.display());
            Arc::new(store)
        }
        None => {
            info!("In-memory store initialized (256-way sharded)");
            Arc::new(MemoryStore::new())
        }
    };

    let registry = Registry::new(
        settings.registry.clone(),
        store,
        EventHub::new(settings.hub.clone()),
        Arc::new(SystemClock),
        RegistryMetrics::new()?,
    );

    // Start liveness sweeper
    let cancel = CancellationToken::new();
    let sweeper = Sweeper::new(settings.sweeper.clone(), registry.clone()).spawn(cancel.clone());

    // Create and run API server
    let api_server = Arc::new(ApiServer::new(settings.api.clone(), registry.clone()));

    let signal_server = api_server.clone();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        signal_cancel.cancel();
        signal_server.shutdown();
    });

    let outcome = api_server.run().await;

    cancel.cancel();
    if let Err(e) = sweeper.await {
        error!("Sweeper task failed: {}", e);
    }

    outcome?;
    info!("Service registry shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(config: &LoggingConfig) {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "tower=warn", "axum=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if config.json {
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
