//! VibeMap - MQTT to asset model mapping service
//!
//! Usage:
//!   vibemap [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path
//!   -m, --mappings <FILE>  JSON file with mapping definitions
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use vibemap::config::Config;
use vibemap::connector::{ConnectorManager, MqttTransport};
use vibemap::mapping::MappingStore;
use vibemap::platform::LoggingPlatform;
use vibemap::processor::{ExtensionRegistry, Pipeline};

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    fn from_config(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }
}

/// VibeMap - MQTT to asset model mapping service
#[derive(Parser, Debug)]
#[command(name = "vibemap")]
#[command(author = "VibeMap Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Maps MQTT topics and payloads onto platform documents")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Mapping definitions (JSON array), overrides processing.mappings_file
    #[arg(short, long)]
    mappings: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let loaded = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };
    let config = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config file: {}", e);
            std::process::exit(1);
        }
    };

    // CLI overrides config, config overrides default (info)
    let log_level = args
        .log_level
        .unwrap_or_else(|| LogLevel::from_config(&config.log.level));

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    let store = Arc::new(MappingStore::new());
    if let Some(path) = args.mappings.or(config.processing.mappings_file.clone()) {
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                eprintln!("Error reading mappings file {:?}: {}", path, e);
                std::process::exit(1);
            }
        };
        let report = match store.load_json(&content) {
            Ok(report) => report,
            Err(e) => {
                eprintln!("Error parsing mappings file {:?}: {}", path, e);
                std::process::exit(1);
            }
        };
        for (id, e) in &report.rejected {
            warn!("Mapping '{}': Skipped: {}", id, e);
        }
        info!(
            "Loaded {} mappings from {:?} ({} rejected)",
            report.accepted,
            path,
            report.rejected.len()
        );
    }

    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        Arc::new(ExtensionRegistry::new()),
        Arc::new(LoggingPlatform::new()),
        config.processing.workers,
        config.processing.send_inbound,
    ));
    let manager = ConnectorManager::new(pipeline);

    info!("Starting VibeMap");
    info!("  Workers: {}", config.processing.workers);
    info!(
        "  Inbound dispatch: {}",
        if config.processing.send_inbound {
            "enabled"
        } else {
            "disabled"
        }
    );
    info!(
        "  Mappings: {} ({} inbound)",
        store.len(),
        store.inbound_mappings().len()
    );
    info!(
        "  Connectors: {} configured ({} enabled)",
        config.connector.len(),
        config.enabled_connectors().count()
    );

    for connector in config.enabled_connectors() {
        info!(
            "    - {} -> {} (client id {})",
            connector.name,
            connector.uri(),
            connector.client_id
        );
        let transport = Arc::new(MqttTransport::new(connector.clone()));
        manager.add(connector.clone(), transport);
    }

    manager.start_all();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    manager.stop_all().await;

    Ok(())
}
