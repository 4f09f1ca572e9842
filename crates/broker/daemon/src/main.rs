//! Broker daemon
//!
//! Hosts the registered service modules over an in-memory store and keeps
//! every in-flight instance moving until shutdown. With `--demo` it first
//! walks one fake-db instance through its whole lifecycle.

use anyhow::Context;
use broker_engine::{Broker, BrokerConfig, InMemoryStore, ModuleRegistry};
use broker_fake::{FakeDbManager, InMemoryControlPlane};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod demo;

/// Broker daemon CLI
#[derive(Parser)]
#[command(name = "brokerd")]
#[command(about = "Managed-service broker daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "BROKER_CONFIG")]
    config: Option<String>,

    /// Log level, overrides the configured one
    #[arg(long, env = "BROKER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "BROKER_LOG_JSON")]
    json: bool,

    /// Run one fake-db lifecycle at startup
    #[arg(long)]
    demo: bool,

    /// Exit after startup work instead of driving until Ctrl+C
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = BrokerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(
        cli.log_level.as_deref().unwrap_or(&config.logging.level),
        cli.json || config.logging.json,
    );

    let plane = Arc::new(InMemoryControlPlane::new().with_ready_after_polls(2));
    let registry = ModuleRegistry::new().with(Arc::new(FakeDbManager::new(plane)))?;
    let broker = Broker::new(registry, Arc::new(InMemoryStore::new()), &config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        plans = broker.catalog().len(),
        "Broker started"
    );

    if cli.demo {
        demo::run(&broker).await?;
    }
    if cli.once {
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver = Arc::clone(broker.driver());
    let worker = tokio::spawn(async move { driver.run(shutdown_rx).await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install Ctrl+C handler")?;
    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);
    worker.await.context("Driver task panicked")?;

    Ok(())
}

fn init_tracing(level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.to_string().into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
