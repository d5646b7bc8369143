//! # relay-agent
//!
//! Stream relay binary: loads settings, picks a broker, and serves SSE
//! streams until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use relay_broker::{Broker, MemoryBroker, RedisBroker};
use relay_server::config::ServerConfig;
use relay_server::health::probe_broker;
use relay_server::server::RelayServer;
use relay_settings::RelaySettings;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Which broker the relay subscribes through.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum BrokerKind {
    /// Redis pub/sub, configured by the `redis` settings.
    #[default]
    Redis,
    /// In-process broker; only useful for local runs and demos.
    Memory,
}

/// Stream relay server.
#[derive(Parser, Debug)]
#[command(name = "relay-agent", about = "Relay pub/sub channels to SSE clients")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// JSON settings file (default: `$RELAY_SETTINGS`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,

    /// Broker backend.
    #[arg(long, value_enum, default_value_t = BrokerKind::Redis)]
    broker: BrokerKind,
}

impl Cli {
    /// Fold CLI flags over loaded settings.
    fn apply_to(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init is a no-op if a subscriber is already set
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

fn build_broker(kind: BrokerKind, settings: &RelaySettings) -> Result<Arc<dyn Broker>> {
    match kind {
        BrokerKind::Redis => {
            let broker = RedisBroker::open(&settings.redis.url())
                .with_context(|| format!("Invalid Redis URL {}", settings.redis.redacted_url()))?;
            info!(url = %settings.redis.redacted_url(), "using redis broker");
            Ok(Arc::new(broker))
        }
        BrokerKind::Memory => {
            warn!("using in-process memory broker; external publishers cannot reach it");
            Ok(Arc::new(MemoryBroker::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut settings = relay_settings::load_settings(args.settings.as_deref())
        .context("Failed to load settings")?;
    args.apply_to(&mut settings);

    init_logging(&settings.logging.level, settings.logging.json);

    let broker = build_broker(args.broker, &settings)?;
    let config = ServerConfig::from_settings(&settings);

    if !probe_broker(broker.as_ref(), config.health_timeout).await {
        warn!("broker not reachable at startup; streams will be refused until it is");
    }

    let mut server = RelayServer::new(config, broker);
    match relay_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => warn!(error = %e, "metrics recorder not installed; /metrics disabled"),
    }

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    info!("relay listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("Shutting down...");
    server
        .shutdown()
        .graceful_shutdown(Some(server.config().shutdown_timeout))
        .await;
    let _ = handle.await;

    info!("Shutdown complete");
    Ok(())
}
