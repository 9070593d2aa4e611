//! # crawlgate-gateway
//!
//! Gateway binary — loads config, connects the broker, and starts the
//! WebSocket server.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use crawlgate_broker::{AmqpBroker, Broker, MemoryBroker};
use crawlgate_server::config::{GatewayConfig, load_config_from_path};
use crawlgate_server::metrics::install_recorder;
use crawlgate_server::server::GatewayServer;
use tracing_subscriber::EnvFilter;

/// Crawlgate gateway server.
#[derive(Parser, Debug)]
#[command(name = "crawlgate-gateway", about = "WebSocket gateway for the crawl broker")]
struct Cli {
    /// Host to bind (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides config; 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// AMQP broker URL (overrides config).
    #[arg(long)]
    amqp_url: Option<String>,

    /// Path to the JSON config file.
    #[arg(long, default_value = "crawlgate.json")]
    config: PathBuf,

    /// Use an in-process broker instead of AMQP (local development).
    #[arg(long)]
    memory_broker: bool,
}

impl Cli {
    fn apply(&self, config: &mut GatewayConfig) {
        if let Some(ref host) = self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(ref url) = self.amqp_url {
            config.amqp_url.clone_from(url);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Cli::parse();

    let mut config =
        load_config_from_path(&args.config).context("Failed to load configuration")?;
    args.apply(&mut config);

    // Broker connectivity is a startup prerequisite; failing here
    // aborts the process rather than serving clients with no backend.
    let broker: Arc<dyn Broker> = if args.memory_broker {
        tracing::warn!("using in-process broker; jobs will not leave this process");
        Arc::new(MemoryBroker::new())
    } else {
        let amqp = AmqpBroker::connect(&config.amqp_url)
            .await
            .with_context(|| format!("Failed to connect to broker at {}", config.amqp_url))?;
        tracing::info!(url = %config.amqp_url, "broker connected");
        Arc::new(amqp)
    };

    let metrics_handle = install_recorder();

    let server = GatewayServer::new(config, broker).with_metrics(metrics_handle);
    let handle = server.serve().await.context("Failed to bind server")?;
    tracing::info!("Crawlgate gateway listening on http://{}", handle.addr);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    handle.stop().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
