mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use relay_proto::socket_config::ZmqContext;
use relay_worker::{FnHandler, HandlerError, WorkerRuntimeConfig};

/// relayd - Majordomo-style service broker and worker runtime
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a relay-broker.toml config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the broker reactor
    Broker {
        /// ROUTER bind address, overrides config
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run a worker reactor
    Worker {
        /// DEALER connect address, overrides config
        #[arg(long)]
        connect: Option<String>,

        /// Service name this worker serves, overrides config
        #[arg(long)]
        service: Option<String>,

        /// Reply with the request verbatim - useful for smoke-testing a broker
        #[arg(long)]
        echo: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.verbose)?;

    let config = relay_conf::RelayConfig::load_from(cli.config.as_deref())
        .context("failed to load relay configuration")?;

    match cli.command {
        Commands::Broker { bind } => run_broker(config.broker, bind).await?,
        Commands::Worker { connect, service, echo } => {
            run_worker(config.worker, connect, service, echo).await?
        }
    }

    Ok(())
}

async fn run_broker(config: relay_conf::BrokerConfig, bind_override: Option<String>) -> Result<()> {
    let bind = bind_override.unwrap_or(config.bind);
    tracing::info!(%bind, "starting relay broker");

    let ctx = ZmqContext::new();
    let state = relay_broker::BrokerState::new(
        Duration::from_millis(config.heartbeat_interval_ms),
        config.heartbeat_liveness,
        Duration::from_millis(config.request_timeout_ms),
    );
    let (handle, stop) = relay_broker::spawn(ctx, &bind, state, Duration::from_millis(config.poll_interval_ms))
        .await
        .context("failed to start broker reactor")?;

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down broker");
    stop.stop().await.context("failed to signal broker shutdown")?;
    handle.await.context("broker task panicked")??;
    Ok(())
}

async fn run_worker(
    config: relay_conf::WorkerConfig,
    connect_override: Option<String>,
    service_override: Option<String>,
    echo: bool,
) -> Result<()> {
    let connect = connect_override.unwrap_or(config.connect);
    let service = service_override.unwrap_or(config.service);
    if service.is_empty() {
        anyhow::bail!("a service name is required: pass --service or set it in the config file");
    }
    tracing::info!(%connect, %service, "starting relay worker");

    let handler: Arc<dyn relay_worker::RequestHandler> = if echo {
        Arc::new(FnHandler(|body: Vec<Bytes>| async move { Ok::<_, HandlerError>(body) }))
    } else {
        anyhow::bail!("no request handler configured: pass --echo for the demo handler, or embed relay-worker directly with a custom RequestHandler");
    };

    let ctx = ZmqContext::new();
    let runtime_config = WorkerRuntimeConfig {
        connect,
        service: Bytes::from(service.into_bytes()),
        heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
        heartbeat_liveness: config.heartbeat_liveness,
        poll_interval: Duration::from_millis(config.poll_interval_ms),
        reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
    };
    let (handle, stop) = relay_worker::spawn(ctx, runtime_config, handler)
        .await
        .context("failed to start worker reactor")?;

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down worker");
    stop.stop().await.context("failed to signal worker shutdown")?;
    handle.await.context("worker task panicked")??;
    Ok(())
}
