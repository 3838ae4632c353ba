use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::Parser;
use sensu_bridge::{
    SensuConnector,
    broker::amqp::AmqpBroker,
    config::{ConnectorSettings, default_config_path, load_file},
    executor::CheckExecutor,
    logging,
};
use tokio::sync::mpsc;
use tracing::{info, level_filters::LevelFilter, trace, warn};

/// Capacity of the channels between the connector and the check executor
const AGENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Parser)]
#[command(about = "Executes Sensu checks received over RabbitMQ and reports the results")]
struct Args {
    /// Config file (.json or .toml); defaults to ~/.config/sensu-bridge/config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Seconds after which a running check is reported as timed out
    #[arg(long, default_value_t = 30)]
    check_timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    logging::init(args.log_level, args.log_file.as_deref())?;
    trace!("started with args: {args:?}");

    let path = args
        .config
        .or_else(default_config_path)
        .ok_or_else(|| anyhow!("no configuration file given and no default found"))?;
    let provider = load_file(&path)?;
    let settings = ConnectorSettings::from_provider(provider.as_ref())
        .with_context(|| format!("invalid configuration in {}", path.display()))?;

    let executor = CheckExecutor::new(
        settings.client_name.clone(),
        Duration::from_secs(args.check_timeout),
    );

    let mut connector = SensuConnector::new(settings, Arc::new(AmqpBroker::new()));
    connector
        .connect()
        .await
        .context("failed to connect to the Sensu broker")?;

    let (request_tx, request_rx) = mpsc::channel(AGENT_CHANNEL_CAPACITY);
    let (result_tx, result_rx) = mpsc::channel(AGENT_CHANNEL_CAPACITY);

    let agent = tokio::spawn(executor.serve(request_rx, result_tx));
    connector.start(request_tx, result_rx)?;

    info!(
        queue = ?connector.queue_name(),
        subscriptions = ?connector.subscriptions(),
        "bridge running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");

    let failures = connector.disconnect().await;
    if !failures.is_empty() {
        warn!("{} broker resources did not close cleanly", failures.len());
    }
    agent.abort();

    Ok(())
}
