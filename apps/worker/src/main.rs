//! Kiln Worker - Entry Point
//!
//! Consumes training jobs from the broker and runs them one at a time.

use anyhow::Context;
use clap::Parser;
use kiln_core::{
    AckMode, AmqpSource, HttpArtifactFetcher, HttpDatasetLoader, HttpModelPublisher, HttpStatusReporter,
    JobPipeline, PipelineSettings, QueueConsumer, WorkerConfig,
};
use kiln_training::{EpochTrainer, LinearBackend};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "kiln_core=info,kiln_training=info,info";

/// Kiln worker - queue-driven model training
#[derive(Parser, Debug)]
#[command(name = "kiln-worker", author, version, about = "Kiln - queue-driven model training worker")]
struct Args {
    /// Path to a TOML config file (defaults to ./kiln.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(short, long, default_value = DEFAULT_LOG_FILTER)]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Queue to consume (overrides config and KILN_QUEUE)
    #[arg(long)]
    queue: Option<String>,

    /// Broker host, `user:pass@host:port` or a full amqp:// URI
    #[arg(long)]
    amqp_host: Option<String>,

    /// Root directory for job scratch files
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// When to acknowledge deliveries (auto, after_reply)
    #[arg(long)]
    ack_mode: Option<AckMode>,
}

impl Args {
    fn apply(&self, config: &mut WorkerConfig) {
        if let Some(queue) = &self.queue {
            config.queue.clone_from(queue);
        }
        if let Some(host) = &self.amqp_host {
            config.amqp_host.clone_from(host);
        }
        if let Some(dir) = &self.work_dir {
            config.work_dir.clone_from(dir);
        }
        if let Some(mode) = self.ack_mode {
            config.ack_mode = mode;
        }
    }
}

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if args.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let mut config = WorkerConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    run(config).await
}

async fn run(config: WorkerConfig) -> anyhow::Result<()> {
    let client = config.http_client().context("failed to build HTTP client")?;
    let api_url = config.api_base_url();

    let pipeline = JobPipeline::new(
        Arc::new(HttpStatusReporter::new(client.clone(), api_url.clone())),
        Arc::new(HttpArtifactFetcher::new(client.clone(), config.convert_base_url())),
        Arc::new(HttpDatasetLoader::new(client.clone())),
        Arc::new(EpochTrainer::new(LinearBackend)),
        Arc::new(HttpModelPublisher::new(client, api_url.clone())),
        PipelineSettings::from(&config),
    );

    std::fs::create_dir_all(&config.work_dir)
        .with_context(|| format!("failed to create work dir {}", config.work_dir.display()))?;

    info!(
        convert_url = %config.convert_base_url(),
        api_url = %api_url,
        work_dir = %config.work_dir.display(),
        "starting worker"
    );
    let source = AmqpSource::connect(&config).await.context("failed to connect to broker")?;
    let mut consumer = QueueConsumer::new(source, pipeline, config.ack_mode);

    let stats = consumer.run_until(shutdown_signal()).await.context("broker connection lost")?;
    info!(received = stats.received, completed = stats.completed, failed = stats.failed, "worker stopped");

    consumer.into_source().close().await.context("failed to close broker connection")?;
    Ok(())
}

/// Resolves on Ctrl-C. If the handler cannot be installed, never resolves.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
