//! Anonymisation worker binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use anon_media::{CommandClassifier, FfmpegFrameDecoder};
use anon_queue::RedisWorkQueue;
use anon_storage::{ObjectStore, S3Store, SwiftClient};
use anon_worker::{
    metrics, Cipher, CompletionContext, Fetcher, LoopSettings, Processor, Publisher,
    StorageBackend, WorkerConfig, WorkerLoop,
};

/// Fetch, decrypt, anonymise and publish queued videos.
#[derive(Debug, Parser)]
#[command(name = "anon-worker", version)]
struct Cli {
    /// Directory receiving result directories and bundles
    #[arg(short = 'o', long = "outputfolder", value_name = "DIR")]
    output_folder: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    init_tracing();

    if let Err(e) = run(cli).await {
        error!("Worker failed: {:#}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    info!("Starting anon-worker");

    let config = WorkerConfig::from_env(cli.output_folder).context("Failed to load configuration")?;
    info!(
        queue = %config.queue.name,
        redis = %config.queue.redis_url(),
        container = %config.results_container,
        storage = config.storage.name(),
        decode_timeout_secs = config.decode_timeout.as_secs(),
        classify_timeout_secs = config.classify_timeout.as_secs(),
        "Worker config loaded"
    );

    if let Some(addr) = config.metrics_addr {
        metrics::init_metrics(addr)?;
    }

    tokio::fs::create_dir_all(&config.input_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.input_dir.display()))?;
    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.output_dir.display()))?;

    let queue = RedisWorkQueue::new(config.queue.clone()).context("Failed to create queue client")?;
    queue.ping().await.context("Redis is unreachable")?;
    info!(session = queue.session(), "Connected to queue");

    let store: Arc<dyn ObjectStore> = match &config.storage {
        StorageBackend::Swift(swift) => Arc::new(
            SwiftClient::new(swift.clone()).context("Failed to create Swift client")?,
        ),
        StorageBackend::S3(s3) => Arc::new(S3Store::new(s3.clone())),
    };
    let publisher = Publisher::new(store);
    publisher
        .prepare_container(&config.results_container)
        .await
        .context("Failed to create results container")?;

    let classifier = CommandClassifier::new(&config.classifier_cmd)
        .with_context(|| format!("Classifier {} unavailable", config.classifier_cmd))?
        .with_timeout(config.classify_timeout);
    let decoder = FfmpegFrameDecoder::new().with_timeout(config.decode_timeout);
    let processor = Processor::new(Arc::new(decoder), Arc::new(classifier));

    let cipher = Cipher::new(&config.encryption_key).context("Invalid encryption key")?;
    let fetcher = Fetcher::new(cipher, &config.input_dir).context("Failed to create HTTP client")?;

    let queue = Arc::new(queue);
    let completion = Arc::new(CompletionContext {
        publisher,
        queue: queue.clone(),
        output_dir: config.output_dir.clone(),
        results_container: config.results_container.clone(),
        report_rejected: config.report_rejected,
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let worker = WorkerLoop::new(
        queue,
        fetcher,
        processor,
        completion,
        LoopSettings {
            lease_duration: config.lease_duration,
            poll_timeout: config.poll_timeout,
            output_dir: config.output_dir.clone(),
            max_inflight_completions: config.max_inflight_completions,
        },
    )
    .with_shutdown(shutdown_rx);

    let summary = worker.run().await?;
    info!(
        processed = summary.processed,
        published = summary.drain.published,
        rejected = summary.drain.rejected,
        failed = summary.drain.failed,
        "Queue drained"
    );
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(_) => {
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}
