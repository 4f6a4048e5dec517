//! Worker loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use anon_models::{Identifier, WorkItem};
use anon_queue::LeaseQueue;

use crate::completion::{complete_item, CompletionContext};
use crate::coordinator::{CompletionCoordinator, DrainReport};
use crate::error::{WorkerError, WorkerResult};
use crate::fetcher::Fetcher;
use crate::logging::ItemLogger;
use crate::metrics;
use crate::processor::Processor;

/// Consecutive queue failures tolerated before the loop gives up.
const MAX_CONSECUTIVE_QUEUE_ERRORS: u32 = 12;
const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Timing and sizing of the loop.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub lease_duration: Duration,
    pub poll_timeout: Duration,
    pub output_dir: PathBuf,
    pub max_inflight_completions: usize,
}

/// Summary of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Items leased and handled, whatever their fate
    pub processed: usize,
    pub drain: DrainReport,
}

/// Leases items until the queue is empty, then drains completions.
pub struct WorkerLoop {
    queue: Arc<dyn LeaseQueue>,
    fetcher: Fetcher,
    processor: Processor,
    completion: Arc<CompletionContext>,
    settings: LoopSettings,
    shutdown: Option<watch::Receiver<bool>>,
}

impl WorkerLoop {
    pub fn new(
        queue: Arc<dyn LeaseQueue>,
        fetcher: Fetcher,
        processor: Processor,
        completion: Arc<CompletionContext>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            queue,
            fetcher,
            processor,
            completion,
            settings,
            shutdown: None,
        }
    }

    /// Stop leasing once `true` is sent. In-flight completions still drain.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Run to completion.
    ///
    /// The drain happens on every exit path, including queue failures.
    pub async fn run(&self) -> WorkerResult<RunSummary> {
        info!(
            lease_secs = self.settings.lease_duration.as_secs(),
            max_inflight = self.settings.max_inflight_completions,
            output = %self.settings.output_dir.display(),
            "Starting worker loop"
        );

        let mut coordinator = CompletionCoordinator::new(self.settings.max_inflight_completions);
        let consumed = self.consume(&mut coordinator).await;
        let drain = coordinator.drain().await;

        match consumed {
            Ok(processed) => {
                info!(processed, "Worker loop finished");
                Ok(RunSummary { processed, drain })
            }
            Err(e) => {
                error!(stage = e.stage(), "Worker loop aborted: {}", e);
                Err(e)
            }
        }
    }

    async fn consume(&self, coordinator: &mut CompletionCoordinator) -> WorkerResult<usize> {
        let mut processed = 0;
        let mut queue_errors = 0;

        loop {
            if self.shutdown_requested() {
                info!("Shutdown requested, no further items will be leased");
                break;
            }

            match self.step(coordinator).await {
                Ok(Step::Finished) => break,
                Ok(Step::Handled) => {
                    processed += 1;
                    queue_errors = 0;
                }
                Ok(Step::Idle) => queue_errors = 0,
                Err(e) if matches!(e, WorkerError::Queue(_)) => {
                    queue_errors += 1;
                    if queue_errors >= MAX_CONSECUTIVE_QUEUE_ERRORS {
                        return Err(e);
                    }
                    warn!(attempt = queue_errors, "Queue operation failed: {}", e);
                    tokio::time::sleep(QUEUE_ERROR_BACKOFF).await;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(processed)
    }

    async fn step(&self, coordinator: &mut CompletionCoordinator) -> WorkerResult<Step> {
        if self.queue.empty().await? {
            info!("Queue empty");
            return Ok(Step::Finished);
        }

        let leased = self
            .queue
            .lease(self.settings.lease_duration, true, self.settings.poll_timeout)
            .await?;

        let Some(item) = leased else {
            let reclaimed = self.queue.check_expired_leases().await?;
            info!(reclaimed, "Waiting for work");
            return Ok(Step::Idle);
        };

        metrics::record_item_leased();
        self.handle_item(item, coordinator).await?;
        Ok(Step::Handled)
    }

    async fn handle_item(
        &self,
        item: WorkItem,
        coordinator: &mut CompletionCoordinator,
    ) -> WorkerResult<()> {
        let logger = ItemLogger::new(&item, "anonymise");
        logger.log_start("leased");

        let url = match item.url() {
            Ok(url) => url,
            Err(e) => {
                let e = WorkerError::from(e);
                logger.log_error(e.stage(), &format!("{}, moving to error queue", e));
                metrics::record_item_failed(e.stage());
                self.queue.complete(&item).await?;
                let queue_name = self.queue.error_queue_name();
                self.queue.insert_error_queue(&queue_name, &item).await?;
                return Ok(());
            }
        };

        let result = match self.fetch_and_process(&url, &logger).await {
            Ok(result) => result,
            Err(e) => {
                // Not acknowledged: the lease runs out and the item is redelivered.
                logger.log_error(e.stage(), &e.to_string());
                metrics::record_item_failed(e.stage());
                return Ok(());
            }
        };

        if let Err(e) = self.queue.complete(&item).await {
            // Still leased, so the item comes back and produces a fresh result.
            if let Some(identifier) = &result {
                self.discard_result(identifier, &logger).await;
            }
            return Err(e.into());
        }
        metrics::record_item_completed();
        logger.log_progress("acknowledged");

        let ctx = Arc::clone(&self.completion);
        coordinator.spawn(complete_item(ctx, item, result)).await?;
        debug!(in_flight = coordinator.in_flight(), "Completion scheduled");
        Ok(())
    }

    async fn discard_result(&self, identifier: &Identifier, logger: &ItemLogger) {
        let dir = self.settings.output_dir.join(identifier.as_str());
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            logger.log_warning(&format!("failed to remove unacknowledged result {}: {}", dir.display(), e));
        }
    }

    async fn fetch_and_process(
        &self,
        url: &reqwest::Url,
        logger: &ItemLogger,
    ) -> WorkerResult<Option<Identifier>> {
        let artifact = self.fetcher.fetch(url).await?;
        logger.log_progress(&format!("fetched to {}", artifact.path().display()));

        let result = self
            .processor
            .process(artifact.path(), &self.settings.output_dir)
            .await;

        if let Err(e) = artifact.close() {
            logger.log_warning(&format!("failed to remove local artifact: {}", e));
        }

        match &result {
            Ok(Some(identifier)) => logger.log_progress(&format!("target pattern found, result {}", identifier)),
            Ok(None) => logger.log_progress("no target pattern"),
            Err(_) => {}
        }
        result
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false)
    }
}

enum Step {
    Finished,
    Handled,
    Idle,
}
