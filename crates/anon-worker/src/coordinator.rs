//! Bounded set of in-flight completion tasks.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info};

use crate::completion::CompletionOutcome;
use crate::error::{WorkerError, WorkerResult};

/// Tally of finished completion tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub published: usize,
    pub rejected: usize,
    pub failed: usize,
    pub panicked: usize,
}

impl DrainReport {
    pub fn total(&self) -> usize {
        self.published + self.rejected + self.failed + self.panicked
    }

    fn record(&mut self, joined: Result<CompletionOutcome, JoinError>) {
        match joined {
            Ok(CompletionOutcome::Published { .. }) => self.published += 1,
            Ok(CompletionOutcome::Rejected) => self.rejected += 1,
            Ok(CompletionOutcome::Failed { .. }) => self.failed += 1,
            Err(e) => {
                error!("Completion task did not finish: {}", e);
                self.panicked += 1;
            }
        }
    }
}

/// Runs completion tasks concurrently with the worker loop.
///
/// At most `max_inflight` tasks run at once; `spawn` waits for a free slot.
/// Finished tasks are reaped as new ones are spawned, and `drain` joins
/// whatever is left.
pub struct CompletionCoordinator {
    tasks: JoinSet<CompletionOutcome>,
    permits: Arc<Semaphore>,
    report: DrainReport,
}

impl CompletionCoordinator {
    pub fn new(max_inflight: usize) -> Self {
        Self {
            tasks: JoinSet::new(),
            permits: Arc::new(Semaphore::new(max_inflight.max(1))),
            report: DrainReport::default(),
        }
    }

    /// Start `task`, waiting while the set is full.
    pub async fn spawn<F>(&mut self, task: F) -> WorkerResult<()>
    where
        F: Future<Output = CompletionOutcome> + Send + 'static,
    {
        self.reap_finished();

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::task_failed("Completion semaphore closed"))?;

        self.tasks.spawn(async move {
            let _permit = permit;
            task.await
        });
        Ok(())
    }

    /// Tasks spawned and not yet reaped.
    pub fn in_flight(&mut self) -> usize {
        self.reap_finished();
        self.tasks.len()
    }

    fn reap_finished(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            self.report.record(joined);
        }
    }

    /// Wait for every spawned task to finish.
    pub async fn drain(mut self) -> DrainReport {
        let pending = self.tasks.len();
        if pending > 0 {
            info!(pending, "Waiting for in-flight completions");
        }

        while let Some(joined) = self.tasks.join_next().await {
            self.report.record(joined);
        }

        info!(
            published = self.report.published,
            rejected = self.report.rejected,
            failed = self.report.failed,
            panicked = self.report.panicked,
            "Completions drained"
        );
        self.report
    }
}
