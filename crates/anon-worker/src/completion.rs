//! Post-acknowledgement completion of a processed item.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use anon_models::{Identifier, WorkItem};
use anon_queue::LeaseQueue;

use crate::logging::ItemLogger;
use crate::metrics;
use crate::publisher::{package, Publisher};

/// What a completion task did with its item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Published { identifier: Identifier, url: String },
    Rejected,
    Failed { stage: &'static str, error: String },
}

/// Everything a completion task needs, shared across tasks.
pub struct CompletionContext {
    pub publisher: Publisher,
    pub queue: Arc<dyn LeaseQueue>,
    pub output_dir: PathBuf,
    pub results_container: String,
    pub report_rejected: bool,
}

/// Package and publish a positive result, or account for a rejected one.
///
/// Runs after the item was acknowledged, so failures here lose the result
/// for good. They are logged and counted, never retried.
pub async fn complete_item(
    ctx: Arc<CompletionContext>,
    item: WorkItem,
    result: Option<Identifier>,
) -> CompletionOutcome {
    let logger = ItemLogger::new(&item, "complete");

    let Some(identifier) = result else {
        if ctx.report_rejected {
            let queue_name = ctx.queue.error_queue_name();
            if let Err(e) = ctx.queue.insert_error_queue(&queue_name, &item).await {
                logger.log_warning(&format!("Failed to report rejected item: {}", e));
            } else {
                debug!(queue = %queue_name, "Reported rejected item");
            }
        }
        logger.log_completion("no target pattern, nothing to publish");
        return CompletionOutcome::Rejected;
    };

    let published = async {
        let bundle = package(&ctx.output_dir, &identifier).await?;
        logger.log_progress(&format!("packaged {}", bundle.display()));
        ctx.publisher.publish(&bundle, &ctx.results_container).await
    }
    .await;

    match published {
        Ok(url) => {
            metrics::record_result_published();
            info!(identifier = %identifier, url = %url, "Result published");
            CompletionOutcome::Published { identifier, url }
        }
        Err(e) => {
            metrics::record_publish_failure();
            metrics::record_item_failed(e.stage());
            logger.log_error(e.stage(), &format!("result {} not published: {}", identifier, e));
            CompletionOutcome::Failed {
                stage: e.stage(),
                error: e.to_string(),
            }
        }
    }
}
