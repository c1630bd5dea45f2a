//! Bounded-concurrency submission with per-candidate retry
//!
//! Every candidate gets its own retry sequence, run as a future polled
//! concurrently by `join_all` inside the caller's task. A semaphore caps how
//! many sequences run at once; a candidate holds its permit from the first
//! attempt until it succeeds or runs out of attempts, backoff sleeps included.

use crate::backoff;
use crate::observability::metrics::metrics;
use crate::queue::{CandidateItem, WorkQueue};
use futures::future::join_all;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Result of submitting one candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionOutcome {
    pub reference: String,
    pub succeeded: bool,
    /// Add-item calls made for this candidate, always >= 1
    pub attempts: u32,
}

/// Tunables for one submission run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubmitterConfig {
    pub concurrency_limit: usize,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 5,
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Submit every candidate once, returning one outcome per candidate.
///
/// Outcomes are in candidate order. Exhausted candidates are reported, never
/// raised, so one bad record cannot abort the batch.
pub async fn submit_all(
    queue: &dyn WorkQueue,
    candidates: Vec<CandidateItem>,
    config: &SubmitterConfig,
) -> Vec<SubmissionOutcome> {
    if candidates.is_empty() {
        info!("No new items to add");
        return Vec::new();
    }

    let semaphore = Semaphore::new(config.concurrency_limit.max(1));
    let total = candidates.len();

    let submissions = candidates.iter().map(|candidate| {
        let semaphore = &semaphore;
        async move {
            // The semaphore is never closed, so acquire cannot fail
            let _permit = semaphore.acquire().await.ok();
            submit_one(queue, candidate, config).await
        }
    });
    let outcomes = join_all(submissions).await;

    let (succeeded, failed) = summarize(&outcomes);
    info!(succeeded, failed, total, "Submission summary");

    outcomes
}

/// Count succeeded and failed outcomes
pub fn summarize(outcomes: &[SubmissionOutcome]) -> (usize, usize) {
    let succeeded = outcomes.iter().filter(|o| o.succeeded).count();
    (succeeded, outcomes.len() - succeeded)
}

async fn submit_one(
    queue: &dyn WorkQueue,
    candidate: &CandidateItem,
    config: &SubmitterConfig,
) -> SubmissionOutcome {
    let reference = candidate.reference.as_str();
    let data = candidate.queue_data();
    let collector = metrics();
    let mut attempt = 1;

    loop {
        collector.add_attempted();
        match queue.add_item(&data, reference).await {
            Ok(item) => {
                collector.item_added();
                info!(reference, item_id = item.id, attempt, "Added item to queue");
                return SubmissionOutcome {
                    reference: reference.to_string(),
                    succeeded: true,
                    attempts: attempt,
                };
            }
            Err(e) if attempt >= config.max_retries => {
                collector.add_failed();
                error!(
                    reference,
                    attempts = attempt,
                    error = %e,
                    "Failed to add item after all attempts"
                );
                return SubmissionOutcome {
                    reference: reference.to_string(),
                    succeeded: false,
                    attempts: attempt,
                };
            }
            Err(e) => {
                let wait = backoff::delay(attempt, config.base_delay);
                warn!(
                    reference,
                    attempt,
                    max_retries = config.max_retries,
                    backoff_ms = backoff::millis(wait),
                    error = %e,
                    "Error adding item, retrying"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
        }
    }
}
