//! Queue population phase
//!
//! Retrieves candidates from the source, drops the ones whose reference is
//! already in the work queue, and submits the rest with bounded concurrency.

pub mod dedup;
pub mod source;
pub mod submitter;

pub use dedup::{collect_existing_references, filter_new, unique_by_reference, DEFAULT_PAGE_SIZE};
pub use source::{CandidateSource, EmptySource, HttpCandidateSource, SourceError};
pub use submitter::{submit_all, summarize, SubmissionOutcome, SubmitterConfig};

use crate::error::{RunnerError, RunnerResult};
use crate::observability::metrics::{log_snapshot, metrics};
use crate::population_span;
use crate::queue::WorkQueue;
use serde::Serialize;
use tracing::{info, Instrument};

/// Counts for one population run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PopulationReport {
    pub retrieved: usize,
    pub already_queued: usize,
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Run one population pass against `queue`.
///
/// Failing to list the queue or to read the source aborts the run before any
/// submission; failed submissions only show up in the report.
pub async fn populate_queue(
    queue: &dyn WorkQueue,
    source: &dyn CandidateSource,
    config: &SubmitterConfig,
    page_size: u32,
) -> RunnerResult<PopulationReport> {
    let span = population_span!(workqueue = %queue.name());
    let result = async move {
        metrics().set_phase("populating");
        info!("Starting queue population");

        let candidates = unique_by_reference(source.retrieve_candidates().await?);
        let retrieved = candidates.len();

        let existing = collect_existing_references(queue, page_size).await?;
        for candidate in candidates
            .iter()
            .filter(|c| existing.contains(&c.reference))
        {
            info!(reference = %candidate.reference, "Reference already in queue, item not added");
        }

        let fresh = filter_new(candidates, &existing);
        let submitted = fresh.len();
        let outcomes = submit_all(queue, fresh, config).await;
        let (succeeded, failed) = summarize(&outcomes);

        let report = PopulationReport {
            retrieved,
            already_queued: retrieved - submitted,
            submitted,
            succeeded,
            failed,
        };
        info!(report = ?report, "Queue population finished");
        Ok::<_, RunnerError>(report)
    }
    .instrument(span)
    .await;

    log_snapshot("population");
    result
}
