//! Duplicate suppression against the references already in the queue

use crate::queue::{CandidateItem, QueueResult, WorkQueue};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Page size used when listing queue contents (the service maximum)
pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// Fetch every reference in the queue, page by page until an empty page.
///
/// A full page never ends the scan on its own: when the item count is an
/// exact multiple of `page_size` the final request returns an empty page.
pub async fn collect_existing_references(
    queue: &dyn WorkQueue,
    page_size: u32,
) -> QueueResult<HashSet<String>> {
    let mut references = HashSet::new();
    let mut page = 1;

    loop {
        let rows = queue.list_references(page, page_size).await?;
        if rows.is_empty() {
            break;
        }

        debug!(page, rows = rows.len(), "Fetched queue reference page");
        references.extend(rows.into_iter().filter(|reference| !reference.is_empty()));
        page += 1;
    }

    Ok(references)
}

/// Candidates whose reference is not already queued, in their original order
pub fn filter_new(
    candidates: Vec<CandidateItem>,
    existing_references: &HashSet<String>,
) -> Vec<CandidateItem> {
    candidates
        .into_iter()
        .filter(|candidate| !existing_references.contains(&candidate.reference))
        .collect()
}

/// Keep the first candidate for each reference, dropping later repeats
pub fn unique_by_reference(candidates: Vec<CandidateItem>) -> Vec<CandidateItem> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|candidate| {
            let first = seen.insert(candidate.reference.clone());
            if !first {
                warn!(reference = %candidate.reference, "Source returned reference twice, keeping the first");
            }
            first
        })
        .collect()
}
