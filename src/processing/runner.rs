//! Sequential queue processing loop
//!
//! Items are pulled one at a time and every one is resolved to exactly one
//! terminal status:
//!
//! - success: `completed`
//! - business fault: `pending user action`, run continues untouched
//! - process fault: `failed`, operator notified, health counter bumped,
//!   environment reset
//!
//! The outer loop re-scans the queue while the health counter is below the
//! ceiling. The ceiling is checked between passes, so a pass always drains
//! the queue before the run can end on it.

use super::environment::Environment;
use super::processor::ItemProcessor;
use crate::error::{RunnerError, RunnerResult};
use crate::fault::{classify, FaultDetail, ItemFault};
use crate::notify::FaultAlerts;
use crate::observability::metrics::{log_snapshot, metrics};
use crate::queue::{CheckedOutItem, CompletionNote, WorkItem, WorkQueue};
use crate::{item_span, lifecycle_span};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn, Instrument};

const COMPLETION_MESSAGE: &str = "Process completed without exceptions";

#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    /// Process-health ceiling
    pub max_retry: u32,
    pub item_timeout: Option<Duration>,
    pub notify_on_process_fault: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_retry: 3,
            item_timeout: None,
            notify_on_process_fault: true,
        }
    }
}

/// Counts for one processing run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingReport {
    pub passes: u32,
    pub completed: usize,
    pub pending_user: usize,
    pub failed: usize,
    /// Process-faulted items the queue refused to mark failed
    pub release_failures: usize,
    pub resets: u32,
    pub process_faults: u32,
}

/// Run-scoped state, owned by one `run` call
#[derive(Debug, Default)]
struct RunState {
    report: ProcessingReport,
    last_fault: Option<FaultDetail>,
}

enum PassEnd {
    QueueEmpty,
    Drained,
}

pub struct ProcessingLoop<E: Environment> {
    queue: Arc<dyn WorkQueue>,
    processor: Arc<dyn ItemProcessor>,
    environment: E,
    alerts: FaultAlerts,
    config: ProcessingConfig,
}

impl<E: Environment> ProcessingLoop<E> {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        processor: Arc<dyn ItemProcessor>,
        environment: E,
        alerts: FaultAlerts,
        config: ProcessingConfig,
    ) -> Self {
        Self {
            queue,
            processor,
            environment,
            alerts,
            config,
        }
    }

    /// Process the queue until it is empty or the health ceiling is reached.
    ///
    /// The environment is started once up front and closed exactly once on
    /// the way out, whatever the outcome.
    pub async fn run(mut self) -> RunnerResult<ProcessingReport> {
        metrics().set_phase("processing");
        info!(
            workqueue = %self.queue.name(),
            max_retry = self.config.max_retry,
            "Starting queue processing"
        );

        let result = self.run_passes().await;
        let close_result = self.close_environment().await;
        log_snapshot("processing");

        let report = result?;
        close_result?;

        info!(report = ?report, "Queue processing finished");
        Ok(report)
    }

    async fn run_passes(&mut self) -> RunnerResult<ProcessingReport> {
        self.environment
            .startup()
            .instrument(lifecycle_span!(stage = "startup"))
            .await
            .map_err(|e| RunnerError::EnvironmentFailed {
                detail: FaultDetail::process_from_error(&e),
            })?;

        let mut state = RunState::default();
        while state.report.process_faults < self.config.max_retry {
            state.report.passes += 1;
            match self.run_pass(&mut state).await? {
                PassEnd::QueueEmpty => return Ok(state.report),
                PassEnd::Drained => {}
            }
        }

        let faults = state.report.process_faults;
        error!(
            faults,
            max_retry = self.config.max_retry,
            report = ?state.report,
            "Process-health ceiling reached, stopping"
        );
        let last = state
            .last_fault
            .unwrap_or_else(|| FaultDetail::process("process-health ceiling reached"));
        Err(RunnerError::HealthBudgetExhausted { faults, last })
    }

    /// Drain the queue once
    async fn run_pass(&mut self, state: &mut RunState) -> RunnerResult<PassEnd> {
        let mut pulled = 0usize;
        while let Some(item) = self.queue.next_item().await? {
            pulled += 1;
            let span = item_span!(item_id = item.id, pass = state.report.passes);
            self.process_item(state, item).instrument(span).await?;
        }

        if pulled == 0 {
            info!(pass = state.report.passes, "Queue is empty");
            Ok(PassEnd::QueueEmpty)
        } else {
            info!(pass = state.report.passes, items = pulled, "Pass finished");
            Ok(PassEnd::Drained)
        }
    }

    async fn process_item(&mut self, state: &mut RunState, item: WorkItem) -> RunnerResult<()> {
        let started = Instant::now();
        let mut handle = CheckedOutItem::new(self.queue.clone(), item);
        let reference = handle
            .item()
            .reference
            .clone()
            .unwrap_or_else(|| handle.item().id.to_string());

        let outcome = self.run_item(handle.item()).await;
        match outcome {
            Ok(()) => {
                let note = CompletionNote::completed(COMPLETION_MESSAGE);
                match handle.complete(&note).await {
                    Ok(()) => {
                        state.report.completed += 1;
                        metrics().item_completed(started.elapsed());
                        info!(reference = %reference, "Item completed");
                        Ok(())
                    }
                    Err(e) => {
                        let detail = FaultDetail::process_from_error(&e);
                        self.handle_process_fault(state, handle, detail, &reference, started)
                            .await
                    }
                }
            }
            Err(ItemFault::Business(detail)) => {
                info!(reference = %reference, fault = %detail.to_json(), "Business fault, item needs user action");
                match handle.mark_pending_user(&detail).await {
                    Ok(()) => {
                        state.report.pending_user += 1;
                        metrics().item_pending_user(started.elapsed());
                        Ok(())
                    }
                    Err(e) => {
                        let detail = FaultDetail::process_from_error(&e);
                        self.handle_process_fault(state, handle, detail, &reference, started)
                            .await
                    }
                }
            }
            Err(ItemFault::Process(detail)) => {
                self.handle_process_fault(state, handle, detail, &reference, started)
                    .await
            }
        }
    }

    async fn run_item(&self, item: &WorkItem) -> Result<(), ItemFault> {
        let (payload, reference) = item
            .item_info()
            .map_err(|e| ItemFault::Process(FaultDetail::process_from_error(&e)))?;

        let processing = self.processor.process(&payload, &reference);
        let result = match self.config.item_timeout {
            Some(limit) => match tokio::time::timeout(limit, processing).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(ItemFault::Process(FaultDetail::process(format!(
                        "item processing timed out after {}s",
                        limit.as_secs()
                    ))))
                }
            },
            None => processing.await,
        };

        result.map_err(classify)
    }

    async fn handle_process_fault(
        &mut self,
        state: &mut RunState,
        mut handle: CheckedOutItem,
        detail: FaultDetail,
        reference: &str,
        started: Instant,
    ) -> RunnerResult<()> {
        error!(reference, fault = %detail.to_json(), "Process fault while processing item");

        match handle.fail(&detail).await {
            Ok(()) => {
                state.report.failed += 1;
                metrics().item_failed(started.elapsed());
            }
            Err(e) => {
                state.report.release_failures += 1;
                metrics().release_failed(started.elapsed());
                warn!(reference, error = %e, "Could not mark item failed, releasing it in the background");
            }
        }
        drop(handle);

        state.report.process_faults += 1;
        state.last_fault = Some(detail.clone());
        metrics().process_fault();

        if self.config.notify_on_process_fault {
            self.alerts.notify_best_effort(&detail, Some(reference)).await;
        }

        self.environment
            .reset()
            .instrument(lifecycle_span!(stage = "reset", faults = state.report.process_faults))
            .await
            .map_err(|e| {
                error!(error = %e, "Environment reset failed");
                RunnerError::EnvironmentFailed {
                    detail: FaultDetail::process_from_error(&e),
                }
            })?;
        state.report.resets += 1;
        metrics().environment_reset();
        info!(faults = state.report.process_faults, "Environment reset");
        Ok(())
    }

    async fn close_environment(&mut self) -> RunnerResult<()> {
        self.environment
            .close()
            .instrument(lifecycle_span!(stage = "close"))
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to close environment");
                RunnerError::EnvironmentFailed {
                    detail: FaultDetail::process_from_error(&e),
                }
            })
    }
}
