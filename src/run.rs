//! Run outcome handling
//!
//! Turns the combined phase result into the process exit code, escalating
//! any fault the failing phase has not already reported.

use crate::error::RunnerResult;
use crate::notify::FaultAlerts;
use crate::observability::metrics::{log_snapshot, metrics};
use tracing::{error, info};

/// Exit code for a run whose phases all finished normally
pub const EXIT_OK: i32 = 0;
/// Exit code after an escalated fault
pub const EXIT_FAILED: i32 = 1;

/// Close out a run and return its exit code.
///
/// On failure the operator is notified unless the phase already did it; a
/// failed escalation is logged and still exits with `EXIT_FAILED`.
pub async fn finish(result: RunnerResult<()>, alerts: &FaultAlerts) -> i32 {
    log_snapshot("run");

    match result {
        Ok(()) => {
            metrics().set_phase("done");
            info!("Run complete");
            EXIT_OK
        }
        Err(e) => {
            metrics().set_phase("failed");
            error!(error = %e, "Run failed");
            if !e.already_notified() {
                if let Err(notify_err) = alerts.escalate(&e.escalation_detail()).await {
                    error!(error = %notify_err, "Failed to escalate fault to operator");
                }
            }
            EXIT_FAILED
        }
    }
}
