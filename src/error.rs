//! Top-level error types for the work-queue runner
//!
//! Each subsystem owns its own error enum; `RunnerError` is what the phases
//! return to the binary, and decides whether a failure is escalated.

use crate::fault::FaultDetail;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Maximum length of any fault message leaving the process
pub const MAX_MESSAGE_LEN: usize = 500;

const TRUNCATE_SUFFIX: &str = "...[truncated]";

/// Main error type for runner phases
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] crate::queue::QueueError),

    #[error("Source error: {0}")]
    Source(#[from] crate::population::SourceError),

    #[error("Environment error: {0}")]
    Environment(#[from] crate::processing::EnvironmentError),

    #[error("Notification error: {0}")]
    Notify(#[from] crate::notify::NotifyError),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Process-health ceiling reached after {faults} process faults, last: {last}")]
    HealthBudgetExhausted { faults: u32, last: FaultDetail },

    #[error("Environment recovery failed: {detail}")]
    EnvironmentFailed { detail: FaultDetail },

    #[error("Finalize failed: {detail}")]
    FinalizeFailed { detail: FaultDetail },
}

impl RunnerError {
    /// Fault detail carried to the operator when this error ends a phase
    pub fn escalation_detail(&self) -> FaultDetail {
        match self {
            RunnerError::HealthBudgetExhausted { last, .. } => last.clone(),
            RunnerError::EnvironmentFailed { detail } | RunnerError::FinalizeFailed { detail } => {
                detail.clone()
            }
            other => FaultDetail::process_from_error(other),
        }
    }

    /// Whether the phase that produced this error already notified the operator
    pub fn already_notified(&self) -> bool {
        matches!(self, RunnerError::FinalizeFailed { .. })
    }
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("path pattern is valid")
});

/// Redact credentials and sensitive paths, and bound the message length
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_PATTERN.replace_all(message, "${1}=***");
    let mut sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .into_owned();

    if sanitized.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(TRUNCATE_SUFFIX);
    }

    sanitized
}

/// Result type for runner phases
pub type RunnerResult<T> = Result<T, RunnerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultKind;

    #[test]
    fn test_error_message_sanitization() {
        let sanitized =
            sanitize_error_message("Failed to authenticate: password=secret123 token=abc456");

        assert!(!sanitized.contains("secret123"));
        assert!(!sanitized.contains("abc456"));
        assert!(sanitized.contains("password=***"));
        assert!(sanitized.contains("token=***"));
    }

    #[test]
    fn test_long_message_truncation() {
        let sanitized = sanitize_error_message(&"x".repeat(600));

        assert!(sanitized.len() <= MAX_MESSAGE_LEN);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let sanitized = sanitize_error_message(&"ø".repeat(400));

        assert!(sanitized.len() <= MAX_MESSAGE_LEN);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_file_path_redaction() {
        let sanitized =
            sanitize_error_message("Failed to read /home/user/.ssh/id_rsa and /etc/secrets/api.key");

        assert!(sanitized.contains("/***REDACTED***/"));
        assert!(!sanitized.contains("/home/user/.ssh/id_rsa"));
    }

    #[test]
    fn test_sanitize_with_colons() {
        let sanitized = sanitize_error_message("password: secret123 token: abc456");

        assert!(!sanitized.contains("secret123"));
        assert!(!sanitized.contains("abc456"));
    }

    #[test]
    fn test_sanitize_exactly_500_chars() {
        let sanitized = sanitize_error_message(&"x".repeat(500));
        assert_eq!(sanitized.len(), 500);
        assert!(!sanitized.contains("truncated"));
    }

    #[test]
    fn test_health_budget_escalates_last_fault() {
        let last = FaultDetail::process("application crashed");
        let error = RunnerError::HealthBudgetExhausted {
            faults: 3,
            last: last.clone(),
        };

        assert_eq!(error.escalation_detail(), last);
        assert!(error.to_string().contains("3 process faults"));
        assert!(!error.already_notified());
    }

    #[test]
    fn test_other_errors_escalate_as_process_faults() {
        let error = RunnerError::Queue(crate::queue::QueueError::Status {
            status: 503,
            body: "unavailable".to_string(),
        });

        let detail = error.escalation_detail();
        assert_eq!(detail.kind, FaultKind::Process);
        assert!(detail.message.contains("503"));
    }

    #[test]
    fn test_finalize_failure_is_already_notified() {
        let error = RunnerError::FinalizeFailed {
            detail: FaultDetail::process("report upload failed"),
        };
        assert!(error.already_notified());
    }
}
