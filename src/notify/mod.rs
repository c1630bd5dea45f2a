//! Operator notification
//!
//! Per-item process faults are reported best-effort: a failing notifier is
//! logged and the run goes on. The final escalation that ends a run is
//! mandatory and its failure is returned to the caller.

pub mod email;
pub mod screenshot;

pub use email::{EmailNotifier, EmailSettings};
pub use screenshot::{encode_png, CommandScreenCapture, ScreenCapture};

use crate::fault::FaultDetail;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("Invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Failed to build message: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("Screenshot capture failed: {0}")]
    Capture(String),

    #[error("Notifier not configured: {0}")]
    NotConfigured(String),
}

/// What a notification is about, besides the fault itself
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationContext {
    pub process_name: String,
    pub item_reference: Option<String>,
    /// Base64-encoded PNG
    pub screenshot_png_base64: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        detail: &FaultDetail,
        context: &NotificationContext,
    ) -> Result<(), NotifyError>;
}

/// Notifier that only writes the fault to the log; used when SMTP is not configured
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        detail: &FaultDetail,
        context: &NotificationContext,
    ) -> Result<(), NotifyError> {
        error!(
            process_name = %context.process_name,
            reference = context.item_reference.as_deref().unwrap_or(""),
            fault_type = %detail.kind,
            message = %detail.message,
            trace = %detail.trace_text(),
            "Operator notification"
        );
        Ok(())
    }
}

/// Builds notification context (including the screenshot) and dispatches faults
#[derive(Clone)]
pub struct FaultAlerts {
    notifier: Arc<dyn Notifier>,
    capture: Option<Arc<dyn ScreenCapture>>,
    process_name: String,
}

impl FaultAlerts {
    pub fn new<S: Into<String>>(notifier: Arc<dyn Notifier>, process_name: S) -> Self {
        Self {
            notifier,
            capture: None,
            process_name: process_name.into(),
        }
    }

    pub fn with_screen_capture(mut self, capture: Arc<dyn ScreenCapture>) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    async fn context(&self, item_reference: Option<&str>) -> NotificationContext {
        let screenshot_png_base64 = match &self.capture {
            Some(capture) => match capture.capture_png().await {
                Ok(png) => Some(encode_png(&png)),
                Err(e) => {
                    warn!(error = %e, "Screenshot capture failed, notifying without image");
                    None
                }
            },
            None => None,
        };

        NotificationContext {
            process_name: self.process_name.clone(),
            item_reference: item_reference.map(str::to_string),
            screenshot_png_base64,
        }
    }

    /// Report a per-item fault; failures are logged, never returned
    pub async fn notify_best_effort(&self, detail: &FaultDetail, item_reference: Option<&str>) {
        let context = self.context(item_reference).await;
        if let Err(e) = self.notifier.notify(detail, &context).await {
            warn!(error = %e, reference = item_reference.unwrap_or(""), "Failed to notify operator");
        }
    }

    /// Report the fault that ends a run
    pub async fn escalate(&self, detail: &FaultDetail) -> Result<(), NotifyError> {
        let context = self.context(None).await;
        self.notifier.notify(detail, &context).await
    }
}
