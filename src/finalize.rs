//! Finalize phase
//!
//! Runs a process-specific closing step under the same fault classification
//! as item processing.

use crate::error::{RunnerError, RunnerResult};
use crate::fault::{classify, ItemError, ItemFault};
use crate::lifecycle_span;
use crate::notify::FaultAlerts;
use crate::observability::metrics::{log_snapshot, metrics};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{error, info, Instrument};

#[async_trait]
pub trait Finalizer: Send + Sync {
    async fn finalize(&self) -> Result<(), ItemError>;
}

/// Finalizer with nothing to do
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFinalizer;

#[async_trait]
impl Finalizer for NoopFinalizer {
    async fn finalize(&self) -> Result<(), ItemError> {
        Ok(())
    }
}

/// POSTs to a configured URL; 422 is a business fault
pub struct HttpFinalizer {
    url: String,
    client: reqwest::Client,
}

impl HttpFinalizer {
    pub fn new<S: Into<String>>(url: S, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            url: url.into(),
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl Finalizer for HttpFinalizer {
    async fn finalize(&self) -> Result<(), ItemError> {
        let response = self
            .client
            .post(&self.url)
            .send()
            .await
            .map_err(ItemError::other)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            return Err(ItemError::business(body));
        }
        Err(ItemError::other(format!(
            "finalize endpoint returned {}: {body}",
            status.as_u16()
        )))
    }
}

/// Run the finalize phase.
///
/// A business fault is logged and the phase succeeds. Any other error is
/// reported to the operator and returned as [`RunnerError::FinalizeFailed`].
pub async fn finalize(finalizer: &dyn Finalizer, alerts: &FaultAlerts) -> RunnerResult<()> {
    let span = lifecycle_span!(phase = "finalize", process_name = %alerts.process_name());
    let result = async move {
        metrics().set_phase("finalizing");
        info!("Starting finalize");

        let Err(err) = finalizer.finalize().await else {
            info!("Finalize completed");
            return Ok(());
        };

        match classify(err) {
            ItemFault::Business(detail) => {
                info!(fault = %detail.to_json(), "Business fault during finalize");
                Ok(())
            }
            ItemFault::Process(detail) => {
                error!(fault = %detail.to_json(), "Process fault during finalize");
                if let Err(e) = alerts.escalate(&detail).await {
                    error!(error = %e, "Failed to notify operator about finalize failure");
                }
                Err(RunnerError::FinalizeFailed { detail })
            }
        }
    }
    .instrument(span)
    .await;

    log_snapshot("finalize");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultKind;
    use crate::testing::mocks::{MockFinalizer, MockNotifier};
    use std::sync::Arc;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_success_does_not_notify() {
        let notifier = Arc::new(MockNotifier::new());
        let alerts = FaultAlerts::new(notifier.clone(), "intake");

        finalize(&MockFinalizer::succeeding(), &alerts).await.unwrap();

        assert!(notifier.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_business_fault_is_not_an_error() {
        let notifier = Arc::new(MockNotifier::new());
        let alerts = FaultAlerts::new(notifier.clone(), "intake");

        finalize(&MockFinalizer::business("nothing to report"), &alerts)
            .await
            .unwrap();

        assert!(notifier.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_other_error_notifies_and_fails() {
        let notifier = Arc::new(MockNotifier::new());
        let alerts = FaultAlerts::new(notifier.clone(), "intake");

        let err = finalize(&MockFinalizer::failing("report upload failed"), &alerts)
            .await
            .unwrap_err();

        assert!(err.already_notified());
        let sent = notifier.notifications();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.kind, FaultKind::Process);
        assert_eq!(sent[0].0.message, "report upload failed");
    }

    #[tokio::test]
    async fn test_http_finalizer_maps_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .mount(&server)
            .await;

        let finalizer = HttpFinalizer::new(server.uri(), Duration::from_secs(5)).unwrap();
        let fault = classify(finalizer.finalize().await.unwrap_err());

        assert_eq!(fault.kind(), FaultKind::Process);
        assert!(fault.detail().message.contains("500"));
    }
}
