//! The "process one item" seam

use crate::fault::ItemError;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Business logic applied to one dequeued item
///
/// Return [`ItemError::Business`] for records that need a human decision;
/// every other error counts as a process fault.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn process(&self, payload: &Value, reference: &str) -> Result<(), ItemError>;
}

#[derive(Debug, Error)]
#[error("processor endpoint returned {status}: {body}")]
pub struct ProcessorStatusError {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Serialize)]
struct ProcessRequest<'a> {
    reference: &'a str,
    data: &'a Value,
}

/// Delegates processing to an HTTP endpoint
///
/// 2xx is success, 422 is a business fault carrying the response body, and
/// anything else is a process fault.
pub struct HttpItemProcessor {
    url: String,
    client: reqwest::Client,
}

impl HttpItemProcessor {
    pub fn new<S: Into<String>>(url: S, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl ItemProcessor for HttpItemProcessor {
    async fn process(&self, payload: &Value, reference: &str) -> Result<(), ItemError> {
        let response = self
            .client
            .post(&self.url)
            .json(&ProcessRequest {
                reference,
                data: payload,
            })
            .send()
            .await
            .map_err(ItemError::other)?;

        let status = response.status();
        debug!(reference, status = status.as_u16(), "Processor endpoint responded");
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            return Err(ItemError::business(body));
        }
        Err(ItemError::other(ProcessorStatusError {
            status: status.as_u16(),
            body,
        }))
    }
}

/// Processor that accepts every item; used when no endpoint is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllProcessor;

#[async_trait]
impl ItemProcessor for AcceptAllProcessor {
    async fn process(&self, _payload: &Value, reference: &str) -> Result<(), ItemError> {
        debug!(reference, "No processor configured, accepting item");
        Ok(())
    }
}
