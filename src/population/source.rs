//! Source of candidate items for population

use crate::queue::CandidateItem;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Errors raised while retrieving candidates
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Source returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

/// Retrieves records that should be enqueued; an empty result is not an error
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn retrieve_candidates(&self) -> Result<Vec<CandidateItem>, SourceError>;
}

/// Source with nothing to offer, used when no source is configured
pub struct EmptySource;

#[async_trait]
impl CandidateSource for EmptySource {
    async fn retrieve_candidates(&self) -> Result<Vec<CandidateItem>, SourceError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct SourceRow {
    #[serde(default)]
    reference: Option<Value>,
    #[serde(default)]
    data: Value,
}

/// Candidates fetched from an HTTP endpoint returning `[{reference, data}, ...]`
pub struct HttpCandidateSource {
    url: String,
    client: reqwest::Client,
}

impl HttpCandidateSource {
    pub fn new<S: Into<String>>(url: S, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

/// Turn raw rows into candidates, skipping rows without a usable reference
fn rows_to_candidates(rows: Vec<SourceRow>) -> Vec<CandidateItem> {
    rows.into_iter()
        .enumerate()
        .filter_map(|(index, row)| {
            let reference = match row.reference {
                Some(Value::String(s)) if !s.is_empty() => s,
                Some(Value::Number(n)) => n.to_string(),
                _ => {
                    warn!(row = index, "Skipping source row without a reference");
                    return None;
                }
            };
            Some(CandidateItem::new(reference, row.data))
        })
        .collect()
}

#[async_trait]
impl CandidateSource for HttpCandidateSource {
    async fn retrieve_candidates(&self) -> Result<Vec<CandidateItem>, SourceError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();

        if status == StatusCode::NO_CONTENT {
            info!("Source has no records");
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let rows: Vec<SourceRow> = response.json().await?;
        let candidates = rows_to_candidates(rows);
        info!(count = candidates.len(), "Retrieved candidates from source");
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn source_for(server: &MockServer) -> HttpCandidateSource {
        HttpCandidateSource::new(format!("{}/candidates", server.uri()), Duration::from_secs(5))
            .unwrap()
    }

    #[test]
    fn test_rows_without_reference_are_skipped() {
        let rows: Vec<SourceRow> = serde_json::from_value(json!([
            {"reference": "a", "data": {"x": 1}},
            {"data": {"x": 2}},
            {"reference": "", "data": {}},
            {"reference": 42, "data": null},
        ]))
        .unwrap();

        let candidates = rows_to_candidates(rows);

        let refs: Vec<_> = candidates.iter().map(|c| c.reference.as_str()).collect();
        assert_eq!(refs, vec!["a", "42"]);
        assert_eq!(candidates[0].payload, json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_empty_source_yields_nothing() {
        assert!(EmptySource.retrieve_candidates().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_http_source_parses_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/candidates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"reference": "form-1", "data": {"pages": 2}},
                {"data": {"pages": 9}},
                {"reference": "form-2", "data": {"pages": 4}},
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let candidates = source_for(&server).await.retrieve_candidates().await.unwrap();

        assert_eq!(
            candidates,
            vec![
                CandidateItem::new("form-1", json!({"pages": 2})),
                CandidateItem::new("form-2", json!({"pages": 4})),
            ]
        );
    }

    #[tokio::test]
    async fn test_http_source_no_content_yields_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/candidates"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let candidates = source_for(&server).await.retrieve_candidates().await.unwrap();

        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_http_source_empty_array_yields_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/candidates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        assert!(source_for(&server)
            .await
            .retrieve_candidates()
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_http_source_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/candidates"))
            .respond_with(ResponseTemplate::new(503).set_body_string("database offline"))
            .mount(&server)
            .await;

        let err = source_for(&server)
            .await
            .retrieve_candidates()
            .await
            .unwrap_err();

        match err {
            SourceError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "database offline");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
