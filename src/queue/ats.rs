//! Automation Server REST client
//!
//! Implements [`WorkQueue`] over the Automation Server HTTP API with bearer
//! token authentication:
//!
//! - `GET  {url}/workqueues/{id}/items?page=&size=` lists queue contents
//! - `POST {url}/workqueues/{id}/add` adds an item
//! - `GET  {url}/workqueues/{id}/next_item` checks out the next item (204 when empty)
//! - `PUT  {url}/workitems/{item_id}/status` moves an item to a terminal status

use super::{ItemStatus, QueueError, QueueResult, WorkItem, WorkQueue};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Connection settings for one Automation Server work queue
#[derive(Debug, Clone)]
pub struct AtsClientConfig {
    /// API base URL, e.g. `https://ats.example.org/api`
    pub base_url: String,
    /// Bearer token
    pub token: String,
    pub workqueue_id: u64,
    pub workqueue_name: String,
    /// Per-request timeout
    pub timeout: Duration,
}

/// Work queue backed by the Automation Server API
pub struct AtsWorkQueue {
    config: AtsClientConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct AddItemRequest<'a> {
    data: &'a Value,
    reference: &'a str,
}

#[derive(Debug, Serialize)]
struct StatusUpdate<'a> {
    status: ItemStatus,
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct ItemsPage {
    #[serde(default)]
    items: Vec<ListedItem>,
}

#[derive(Debug, Deserialize)]
struct ListedItem {
    #[serde(default)]
    reference: Option<String>,
}

impl AtsWorkQueue {
    pub fn new(config: AtsClientConfig) -> QueueResult<Self> {
        // Validate early so a bad URL fails at startup, not mid-run
        Url::parse(&config.base_url)?;

        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self, path: &str) -> QueueResult<Url> {
        let base = self.config.base_url.trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    fn queue_endpoint(&self, suffix: &str) -> QueueResult<Url> {
        self.endpoint(&format!("workqueues/{}/{suffix}", self.config.workqueue_id))
    }

    async fn check(response: reqwest::Response) -> QueueResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(QueueError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl WorkQueue for AtsWorkQueue {
    fn name(&self) -> &str {
        &self.config.workqueue_name
    }

    async fn add_item(&self, data: &Value, reference: &str) -> QueueResult<WorkItem> {
        let url = self.queue_endpoint("add")?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.token)
            .json(&AddItemRequest { data, reference })
            .send()
            .await?;

        let item = Self::check(response).await?.json::<WorkItem>().await?;
        debug!(item_id = item.id, reference, "Work item created");
        Ok(item)
    }

    async fn next_item(&self) -> QueueResult<Option<WorkItem>> {
        let url = self.queue_endpoint("next_item")?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.config.token)
            .send()
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let item = Self::check(response).await?.json::<WorkItem>().await?;
        Ok(Some(item))
    }

    async fn update_status(
        &self,
        item_id: u64,
        status: ItemStatus,
        message: &str,
    ) -> QueueResult<()> {
        let url = self.endpoint(&format!("workitems/{item_id}/status"))?;
        let response = self
            .client
            .put(url)
            .bearer_auth(&self.config.token)
            .json(&StatusUpdate { status, message })
            .send()
            .await?;

        Self::check(response).await?;
        debug!(item_id, ?status, "Work item status updated");
        Ok(())
    }

    async fn list_references(&self, page: u32, page_size: u32) -> QueueResult<Vec<String>> {
        let mut url = self.queue_endpoint("items")?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("size", &page_size.to_string());

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.config.token)
            .send()
            .await?;

        let page = Self::check(response).await?.json::<ItemsPage>().await?;
        // Rows without a reference stay in the page as "" so page emptiness is
        // judged on the raw listing
        Ok(page
            .items
            .into_iter()
            .map(|row| row.reference.unwrap_or_default())
            .collect())
    }
}
