//! External work queue abstraction
//!
//! The queue of record lives in Automation Server; this module defines the
//! narrow item-lifecycle interface the runner needs and the handle type that
//! guarantees every checked-out item reaches a terminal status.

use crate::fault::FaultDetail;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, warn};

pub mod ats;

pub use ats::{AtsClientConfig, AtsWorkQueue};

/// Errors raised by a work queue implementation
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Queue service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed work item {item_id}: {reason}")]
    MalformedItem { item_id: u64, reason: String },

    #[error("Invalid queue URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

/// A unit of work eligible for enqueueing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    /// Unique business key
    pub reference: String,
    #[serde(rename = "data", default)]
    pub payload: Value,
}

impl CandidateItem {
    pub fn new<S: Into<String>>(reference: S, payload: Value) -> Self {
        Self {
            reference: reference.into(),
            payload,
        }
    }

    /// Item data stored on the queue: `{"item": {"reference": ..., "data": ...}}`
    pub fn queue_data(&self) -> Value {
        json!({ "item": self })
    }
}

/// A work item as returned by the queue service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: u64,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl WorkItem {
    /// Unpack the payload and business reference written by population
    pub fn item_info(&self) -> QueueResult<(Value, String)> {
        let item = self
            .data
            .get("item")
            .ok_or_else(|| self.malformed("missing \"item\" object"))?;
        let payload = item
            .get("data")
            .cloned()
            .ok_or_else(|| self.malformed("missing \"item.data\""))?;
        let reference = match item.get("reference") {
            Some(Value::String(reference)) => reference.clone(),
            Some(Value::Number(reference)) => reference.to_string(),
            _ => return Err(self.malformed("missing \"item.reference\"")),
        };
        Ok((payload, reference))
    }

    fn malformed(&self, reason: &str) -> QueueError {
        QueueError::MalformedItem {
            item_id: self.id,
            reason: reason.to_string(),
        }
    }
}

/// Terminal statuses a checked-out item can be moved to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemStatus {
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "pending user action")]
    PendingUser,
}

/// Note stored on an item that finished without faults
#[derive(Debug, Clone, Serialize)]
pub struct CompletionNote {
    pub status: &'static str,
    pub message: String,
}

impl CompletionNote {
    pub fn completed<S: Into<String>>(message: S) -> Self {
        Self {
            status: "completed",
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.message.clone())
    }
}

/// Item-lifecycle interface of the external queue
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Queue name used in logs and notification subjects
    fn name(&self) -> &str;

    /// Add one item with the given data and reference
    async fn add_item(&self, data: &Value, reference: &str) -> QueueResult<WorkItem>;

    /// Check out the next pending item, `None` when the queue is drained
    async fn next_item(&self) -> QueueResult<Option<WorkItem>>;

    /// Move an item to a terminal status
    async fn update_status(&self, item_id: u64, status: ItemStatus, message: &str)
        -> QueueResult<()>;

    /// One page (1-based) of references currently in the queue
    async fn list_references(&self, page: u32, page_size: u32) -> QueueResult<Vec<String>>;

    async fn complete(&self, item_id: u64, note: &str) -> QueueResult<()> {
        self.update_status(item_id, ItemStatus::Completed, note).await
    }

    async fn fail(&self, item_id: u64, detail: &str) -> QueueResult<()> {
        self.update_status(item_id, ItemStatus::Failed, detail).await
    }

    async fn mark_pending_user(&self, item_id: u64, detail: &str) -> QueueResult<()> {
        self.update_status(item_id, ItemStatus::PendingUser, detail).await
    }
}

/// Exclusive handle on a checked-out item
///
/// A handle dropped before a successful terminal call is failed in the
/// background with an "abandoned" detail, so the item is never left checked
/// out.
pub struct CheckedOutItem {
    queue: Arc<dyn WorkQueue>,
    item: WorkItem,
    resolved: bool,
}

impl CheckedOutItem {
    pub fn new(queue: Arc<dyn WorkQueue>, item: WorkItem) -> Self {
        Self {
            queue,
            item,
            resolved: false,
        }
    }

    pub fn item(&self) -> &WorkItem {
        &self.item
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub async fn complete(&mut self, note: &CompletionNote) -> QueueResult<()> {
        self.resolve(ItemStatus::Completed, &note.to_json()).await
    }

    pub async fn fail(&mut self, detail: &FaultDetail) -> QueueResult<()> {
        self.resolve(ItemStatus::Failed, &detail.to_json()).await
    }

    pub async fn mark_pending_user(&mut self, detail: &FaultDetail) -> QueueResult<()> {
        self.resolve(ItemStatus::PendingUser, &detail.to_json()).await
    }

    async fn resolve(&mut self, status: ItemStatus, message: &str) -> QueueResult<()> {
        debug_assert!(!self.resolved, "work item resolved twice");
        let result = match status {
            ItemStatus::Completed => self.queue.complete(self.item.id, message).await,
            ItemStatus::Failed => self.queue.fail(self.item.id, message).await,
            ItemStatus::PendingUser => self.queue.mark_pending_user(self.item.id, message).await,
        };
        if result.is_ok() {
            self.resolved = true;
        }
        result
    }
}

impl Drop for CheckedOutItem {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }

        let item_id = self.item.id;
        warn!(item_id, "Work item dropped without a terminal status, failing it");

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(item_id, "No runtime available to release abandoned work item");
            return;
        };
        let queue = self.queue.clone();
        let detail = FaultDetail::process("work item abandoned before resolution").to_json();
        runtime.spawn(async move {
            if let Err(e) = queue.fail(item_id, &detail).await {
                error!(item_id, error = %e, "Failed to release abandoned work item");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockWorkQueue;

    #[test]
    fn test_candidate_queue_data_shape() {
        let candidate = CandidateItem::new("form-17", json!({"attachment_url": "https://x/1"}));
        let data = candidate.queue_data();

        assert_eq!(data["item"]["reference"], "form-17");
        assert_eq!(data["item"]["data"]["attachment_url"], "https://x/1");
    }

    #[test]
    fn test_item_info_round_trips_candidate() {
        let candidate = CandidateItem::new("form-17", json!({"n": 1}));
        let item = WorkItem {
            id: 4,
            reference: Some("form-17".to_string()),
            data: candidate.queue_data(),
        };

        let (payload, reference) = item.item_info().unwrap();
        assert_eq!(payload, json!({"n": 1}));
        assert_eq!(reference, "form-17");
    }

    #[test]
    fn test_item_info_accepts_numeric_reference() {
        let item = WorkItem {
            id: 5,
            reference: None,
            data: json!({"item": {"reference": 991, "data": {}}}),
        };
        assert_eq!(item.item_info().unwrap().1, "991");
    }

    #[test]
    fn test_item_info_rejects_malformed_data() {
        let item = WorkItem {
            id: 9,
            reference: None,
            data: json!({"payload": {}}),
        };

        let err = item.item_info().unwrap_err();
        assert!(matches!(err, QueueError::MalformedItem { item_id: 9, .. }));
    }

    #[test]
    fn test_item_status_wire_names() {
        assert_eq!(
            serde_json::to_value(ItemStatus::PendingUser).unwrap(),
            json!("pending user action")
        );
        assert_eq!(
            serde_json::to_value(ItemStatus::Completed).unwrap(),
            json!("completed")
        );
    }

    #[tokio::test]
    async fn test_checked_out_item_resolves_once() {
        let queue = Arc::new(MockWorkQueue::with_pending(vec![CandidateItem::new(
            "a",
            json!({}),
        )]));
        let item = queue.next_item().await.unwrap().unwrap();

        let mut handle = CheckedOutItem::new(queue.clone(), item);
        handle
            .complete(&CompletionNote::completed("done"))
            .await
            .unwrap();
        assert!(handle.is_resolved());
        drop(handle);

        tokio::task::yield_now().await;
        let resolutions = queue.resolutions().await;
        assert_eq!(resolutions.len(), 1);
        assert_eq!(resolutions[0].status, ItemStatus::Completed);
    }

    #[tokio::test]
    async fn test_dropped_item_is_failed_in_background() {
        let queue = Arc::new(MockWorkQueue::with_pending(vec![CandidateItem::new(
            "a",
            json!({}),
        )]));
        let item = queue.next_item().await.unwrap().unwrap();

        drop(CheckedOutItem::new(queue.clone(), item));

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let resolutions = queue.resolutions().await;
        assert_eq!(resolutions.len(), 1);
        assert_eq!(resolutions[0].status, ItemStatus::Failed);
        assert!(resolutions[0].message.contains("abandoned"));
    }
}
