//! Mock implementations for testing
//!
//! In-memory work queue, candidate source, item processor, environment,
//! notifier, screenshot capture and finalizer, so every phase can be run
//! without an Automation Server, SMTP relay or desktop.

use crate::fault::{FaultDetail, ItemError};
use crate::finalize::Finalizer;
use crate::notify::{NotificationContext, Notifier, NotifyError, ScreenCapture};
use crate::population::{CandidateSource, SourceError};
use crate::processing::{Environment, EnvironmentError, ItemProcessor};
use crate::queue::{CandidateItem, ItemStatus, QueueError, QueueResult, WorkItem, WorkQueue};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, MutexGuard};
use std::time::Duration;
use tokio::sync::Mutex;

fn lock<T>(mutex: &std::sync::Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A terminal status recorded by [`MockWorkQueue`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub item_id: u64,
    pub reference: Option<String>,
    pub status: ItemStatus,
    pub message: String,
}

/// In-memory work queue
///
/// Added items are appended to both the pending queue and the reference
/// listing, like the real service.
#[derive(Debug, Default)]
pub struct MockWorkQueue {
    pending: Mutex<VecDeque<WorkItem>>,
    listing: Mutex<Vec<String>>,
    checked_out: Mutex<HashMap<u64, WorkItem>>,
    resolutions: Mutex<Vec<Resolution>>,
    status_attempts: Mutex<Vec<(u64, ItemStatus)>>,
    added: Mutex<Vec<String>>,
    add_calls: Mutex<HashMap<String, u32>>,
    next_id: AtomicU64,
    list_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    add_latency: Option<Duration>,
    add_failures: HashMap<String, u32>,
    failing_statuses: HashSet<ItemStatus>,
}

impl MockWorkQueue {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            ..Default::default()
        }
    }

    /// Queue already holding these candidates, pending and listed
    pub fn with_pending(candidates: Vec<CandidateItem>) -> Self {
        let queue = Self::new();
        let mut pending = VecDeque::new();
        let mut listing = Vec::new();
        for candidate in candidates {
            let id = queue.next_id.fetch_add(1, Ordering::Relaxed);
            listing.push(candidate.reference.clone());
            pending.push_back(WorkItem {
                id,
                reference: Some(candidate.reference.clone()),
                data: candidate.queue_data(),
            });
        }
        Self {
            pending: Mutex::new(pending),
            listing: Mutex::new(listing),
            ..queue
        }
    }

    /// Queue whose listing holds these references and nothing is pending
    pub fn with_existing_references(references: Vec<String>) -> Self {
        Self {
            listing: Mutex::new(references),
            ..Self::new()
        }
    }

    /// Queue serving these items as-is, for malformed data
    pub fn with_raw_items(items: Vec<WorkItem>) -> Self {
        let next = items.iter().map(|i| i.id).max().unwrap_or(0) + 1;
        Self {
            pending: Mutex::new(items.into_iter().collect()),
            next_id: AtomicU64::new(next),
            ..Default::default()
        }
    }

    pub fn with_add_latency(mut self, latency: Duration) -> Self {
        self.add_latency = Some(latency);
        self
    }

    /// Fail the first `times` add attempts for `reference` (`u32::MAX` for always)
    pub fn failing_adds(mut self, reference: &str, times: u32) -> Self {
        self.add_failures.insert(reference.to_string(), times);
        self
    }

    /// Reject every status update to `status`
    pub fn failing_status(mut self, status: ItemStatus) -> Self {
        self.failing_statuses.insert(status);
        self
    }

    /// Append an item to the pending queue
    pub async fn push_pending(&self, candidate: CandidateItem) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listing.lock().await.push(candidate.reference.clone());
        self.pending.lock().await.push_back(WorkItem {
            id,
            reference: Some(candidate.reference.clone()),
            data: candidate.queue_data(),
        });
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub async fn total_add_calls(&self) -> u32 {
        self.add_calls.lock().await.values().sum()
    }

    pub async fn add_calls(&self, reference: &str) -> u32 {
        self.add_calls
            .lock()
            .await
            .get(reference)
            .copied()
            .unwrap_or(0)
    }

    /// References successfully added, in completion order
    pub async fn added_references(&self) -> Vec<String> {
        self.added.lock().await.clone()
    }

    pub async fn resolutions(&self) -> Vec<Resolution> {
        self.resolutions.lock().await.clone()
    }

    /// Every status update requested, accepted or not
    pub async fn status_attempts(&self) -> Vec<(u64, ItemStatus)> {
        self.status_attempts.lock().await.clone()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[async_trait]
impl WorkQueue for MockWorkQueue {
    fn name(&self) -> &str {
        "mock-queue"
    }

    async fn add_item(&self, data: &Value, reference: &str) -> QueueResult<WorkItem> {
        let call = {
            let mut calls = self.add_calls.lock().await;
            let count = calls.entry(reference.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.add_latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failures = self.add_failures.get(reference).copied().unwrap_or(0);
        if call <= failures {
            return Err(QueueError::Unavailable(format!(
                "mock add failure {call} for {reference}"
            )));
        }

        let item = WorkItem {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            reference: Some(reference.to_string()),
            data: data.clone(),
        };
        self.pending.lock().await.push_back(item.clone());
        self.listing.lock().await.push(reference.to_string());
        self.added.lock().await.push(reference.to_string());
        Ok(item)
    }

    async fn next_item(&self) -> QueueResult<Option<WorkItem>> {
        let item = self.pending.lock().await.pop_front();
        if let Some(item) = &item {
            self.checked_out.lock().await.insert(item.id, item.clone());
        }
        Ok(item)
    }

    async fn update_status(
        &self,
        item_id: u64,
        status: ItemStatus,
        message: &str,
    ) -> QueueResult<()> {
        self.status_attempts.lock().await.push((item_id, status));
        if self.failing_statuses.contains(&status) {
            return Err(QueueError::Status {
                status: 500,
                body: format!("mock rejects {status:?}"),
            });
        }

        let item = self
            .checked_out
            .lock()
            .await
            .remove(&item_id)
            .ok_or_else(|| QueueError::Unavailable(format!("item {item_id} is not checked out")))?;

        self.resolutions.lock().await.push(Resolution {
            item_id,
            reference: item.reference,
            status,
            message: message.to_string(),
        });
        Ok(())
    }

    async fn list_references(&self, page: u32, page_size: u32) -> QueueResult<Vec<String>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let listing = self.listing.lock().await;
        let start = (page.saturating_sub(1) as usize).saturating_mul(page_size as usize);
        Ok(listing
            .iter()
            .skip(start)
            .take(page_size as usize)
            .cloned()
            .collect())
    }
}

/// Scripted candidate source
#[derive(Debug, Default)]
pub struct MockCandidateSource {
    candidates: Vec<CandidateItem>,
    failure: Option<String>,
}

impl MockCandidateSource {
    pub fn new(candidates: Vec<CandidateItem>) -> Self {
        Self {
            candidates,
            failure: None,
        }
    }

    pub fn failing<S: Into<String>>(message: S) -> Self {
        Self {
            candidates: Vec::new(),
            failure: Some(message.into()),
        }
    }
}

#[async_trait]
impl CandidateSource for MockCandidateSource {
    async fn retrieve_candidates(&self) -> Result<Vec<CandidateItem>, SourceError> {
        match &self.failure {
            Some(message) => Err(SourceError::Unavailable(message.clone())),
            None => Ok(self.candidates.clone()),
        }
    }
}

/// What [`MockItemProcessor`] does for one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeed,
    Business(String),
    Fail(String),
    /// Never returns; only useful with an item timeout
    Hang,
}

/// Item processor replaying a script of outcomes, then succeeding
#[derive(Debug, Clone, Default)]
pub struct MockItemProcessor {
    script: Arc<std::sync::Mutex<VecDeque<Outcome>>>,
    calls: Arc<std::sync::Mutex<Vec<String>>>,
}

impl MockItemProcessor {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn scripted(outcomes: Vec<Outcome>) -> Self {
        Self {
            script: Arc::new(std::sync::Mutex::new(outcomes.into())),
            calls: Arc::default(),
        }
    }

    /// References processed so far, in order
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ItemProcessor for MockItemProcessor {
    async fn process(&self, _payload: &Value, reference: &str) -> Result<(), ItemError> {
        lock(&self.calls).push(reference.to_string());
        let outcome = lock(&self.script).pop_front().unwrap_or(Outcome::Succeed);

        match outcome {
            Outcome::Succeed => Ok(()),
            Outcome::Business(message) => Err(ItemError::business(message)),
            Outcome::Fail(message) => Err(ItemError::other(message)),
            Outcome::Hang => std::future::pending().await,
        }
    }
}

/// Lifecycle call recorded by [`MockEnvironment`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvEvent {
    Startup,
    SoftShutdown,
    HardShutdown,
}

/// Environment recording every lifecycle call; clones share the log
#[derive(Debug, Clone, Default)]
pub struct MockEnvironment {
    events: Arc<std::sync::Mutex<Vec<EnvEvent>>>,
    startups: Arc<AtomicUsize>,
    /// Startup attempts from this one (1-based) on fail
    fail_startup_from: Option<usize>,
    fail_soft_shutdown: bool,
    fail_hard_shutdown: bool,
}

impl MockEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_startup(mut self) -> Self {
        self.fail_startup_from = Some(1);
        self
    }

    /// First startup succeeds, every restart fails
    pub fn failing_restart(mut self) -> Self {
        self.fail_startup_from = Some(2);
        self
    }

    pub fn failing_soft_shutdown(mut self) -> Self {
        self.fail_soft_shutdown = true;
        self
    }

    pub fn failing_hard_shutdown(mut self) -> Self {
        self.fail_hard_shutdown = true;
        self
    }

    pub fn events(&self) -> Vec<EnvEvent> {
        lock(&self.events).clone()
    }

    /// Number of close attempts (every close starts with a soft shutdown)
    pub fn close_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| **e == EnvEvent::SoftShutdown)
            .count()
    }

    fn record(&self, event: EnvEvent) {
        lock(&self.events).push(event);
    }
}

#[async_trait]
impl Environment for MockEnvironment {
    async fn startup(&mut self) -> Result<(), EnvironmentError> {
        self.record(EnvEvent::Startup);
        let attempt = self.startups.fetch_add(1, Ordering::SeqCst) + 1;
        match self.fail_startup_from {
            Some(from) if attempt >= from => Err(EnvironmentError::Other(format!(
                "mock startup failure on attempt {attempt}"
            ))),
            _ => Ok(()),
        }
    }

    async fn soft_shutdown(&mut self) -> Result<(), EnvironmentError> {
        self.record(EnvEvent::SoftShutdown);
        if self.fail_soft_shutdown {
            return Err(EnvironmentError::Other("mock soft shutdown failure".to_string()));
        }
        Ok(())
    }

    async fn hard_shutdown(&mut self) -> Result<(), EnvironmentError> {
        self.record(EnvEvent::HardShutdown);
        if self.fail_hard_shutdown {
            return Err(EnvironmentError::Other("mock hard shutdown failure".to_string()));
        }
        Ok(())
    }
}

/// Notifier recording every delivered notification
#[derive(Debug, Default)]
pub struct MockNotifier {
    sent: std::sync::Mutex<Vec<(FaultDetail, NotificationContext)>>,
    attempts: AtomicUsize,
    should_fail: bool,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    /// Successfully delivered notifications
    pub fn notifications(&self) -> Vec<(FaultDetail, NotificationContext)> {
        lock(&self.sent).clone()
    }

    /// Every delivery attempt, including failed ones
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(
        &self,
        detail: &FaultDetail,
        context: &NotificationContext,
    ) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.should_fail {
            return Err(NotifyError::NotConfigured("mock notifier failure".to_string()));
        }
        lock(&self.sent).push((detail.clone(), context.clone()));
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MockScreenCapture {
    png: Option<Vec<u8>>,
}

impl MockScreenCapture {
    pub fn returning(png: Vec<u8>) -> Self {
        Self { png: Some(png) }
    }

    pub fn failing() -> Self {
        Self { png: None }
    }
}

#[async_trait]
impl ScreenCapture for MockScreenCapture {
    async fn capture_png(&self) -> Result<Vec<u8>, NotifyError> {
        self.png
            .clone()
            .ok_or_else(|| NotifyError::Capture("mock capture failure".to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FinalizeOutcome {
    Succeed,
    Business(String),
    Fail(String),
}

#[derive(Debug)]
pub struct MockFinalizer {
    outcome: FinalizeOutcome,
    calls: AtomicUsize,
}

impl MockFinalizer {
    fn with(outcome: FinalizeOutcome) -> Self {
        Self {
            outcome,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn succeeding() -> Self {
        Self::with(FinalizeOutcome::Succeed)
    }

    pub fn business<S: Into<String>>(message: S) -> Self {
        Self::with(FinalizeOutcome::Business(message.into()))
    }

    pub fn failing<S: Into<String>>(message: S) -> Self {
        Self::with(FinalizeOutcome::Fail(message.into()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Finalizer for MockFinalizer {
    async fn finalize(&self) -> Result<(), ItemError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            FinalizeOutcome::Succeed => Ok(()),
            FinalizeOutcome::Business(message) => Err(ItemError::business(message.clone())),
            FinalizeOutcome::Fail(message) => Err(ItemError::other(message.clone())),
        }
    }
}
