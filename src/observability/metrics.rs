//! Thread-safe run metrics
//!
//! Atomic counters for the population and processing phases plus a bounded
//! window of item processing times. Submission tasks update the population
//! counters concurrently; processing counters are only touched by the
//! sequential loop but share the same collector.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

const MAX_TIMING_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Log the global snapshot as one JSON field at the end of a phase
pub fn log_snapshot(phase: &str) {
    match serde_json::to_string(&metrics().snapshot()) {
        Ok(snapshot) => info!(phase, metrics = %snapshot, "Phase metrics"),
        Err(e) => warn!(phase, error = %e, "Failed to serialize metrics"),
    }
}

/// Counters for one process lifetime
pub struct MetricsCollector {
    // Population
    add_attempts: AtomicU64,
    items_added: AtomicU64,
    add_failures: AtomicU64,

    // Processing
    items_completed: AtomicU64,
    items_pending_user: AtomicU64,
    items_failed: AtomicU64,
    release_failures: AtomicU64,
    process_faults: AtomicU64,
    resets: AtomicU64,
    processing_times: Mutex<Vec<u64>>, // in milliseconds

    phase: Mutex<String>,
    phase_transitions: AtomicU64,
    started_at: AtomicU64,
}

/// Serializable view of the collector
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub phase: String,
    pub phase_transitions: u64,
    pub population: PopulationMetrics,
    pub processing: ProcessingMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct PopulationMetrics {
    pub add_attempts: u64,
    pub items_added: u64,
    pub add_failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingMetrics {
    pub items_completed: u64,
    pub items_pending_user: u64,
    pub items_failed: u64,
    /// Items the queue refused to mark failed; left to the background release
    pub release_failures: u64,
    pub process_faults: u64,
    pub resets: u64,
    pub avg_processing_time_ms: f64,
    pub p95_processing_time_ms: f64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            add_attempts: AtomicU64::new(0),
            items_added: AtomicU64::new(0),
            add_failures: AtomicU64::new(0),
            items_completed: AtomicU64::new(0),
            items_pending_user: AtomicU64::new(0),
            items_failed: AtomicU64::new(0),
            release_failures: AtomicU64::new(0),
            process_faults: AtomicU64::new(0),
            resets: AtomicU64::new(0),
            processing_times: Mutex::new(Vec::new()),
            phase: Mutex::new("idle".to_string()),
            phase_transitions: AtomicU64::new(0),
            started_at: AtomicU64::new(current_timestamp()),
        }
    }

    // Population metrics
    pub fn add_attempted(&self) {
        self.add_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn item_added(&self) {
        self.items_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_failed(&self) {
        self.add_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Processing metrics
    pub fn item_completed(&self, duration: Duration) {
        self.items_completed.fetch_add(1, Ordering::Relaxed);
        self.record_processing_time(duration);
    }

    pub fn item_pending_user(&self, duration: Duration) {
        self.items_pending_user.fetch_add(1, Ordering::Relaxed);
        self.record_processing_time(duration);
    }

    pub fn item_failed(&self, duration: Duration) {
        self.items_failed.fetch_add(1, Ordering::Relaxed);
        self.record_processing_time(duration);
    }

    /// The queue rejected the `failed` status for an item
    pub fn release_failed(&self, duration: Duration) {
        self.release_failures.fetch_add(1, Ordering::Relaxed);
        self.record_processing_time(duration);
    }

    pub fn process_fault(&self) {
        self.process_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn environment_reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    fn record_processing_time(&self, duration: Duration) {
        if let Ok(mut times) = self.processing_times.lock() {
            times.push(crate::backoff::millis(duration));

            if times.len() > MAX_TIMING_SAMPLES {
                times.remove(0);
            }
        }
    }

    pub fn set_phase(&self, phase: &str) {
        if let Ok(mut current) = self.phase.lock() {
            if *current != phase {
                self.phase_transitions.fetch_add(1, Ordering::Relaxed);
                *current = phase.to_string();
            }
        }
    }

    fn timing_statistics(&self) -> (f64, f64) {
        let Ok(times) = self.processing_times.lock() else {
            return (0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0);
        }

        let mut sorted = times.clone();
        sorted.sort_unstable();
        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (avg, percentile(&sorted, 95.0))
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_processing_time_ms, p95_processing_time_ms) = self.timing_statistics();
        let phase = self
            .phase
            .lock()
            .map(|p| p.clone())
            .unwrap_or_else(|_| "unknown".to_string());

        MetricsSnapshot {
            timestamp: now,
            uptime_seconds: now.saturating_sub(self.started_at.load(Ordering::Relaxed)),
            phase,
            phase_transitions: self.phase_transitions.load(Ordering::Relaxed),
            population: PopulationMetrics {
                add_attempts: self.add_attempts.load(Ordering::Relaxed),
                items_added: self.items_added.load(Ordering::Relaxed),
                add_failures: self.add_failures.load(Ordering::Relaxed),
            },
            processing: ProcessingMetrics {
                items_completed: self.items_completed.load(Ordering::Relaxed),
                items_pending_user: self.items_pending_user.load(Ordering::Relaxed),
                items_failed: self.items_failed.load(Ordering::Relaxed),
                release_failures: self.release_failures.load(Ordering::Relaxed),
                process_faults: self.process_faults.load(Ordering::Relaxed),
                resets: self.resets.load(Ordering::Relaxed),
                avg_processing_time_ms,
                p95_processing_time_ms,
            },
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = sorted_data[index.floor() as usize] as f64;
    let upper = sorted_data[index.ceil() as usize] as f64;
    lower + (upper - lower) * index.fract()
}
