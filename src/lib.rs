//! Work-queue runner
//!
//! Drives an Automation Server work queue through three independent phases:
//!
//! - **populate**: fetch candidate records, drop references already queued,
//!   and submit the rest with bounded concurrency and per-item retry/backoff
//! - **process**: pull items one at a time, classify every failure as a
//!   business or process fault, reset the environment after process faults
//!   and stop once the process-health ceiling is reached
//! - **finalize**: run a closing step under the same fault classification
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use workqueue_runner::notify::{FaultAlerts, LogNotifier};
//! use workqueue_runner::population::{populate_queue, SubmitterConfig};
//! use workqueue_runner::processing::{ProcessingConfig, ProcessingLoop};
//! use workqueue_runner::queue::CandidateItem;
//! use workqueue_runner::testing::{MockCandidateSource, MockEnvironment, MockItemProcessor, MockWorkQueue};
//!
//! # tokio_test::block_on(async {
//! let queue = Arc::new(MockWorkQueue::new());
//! let source = MockCandidateSource::new(vec![CandidateItem::new("form-1", json!({"pages": 2}))]);
//!
//! let populated = populate_queue(queue.as_ref(), &source, &SubmitterConfig::default(), 200)
//!     .await
//!     .unwrap();
//! assert_eq!(populated.succeeded, 1);
//!
//! let report = ProcessingLoop::new(
//!     queue.clone(),
//!     Arc::new(MockItemProcessor::succeeding()),
//!     MockEnvironment::new(),
//!     FaultAlerts::new(Arc::new(LogNotifier), "example"),
//!     ProcessingConfig::default(),
//! )
//! .run()
//! .await
//! .unwrap();
//! assert_eq!(report.completed, 1);
//! # });
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod fault;
pub mod finalize;
pub mod notify;
pub mod observability;
pub mod population;
pub mod processing;
pub mod queue;
pub mod run;
pub mod testing;

pub use config::RunnerConfig;
pub use error::{RunnerError, RunnerResult};
pub use fault::{classify, FaultDetail, FaultKind, ItemError, ItemFault};
pub use population::{populate_queue, PopulationReport};
pub use processing::{ProcessingLoop, ProcessingReport};
pub use queue::{CandidateItem, WorkItem, WorkQueue};
