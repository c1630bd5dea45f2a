//! Observability: structured logging and run metrics

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};
pub use metrics::{log_snapshot, metrics, MetricsCollector, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{item_span, lifecycle_span, population_span};
