//! Fault classification for per-item processing
//!
//! Every error raised while an item is processed ends up as exactly one of
//! two faults. A [`ItemFault::Business`] is raised on purpose by processing
//! logic when a record needs a human decision; anything else is wrapped into
//! a [`ItemFault::Process`] and counts against the run's health budget.

use crate::error::sanitize_error_message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// The two fault classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    #[serde(rename = "BusinessFault")]
    Business,
    #[serde(rename = "ProcessFault")]
    Process,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::Business => "BusinessFault",
            FaultKind::Process => "ProcessFault",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured fault information attached to queue items, logs and emails
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultDetail {
    #[serde(rename = "type")]
    pub kind: FaultKind,
    pub message: String,
    /// Error source chain, outermost first
    #[serde(default)]
    pub traceback: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

impl FaultDetail {
    fn new(kind: FaultKind, message: &str, traceback: Vec<String>) -> Self {
        Self {
            kind,
            message: sanitize_error_message(message),
            traceback: traceback
                .iter()
                .map(|line| sanitize_error_message(line))
                .collect(),
            occurred_at: Utc::now(),
        }
    }

    pub fn business<S: AsRef<str>>(message: S) -> Self {
        Self::new(FaultKind::Business, message.as_ref(), Vec::new())
    }

    pub fn process<S: AsRef<str>>(message: S) -> Self {
        Self::new(FaultKind::Process, message.as_ref(), Vec::new())
    }

    /// Wrap an arbitrary error as a process fault, keeping its source chain
    pub fn process_from_error(error: &(dyn StdError + 'static)) -> Self {
        Self::new(FaultKind::Process, &error.to_string(), source_chain(error))
    }

    /// JSON form stored on the queue item by `fail` / `mark_pending_user`
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"type":"{}","message":"unserializable fault"}}"#, self.kind)
        })
    }

    /// Traceback lines joined for human-facing output
    pub fn trace_text(&self) -> String {
        self.traceback.join("\ncaused by: ")
    }
}

impl fmt::Display for FaultDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

fn source_chain(error: &(dyn StdError + 'static)) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = error.source();
    while let Some(source) = current {
        chain.push(source.to_string());
        current = source.source();
    }
    chain
}

/// Error returned by item processing logic
#[derive(Debug, Error)]
pub enum ItemError {
    /// Expected business-rule condition that needs a human decision
    #[error("{message}")]
    Business { message: String },

    /// Anything else; classified as a process fault
    #[error(transparent)]
    Other(#[from] Box<dyn StdError + Send + Sync>),
}

impl ItemError {
    pub fn business<S: Into<String>>(message: S) -> Self {
        Self::Business {
            message: message.into(),
        }
    }

    pub fn other<E>(error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self::Other(error.into())
    }
}

/// A classified fault
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemFault {
    Business(FaultDetail),
    Process(FaultDetail),
}

impl ItemFault {
    pub fn detail(&self) -> &FaultDetail {
        match self {
            ItemFault::Business(detail) | ItemFault::Process(detail) => detail,
        }
    }

    pub fn kind(&self) -> FaultKind {
        self.detail().kind
    }
}

/// Partition an item error into exactly one fault class
pub fn classify(error: ItemError) -> ItemFault {
    match error {
        ItemError::Business { message } => ItemFault::Business(FaultDetail::business(message)),
        ItemError::Other(inner) => {
            let inner: &(dyn StdError + 'static) = inner.as_ref();
            ItemFault::Process(FaultDetail::process_from_error(inner))
        }
    }
}
