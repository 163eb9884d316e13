//! Retrieval outcome records: per-source attempts, per-identifier
//! results, and the batch summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::Identifier;

/// Result of trying one source for one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    NotFound,
    Blocked,
    AuthRequired,
    TitleMismatch,
    NetworkError,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Outcome::Success => "success",
            Outcome::NotFound => "not found",
            Outcome::Blocked => "blocked",
            Outcome::AuthRequired => "auth required",
            Outcome::TitleMismatch => "title mismatch",
            Outcome::NetworkError => "network error",
        };
        write!(f, "{s}")
    }
}

/// One entry in an identifier's fallback trail. Append-only, owned by
/// a single [`RetrievalResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalAttempt {
    pub source: String,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
    /// Human-readable detail (HTTP status, mismatch score, error text).
    pub detail: String,
}

impl RetrievalAttempt {
    pub fn new(source: impl Into<String>, outcome: Outcome, detail: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            outcome,
            timestamp: Utc::now(),
            detail: detail.into(),
        }
    }
}

/// Terminal result for one identifier: either a download with the
/// source that produced it, or the full per-source failure trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub identifier: Identifier,
    pub success: bool,
    pub source_used: Option<String>,
    pub output_path: Option<PathBuf>,
    pub attempts: Vec<RetrievalAttempt>,
}

impl RetrievalResult {
    pub fn exhausted(identifier: Identifier, attempts: Vec<RetrievalAttempt>) -> Self {
        Self {
            identifier,
            success: false,
            source_used: None,
            output_path: None,
            attempts,
        }
    }

    pub fn succeeded(
        identifier: Identifier,
        source_used: String,
        attempts: Vec<RetrievalAttempt>,
    ) -> Self {
        Self {
            identifier,
            success: true,
            source_used: Some(source_used),
            output_path: None,
            attempts,
        }
    }
}

/// How an identifier fared inside a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Downloaded,
    Skipped,
    Failed,
}

/// One line of a batch report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub status: ItemStatus,
    pub result: RetrievalResult,
}

/// Machine-readable summary of a batch run, persisted alongside the
/// downloaded files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// True when the run was cut short by cancellation or deadline.
    pub interrupted: bool,
    pub items: Vec<BatchItem>,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.downloaded + self.skipped + self.failed
    }
}
