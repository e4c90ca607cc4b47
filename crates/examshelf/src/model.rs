//! Core job/item state machines and the derived progress snapshot.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Returned when a stored status string does not match any known variant.
#[derive(Debug, Error)]
#[error("unknown {kind} value '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Type of an ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Batch ingestion of exam papers from remote URLs.
    PaperIngest,
    /// Upload of already-buffered documents.
    DocumentUpload,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::PaperIngest => "paper_ingest",
            JobKind::DocumentUpload => "document_upload",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "paper_ingest" => Ok(JobKind::PaperIngest),
            "document_upload" => Ok(JobKind::DocumentUpload),
            other => Err(ParseEnumError {
                kind: "job kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Aggregate status of an ingestion job.
///
/// `IndexPending` means every item has been processed locally but the
/// external knowledge index has not yet confirmed completion; the
/// reconciliation sweeper owns that final transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    IndexPending,
    Completed,
    PartiallyCompleted,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::IndexPending => "index_pending",
            JobStatus::Completed => "completed",
            JobStatus::PartiallyCompleted => "partially_completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "index_pending" => Ok(JobStatus::IndexPending),
            "completed" => Ok(JobStatus::Completed),
            "partially_completed" => Ok(JobStatus::PartiallyCompleted),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(ParseEnumError {
                kind: "job status",
                value: other.to_string(),
            }),
        }
    }

    /// Terminal statuses are never mutated again, by anyone.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::PartiallyCompleted
                | JobStatus::Failed
                | JobStatus::Cancelled
        )
    }

    /// True while a worker (or the sweeper) still owns the job.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline variant of a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Raw bytes are fetched from a remote URL.
    RemoteUrl,
    /// Raw bytes were buffered by the caller at submission time.
    UploadedBytes,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::RemoteUrl => "remote_url",
            ItemKind::UploadedBytes => "uploaded_bytes",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "remote_url" => Ok(ItemKind::RemoteUrl),
            "uploaded_bytes" => Ok(ItemKind::UploadedBytes),
            other => Err(ParseEnumError {
                kind: "item kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Per-item pipeline state.
///
/// Transitions only move forward along the pipeline order, except the
/// collapsing jumps to `Completed` or `Failed`, which are allowed from
/// any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Fetching,
    Extracting,
    Storing,
    Indexing,
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Fetching => "fetching",
            ItemStatus::Extracting => "extracting",
            ItemStatus::Storing => "storing",
            ItemStatus::Indexing => "indexing",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "pending" => Ok(ItemStatus::Pending),
            "fetching" => Ok(ItemStatus::Fetching),
            "extracting" => Ok(ItemStatus::Extracting),
            "storing" => Ok(ItemStatus::Storing),
            "indexing" => Ok(ItemStatus::Indexing),
            "completed" => Ok(ItemStatus::Completed),
            "failed" => Ok(ItemStatus::Failed),
            other => Err(ParseEnumError {
                kind: "item status",
                value: other.to_string(),
            }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            ItemStatus::Pending => 0,
            ItemStatus::Fetching => 1,
            ItemStatus::Extracting => 2,
            ItemStatus::Storing => 3,
            ItemStatus::Indexing => 4,
            ItemStatus::Completed => 5,
            ItemStatus::Failed => 5,
        }
    }

    /// Whether moving from `self` to `next` respects the forward-only
    /// pipeline order. Terminal jumps are always allowed from a
    /// non-terminal state.
    pub fn can_advance_to(&self, next: ItemStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next.is_terminal() {
            return true;
        }
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived progress view, recomputed after every item transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    /// Integer percent of processed items: `(completed + failed) * 100 / total`.
    pub percent: u32,
}

impl ProgressSnapshot {
    pub fn new(total: u32, completed: u32, failed: u32) -> Self {
        let percent = if total == 0 {
            0
        } else {
            (completed + failed) * 100 / total
        };
        Self {
            total,
            completed,
            failed,
            percent,
        }
    }
}

/// Current UTC time as an RFC3339 string with millisecond precision.
///
/// All rows store timestamps in this one format so that plain string
/// comparison orders them chronologically.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
