//! Ingest progress broadcaster for real-time batch status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::ProgressSnapshot;

/// Kind of progress event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestEventKind {
    Started,
    Progress,
    Warning,
    Complete,
    Error,
}

/// Progress event for an ingest job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestEvent {
    /// Unique job identifier.
    pub job_id: String,
    pub kind: IngestEventKind,
    /// Total items in the batch.
    pub total: u32,
    /// Items completed so far.
    pub completed: u32,
    /// Items failed so far.
    pub failed: u32,
    /// Integer completion percentage over settled items.
    pub percent: u32,
    /// Pipeline phase of the item currently in flight.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Human-readable message describing current activity.
    pub message: String,
    /// Timestamp of this event.
    pub timestamp: DateTime<Utc>,
}

impl IngestEvent {
    pub fn new(
        job_id: &str,
        kind: IngestEventKind,
        snapshot: ProgressSnapshot,
        message: &str,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            kind,
            total: snapshot.total,
            completed: snapshot.completed,
            failed: snapshot.failed,
            percent: snapshot.percent,
            phase: None,
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_phase(mut self, phase: &str) -> Self {
        self.phase = Some(phase.to_string());
        self
    }
}

/// Broadcasts ingest events for streaming.
#[derive(Clone)]
pub struct IngestProgressBroadcaster {
    sender: Arc<broadcast::Sender<IngestEvent>>,
}

impl IngestProgressBroadcaster {
    /// Creates a broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: IngestEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for ingest events.
    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.sender.subscribe()
    }

    /// Creates a per-job helper that sends the initial started event.
    pub fn start_job(&self, job_id: &str, total: u32) -> JobProgress {
        let progress = JobProgress {
            job_id: job_id.to_string(),
            total,
            sender: Arc::clone(&self.sender),
        };
        progress.send(
            IngestEventKind::Started,
            ProgressSnapshot::new(total, 0, 0),
            None,
            "Batch accepted",
        );
        progress
    }
}

impl Default for IngestProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Emits events for a single job.
pub struct JobProgress {
    job_id: String,
    total: u32,
    sender: Arc<broadcast::Sender<IngestEvent>>,
}

impl JobProgress {
    fn send(
        &self,
        kind: IngestEventKind,
        snapshot: ProgressSnapshot,
        phase: Option<&str>,
        message: &str,
    ) {
        let mut event = IngestEvent::new(&self.job_id, kind, snapshot, message);
        if let Some(phase) = phase {
            event = event.with_phase(phase);
        }
        let _ = self.sender.send(event);
    }

    pub fn item_advanced(&self, completed: u32, failed: u32, phase: &str, message: &str) {
        self.send(
            IngestEventKind::Progress,
            ProgressSnapshot::new(self.total, completed, failed),
            Some(phase),
            message,
        );
    }

    pub fn warning(&self, completed: u32, failed: u32, message: &str) {
        self.send(
            IngestEventKind::Warning,
            ProgressSnapshot::new(self.total, completed, failed),
            None,
            message,
        );
    }

    pub fn complete(&self, completed: u32, failed: u32, message: &str) {
        self.send(
            IngestEventKind::Complete,
            ProgressSnapshot::new(self.total, completed, failed),
            None,
            message,
        );
    }

    pub fn error(&self, completed: u32, failed: u32, message: &str) {
        self.send(
            IngestEventKind::Error,
            ProgressSnapshot::new(self.total, completed, failed),
            None,
            message,
        );
    }
}
