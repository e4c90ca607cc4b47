//! User-facing notifications for batch lifecycle events.
//!
//! Distinct from the broadcast stream: the stream carries every
//! per-item tick, notifications mark the handful of moments a user
//! cares about (batch started, finished, degraded).

use std::sync::Mutex;

use crate::model::ProgressSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    InProgress,
    Success,
    Warning,
    Error,
}

/// A notification about a job.
#[derive(Debug, Clone)]
pub struct Notification {
    pub job_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub snapshot: Option<ProgressSnapshot>,
}

impl Notification {
    pub fn new(job_id: &str, kind: NotificationKind, title: &str, message: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            kind,
            title: title.to_string(),
            message: message.to_string(),
            snapshot: None,
        }
    }

    pub fn with_snapshot(mut self, snapshot: ProgressSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}

/// Delivery channel for notifications. Failures are the sink's
/// problem; the pipeline never blocks on delivery.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Sink that writes notifications to the log.
#[derive(Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, notification: Notification) {
        match notification.kind {
            NotificationKind::Error => log::error!(
                "[{}] {}: {}",
                notification.job_id,
                notification.title,
                notification.message
            ),
            NotificationKind::Warning => log::warn!(
                "[{}] {}: {}",
                notification.job_id,
                notification.title,
                notification.message
            ),
            _ => log::info!(
                "[{}] {}: {}",
                notification.job_id,
                notification.title,
                notification.message
            ),
        }
    }
}

/// Sink that records notifications for assertions in tests.
#[derive(Default)]
pub struct MemorySink {
    delivered: Mutex<Vec<Notification>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().unwrap().clone()
    }
}

impl NotificationSink for MemorySink {
    fn notify(&self, notification: Notification) {
        self.delivered.lock().unwrap().push(notification);
    }
}
