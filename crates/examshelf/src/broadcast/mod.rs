//! Real-time event broadcasting.

pub mod ingest_progress;

pub use ingest_progress::{IngestEvent, IngestEventKind, IngestProgressBroadcaster, JobProgress};
