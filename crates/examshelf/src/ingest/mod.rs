//! Batch ingestion: orchestration, the per-item pipeline, and
//! cooperative cancellation.

pub mod cancel;
pub mod orchestrator;
pub mod pipeline;

pub use cancel::CancellationRegistry;
pub use orchestrator::{BatchAccepted, BatchRequest, IngestOrchestrator, JobSnapshot, NewItem};
pub use pipeline::{ItemOutcome, ItemPipeline, PipelineError};
