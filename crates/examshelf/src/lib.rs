pub mod broadcast;
pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod model;
pub mod notify;
pub mod sweeper;
pub mod telemetry;

pub use broadcast::{IngestEvent, IngestEventKind, IngestProgressBroadcaster};
pub use config::{load_config, IngestConfig};
pub use db::Database;
pub use error::{ConfigError, ExamshelfError, IngestError, Result, SweepError};
pub use ingest::{BatchAccepted, BatchRequest, IngestOrchestrator, ItemPipeline, JobSnapshot, NewItem};
pub use model::{ItemKind, ItemStatus, JobKind, JobStatus, ProgressSnapshot};
pub use sweeper::{ReconcileSweeper, SweepScheduler};
pub use telemetry::init_tracing;
