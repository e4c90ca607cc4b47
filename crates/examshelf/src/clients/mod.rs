//! Clients for the external services the pipeline talks to.
//!
//! Each collaborator sits behind a trait so the orchestrator and the
//! sweeper can be exercised without network access. The `Http*` types
//! are the production implementations; the `Memory*` types in
//! [`memory`] back the tests.

pub mod artifact_store;
pub mod extraction;
pub mod fetcher;
pub mod knowledge_index;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} returned status {status}")]
    Status { service: &'static str, status: u16 },

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// Durable blob storage for fetched documents and extracted text.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Stores a blob under the given key and returns its public URL.
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str)
        -> Result<String, ClientError>;

    async fn delete(&self, key: &str) -> Result<(), ClientError>;
}

/// Result of running text extraction over a document.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub text: String,
    pub page_count: Option<u32>,
}

/// Text extraction service (OCR for scanned papers).
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Probes the service before a batch starts. A failing probe
    /// degrades the batch to raw-document ingestion, it does not
    /// abort it.
    async fn health_check(&self) -> Result<(), ClientError>;

    async fn extract(&self, bytes: &[u8], filename: &str) -> Result<Extraction, ClientError>;
}

/// State of an external indexing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexRunStatus {
    Pending,
    Indexed,
    Failed { message: String },
}

/// The knowledge index the documents are registered with.
#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    /// Registers a stored artifact as a data source and returns its
    /// reference.
    async fn create_data_source(&self, location: &str) -> Result<String, ClientError>;

    /// Starts an indexing run over the given data sources and returns
    /// the run reference.
    async fn start_indexing(&self, data_source_refs: &[String]) -> Result<String, ClientError>;

    async fn get_index_status(&self, run_ref: &str) -> Result<IndexRunStatus, ClientError>;
}

/// Fetches the raw bytes of a remote source.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ClientError>;
}
