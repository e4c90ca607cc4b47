//! In-memory client implementations.
//!
//! Deterministic stand-ins used by the integration tests. Failure
//! modes are toggled per instance so individual scenarios can break
//! exactly one collaborator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    ArtifactStore, ClientError, Extraction, IndexRunStatus, KnowledgeIndex, SourceFetcher,
    TextExtractor,
};

/// Artifact store that keeps blobs in a map.
#[derive(Default)]
pub struct MemoryArtifactStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_puts: AtomicBool,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<String, ClientError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(ClientError::Unavailable("store offline".to_string()));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(format!("memory://{}", key))
    }

    async fn delete(&self, key: &str) -> Result<(), ClientError> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Extractor that returns canned text, or fails on demand.
#[derive(Default)]
pub struct MemoryTextExtractor {
    healthy: AtomicBool,
    fail_extractions: AtomicBool,
}

impl MemoryTextExtractor {
    pub fn new() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            fail_extractions: AtomicBool::new(false),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_fail_extractions(&self, fail: bool) {
        self.fail_extractions.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TextExtractor for MemoryTextExtractor {
    async fn health_check(&self) -> Result<(), ClientError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClientError::Unavailable("extractor down".to_string()))
        }
    }

    async fn extract(&self, bytes: &[u8], filename: &str) -> Result<Extraction, ClientError> {
        if self.fail_extractions.load(Ordering::SeqCst) {
            return Err(ClientError::Unavailable("extraction failed".to_string()));
        }
        Ok(Extraction {
            text: format!("extracted text of {} ({} bytes)", filename, bytes.len()),
            page_count: Some(1),
        })
    }
}

/// Knowledge index with scriptable run states.
pub struct MemoryKnowledgeIndex {
    next_id: AtomicU32,
    run_states: Mutex<HashMap<String, IndexRunStatus>>,
    created_sources: Mutex<Vec<String>>,
    started_runs: Mutex<Vec<Vec<String>>>,
    fail_data_sources: AtomicBool,
    fail_start_indexing: AtomicBool,
}

impl Default for MemoryKnowledgeIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKnowledgeIndex {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            run_states: Mutex::new(HashMap::new()),
            created_sources: Mutex::new(Vec::new()),
            started_runs: Mutex::new(Vec::new()),
            fail_data_sources: AtomicBool::new(false),
            fail_start_indexing: AtomicBool::new(false),
        }
    }

    pub fn set_fail_data_sources(&self, fail: bool) {
        self.fail_data_sources.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_start_indexing(&self, fail: bool) {
        self.fail_start_indexing.store(fail, Ordering::SeqCst);
    }

    /// Overrides the reported state of a run.
    pub fn set_run_state(&self, run_ref: &str, state: IndexRunStatus) {
        self.run_states
            .lock()
            .unwrap()
            .insert(run_ref.to_string(), state);
    }

    pub fn created_sources(&self) -> Vec<String> {
        self.created_sources.lock().unwrap().clone()
    }

    pub fn started_runs(&self) -> Vec<Vec<String>> {
        self.started_runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl KnowledgeIndex for MemoryKnowledgeIndex {
    async fn create_data_source(&self, location: &str) -> Result<String, ClientError> {
        if self.fail_data_sources.load(Ordering::SeqCst) {
            return Err(ClientError::Unavailable("index offline".to_string()));
        }
        let id = format!("ds-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.created_sources
            .lock()
            .unwrap()
            .push(location.to_string());
        Ok(id)
    }

    async fn start_indexing(&self, data_source_refs: &[String]) -> Result<String, ClientError> {
        if self.fail_start_indexing.load(Ordering::SeqCst) {
            return Err(ClientError::Unavailable("index offline".to_string()));
        }
        let id = format!("run-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.started_runs
            .lock()
            .unwrap()
            .push(data_source_refs.to_vec());
        self.run_states
            .lock()
            .unwrap()
            .insert(id.clone(), IndexRunStatus::Pending);
        Ok(id)
    }

    async fn get_index_status(&self, run_ref: &str) -> Result<IndexRunStatus, ClientError> {
        self.run_states
            .lock()
            .unwrap()
            .get(run_ref)
            .cloned()
            .ok_or_else(|| ClientError::Unavailable(format!("unknown run {}", run_ref)))
    }
}

/// Fetcher serving bytes from a preloaded url map.
#[derive(Default)]
pub struct MemoryFetcher {
    responses: Mutex<HashMap<String, Vec<u8>>>,
    stall: AtomicBool,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &str, bytes: Vec<u8>) {
        self.responses.lock().unwrap().insert(url.to_string(), bytes);
    }

    /// Makes every fetch hang, for exercising deadlines.
    pub fn set_stall(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceFetcher for MemoryFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ClientError> {
        if self.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_secs(86_400)).await;
        }
        self.responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| ClientError::Status {
                service: "source",
                status: 404,
            })
    }
}
