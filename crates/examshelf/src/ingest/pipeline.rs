//! Per-item processing pipeline.
//!
//! Runs one item through fetch, optional text extraction, durable
//! storage and knowledge-index registration. Every stage transition is
//! written to the job store before the stage runs, so a crash leaves
//! behind the exact phase the item died in.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

use crate::clients::{ArtifactStore, ClientError, KnowledgeIndex, SourceFetcher, TextExtractor};
use crate::db::{document_repo, item_repo, Database, DatabaseError};
use crate::db::document_repo::DocumentRow;
use crate::db::item_repo::ItemRow;
use crate::model::{now_rfc3339, ItemKind, ItemStatus};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fetch of '{url}' failed: {reason}")]
    Fetch { url: String, reason: String },

    #[error("item has no buffered payload")]
    MissingPayload,

    #[error("storing artifact '{key}' failed: {reason}")]
    Store { key: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// What a successfully processed item produced.
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub document_id: String,
    /// Set unless index registration degraded.
    pub data_source_ref: Option<String>,
    /// Soft failures that did not stop the item.
    pub warnings: Vec<String>,
}

/// Processes single items against the external collaborators.
///
/// `index` is `None` for deployments without a knowledge index; items
/// then complete without registration.
pub struct ItemPipeline {
    db: Database,
    fetcher: Arc<dyn SourceFetcher>,
    store: Arc<dyn ArtifactStore>,
    extractor: Arc<dyn TextExtractor>,
    index: Option<Arc<dyn KnowledgeIndex>>,
    artifact_key_prefix: String,
}

impl ItemPipeline {
    pub fn new(
        db: Database,
        fetcher: Arc<dyn SourceFetcher>,
        store: Arc<dyn ArtifactStore>,
        extractor: Arc<dyn TextExtractor>,
        index: Option<Arc<dyn KnowledgeIndex>>,
        artifact_key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            db,
            fetcher,
            store,
            extractor,
            index,
            artifact_key_prefix: artifact_key_prefix.into(),
        }
    }

    fn advance(&self, item: &ItemRow, status: ItemStatus) -> Result<(), PipelineError> {
        item_repo::update_status(&self.db, &item.id, status, None, &now_rfc3339())?;
        Ok(())
    }

    /// Runs one item to completion. On `Ok` the item row is
    /// `completed` with its artifact reference set; on `Err` the
    /// caller marks it `failed`.
    pub async fn process_item(
        &self,
        context_id: &str,
        item: &ItemRow,
        payload: Option<&[u8]>,
        extraction_available: bool,
    ) -> Result<ItemOutcome, PipelineError> {
        let span = info_span!("process_item", item_id = %item.id, seq = item.seq);
        self.run_stages(context_id, item, payload, extraction_available)
            .instrument(span)
            .await
    }

    async fn run_stages(
        &self,
        context_id: &str,
        item: &ItemRow,
        payload: Option<&[u8]>,
        extraction_available: bool,
    ) -> Result<ItemOutcome, PipelineError> {
        let mut warnings = Vec::new();

        // Acquire the raw bytes.
        self.advance(item, ItemStatus::Fetching)?;
        let bytes = match item.kind {
            ItemKind::RemoteUrl => {
                self.fetcher
                    .fetch(&item.source)
                    .await
                    .map_err(|e| PipelineError::Fetch {
                        url: item.source.clone(),
                        reason: e.to_string(),
                    })?
            }
            ItemKind::UploadedBytes => payload.ok_or(PipelineError::MissingPayload)?.to_vec(),
        };

        let filename = derive_filename(item);

        // Text extraction is best-effort: a failure degrades the item
        // to raw-document ingestion.
        let mut extraction = None;
        if extraction_available {
            self.advance(item, ItemStatus::Extracting)?;
            match self.extractor.extract(&bytes, &filename).await {
                Ok(result) => extraction = Some(result),
                Err(e) => {
                    warn!(item_id = %item.id, "text extraction failed: {}", e);
                    warnings.push(format!("text extraction failed for {}: {}", filename, e));
                }
            }
        }

        // Store the raw document, plus the extracted text as a sibling
        // artifact when available.
        self.advance(item, ItemStatus::Storing)?;
        let document_id = Uuid::new_v4().to_string();
        let extension = filename.rsplit('.').next().unwrap_or("pdf");
        let artifact_key = format!(
            "{}/{}/{}.{}",
            self.artifact_key_prefix, context_id, document_id, extension
        );
        let content_type = mime_guess::from_path(&filename)
            .first_or_octet_stream()
            .to_string();

        let artifact_url = self
            .store
            .put(&artifact_key, &bytes, &content_type)
            .await
            .map_err(|e| PipelineError::Store {
                key: artifact_key.clone(),
                reason: e.to_string(),
            })?;

        let mut text_key = None;
        let mut text_url = None;
        if let Some(extraction) = &extraction {
            let key = format!(
                "{}/{}/{}.txt",
                self.artifact_key_prefix, context_id, document_id
            );
            match self
                .store
                .put(&key, extraction.text.as_bytes(), "text/plain; charset=utf-8")
                .await
            {
                Ok(url) => {
                    text_key = Some(key);
                    text_url = Some(url);
                }
                Err(e) => {
                    warn!(item_id = %item.id, "storing extracted text failed: {}", e);
                    warnings.push(format!("storing extracted text of {} failed: {}", filename, e));
                }
            }
        }

        document_repo::insert(
            &self.db,
            &DocumentRow {
                id: document_id.clone(),
                context_id: context_id.to_string(),
                filename: filename.clone(),
                source: item.source.clone(),
                artifact_key,
                artifact_url: artifact_url.clone(),
                text_key,
                size_bytes: bytes.len() as u64,
                page_count: extraction.as_ref().and_then(|e| e.page_count),
                data_source_ref: None,
                created_at: now_rfc3339(),
            },
        )?;

        // Register with the knowledge index when one is configured.
        // Prefer the extracted text artifact, fall back to the raw
        // document. A failure here is soft: the document is stored and
        // the job settles on its tallies.
        let mut data_source_ref = None;
        if let Some(index) = &self.index {
            self.advance(item, ItemStatus::Indexing)?;
            let location = text_url.as_deref().unwrap_or(&artifact_url);
            match index.create_data_source(location).await {
                Ok(ds_ref) => {
                    document_repo::set_data_source_ref(&self.db, &document_id, &ds_ref)?;
                    data_source_ref = Some(ds_ref);
                }
                Err(e) => {
                    warn!(item_id = %item.id, "index registration failed: {}", e);
                    warnings.push(format!("index registration of {} failed: {}", filename, e));
                }
            }
        }

        item_repo::set_artifact_ref(&self.db, &item.id, &document_id, &now_rfc3339())?;
        self.advance(item, ItemStatus::Completed)?;

        Ok(ItemOutcome {
            document_id,
            data_source_ref,
            warnings,
        })
    }

    /// Marks an item failed with the error that stopped it.
    pub fn mark_failed(&self, item_id: &str, error: &PipelineError) -> Result<(), DatabaseError> {
        item_repo::update_status(
            &self.db,
            item_id,
            ItemStatus::Failed,
            Some(&error.to_string()),
            &now_rfc3339(),
        )
    }

    pub(crate) fn health_check_extractor(
        &self,
    ) -> impl std::future::Future<Output = Result<(), ClientError>> + '_ {
        self.extractor.health_check()
    }
}

/// Derives a stored filename for an item: the last path segment of a
/// URL source, else a slug of the title, else the item ID.
pub fn derive_filename(item: &ItemRow) -> String {
    if item.kind == ItemKind::RemoteUrl {
        if let Some(segment) = item
            .source
            .split('?')
            .next()
            .and_then(|path| path.rsplit('/').next())
        {
            if !segment.is_empty() && segment.contains('.') {
                return segment.to_string();
            }
        }
    }

    if let Some(title) = &item.title {
        let mut slug = String::with_capacity(title.len());
        for c in title.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
            } else if !slug.ends_with('-') {
                // Runs of punctuation collapse into a single dash.
                slug.push('-');
            }
        }
        let slug = slug.trim_matches('-');
        if !slug.is_empty() {
            return format!("{}.pdf", slug);
        }
    }

    format!("{}.pdf", item.id)
}
