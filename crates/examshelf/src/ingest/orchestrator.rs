//! Batch orchestration.
//!
//! Accepts batches, persists job and item rows transactionally, and
//! runs one worker task per job. Workers are gated by a semaphore,
//! bounded by a hard deadline and cancellable between items. After the
//! last item the job is handed off to the external index; the
//! reconciliation sweeper owns the terminal transition from there.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broadcast::{IngestEvent, IngestEventKind, IngestProgressBroadcaster, JobProgress};
use crate::clients::KnowledgeIndex;
use crate::config::IngestConfig;
use crate::db::item_repo::ItemRow;
use crate::db::job_repo::JobRow;
use crate::db::{item_repo, job_repo, Database};
use crate::error::IngestError;
use crate::ingest::cancel::{CancelHandle, CancellationRegistry};
use crate::ingest::pipeline::ItemPipeline;
use crate::model::{now_rfc3339, ItemKind, ItemStatus, JobKind, JobStatus, ProgressSnapshot};
use crate::notify::{Notification, NotificationKind, NotificationSink};

const LIST_LIMIT: u32 = 20;

/// One document to ingest.
#[derive(Debug, Clone)]
pub struct NewItem {
    /// URL for remote items, display name for uploaded ones.
    pub source: String,
    pub title: Option<String>,
    /// Free-form metadata; `year` and `month` drive deduplication.
    pub metadata: Option<Value>,
    /// Buffered bytes for uploaded items.
    pub payload: Option<Vec<u8>>,
}

impl NewItem {
    pub fn remote(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            title: None,
            metadata: None,
            payload: None,
        }
    }

    pub fn uploaded(name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            source: name.into(),
            title: None,
            metadata: None,
            payload: Some(payload),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    fn kind(&self) -> ItemKind {
        if self.payload.is_some() {
            ItemKind::UploadedBytes
        } else {
            ItemKind::RemoteUrl
        }
    }

    /// Key used to skip items already ingested into the same context.
    /// An exam paper is identified by its year and month when the
    /// metadata carries them, otherwise by its source.
    pub fn dedupe_key(&self) -> String {
        if let Some(meta) = &self.metadata {
            if let (Some(year), Some(month)) = (
                meta.get("year").and_then(Value::as_i64),
                meta.get("month").and_then(Value::as_i64),
            ) {
                return format!("{}-{:02}", year, month);
            }
        }
        self.source.clone()
    }
}

/// A batch submission.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub kind: JobKind,
    pub context_id: String,
    pub owner_id: String,
    pub items: Vec<NewItem>,
}

/// Synchronous result of accepting a batch.
#[derive(Debug, Clone)]
pub struct BatchAccepted {
    pub job_id: String,
    /// Items queued for processing.
    pub accepted: u32,
    /// Items skipped as duplicates of already-ingested documents.
    pub skipped: u32,
}

/// Point-in-time view of a job and its items.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub job: JobRow,
    pub items: Vec<ItemRow>,
    pub progress: ProgressSnapshot,
}

/// Entry point for batch ingestion.
///
/// `index` is `None` for deployments without a knowledge index; jobs
/// then settle directly on their item tallies.
#[derive(Clone)]
pub struct IngestOrchestrator {
    db: Database,
    pipeline: Arc<ItemPipeline>,
    index: Option<Arc<dyn KnowledgeIndex>>,
    notifier: Arc<dyn NotificationSink>,
    broadcaster: IngestProgressBroadcaster,
    cancellations: Arc<CancellationRegistry>,
    semaphore: Arc<Semaphore>,
    config: IngestConfig,
}

impl IngestOrchestrator {
    pub fn new(
        db: Database,
        pipeline: Arc<ItemPipeline>,
        index: Option<Arc<dyn KnowledgeIndex>>,
        notifier: Arc<dyn NotificationSink>,
        config: IngestConfig,
    ) -> Self {
        Self {
            db,
            pipeline,
            index,
            notifier,
            broadcaster: IngestProgressBroadcaster::new(config.broadcast_capacity),
            cancellations: Arc::new(CancellationRegistry::new()),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            config,
        }
    }

    /// Subscribes to the live progress stream.
    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.broadcaster.subscribe()
    }

    /// Send handle onto the progress stream, for the sweeper and other
    /// components that finish jobs on this orchestrator's behalf.
    pub fn broadcaster(&self) -> IngestProgressBroadcaster {
        self.broadcaster.clone()
    }

    pub fn cancellations(&self) -> &CancellationRegistry {
        &self.cancellations
    }

    /// Accepts a batch: validates, deduplicates, persists the job with
    /// its items in one transaction and spawns the worker. Returns as
    /// soon as the job is durable.
    pub fn start_batch(&self, request: BatchRequest) -> Result<BatchAccepted, IngestError> {
        if request.items.is_empty() {
            return Err(IngestError::EmptyBatch);
        }

        let mut fresh = Vec::new();
        let mut skipped = 0u32;
        for item in request.items {
            let key = item.dedupe_key();
            if item_repo::dedupe_exists(&self.db, &request.context_id, &key)? {
                info!(
                    context_id = %request.context_id,
                    "skipping duplicate item '{}' (key {})", item.source, key
                );
                skipped += 1;
            } else {
                fresh.push((item, key));
            }
        }

        if fresh.is_empty() {
            return Err(IngestError::NoNewItems);
        }

        let job_id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let total = fresh.len() as u32;

        let job = JobRow {
            id: job_id.clone(),
            kind: request.kind,
            status: JobStatus::Pending,
            context_id: request.context_id.clone(),
            owner_id: request.owner_id.clone(),
            total_items: total,
            completed_items: 0,
            failed_items: 0,
            external_index_ref: None,
            error_message: None,
            started_at: Some(now.clone()),
            completed_at: None,
            created_at: now.clone(),
            updated_at: now.clone(),
        };

        let mut payloads: HashMap<String, Vec<u8>> = HashMap::new();
        let mut rows = Vec::with_capacity(fresh.len());
        for (seq, (item, key)) in fresh.into_iter().enumerate() {
            let item_id = Uuid::new_v4().to_string();
            let kind = item.kind();
            if let Some(payload) = item.payload {
                payloads.insert(item_id.clone(), payload);
            }
            rows.push(ItemRow {
                id: item_id,
                job_id: job_id.clone(),
                seq: seq as u32,
                kind,
                source: item.source,
                title: item.title,
                dedupe_key: Some(key),
                metadata: item.metadata.map(|m| m.to_string()),
                status: ItemStatus::Pending,
                artifact_ref: None,
                error_message: None,
                created_at: now.clone(),
                updated_at: now.clone(),
            });
        }

        self.db.with_txn(|conn| {
            job_repo::insert(conn, &job)?;
            for row in &rows {
                item_repo::insert(conn, row)?;
            }
            Ok(())
        })?;

        info!(job_id = %job_id, total, skipped, "batch accepted");
        self.notifier.notify(
            Notification::new(
                &job_id,
                NotificationKind::InProgress,
                "Ingesting documents",
                &format!("{} document(s) queued", total),
            )
            .with_snapshot(ProgressSnapshot::new(total, 0, 0)),
        );

        // The cancel handle must exist before the job is visible to
        // callers, so a cancel landing ahead of the worker's first
        // poll still reaches it.
        let handle = self.cancellations.register(&job_id);
        let worker = self.clone();
        let worker_job_id = job_id.clone();
        tokio::spawn(async move {
            worker.run_worker(worker_job_id, payloads, handle).await;
        });

        Ok(BatchAccepted {
            job_id,
            accepted: total,
            skipped,
        })
    }

    async fn run_worker(
        self,
        job_id: String,
        payloads: HashMap<String, Vec<u8>>,
        handle: CancelHandle,
    ) {
        let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.cancellations.remove(&job_id);
                return;
            }
        };

        let deadline = Duration::from_secs(self.config.job_timeout_secs);
        match timeout(deadline, self.process_job(&job_id, &payloads, &handle)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(job_id = %job_id, "job failed: {}", e);
                self.fail_job(&job_id, &format!("job failed: {}", e));
            }
            Err(_) => {
                warn!(job_id = %job_id, "job exceeded its deadline");
                self.fail_job(&job_id, "job timed out");
            }
        }

        drop(permit);
        self.cancellations.remove(&job_id);
    }

    /// Marks a job failed unless someone else already settled it.
    fn fail_job(&self, job_id: &str, message: &str) {
        let job = match job_repo::find_by_id(&self.db, job_id) {
            Ok(Some(job)) => job,
            _ => return,
        };
        if job.status.is_terminal() {
            return;
        }
        let snapshot =
            ProgressSnapshot::new(job.total_items, job.completed_items, job.failed_items);
        match job_repo::finalize(
            &self.db,
            job_id,
            JobStatus::Failed,
            job.completed_items,
            job.failed_items,
            Some(message),
            &now_rfc3339(),
        ) {
            // Lost to a concurrent cancel; that side owns the events.
            Ok(false) => return,
            Ok(true) => {}
            Err(e) => {
                error!(job_id = %job_id, "failed to finalize job: {}", e);
                return;
            }
        }
        self.broadcaster.send(IngestEvent::new(
            job_id,
            IngestEventKind::Error,
            snapshot,
            message,
        ));
        self.notifier.notify(
            Notification::new(job_id, NotificationKind::Error, "Ingestion failed", message)
                .with_snapshot(snapshot),
        );
    }

    async fn process_job(
        &self,
        job_id: &str,
        payloads: &HashMap<String, Vec<u8>>,
        handle: &CancelHandle,
    ) -> Result<(), IngestError> {
        let job = job_repo::find_by_id(&self.db, job_id)?.ok_or(IngestError::JobNotFound)?;

        // Claim the job. Losing the claim means it was cancelled (or
        // reclaimed) before this worker got scheduled.
        if !job_repo::mark_processing(&self.db, job_id, &now_rfc3339())? {
            info!(job_id = %job_id, "job no longer pending, worker exiting");
            return Ok(());
        }
        let progress = self.broadcaster.start_job(job_id, job.total_items);

        // A failing probe degrades every item to raw ingestion instead
        // of aborting the batch.
        let extraction_available = match timeout(
            Duration::from_secs(self.config.health_check_timeout_secs),
            self.pipeline.health_check_extractor(),
        )
        .await
        {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(job_id = %job_id, "extraction service unavailable: {}", e);
                progress.warning(0, 0, "text extraction unavailable, ingesting raw documents");
                self.notifier.notify(Notification::new(
                    job_id,
                    NotificationKind::Warning,
                    "Extraction unavailable",
                    "documents will be ingested without text extraction",
                ));
                false
            }
            Err(_) => {
                warn!(job_id = %job_id, "extraction health probe timed out");
                progress.warning(0, 0, "text extraction unavailable, ingesting raw documents");
                false
            }
        };

        let items = item_repo::list_by_job(&self.db, job_id)?;
        let mut completed = 0u32;
        let mut failed = 0u32;
        let mut data_source_refs = Vec::new();

        for item in &items {
            if handle.is_cancelled() {
                info!(job_id = %job_id, "job cancelled, stopping before item {}", item.seq);
                return Ok(());
            }

            let payload = payloads.get(&item.id).map(Vec::as_slice);
            match self
                .pipeline
                .process_item(&job.context_id, item, payload, extraction_available)
                .await
            {
                Ok(outcome) => {
                    completed += 1;
                    for warning in &outcome.warnings {
                        progress.warning(completed, failed, warning);
                    }
                    if let Some(ds_ref) = outcome.data_source_ref {
                        data_source_refs.push(ds_ref);
                    }
                    progress.item_advanced(
                        completed,
                        failed,
                        "stored",
                        &format!("item {} of {} ingested", item.seq + 1, job.total_items),
                    );
                }
                Err(e) => {
                    warn!(job_id = %job_id, item_id = %item.id, "item failed: {}", e);
                    self.pipeline.mark_failed(&item.id, &e)?;
                    failed += 1;
                    progress.item_advanced(completed, failed, "failed", &e.to_string());
                }
            }

            job_repo::update_progress(&self.db, job_id, completed, failed, &now_rfc3339())?;
        }

        if handle.is_cancelled() {
            return Ok(());
        }

        if completed == 0 {
            let message = format!("all {} item(s) failed", job.total_items);
            if job_repo::finalize(
                &self.db,
                job_id,
                JobStatus::Failed,
                completed,
                failed,
                Some(&message),
                &now_rfc3339(),
            )? {
                progress.error(completed, failed, &message);
                self.notifier.notify(
                    Notification::new(job_id, NotificationKind::Error, "Ingestion failed", &message)
                        .with_snapshot(ProgressSnapshot::new(job.total_items, completed, failed)),
                );
            }
            return Ok(());
        }

        // Without an index, or without a single registered data source,
        // there is nothing to wait for: the tallies decide the outcome
        // here. Registration failures already surfaced as item warnings
        // and do not degrade the job.
        let index = match &self.index {
            Some(index) if !data_source_refs.is_empty() => index,
            _ => {
                self.settle_unindexed(job_id, &job, completed, failed, &progress)?;
                return Ok(());
            }
        };

        // Hand off to the external index. Losing the run reference is
        // soft: the sweeper re-triggers indexing from the documents'
        // data source refs.
        match index.start_indexing(&data_source_refs).await {
            Ok(run_ref) => {
                job_repo::set_external_index_ref(&self.db, job_id, &run_ref, &now_rfc3339())?;
                info!(job_id = %job_id, run_ref = %run_ref, "indexing started");
            }
            Err(e) => {
                warn!(job_id = %job_id, "failed to start indexing: {}", e);
                progress.warning(completed, failed, "indexing could not be started yet");
            }
        }

        if job_repo::finalize(
            &self.db,
            job_id,
            JobStatus::IndexPending,
            completed,
            failed,
            None,
            &now_rfc3339(),
        )? {
            progress.item_advanced(completed, failed, "indexing", "documents handed off to index");
        }

        Ok(())
    }

    /// Finalizes a job that has no indexing run to wait for.
    fn settle_unindexed(
        &self,
        job_id: &str,
        job: &JobRow,
        completed: u32,
        failed: u32,
        progress: &JobProgress,
    ) -> Result<(), IngestError> {
        let status = if failed > 0 {
            JobStatus::PartiallyCompleted
        } else {
            JobStatus::Completed
        };
        if !job_repo::finalize(&self.db, job_id, status, completed, failed, None, &now_rfc3339())? {
            return Ok(());
        }

        let message = format!(
            "{} of {} document(s) ingested",
            completed, job.total_items
        );
        progress.complete(completed, failed, &message);
        let (kind, title) = match status {
            JobStatus::Completed => (NotificationKind::Success, "Ingestion complete"),
            _ => (NotificationKind::Warning, "Ingestion partially complete"),
        };
        self.notifier.notify(
            Notification::new(job_id, kind, title, &message)
                .with_snapshot(ProgressSnapshot::new(job.total_items, completed, failed)),
        );
        info!(job_id = %job_id, status = %status, "job settled without indexing run");
        Ok(())
    }

    /// Owner-scoped view of a job.
    pub fn get_status(&self, job_id: &str, owner_id: &str) -> Result<JobSnapshot, IngestError> {
        let job =
            job_repo::find_owned(&self.db, job_id, owner_id)?.ok_or(IngestError::JobNotFound)?;
        let items = item_repo::list_by_job(&self.db, job_id)?;
        let progress =
            ProgressSnapshot::new(job.total_items, job.completed_items, job.failed_items);
        Ok(JobSnapshot {
            job,
            items,
            progress,
        })
    }

    /// Recent jobs for a context, newest first.
    pub fn list_jobs(&self, context_id: &str, owner_id: &str) -> Result<Vec<JobRow>, IngestError> {
        Ok(job_repo::list_by_context(&self.db, context_id, owner_id, LIST_LIMIT)?)
    }

    /// Cancels a running job. The terminal state is written here; the
    /// worker observes the flag and stops without re-finalizing.
    pub fn cancel(&self, job_id: &str, owner_id: &str) -> Result<(), IngestError> {
        let job =
            job_repo::find_owned(&self.db, job_id, owner_id)?.ok_or(IngestError::JobNotFound)?;
        if job.status.is_terminal() {
            return Err(IngestError::AlreadyTerminal { status: job.status });
        }

        self.cancellations.cancel(job_id);
        if !job_repo::finalize(
            &self.db,
            job_id,
            JobStatus::Cancelled,
            job.completed_items,
            job.failed_items,
            None,
            &now_rfc3339(),
        )? {
            // The worker (or sweeper) finished the job first.
            let status = job_repo::find_by_id(&self.db, job_id)?
                .map(|j| j.status)
                .unwrap_or(job.status);
            return Err(IngestError::AlreadyTerminal { status });
        }

        let snapshot =
            ProgressSnapshot::new(job.total_items, job.completed_items, job.failed_items);
        self.broadcaster.send(IngestEvent::new(
            job_id,
            IngestEventKind::Complete,
            snapshot,
            "Batch cancelled",
        ));
        self.notifier.notify(
            Notification::new(
                job_id,
                NotificationKind::Warning,
                "Ingestion cancelled",
                &format!(
                    "{} of {} document(s) were ingested before cancellation",
                    job.completed_items, job.total_items
                ),
            )
            .with_snapshot(snapshot),
        );
        info!(job_id = %job_id, "job cancelled");
        Ok(())
    }

    /// Deletes a settled job and its items in one transaction.
    pub fn delete_job(&self, job_id: &str, owner_id: &str) -> Result<(), IngestError> {
        let job =
            job_repo::find_owned(&self.db, job_id, owner_id)?.ok_or(IngestError::JobNotFound)?;
        if job.status.is_active() {
            return Err(IngestError::StillActive { status: job.status });
        }
        job_repo::delete_with_items(&self.db, job_id)?;
        info!(job_id = %job_id, "job deleted");
        Ok(())
    }
}
