//! Reconciliation sweeper.
//!
//! Jobs in `index_pending` have finished local processing but wait on
//! the external knowledge index. The sweeper polls the index, settles
//! jobs whose run finished, re-triggers indexing for jobs that lost
//! their run reference and fails abandoned pending/processing jobs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::broadcast::{IngestEvent, IngestEventKind, IngestProgressBroadcaster};
use crate::clients::{IndexRunStatus, KnowledgeIndex};
use crate::config::IngestConfig;
use crate::db::{document_repo, job_repo, Database};
use crate::error::SweepError;
use crate::model::{now_rfc3339, JobStatus, ProgressSnapshot};
use crate::notify::{Notification, NotificationKind, NotificationSink};

/// The broadcaster is shared with the orchestrator so subscribers see
/// the terminal event for jobs the sweeper finishes.
pub struct ReconcileSweeper {
    db: Database,
    index: Arc<dyn KnowledgeIndex>,
    notifier: Arc<dyn NotificationSink>,
    broadcaster: IngestProgressBroadcaster,
}

impl ReconcileSweeper {
    pub fn new(
        db: Database,
        index: Arc<dyn KnowledgeIndex>,
        notifier: Arc<dyn NotificationSink>,
        broadcaster: IngestProgressBroadcaster,
    ) -> Self {
        Self {
            db,
            index,
            notifier,
            broadcaster,
        }
    }

    /// One reconciliation pass over all index-pending jobs. Returns
    /// the number of jobs settled.
    pub async fn sweep(&self) -> Result<usize, SweepError> {
        let jobs = job_repo::select_by_status(&self.db, JobStatus::IndexPending)?;
        let mut settled = 0;

        for job in jobs {
            match &job.external_index_ref {
                Some(run_ref) => match self.index.get_index_status(run_ref).await {
                    Ok(IndexRunStatus::Indexed) => {
                        if self.settle(&job)? {
                            settled += 1;
                        }
                    }
                    Ok(IndexRunStatus::Failed { message }) => {
                        if job_repo::finalize(
                            &self.db,
                            &job.id,
                            JobStatus::Failed,
                            job.completed_items,
                            job.failed_items,
                            Some(&format!("indexing failed: {}", message)),
                            &now_rfc3339(),
                        )? {
                            let snapshot = ProgressSnapshot::new(
                                job.total_items,
                                job.completed_items,
                                job.failed_items,
                            );
                            self.broadcaster.send(IngestEvent::new(
                                &job.id,
                                IngestEventKind::Error,
                                snapshot,
                                &format!("indexing failed: {}", message),
                            ));
                            self.notifier.notify(
                                Notification::new(
                                    &job.id,
                                    NotificationKind::Error,
                                    "Indexing failed",
                                    &message,
                                )
                                .with_snapshot(snapshot),
                            );
                            settled += 1;
                        }
                    }
                    Ok(IndexRunStatus::Pending) => {}
                    Err(e) => {
                        warn!(job_id = %job.id, "index status check failed: {}", e);
                    }
                },
                None => {
                    // The worker never got a run reference. Re-trigger
                    // from the data sources the documents did register,
                    // or settle the job if there is nothing to index.
                    let refs = document_repo::data_source_refs_for_job(&self.db, &job.id)?;
                    if refs.is_empty() {
                        if self.settle(&job)? {
                            settled += 1;
                        }
                    } else {
                        match self.index.start_indexing(&refs).await {
                            Ok(run_ref) => {
                                info!(job_id = %job.id, run_ref = %run_ref, "indexing re-triggered");
                                job_repo::set_external_index_ref(
                                    &self.db,
                                    &job.id,
                                    &run_ref,
                                    &now_rfc3339(),
                                )?;
                            }
                            Err(e) => {
                                warn!(job_id = %job.id, "re-triggering indexing failed: {}", e);
                            }
                        }
                    }
                }
            }
        }

        Ok(settled)
    }

    /// Settles a job whose indexing concluded. Item tallies pick the
    /// terminal status. Returns false when the job was already settled
    /// by someone else.
    fn settle(&self, job: &job_repo::JobRow) -> Result<bool, SweepError> {
        let status = if job.failed_items > 0 {
            JobStatus::PartiallyCompleted
        } else {
            JobStatus::Completed
        };

        if !job_repo::finalize(
            &self.db,
            &job.id,
            status,
            job.completed_items,
            job.failed_items,
            None,
            &now_rfc3339(),
        )? {
            return Ok(false);
        }

        let snapshot =
            ProgressSnapshot::new(job.total_items, job.completed_items, job.failed_items);
        let (kind, title) = match status {
            JobStatus::Completed => (NotificationKind::Success, "Ingestion complete"),
            _ => (NotificationKind::Warning, "Ingestion partially complete"),
        };
        let message = format!(
            "{} of {} document(s) ingested",
            job.completed_items, job.total_items
        );
        self.broadcaster.send(IngestEvent::new(
            &job.id,
            IngestEventKind::Complete,
            snapshot,
            &message,
        ));
        self.notifier
            .notify(Notification::new(&job.id, kind, title, &message).with_snapshot(snapshot));
        info!(job_id = %job.id, status = %status, "job settled");
        Ok(true)
    }

    /// Fails pending/processing jobs that have not been touched for
    /// longer than `older_than`. These were orphaned by a crash or
    /// restart; their workers are gone.
    pub fn sweep_stale(&self, older_than: Duration) -> Result<usize, SweepError> {
        let cutoff = (Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::zero()))
        .to_rfc3339_opts(SecondsFormat::Millis, true);

        let jobs = job_repo::select_stale(&self.db, &cutoff)?;
        let mut count = 0;

        for job in jobs {
            warn!(job_id = %job.id, "failing abandoned job (last update {})", job.updated_at);
            if !job_repo::finalize(
                &self.db,
                &job.id,
                JobStatus::Failed,
                job.completed_items,
                job.failed_items,
                Some("abandoned: no progress since last service restart"),
                &now_rfc3339(),
            )? {
                continue;
            }
            count += 1;
            self.broadcaster.send(IngestEvent::new(
                &job.id,
                IngestEventKind::Error,
                ProgressSnapshot::new(job.total_items, job.completed_items, job.failed_items),
                "the job made no progress and was marked failed",
            ));
            self.notifier.notify(Notification::new(
                &job.id,
                NotificationKind::Error,
                "Ingestion abandoned",
                "the job made no progress and was marked failed",
            ));
        }

        Ok(count)
    }
}

/// Runs the sweeper on an interval with a manual trigger.
pub struct SweepScheduler {
    stop: Arc<AtomicBool>,
    trigger: broadcast::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl SweepScheduler {
    /// Spawns the background sweep loop. Every tick runs a
    /// reconciliation sweep; every `stale_sweep_every`th tick also
    /// runs the stale-job sweep.
    pub fn spawn(sweeper: Arc<ReconcileSweeper>, config: &IngestConfig) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let (trigger, mut trigger_rx) = broadcast::channel::<()>(8);

        let interval = Duration::from_secs(config.sweep_interval_secs);
        let stale_after = Duration::from_secs(config.stale_after_secs);
        let stale_every = config.stale_sweep_every;
        let stop_flag = Arc::clone(&stop);

        let handle = tokio::spawn(async move {
            let mut tick: u32 = 0;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = trigger_rx.recv() => {}
                }
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }

                tick = tick.wrapping_add(1);
                match sweeper.sweep().await {
                    Ok(settled) if settled > 0 => {
                        info!(settled, "reconciliation sweep settled jobs")
                    }
                    Ok(_) => {}
                    Err(e) => warn!("reconciliation sweep failed: {}", e),
                }

                if tick % stale_every == 0 {
                    if let Err(e) = sweeper.sweep_stale(stale_after) {
                        warn!("stale sweep failed: {}", e);
                    }
                }
            }
        });

        Self {
            stop,
            trigger,
            handle,
        }
    }

    /// Requests an immediate sweep.
    pub fn trigger(&self) {
        let _ = self.trigger.send(());
    }

    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.trigger.send(());
        let _ = self.handle.await;
    }
}
