//! End-to-end ingestion scenarios: batch submission through worker
//! processing, index hand-off and sweeper reconciliation.

use std::sync::Arc;
use std::time::Duration;

use examshelf::clients::memory::{
    MemoryArtifactStore, MemoryFetcher, MemoryKnowledgeIndex, MemoryTextExtractor,
};
use examshelf::clients::{
    ArtifactStore, IndexRunStatus, KnowledgeIndex, SourceFetcher, TextExtractor,
};
use examshelf::broadcast::IngestEventKind;
use examshelf::ingest::{BatchRequest, IngestOrchestrator, ItemPipeline, NewItem};
use examshelf::notify::{MemorySink, NotificationKind, NotificationSink};
use examshelf::sweeper::ReconcileSweeper;
use examshelf::{Database, IngestConfig, IngestError, ItemStatus, JobKind, JobStatus};

struct Stack {
    orchestrator: IngestOrchestrator,
    sweeper: ReconcileSweeper,
    fetcher: Arc<MemoryFetcher>,
    store: Arc<MemoryArtifactStore>,
    extractor: Arc<MemoryTextExtractor>,
    index: Arc<MemoryKnowledgeIndex>,
    notifier: Arc<MemorySink>,
}

fn stack() -> Stack {
    let db = Database::open_in_memory().unwrap();
    let fetcher = Arc::new(MemoryFetcher::new());
    let store = Arc::new(MemoryArtifactStore::new());
    let extractor = Arc::new(MemoryTextExtractor::new());
    let index = Arc::new(MemoryKnowledgeIndex::new());
    let notifier = Arc::new(MemorySink::new());

    let pipeline = Arc::new(ItemPipeline::new(
        db.clone(),
        Arc::clone(&fetcher) as Arc<dyn SourceFetcher>,
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        Arc::clone(&extractor) as Arc<dyn TextExtractor>,
        Some(Arc::clone(&index) as Arc<dyn KnowledgeIndex>),
        "ingest",
    ));
    let orchestrator = IngestOrchestrator::new(
        db.clone(),
        pipeline,
        Some(Arc::clone(&index) as Arc<dyn KnowledgeIndex>),
        Arc::clone(&notifier) as Arc<dyn NotificationSink>,
        IngestConfig::default(),
    );
    let sweeper = ReconcileSweeper::new(
        db,
        Arc::clone(&index) as Arc<dyn KnowledgeIndex>,
        Arc::clone(&notifier) as Arc<dyn NotificationSink>,
        orchestrator.broadcaster(),
    );

    Stack {
        orchestrator,
        sweeper,
        fetcher,
        store,
        extractor,
        index,
        notifier,
    }
}

fn paper_request(items: Vec<NewItem>) -> BatchRequest {
    BatchRequest {
        kind: JobKind::PaperIngest,
        context_id: "subject-maths".to_string(),
        owner_id: "teacher-1".to_string(),
        items,
    }
}

async fn wait_for_status(stack: &Stack, job_id: &str, wanted: JobStatus) {
    for _ in 0..300 {
        let snapshot = stack.orchestrator.get_status(job_id, "teacher-1").unwrap();
        if snapshot.job.status == wanted {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let snapshot = stack.orchestrator.get_status(job_id, "teacher-1").unwrap();
    panic!(
        "job {} stuck in {}, wanted {}",
        job_id, snapshot.job.status, wanted
    );
}

#[tokio::test]
async fn full_batch_lifecycle_ends_completed() {
    let s = stack();
    s.fetcher.insert("https://papers.test/maths-2024-06.pdf", b"%PDF-june".to_vec());
    s.fetcher.insert("https://papers.test/maths-2024-11.pdf", b"%PDF-nov".to_vec());

    let accepted = s
        .orchestrator
        .start_batch(paper_request(vec![
            NewItem::remote("https://papers.test/maths-2024-06.pdf")
                .with_metadata(serde_json::json!({"year": 2024, "month": 6})),
            NewItem::remote("https://papers.test/maths-2024-11.pdf")
                .with_metadata(serde_json::json!({"year": 2024, "month": 11})),
        ]))
        .unwrap();
    assert_eq!(accepted.accepted, 2);

    wait_for_status(&s, &accepted.job_id, JobStatus::IndexPending).await;

    // Two raw artifacts plus two extracted-text siblings.
    assert_eq!(s.store.object_count(), 4);

    // The index confirms, the sweeper settles the job.
    let snapshot = s.orchestrator.get_status(&accepted.job_id, "teacher-1").unwrap();
    let run_ref = snapshot.job.external_index_ref.unwrap();
    s.index.set_run_state(&run_ref, IndexRunStatus::Indexed);
    let mut rx = s.orchestrator.subscribe();
    assert_eq!(s.sweeper.sweep().await.unwrap(), 1);

    // The terminal event reaches live subscribers even though the
    // sweeper, not the worker, finished the job.
    let event = rx.try_recv().unwrap();
    assert_eq!(event.kind, IngestEventKind::Complete);
    assert_eq!(event.job_id, accepted.job_id);

    let snapshot = s.orchestrator.get_status(&accepted.job_id, "teacher-1").unwrap();
    assert_eq!(snapshot.job.status, JobStatus::Completed);
    assert_eq!(snapshot.progress.percent, 100);
    assert!(snapshot.job.completed_at.is_some());

    let kinds: Vec<_> = s.notifier.delivered().iter().map(|n| n.kind).collect();
    assert!(kinds.contains(&NotificationKind::InProgress));
    assert_eq!(*kinds.last().unwrap(), NotificationKind::Success);
}

#[tokio::test]
async fn mixed_batch_settles_partially_completed() {
    let s = stack();
    s.fetcher.insert("https://papers.test/good.pdf", b"%PDF".to_vec());
    // bad.pdf is not preloaded, its fetch fails.

    let accepted = s
        .orchestrator
        .start_batch(paper_request(vec![
            NewItem::remote("https://papers.test/good.pdf"),
            NewItem::remote("https://papers.test/bad.pdf"),
        ]))
        .unwrap();

    wait_for_status(&s, &accepted.job_id, JobStatus::IndexPending).await;

    let snapshot = s.orchestrator.get_status(&accepted.job_id, "teacher-1").unwrap();
    assert_eq!(snapshot.job.completed_items, 1);
    assert_eq!(snapshot.job.failed_items, 1);
    let statuses: Vec<_> = snapshot.items.iter().map(|i| i.status).collect();
    assert!(statuses.contains(&ItemStatus::Completed));
    assert!(statuses.contains(&ItemStatus::Failed));

    let run_ref = snapshot.job.external_index_ref.unwrap();
    s.index.set_run_state(&run_ref, IndexRunStatus::Indexed);
    s.sweeper.sweep().await.unwrap();

    let snapshot = s.orchestrator.get_status(&accepted.job_id, "teacher-1").unwrap();
    assert_eq!(snapshot.job.status, JobStatus::PartiallyCompleted);
}

#[tokio::test]
async fn extractor_outage_degrades_to_raw_ingestion() {
    let s = stack();
    s.extractor.set_healthy(false);
    s.fetcher.insert("https://papers.test/scan.pdf", b"%PDF-scan".to_vec());

    let accepted = s
        .orchestrator
        .start_batch(paper_request(vec![NewItem::remote(
            "https://papers.test/scan.pdf",
        )]))
        .unwrap();

    wait_for_status(&s, &accepted.job_id, JobStatus::IndexPending).await;

    // Only the raw artifact, no text sibling.
    assert_eq!(s.store.object_count(), 1);
    // The index got the raw document location.
    assert!(s.index.created_sources()[0].ends_with(".pdf"));

    let kinds: Vec<_> = s.notifier.delivered().iter().map(|n| n.kind).collect();
    assert!(kinds.contains(&NotificationKind::Warning));
}

#[tokio::test]
async fn index_outage_completes_batch_without_sweeper() {
    let s = stack();
    s.fetcher.insert("https://papers.test/p.pdf", b"%PDF".to_vec());
    s.index.set_fail_data_sources(true);

    let accepted = s
        .orchestrator
        .start_batch(paper_request(vec![NewItem::remote(
            "https://papers.test/p.pdf",
        )]))
        .unwrap();
    wait_for_status(&s, &accepted.job_id, JobStatus::Completed).await;

    // The document is durably stored, just not registered; there is no
    // indexing run and nothing left for the sweeper to do.
    let snapshot = s.orchestrator.get_status(&accepted.job_id, "teacher-1").unwrap();
    assert_eq!(snapshot.job.completed_items, 1);
    assert!(snapshot.job.external_index_ref.is_none());
    assert_eq!(s.store.object_count(), 2);
    assert_eq!(s.sweeper.sweep().await.unwrap(), 0);

    let snapshot = s.orchestrator.get_status(&accepted.job_id, "teacher-1").unwrap();
    assert_eq!(snapshot.job.status, JobStatus::Completed);
}

#[tokio::test]
async fn lost_run_reference_is_recovered_by_sweeper() {
    let s = stack();
    s.fetcher.insert("https://papers.test/p.pdf", b"%PDF".to_vec());
    s.index.set_fail_start_indexing(true);

    let accepted = s
        .orchestrator
        .start_batch(paper_request(vec![NewItem::remote(
            "https://papers.test/p.pdf",
        )]))
        .unwrap();
    wait_for_status(&s, &accepted.job_id, JobStatus::IndexPending).await;

    let snapshot = s.orchestrator.get_status(&accepted.job_id, "teacher-1").unwrap();
    assert!(snapshot.job.external_index_ref.is_none());

    // Index comes back; the sweeper re-triggers from the documents'
    // data sources and settles on the following pass.
    s.index.set_fail_start_indexing(false);
    assert_eq!(s.sweeper.sweep().await.unwrap(), 0);

    let snapshot = s.orchestrator.get_status(&accepted.job_id, "teacher-1").unwrap();
    let run_ref = snapshot.job.external_index_ref.expect("run ref recovered");

    s.index.set_run_state(&run_ref, IndexRunStatus::Indexed);
    assert_eq!(s.sweeper.sweep().await.unwrap(), 1);
    let snapshot = s.orchestrator.get_status(&accepted.job_id, "teacher-1").unwrap();
    assert_eq!(snapshot.job.status, JobStatus::Completed);
}

#[tokio::test]
async fn uploaded_documents_flow_through_same_pipeline() {
    let s = stack();

    let accepted = s
        .orchestrator
        .start_batch(BatchRequest {
            kind: JobKind::DocumentUpload,
            context_id: "subject-maths".to_string(),
            owner_id: "teacher-1".to_string(),
            items: vec![
                NewItem::uploaded("notes-week-1.pdf", b"%PDF-notes".to_vec()),
            ],
        })
        .unwrap();

    wait_for_status(&s, &accepted.job_id, JobStatus::IndexPending).await;

    let snapshot = s.orchestrator.get_status(&accepted.job_id, "teacher-1").unwrap();
    assert_eq!(snapshot.job.completed_items, 1);
    assert!(snapshot.items[0].artifact_ref.is_some());
}

#[tokio::test]
async fn progress_stream_reports_each_item() {
    let s = stack();
    s.fetcher.insert("https://papers.test/a.pdf", b"%PDF-a".to_vec());
    s.fetcher.insert("https://papers.test/b.pdf", b"%PDF-b".to_vec());

    let mut rx = s.orchestrator.subscribe();
    let accepted = s
        .orchestrator
        .start_batch(paper_request(vec![
            NewItem::remote("https://papers.test/a.pdf"),
            NewItem::remote("https://papers.test/b.pdf"),
        ]))
        .unwrap();
    wait_for_status(&s, &accepted.job_id, JobStatus::IndexPending).await;

    let mut percents = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.job_id, accepted.job_id);
        percents.push(event.percent);
    }
    // Monotonically non-decreasing, reaching 100.
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*percents.last().unwrap(), 100);
    assert_eq!(*percents.first().unwrap(), 0);
}

#[tokio::test]
async fn resubmitting_failed_paper_is_allowed() {
    let s = stack();
    let meta = serde_json::json!({"year": 2023, "month": 11});

    // First attempt fails (nothing preloaded).
    let first = s
        .orchestrator
        .start_batch(paper_request(vec![
            NewItem::remote("https://papers.test/nov.pdf").with_metadata(meta.clone()),
        ]))
        .unwrap();
    wait_for_status(&s, &first.job_id, JobStatus::Failed).await;

    // Second attempt with the same year-month key goes through.
    s.fetcher.insert("https://papers.test/nov.pdf", b"%PDF".to_vec());
    let second = s
        .orchestrator
        .start_batch(paper_request(vec![
            NewItem::remote("https://papers.test/nov.pdf").with_metadata(meta),
        ]))
        .unwrap();
    assert_eq!(second.accepted, 1);
    wait_for_status(&s, &second.job_id, JobStatus::IndexPending).await;
}

#[tokio::test]
async fn cancelled_job_stays_cancelled_after_sweep() {
    let s = stack();
    s.fetcher.insert("https://papers.test/a.pdf", b"%PDF".to_vec());

    let accepted = s
        .orchestrator
        .start_batch(paper_request(vec![NewItem::remote(
            "https://papers.test/a.pdf",
        )]))
        .unwrap();
    wait_for_status(&s, &accepted.job_id, JobStatus::IndexPending).await;

    s.orchestrator.cancel(&accepted.job_id, "teacher-1").unwrap();
    let snapshot = s.orchestrator.get_status(&accepted.job_id, "teacher-1").unwrap();
    assert_eq!(snapshot.job.status, JobStatus::Cancelled);

    // The sweeper never resurrects a terminal job.
    s.sweeper.sweep().await.unwrap();
    let snapshot = s.orchestrator.get_status(&accepted.job_id, "teacher-1").unwrap();
    assert_eq!(snapshot.job.status, JobStatus::Cancelled);

    let result = s.orchestrator.cancel(&accepted.job_id, "teacher-1");
    assert!(matches!(result, Err(IngestError::AlreadyTerminal { .. })));
}
