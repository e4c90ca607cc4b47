//! Job repository — CRUD operations for the `ingest_jobs` table.

use rusqlite::types::Type;
use rusqlite::{params, Row};

use crate::model::{JobKind, JobStatus};

use super::{Database, DatabaseError};

/// A job row from the job store.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub context_id: String,
    pub owner_id: String,
    pub total_items: u32,
    pub completed_items: u32,
    pub failed_items: u32,
    pub external_index_ref: Option<String>,
    pub error_message: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let kind: String = row.get("kind")?;
        let status: String = row.get("status")?;
        Ok(Self {
            id: row.get("id")?,
            kind: JobKind::parse(&kind)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?,
            status: JobStatus::parse(&status)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?,
            context_id: row.get("context_id")?,
            owner_id: row.get("owner_id")?,
            total_items: row.get("total_items")?,
            completed_items: row.get("completed_items")?,
            failed_items: row.get("failed_items")?,
            external_index_ref: row.get("external_index_ref")?,
            error_message: row.get("error_message")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a new job row. Intended to run inside the batch-creation
/// transaction together with its items.
pub fn insert(conn: &rusqlite::Connection, job: &JobRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO ingest_jobs (id, kind, status, context_id, owner_id, total_items,
         completed_items, failed_items, external_index_ref, error_message, started_at,
         completed_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            job.id,
            job.kind.as_str(),
            job.status.as_str(),
            job.context_id,
            job.owner_id,
            job.total_items,
            job.completed_items,
            job.failed_items,
            job.external_index_ref,
            job.error_message,
            job.started_at,
            job.completed_at,
            job.created_at,
            job.updated_at,
        ],
    )?;
    Ok(())
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM ingest_jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Finds a job by ID, enforcing ownership.
pub fn find_owned(db: &Database, id: &str, owner_id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM ingest_jobs WHERE id = ?1 AND owner_id = ?2")?;
        let mut rows = stmt.query_map(params![id, owner_id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Recent jobs for a context, newest first, bounded.
pub fn list_by_context(
    db: &Database,
    context_id: &str,
    owner_id: &str,
    limit: u32,
) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM ingest_jobs WHERE context_id = ?1 AND owner_id = ?2
             ORDER BY created_at DESC LIMIT ?3",
        )?;
        let rows: Vec<JobRow> = stmt
            .query_map(params![context_id, owner_id, limit], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// All jobs currently in the given status.
pub fn select_by_status(db: &Database, status: JobStatus) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM ingest_jobs WHERE status = ?1")?;
        let rows: Vec<JobRow> = stmt
            .query_map(params![status.as_str()], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Jobs stuck in `pending`/`processing` whose last update predates the
/// cutoff. These are orphans left behind by a crashed worker.
pub fn select_stale(db: &Database, cutoff: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM ingest_jobs
             WHERE status IN ('pending', 'processing') AND updated_at < ?1",
        )?;
        let rows: Vec<JobRow> = stmt
            .query_map(params![cutoff], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Moves a job from `pending` to `processing`. Returns false when the
/// job is no longer pending, e.g. cancelled before its worker ran.
pub fn mark_processing(db: &Database, id: &str, updated_at: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE ingest_jobs SET status = 'processing', updated_at = ?2
             WHERE id = ?1 AND status = 'pending'",
            params![id, updated_at],
        )?;
        Ok(changed > 0)
    })
}

/// Updates the completed/failed item tallies.
pub fn update_progress(
    db: &Database,
    id: &str,
    completed: u32,
    failed: u32,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE ingest_jobs SET completed_items = ?2, failed_items = ?3, updated_at = ?4
             WHERE id = ?1",
            params![id, completed, failed, updated_at],
        )?;
        Ok(())
    })
}

/// Records the external indexing run reference captured at hand-off.
pub fn set_external_index_ref(
    db: &Database,
    id: &str,
    index_ref: &str,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE ingest_jobs SET external_index_ref = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, index_ref, updated_at],
        )?;
        Ok(())
    })
}

/// Moves a job to a final (or index-pending) state with tallies and an
/// optional error summary. `completed_at` is only written for terminal
/// statuses; an index-pending job is not complete yet. A job already in
/// a terminal state is never overwritten; the update reports whether it
/// took effect so callers can skip their side effects when it lost.
pub fn finalize(
    db: &Database,
    id: &str,
    status: JobStatus,
    completed: u32,
    failed: u32,
    error_message: Option<&str>,
    now: &str,
) -> Result<bool, DatabaseError> {
    let completed_at = status.is_terminal().then_some(now);
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE ingest_jobs SET status = ?2, completed_items = ?3, failed_items = ?4,
             error_message = ?5, completed_at = COALESCE(?6, completed_at), updated_at = ?7
             WHERE id = ?1 AND status NOT IN
                ('completed', 'partially_completed', 'failed', 'cancelled')",
            params![
                id,
                status.as_str(),
                completed,
                failed,
                error_message,
                completed_at,
                now
            ],
        )?;
        Ok(changed > 0)
    })
}

/// Deletes a job and its items in one transaction, items first
/// (explicit two-step cascade).
pub fn delete_with_items(db: &Database, id: &str) -> Result<(), DatabaseError> {
    db.with_txn(|conn| {
        conn.execute("DELETE FROM ingest_items WHERE job_id = ?1", params![id])?;
        conn.execute("DELETE FROM ingest_jobs WHERE id = ?1", params![id])?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::now_rfc3339;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    pub(crate) fn sample_job(id: &str) -> JobRow {
        let now = now_rfc3339();
        JobRow {
            id: id.to_string(),
            kind: JobKind::PaperIngest,
            status: JobStatus::Pending,
            context_id: "subject-7".to_string(),
            owner_id: "user-1".to_string(),
            total_items: 3,
            completed_items: 0,
            failed_items: 0,
            external_index_ref: None,
            error_message: None,
            started_at: Some(now.clone()),
            completed_at: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    fn insert_job(db: &Database, job: &JobRow) {
        db.with_conn(|conn| insert(conn, job)).unwrap();
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        insert_job(&db, &sample_job("job-1"));

        let found = find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(found.kind, JobKind::PaperIngest);
        assert_eq!(found.status, JobStatus::Pending);
        assert_eq!(found.total_items, 3);
        assert!(found.external_index_ref.is_none());
    }

    #[test]
    fn test_find_owned_enforces_ownership() {
        let db = test_db();
        insert_job(&db, &sample_job("job-2"));

        assert!(find_owned(&db, "job-2", "user-1").unwrap().is_some());
        assert!(find_owned(&db, "job-2", "someone-else").unwrap().is_none());
    }

    #[test]
    fn test_mark_processing_and_progress() {
        let db = test_db();
        insert_job(&db, &sample_job("job-3"));

        assert!(mark_processing(&db, "job-3", &now_rfc3339()).unwrap());
        update_progress(&db, "job-3", 2, 1, &now_rfc3339()).unwrap();

        let found = find_by_id(&db, "job-3").unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Processing);
        assert_eq!(found.completed_items, 2);
        assert_eq!(found.failed_items, 1);

        // No longer pending, a second claim loses.
        assert!(!mark_processing(&db, "job-3", &now_rfc3339()).unwrap());
    }

    #[test]
    fn test_finalize_never_overwrites_terminal() {
        let db = test_db();
        insert_job(&db, &sample_job("job-c"));

        assert!(finalize(&db, "job-c", JobStatus::Cancelled, 0, 0, None, &now_rfc3339()).unwrap());

        // A late worker cannot resurrect the job.
        assert!(!finalize(&db, "job-c", JobStatus::IndexPending, 1, 0, None, &now_rfc3339())
            .unwrap());
        assert!(!mark_processing(&db, "job-c", &now_rfc3339()).unwrap());

        let found = find_by_id(&db, "job-c").unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Cancelled);
        assert_eq!(found.completed_items, 0);
    }

    #[test]
    fn test_finalize_terminal_sets_completed_at() {
        let db = test_db();
        insert_job(&db, &sample_job("job-4"));

        finalize(
            &db,
            "job-4",
            JobStatus::PartiallyCompleted,
            2,
            1,
            None,
            &now_rfc3339(),
        )
        .unwrap();

        let found = find_by_id(&db, "job-4").unwrap().unwrap();
        assert_eq!(found.status, JobStatus::PartiallyCompleted);
        assert!(found.completed_at.is_some());
    }

    #[test]
    fn test_finalize_index_pending_leaves_completed_at_unset() {
        let db = test_db();
        insert_job(&db, &sample_job("job-5"));

        finalize(&db, "job-5", JobStatus::IndexPending, 3, 0, None, &now_rfc3339()).unwrap();

        let found = find_by_id(&db, "job-5").unwrap().unwrap();
        assert_eq!(found.status, JobStatus::IndexPending);
        assert!(found.completed_at.is_none());
    }

    #[test]
    fn test_select_by_status() {
        let db = test_db();
        insert_job(&db, &sample_job("s1"));

        let mut pending_index = sample_job("s2");
        pending_index.status = JobStatus::IndexPending;
        insert_job(&db, &pending_index);

        let jobs = select_by_status(&db, JobStatus::IndexPending).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "s2");
    }

    #[test]
    fn test_select_stale() {
        let db = test_db();
        let mut old = sample_job("old");
        old.status = JobStatus::Processing;
        old.updated_at = "2020-01-01T00:00:00.000Z".to_string();
        insert_job(&db, &old);

        let mut done = sample_job("done");
        done.status = JobStatus::Completed;
        done.updated_at = "2020-01-01T00:00:00.000Z".to_string();
        insert_job(&db, &done);

        insert_job(&db, &sample_job("fresh"));

        let stale = select_stale(&db, "2025-01-01T00:00:00.000Z").unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, "old");
    }

    #[test]
    fn test_list_by_context_ordering_and_limit() {
        let db = test_db();
        for i in 0..5 {
            let mut job = sample_job(&format!("j{}", i));
            job.created_at = format!("2026-01-0{}T00:00:00.000Z", i + 1);
            insert_job(&db, &job);
        }

        let jobs = list_by_context(&db, "subject-7", "user-1", 3).unwrap();
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].id, "j4");
        assert_eq!(jobs[2].id, "j2");
    }

    #[test]
    fn test_delete_with_items() {
        let db = test_db();
        insert_job(&db, &sample_job("job-del"));
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO ingest_items (id, job_id, seq, kind, source, status, created_at, updated_at)
                 VALUES ('it-1', 'job-del', 0, 'remote_url', 'https://x/y.pdf', 'pending', '2026-01-01', '2026-01-01')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        delete_with_items(&db, "job-del").unwrap();

        assert!(find_by_id(&db, "job-del").unwrap().is_none());
        db.with_conn(|conn| {
            let count: u32 =
                conn.query_row("SELECT COUNT(*) FROM ingest_items", [], |r| r.get(0))?;
            assert_eq!(count, 0);
            Ok(())
        })
        .unwrap();
    }
}
