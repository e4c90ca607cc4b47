//! Item repository — per-item state for the `ingest_items` table.

use rusqlite::types::Type;
use rusqlite::{params, Row};

use crate::model::{ItemKind, ItemStatus};

use super::{Database, DatabaseError};

/// An item row belonging to an ingest job.
#[derive(Debug, Clone)]
pub struct ItemRow {
    pub id: String,
    pub job_id: String,
    pub seq: u32,
    pub kind: ItemKind,
    pub source: String,
    pub title: Option<String>,
    pub dedupe_key: Option<String>,
    pub metadata: Option<String>,
    pub status: ItemStatus,
    pub artifact_ref: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ItemRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let kind: String = row.get("kind")?;
        let status: String = row.get("status")?;
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            seq: row.get("seq")?,
            kind: ItemKind::parse(&kind)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?,
            source: row.get("source")?,
            title: row.get("title")?,
            dedupe_key: row.get("dedupe_key")?,
            metadata: row.get("metadata")?,
            status: ItemStatus::parse(&status)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?,
            artifact_ref: row.get("artifact_ref")?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts an item row. Runs inside the batch-creation transaction
/// alongside the parent job.
pub fn insert(conn: &rusqlite::Connection, item: &ItemRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO ingest_items (id, job_id, seq, kind, source, title, dedupe_key,
         metadata, status, artifact_ref, error_message, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            item.id,
            item.job_id,
            item.seq,
            item.kind.as_str(),
            item.source,
            item.title,
            item.dedupe_key,
            item.metadata,
            item.status.as_str(),
            item.artifact_ref,
            item.error_message,
            item.created_at,
            item.updated_at,
        ],
    )?;
    Ok(())
}

/// All items of a job in submission order.
pub fn list_by_job(db: &Database, job_id: &str) -> Result<Vec<ItemRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM ingest_items WHERE job_id = ?1 ORDER BY seq ASC")?;
        let rows: Vec<ItemRow> = stmt
            .query_map(params![job_id], ItemRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Updates an item's status and error message. The status is written
/// before the corresponding stage runs so a crash leaves behind the
/// phase the item died in.
pub fn update_status(
    db: &Database,
    id: &str,
    status: ItemStatus,
    error_message: Option<&str>,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE ingest_items SET status = ?2, error_message = ?3, updated_at = ?4
             WHERE id = ?1",
            params![id, status.as_str(), error_message, updated_at],
        )?;
        Ok(())
    })
}

/// Records the document produced for a completed item.
pub fn set_artifact_ref(
    db: &Database,
    id: &str,
    artifact_ref: &str,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE ingest_items SET artifact_ref = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, artifact_ref, updated_at],
        )?;
        Ok(())
    })
}

/// Whether a completed item with this dedupe key already exists in the
/// given context. Only completed items count; a failed attempt does not
/// block a resubmission.
pub fn dedupe_exists(
    db: &Database,
    context_id: &str,
    dedupe_key: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM ingest_items i
             JOIN ingest_jobs j ON j.id = i.job_id
             WHERE j.context_id = ?1 AND i.dedupe_key = ?2 AND i.status = 'completed'",
            params![context_id, dedupe_key],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    })
}
