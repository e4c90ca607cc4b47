//! Document repository — stored artifacts produced by completed items.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A stored document and its artifact locations.
#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub id: String,
    pub context_id: String,
    pub filename: String,
    pub source: String,
    pub artifact_key: String,
    pub artifact_url: String,
    pub text_key: Option<String>,
    pub size_bytes: u64,
    pub page_count: Option<u32>,
    pub data_source_ref: Option<String>,
    pub created_at: String,
}

impl DocumentRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            context_id: row.get("context_id")?,
            filename: row.get("filename")?,
            source: row.get("source")?,
            artifact_key: row.get("artifact_key")?,
            artifact_url: row.get("artifact_url")?,
            text_key: row.get("text_key")?,
            size_bytes: row.get("size_bytes")?,
            page_count: row.get("page_count")?,
            data_source_ref: row.get("data_source_ref")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Inserts a document row.
pub fn insert(db: &Database, doc: &DocumentRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO documents (id, context_id, filename, source, artifact_key,
             artifact_url, text_key, size_bytes, page_count, data_source_ref, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                doc.id,
                doc.context_id,
                doc.filename,
                doc.source,
                doc.artifact_key,
                doc.artifact_url,
                doc.text_key,
                doc.size_bytes,
                doc.page_count,
                doc.data_source_ref,
                doc.created_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a document by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<DocumentRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM documents WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], DocumentRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Records the knowledge-index data source created for a document.
pub fn set_data_source_ref(
    db: &Database,
    id: &str,
    data_source_ref: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE documents SET data_source_ref = ?2 WHERE id = ?1",
            params![id, data_source_ref],
        )?;
        Ok(())
    })
}

/// Data source refs for every document produced by a job's completed
/// items. Used when re-triggering indexing for a job that lost its run
/// reference.
pub fn data_source_refs_for_job(
    db: &Database,
    job_id: &str,
) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT d.data_source_ref FROM documents d
             JOIN ingest_items i ON i.artifact_ref = d.id
             WHERE i.job_id = ?1 AND d.data_source_ref IS NOT NULL
             ORDER BY i.seq ASC",
        )?;
        let refs: Vec<String> = stmt
            .query_map(params![job_id], |r| r.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(refs)
    })
}
