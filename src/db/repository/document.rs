use rusqlite::{params, Connection};

use crate::db::{now_timestamp, parse_timestamp, DatabaseError, UpsertOutcome};
use crate::models::*;

/// Insert the document if its id is new. An existing row is left untouched,
/// so re-running preparation never rewrites a stored blob.
pub fn upsert_document(
    conn: &Connection,
    id: &str,
    mime_type: &str,
    document_blob: &str,
) -> Result<UpsertOutcome, DatabaseError> {
    let inserted = conn.execute(
        "INSERT INTO documents (id, mime_type, document_blob, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO NOTHING",
        params![id, mime_type, document_blob, now_timestamp()],
    )?;

    Ok(if inserted == 1 {
        UpsertOutcome::Inserted
    } else {
        UpsertOutcome::Unchanged
    })
}

pub fn get_document(conn: &Connection, id: &str) -> Result<Option<Document>, DatabaseError> {
    let result = conn.query_row(
        "SELECT id, mime_type, document_blob, created_at FROM documents WHERE id = ?1",
        params![id],
        |row| {
            Ok(Document {
                id: row.get(0)?,
                mime_type: row.get(1)?,
                document_blob: row.get(2)?,
                created_at: parse_timestamp(&row.get::<_, String>(3)?),
            })
        },
    );

    match result {
        Ok(doc) => Ok(Some(doc)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
