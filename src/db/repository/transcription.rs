use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{now_timestamp, parse_timestamp, DatabaseError, UpsertOutcome};
use crate::models::*;

/// Upsert keyed on `(document_id, version)`.
pub fn upsert_transcription(
    conn: &Connection,
    document_id: &str,
    version: u32,
    document_representation: &str,
) -> Result<UpsertOutcome, DatabaseError> {
    let tx = conn.unchecked_transaction()?;

    let exists = tx
        .query_row(
            "SELECT 1 FROM document_transcriptions WHERE document_id = ?1 AND version = ?2",
            params![document_id, version],
            |_| Ok(()),
        )
        .optional()?
        .is_some();

    tx.execute(
        "INSERT INTO document_transcriptions (document_id, version, document_representation, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(document_id, version) DO UPDATE SET
             document_representation = excluded.document_representation,
             updated_at = excluded.updated_at",
        params![document_id, version, document_representation, now_timestamp()],
    )?;

    tx.commit()?;

    Ok(if exists {
        UpsertOutcome::Updated
    } else {
        UpsertOutcome::Inserted
    })
}

/// Highest-version transcription for a document.
pub fn get_latest_transcription(
    conn: &Connection,
    document_id: &str,
) -> Result<Option<DocumentTranscription>, DatabaseError> {
    let result = conn.query_row(
        "SELECT document_id, version, document_representation, updated_at
         FROM document_transcriptions WHERE document_id = ?1
         ORDER BY version DESC LIMIT 1",
        params![document_id],
        |row| {
            Ok(DocumentTranscription {
                document_id: row.get(0)?,
                version: row.get(1)?,
                document_representation: row.get(2)?,
                updated_at: parse_timestamp(&row.get::<_, String>(3)?),
            })
        },
    );

    match result {
        Ok(t) => Ok(Some(t)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn count_transcriptions(conn: &Connection, document_id: &str) -> Result<u32, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM document_transcriptions WHERE document_id = ?1",
        params![document_id],
        |row| row.get(0),
    )?;
    Ok(count)
}
