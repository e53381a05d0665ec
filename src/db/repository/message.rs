use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::{now_timestamp, parse_timestamp, DatabaseError, UpsertOutcome};
use crate::models::*;

/// Upsert a message by its natural key `(document_id, content)`.
///
/// An existing message with identical content gets its role and turn index
/// rewritten in place; otherwise a new row is inserted. Both steps run in
/// one transaction so concurrent writers on the same key cannot double-insert.
pub fn upsert_message(
    conn: &Connection,
    document_id: &str,
    content: &str,
    role: MessageRole,
    turn_index: u32,
) -> Result<UpsertOutcome, DatabaseError> {
    let tx = conn.unchecked_transaction()?;

    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM document_messages
             WHERE document_id = ?1 AND content = ?2
             ORDER BY turn_index ASC LIMIT 1",
            params![document_id, content],
            |row| row.get(0),
        )
        .optional()?;

    let outcome = match existing {
        Some(id) => {
            tx.execute(
                "UPDATE document_messages SET role = ?2, turn_index = ?3, updated_at = ?4
                 WHERE id = ?1",
                params![id, role.as_str(), turn_index, now_timestamp()],
            )?;
            UpsertOutcome::Updated
        }
        None => {
            tx.execute(
                "INSERT INTO document_messages (id, document_id, role, content, turn_index, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    Uuid::new_v4().to_string(),
                    document_id,
                    role.as_str(),
                    content,
                    turn_index,
                    now_timestamp(),
                ],
            )?;
            UpsertOutcome::Inserted
        }
    };

    tx.commit()?;
    Ok(outcome)
}

/// All messages of a document in turn order.
pub fn get_messages_by_document(
    conn: &Connection,
    document_id: &str,
) -> Result<Vec<DocumentMessage>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, document_id, role, content, turn_index, updated_at
         FROM document_messages WHERE document_id = ?1
         ORDER BY turn_index ASC, rowid ASC",
    )?;

    let rows = stmt.query_map(params![document_id], |row| {
        Ok(MessageRow {
            id: row.get(0)?,
            document_id: row.get(1)?,
            role: row.get(2)?,
            content: row.get(3)?,
            turn_index: row.get(4)?,
            updated_at: row.get(5)?,
        })
    })?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(message_from_row(row?)?);
    }
    Ok(messages)
}

pub fn count_messages(conn: &Connection, document_id: &str) -> Result<u32, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM document_messages WHERE document_id = ?1",
        params![document_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

struct MessageRow {
    id: String,
    document_id: String,
    role: String,
    content: String,
    turn_index: u32,
    updated_at: String,
}

fn message_from_row(row: MessageRow) -> Result<DocumentMessage, DatabaseError> {
    Ok(DocumentMessage {
        id: Uuid::parse_str(&row.id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        document_id: row.document_id,
        role: MessageRole::from_str(&row.role)?,
        content: row.content,
        turn_index: row.turn_index,
        updated_at: parse_timestamp(&row.updated_at),
    })
}
