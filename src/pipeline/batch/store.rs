//! SQLite-backed `DocumentStore`.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

use super::traits::DocumentStore;
use crate::db::{self, DatabaseError, UpsertOutcome};
use crate::models::MessageRole;

/// Wraps one connection behind a mutex so the store can be shared across
/// threads as `Arc<dyn DocumentStore>`.
pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
}

impl SqliteDocumentStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Open (and migrate) a database file.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self::new(db::open_database(path)?))
    }

    pub fn in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::new(db::open_memory_database()?))
    }

    /// Run read queries against the underlying connection.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn upsert_document(
        &self,
        document_id: &str,
        mime_type: &str,
        document_blob: &str,
    ) -> Result<UpsertOutcome, DatabaseError> {
        self.with_connection(|conn| db::upsert_document(conn, document_id, mime_type, document_blob))
    }

    fn upsert_message(
        &self,
        document_id: &str,
        content: &str,
        role: MessageRole,
        turn_index: u32,
    ) -> Result<UpsertOutcome, DatabaseError> {
        self.with_connection(|conn| db::upsert_message(conn, document_id, content, role, turn_index))
    }

    fn upsert_transcription(
        &self,
        document_id: &str,
        version: u32,
        document_representation: &str,
    ) -> Result<UpsertOutcome, DatabaseError> {
        self.with_connection(|conn| {
            db::upsert_transcription(conn, document_id, version, document_representation)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_visible_through_connection() {
        let store = SqliteDocumentStore::in_memory().unwrap();
        store
            .upsert_message("doc-1", "hi", MessageRole::Assistant, 0)
            .unwrap();
        store.upsert_transcription("doc-1", 1, "rep").unwrap();

        let (messages, transcription) = store
            .with_connection(|conn| {
                Ok((
                    db::get_messages_by_document(conn, "doc-1")?,
                    db::get_latest_transcription(conn, "doc-1")?,
                ))
            })
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::Assistant);
        assert_eq!(transcription.unwrap().document_representation, "rep");
    }

    #[test]
    fn store_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SqliteDocumentStore>();
    }
}
