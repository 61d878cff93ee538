use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::document::{DocumentId, Revision};
use crate::event::DocumentEvent;
use crate::store::{check_storable, Database, DocumentRecord, StoreError};
use crate::value::Properties;

/// SQLite-backed implementation of the Database trait.
pub struct SqliteDatabase {
    name: String,
    conn: Mutex<Connection>,
    subscribers: Mutex<Vec<Sender<DocumentEvent>>>,
}

impl SqliteDatabase {
    /// Open (or create) a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Unavailable(format!("open {}: {}", path.display(), e)))?;
        Self::init_with_connection(path.display().to_string(), conn)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Storage(format!("open_in_memory: {}", e)))?;
        Self::init_with_connection(":memory:".to_string(), conn)
    }

    fn init_with_connection(name: String, conn: Connection) -> Result<Self, StoreError> {
        Self::init_schema(&conn)?;
        tracing::debug!("opened sqlite document store {}", name);
        Ok(Self {
            name,
            conn: Mutex::new(conn),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                revision INTEGER NOT NULL,
                properties TEXT NOT NULL,
                created INTEGER NOT NULL,
                modified INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_modified ON documents(modified);
            ",
        )
        .map_err(|e| StoreError::Storage(format!("init_schema: {}", e)))?;
        Ok(())
    }

    fn emit(&self, event: DocumentEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    fn current_revision(conn: &Connection, id: &str) -> Result<Option<Revision>, StoreError> {
        conn.query_row(
            "SELECT revision FROM documents WHERE id = ?1",
            params![id],
            |row| row.get::<_, i64>(0),
        )
        .optional()
        .map(|rev| rev.map(|r| r as Revision))
        .map_err(|e| StoreError::Storage(format!("check revision: {}", e)))
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
        Ok(RawRow {
            id: row.get(0)?,
            revision: row.get(1)?,
            properties: row.get(2)?,
            created: row.get(3)?,
            modified: row.get(4)?,
        })
    }
}

/// Columns as stored, before parsing.
struct RawRow {
    id: String,
    revision: i64,
    properties: String,
    created: i64,
    modified: i64,
}

impl RawRow {
    fn into_record(self) -> Result<DocumentRecord, StoreError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| StoreError::Storage(format!("bad document id '{}': {}", self.id, e)))?;
        let properties: Properties = serde_json::from_str(&self.properties)
            .map_err(|e| StoreError::Storage(format!("bad properties for {}: {}", id, e)))?;
        Ok(DocumentRecord {
            id,
            revision: self.revision as Revision,
            properties,
            created: millis_to_datetime(self.created),
            modified: millis_to_datetime(self.modified),
        })
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

impl Database for SqliteDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_document(&self) -> Result<DocumentRecord, StoreError> {
        let record = DocumentRecord::new(Uuid::new_v4());
        let props_json = serde_json::to_string(&record.properties)
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        let conn = self.conn.lock().map_err(|e| StoreError::Storage(e.to_string()))?;
        conn.execute(
            "INSERT INTO documents (id, revision, properties, created, modified)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id.to_string(),
                record.revision as i64,
                props_json,
                record.created.timestamp_millis(),
                record.modified.timestamp_millis(),
            ],
        )
        .map_err(|e| {
            if let rusqlite::Error::SqliteFailure(ref err, _) = e {
                if err.code == rusqlite::ErrorCode::ConstraintViolation {
                    return StoreError::AlreadyExists(record.id);
                }
            }
            StoreError::Storage(format!("insert: {}", e))
        })?;
        drop(conn);
        self.emit(DocumentEvent::Created {
            id: record.id,
            revision: record.revision,
        });
        Ok(record)
    }

    fn get_document(&self, id: DocumentId) -> Result<Option<DocumentRecord>, StoreError> {
        let conn = self.conn.lock().map_err(|e| StoreError::Storage(e.to_string()))?;
        let raw = conn
            .query_row(
                "SELECT id, revision, properties, created, modified
                 FROM documents WHERE id = ?1",
                params![id.to_string()],
                Self::row_to_record,
            )
            .optional()
            .map_err(|e| StoreError::Storage(format!("query get: {}", e)))?;
        raw.map(RawRow::into_record).transpose()
    }

    fn put_properties(
        &self,
        id: DocumentId,
        base_revision: Revision,
        properties: Properties,
    ) -> Result<Revision, StoreError> {
        check_storable(id, &properties)?;
        let props_json =
            serde_json::to_string(&properties).map_err(|e| StoreError::Storage(e.to_string()))?;
        let conn = self.conn.lock().map_err(|e| StoreError::Storage(e.to_string()))?;
        let id_str = id.to_string();
        let now = Utc::now().timestamp_millis();

        // Compare-and-swap on the revision column
        let rows = conn
            .execute(
                "UPDATE documents SET properties = ?1, revision = revision + 1, modified = ?2
                 WHERE id = ?3 AND revision = ?4",
                params![props_json, now, &id_str, base_revision as i64],
            )
            .map_err(|e| StoreError::Storage(format!("update: {}", e)))?;

        if rows == 0 {
            return match Self::current_revision(&conn, &id_str)? {
                None => Err(StoreError::NotFound(id)),
                Some(actual) => Err(StoreError::Conflict {
                    id,
                    expected: base_revision,
                    actual,
                }),
            };
        }

        let revision = base_revision + 1;
        drop(conn);
        self.emit(DocumentEvent::Updated { id, revision });
        Ok(revision)
    }

    fn delete_document(&self, id: DocumentId) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|e| StoreError::Storage(e.to_string()))?;
        let rows = conn
            .execute("DELETE FROM documents WHERE id = ?1", params![id.to_string()])
            .map_err(|e| StoreError::Storage(format!("delete: {}", e)))?;

        if rows == 0 {
            return Err(StoreError::NotFound(id));
        }

        drop(conn);
        self.emit(DocumentEvent::Deleted(id));
        Ok(())
    }

    fn document_ids(&self) -> Result<Vec<DocumentId>, StoreError> {
        let conn = self.conn.lock().map_err(|e| StoreError::Storage(e.to_string()))?;
        let mut stmt = conn
            .prepare("SELECT id FROM documents ORDER BY created, id")
            .map_err(|e| StoreError::Storage(format!("prepare ids: {}", e)))?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| StoreError::Storage(format!("query ids: {}", e)))?;

        let mut result = Vec::new();
        for id in ids {
            let id = id.map_err(|e| StoreError::Storage(e.to_string()))?;
            let parsed = Uuid::parse_str(&id)
                .map_err(|e| StoreError::Storage(format!("bad document id '{}': {}", id, e)))?;
            result.push(parsed);
        }
        Ok(result)
    }

    fn subscribe(&self) -> Result<Receiver<DocumentEvent>, StoreError> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))?
            .push(tx);
        Ok(rx)
    }
}
