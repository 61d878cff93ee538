use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::store::{Database, DocumentRecord, StoreError};
use crate::value::Properties;

/// Globally unique document identifier (UUID v4).
pub type DocumentId = Uuid;

/// Monotonic content version of a document. A fresh document is at 1.
pub type Revision = u64;

/// Handle to a document owned by a [`Database`].
///
/// Carries the revision and properties it was loaded with. Cloning is cheap
/// and never copies the record in the store.
#[derive(Clone)]
pub struct Document {
    id: DocumentId,
    revision: Revision,
    properties: Properties,
    database: Arc<dyn Database>,
}

impl Document {
    /// Append a new empty document to `database`.
    pub fn create(database: Arc<dyn Database>) -> Result<Self, StoreError> {
        let record = database.create_document()?;
        Ok(Self::from_record(database, record))
    }

    /// Load an existing document. Returns `Ok(None)` if it does not exist.
    pub fn load(database: Arc<dyn Database>, id: DocumentId) -> Result<Option<Self>, StoreError> {
        Ok(database
            .get_document(id)?
            .map(|record| Self::from_record(database, record)))
    }

    pub fn from_record(database: Arc<dyn Database>, record: DocumentRecord) -> Self {
        Self {
            id: record.id,
            revision: record.revision,
            properties: record.properties,
            database,
        }
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Properties as of when this handle was loaded.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.database
    }

    pub(crate) fn set_snapshot(&mut self, revision: Revision, properties: Properties) {
        self.revision = revision;
        self.properties = properties;
    }

    pub(crate) fn take_properties(&mut self) -> Properties {
        std::mem::take(&mut self.properties)
    }

    /// Whether this document lives in `database` (identity, not equality).
    pub fn belongs_to(&self, database: &Arc<dyn Database>) -> bool {
        same_database(&self.database, database)
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.id)
            .field("revision", &self.revision)
            .field("database", &self.database.name())
            .finish()
    }
}

/// Identity comparison of two database handles.
pub fn same_database(a: &Arc<dyn Database>, b: &Arc<dyn Database>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryDatabase;

    #[test]
    fn create_and_load() {
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new("test"));
        let doc = Document::create(db.clone()).unwrap();
        assert_eq!(doc.revision(), 1);
        assert!(doc.properties().is_empty());

        let loaded = Document::load(db.clone(), doc.id()).unwrap().unwrap();
        assert_eq!(loaded.id(), doc.id());
        assert!(loaded.belongs_to(&db));
    }

    #[test]
    fn load_missing_returns_none() {
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new("test"));
        assert!(Document::load(db, Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn same_database_is_identity() {
        let a: Arc<dyn Database> = Arc::new(MemoryDatabase::new("a"));
        let b: Arc<dyn Database> = Arc::new(MemoryDatabase::new("a"));
        assert!(same_database(&a, &a.clone()));
        assert!(!same_database(&a, &b));
    }
}
