use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use crate::document::{DocumentId, Revision};
use crate::event::DocumentEvent;
use crate::store::{check_storable, Database, DocumentRecord, StoreError};
use crate::value::Properties;

/// In-memory implementation of the Database trait.
///
/// Useful for tests and for items that never need to outlive the process.
/// [`MemoryDatabase::set_available`] simulates an outage.
pub struct MemoryDatabase {
    name: String,
    documents: Mutex<BTreeMap<DocumentId, DocumentRecord>>,
    subscribers: Mutex<Vec<Sender<DocumentEvent>>>,
    available: AtomicBool,
}

impl MemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documents: Mutex::new(BTreeMap::new()),
            subscribers: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }

    /// While unavailable, every operation fails with `StoreError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.documents.lock().map(|docs| docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("{} is offline", self.name)))
        }
    }

    fn emit(&self, event: DocumentEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            // Drop channels whose receiver is gone
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

impl Database for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_document(&self) -> Result<DocumentRecord, StoreError> {
        self.check_available()?;
        let record = DocumentRecord::new(Uuid::new_v4());
        let mut docs = self
            .documents
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        if docs.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        docs.insert(record.id, record.clone());
        drop(docs);
        self.emit(DocumentEvent::Created {
            id: record.id,
            revision: record.revision,
        });
        Ok(record)
    }

    fn get_document(&self, id: DocumentId) -> Result<Option<DocumentRecord>, StoreError> {
        self.check_available()?;
        let docs = self
            .documents
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(docs.get(&id).cloned())
    }

    fn put_properties(
        &self,
        id: DocumentId,
        base_revision: Revision,
        properties: Properties,
    ) -> Result<Revision, StoreError> {
        self.check_available()?;
        check_storable(id, &properties)?;
        let mut docs = self
            .documents
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        let record = docs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if record.revision != base_revision {
            return Err(StoreError::Conflict {
                id,
                expected: base_revision,
                actual: record.revision,
            });
        }
        record.revision += 1;
        record.properties = properties;
        record.modified = Utc::now();
        let revision = record.revision;
        drop(docs);
        self.emit(DocumentEvent::Updated { id, revision });
        Ok(revision)
    }

    fn delete_document(&self, id: DocumentId) -> Result<(), StoreError> {
        self.check_available()?;
        let mut docs = self
            .documents
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        if docs.remove(&id).is_none() {
            return Err(StoreError::NotFound(id));
        }
        drop(docs);
        self.emit(DocumentEvent::Deleted(id));
        Ok(())
    }

    fn document_ids(&self) -> Result<Vec<DocumentId>, StoreError> {
        self.check_available()?;
        let docs = self
            .documents
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(docs.keys().copied().collect())
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn props(title: &str) -> Properties {
        let mut p = Properties::new();
        p.insert("title".into(), Value::String(title.into()));
        p
    }

    #[test]
    fn create_put_get() {
        let db = MemoryDatabase::new("mem");
        let record = db.create_document().unwrap();
        let rev = db.put_properties(record.id, 1, props("Eggs")).unwrap();
        assert_eq!(rev, 2);
        let got = db.get_document(record.id).unwrap().unwrap();
        assert_eq!(got.revision, 2);
        assert_eq!(got.properties, props("Eggs"));
    }

    #[test]
    fn non_finite_floats_rejected() {
        let db = MemoryDatabase::new("mem");
        let record = db.create_document().unwrap();
        let mut p = props("Eggs");
        p.insert("ratio".into(), Value::Array(vec![Value::Float(f64::NAN)]));
        let err = db.put_properties(record.id, 1, p).unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));
        assert_eq!(db.get_document(record.id).unwrap().unwrap().revision, 1);
    }

    #[test]
    fn stale_revision_conflicts() {
        let db = MemoryDatabase::new("mem");
        let record = db.create_document().unwrap();
        db.put_properties(record.id, 1, props("a")).unwrap();
        let err = db.put_properties(record.id, 1, props("b")).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn delete_nonexistent_fails() {
        let db = MemoryDatabase::new("mem");
        let err = db.delete_document(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn unavailable_rejects_everything() {
        let db = MemoryDatabase::new("mem");
        let record = db.create_document().unwrap();
        db.set_available(false);
        assert!(matches!(
            db.get_document(record.id),
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            db.put_properties(record.id, 1, props("x")),
            Err(StoreError::Unavailable(_))
        ));
        db.set_available(true);
        assert!(db.get_document(record.id).unwrap().is_some());
    }

    #[test]
    fn every_subscriber_sees_events() {
        let db = MemoryDatabase::new("mem");
        let rx1 = db.subscribe().unwrap();
        let rx2 = db.subscribe().unwrap();

        let record = db.create_document().unwrap();
        db.put_properties(record.id, 1, props("x")).unwrap();
        db.delete_document(record.id).unwrap();

        for rx in [&rx1, &rx2] {
            assert!(matches!(rx.try_recv().unwrap(), DocumentEvent::Created { .. }));
            assert_eq!(
                rx.try_recv().unwrap(),
                DocumentEvent::Updated {
                    id: record.id,
                    revision: 2
                }
            );
            assert_eq!(rx.try_recv().unwrap(), DocumentEvent::Deleted(record.id));
        }
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let db = MemoryDatabase::new("mem");
        drop(db.subscribe().unwrap());
        db.create_document().unwrap();
        assert!(db.subscribers.lock().unwrap().is_empty());
        assert_eq!(db.len(), 1);
    }
}
