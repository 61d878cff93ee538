use serde::{Deserialize, Serialize};
use std::sync::mpsc::Receiver;

use chrono::{DateTime, Utc};

use crate::document::{DocumentId, Revision};
use crate::event::DocumentEvent;
use crate::value::Properties;

/// A stored document: a versioned, schema-less set of properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub revision: Revision,
    pub properties: Properties,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl DocumentRecord {
    /// A fresh, empty record at revision 1.
    pub fn new(id: DocumentId) -> Self {
        let now = Utc::now();
        Self {
            id,
            revision: 1,
            properties: Properties::new(),
            created: now,
            modified: now,
        }
    }
}

/// The trait that all document stores implement.
pub trait Database: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Append a new empty document and return its record.
    fn create_document(&self) -> Result<DocumentRecord, StoreError>;

    /// Get a document by ID.
    fn get_document(&self, id: DocumentId) -> Result<Option<DocumentRecord>, StoreError>;

    /// Replace a document's content. Fails with `Conflict` unless
    /// `base_revision` is the current revision. Returns the new revision.
    /// Non-finite floats are rejected with `Storage`.
    fn put_properties(
        &self,
        id: DocumentId,
        base_revision: Revision,
        properties: Properties,
    ) -> Result<Revision, StoreError>;

    /// Remove a document.
    fn delete_document(&self, id: DocumentId) -> Result<(), StoreError>;

    /// IDs of all stored documents.
    fn document_ids(&self) -> Result<Vec<DocumentId>, StoreError>;

    /// Subscribe to document changes. Each call gets its own channel.
    fn subscribe(&self) -> Result<Receiver<DocumentEvent>, StoreError>;
}

/// Errors from a document store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Document not found: {0}")]
    NotFound(DocumentId),

    #[error("Document already exists: {0}")]
    AlreadyExists(DocumentId),

    #[error("Write conflict on {id}: expected revision {expected}, store has {actual}")]
    Conflict {
        id: DocumentId,
        expected: Revision,
        actual: Revision,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Reject properties a JSON-backed store would write lossily.
pub(crate) fn check_storable(id: DocumentId, properties: &Properties) -> Result<(), StoreError> {
    match properties.iter().find(|(_, value)| !value.is_finite()) {
        Some((key, _)) => Err(StoreError::Storage(format!(
            "Field '{}' of document {} holds a non-finite float",
            key, id
        ))),
        None => Ok(()),
    }
}

impl StoreError {
    /// Whether repeating the operation later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Conflict { .. })
    }
}
