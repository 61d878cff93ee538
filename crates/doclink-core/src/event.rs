use serde::{Deserialize, Serialize};

use crate::document::{DocumentId, Revision};

/// Events emitted by a document store when documents change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DocumentEvent {
    Created { id: DocumentId, revision: Revision },
    Updated { id: DocumentId, revision: Revision },
    Deleted(DocumentId),
}

impl DocumentEvent {
    pub fn document_id(&self) -> DocumentId {
        match self {
            DocumentEvent::Created { id, .. } | DocumentEvent::Updated { id, .. } => *id,
            DocumentEvent::Deleted(id) => *id,
        }
    }
}
