use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::config::ItemConfig;
use crate::document::{Document, DocumentId};
use crate::event::DocumentEvent;
use crate::item::{ItemModel, ItemState};

struct RegistryInner {
    items: HashMap<DocumentId, Weak<Mutex<ItemState>>>,
    autosave: bool,
}

/// Registry of live items, keyed by document id.
///
/// Guarantees at most one [`ItemModel`] per document while any handle to it
/// is alive. Entries are weak, so items still drop when the UI lets go of
/// them. Store events fed to [`ItemRegistry::handle_event`] keep registered
/// items in step with other writers.
#[derive(Clone)]
pub struct ItemRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl ItemRegistry {
    pub fn new() -> Self {
        Self::with_config(&ItemConfig::default())
    }

    pub fn with_config(config: &ItemConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                items: HashMap::new(),
                autosave: config.autosave,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the item for `document`, creating and registering one if needed.
    ///
    /// A new item starts from the properties the handle was loaded with.
    pub fn item_for_document(&self, document: &Document) -> ItemModel {
        let mut inner = self.lock();
        if let Some(state) = inner.items.get(&document.id()).and_then(Weak::upgrade) {
            return ItemModel::from_shared(state);
        }
        let item = ItemModel::attached(document.clone(), self.clone(), inner.autosave);
        inner.items.retain(|_, weak| weak.strong_count() > 0);
        inner.items.insert(document.id(), item.downgrade());
        tracing::debug!("Registered item for document {}", document.id());
        item
    }

    /// A new item without a document. It registers itself once a database
    /// is set and its document exists.
    pub fn new_item(&self) -> ItemModel {
        let autosave = self.lock().autosave;
        ItemModel::with_registry(self.clone(), autosave)
    }

    /// The live item for `id`, if any.
    pub fn get(&self, id: DocumentId) -> Option<ItemModel> {
        self.lock()
            .items
            .get(&id)
            .and_then(Weak::upgrade)
            .map(ItemModel::from_shared)
    }

    /// Number of live items.
    pub fn len(&self) -> usize {
        self.lock()
            .items
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries whose items are gone.
    pub fn prune(&self) {
        self.lock().items.retain(|_, weak| weak.strong_count() > 0);
    }

    pub(crate) fn register(&self, item: &ItemModel) {
        if let Some(id) = item.document_id() {
            let mut inner = self.lock();
            inner.items.retain(|_, weak| weak.strong_count() > 0);
            inner.items.insert(id, item.downgrade());
        }
    }

    pub(crate) fn unregister(&self, id: DocumentId) {
        self.lock().items.remove(&id);
    }

    /// Apply a store event to the matching item. Returns whether an item
    /// changed.
    ///
    /// `Updated` with a newer revision refreshes the item and marks it
    /// externally changed; the item's own saves carry a revision it already
    /// has and are ignored. `Deleted` detaches the item from its document.
    pub fn handle_event(&self, event: &DocumentEvent) -> bool {
        // Registry lock is released here, before any item lock is taken
        let Some(item) = self.get(event.document_id()) else {
            return false;
        };
        match event {
            DocumentEvent::Created { .. } => false,
            DocumentEvent::Updated { id, revision } => {
                match item.apply_remote_revision(*revision) {
                    Ok(changed) => changed,
                    Err(e) => {
                        tracing::warn!("Failed to refresh item for document {}: {}", id, e);
                        false
                    }
                }
            }
            DocumentEvent::Deleted(id) => {
                let detached = item.detach_removed();
                if detached {
                    tracing::debug!("Document {} was removed by another writer", id);
                    self.unregister(*id);
                }
                detached
            }
        }
    }

    /// Handle every event already waiting on `events` without blocking.
    /// Returns the number of events consumed.
    pub fn process_pending(&self, events: &Receiver<DocumentEvent>) -> usize {
        let mut handled = 0;
        while let Ok(event) = events.try_recv() {
            self.handle_event(&event);
            handled += 1;
        }
        handled
    }
}

impl Default for ItemRegistry {
    fn default() -> Self {
        Self::new()
    }
}
