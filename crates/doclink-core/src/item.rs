//! Document-backed item model.
//!
//! An [`ItemModel`] mirrors one document's fields as named properties that UI
//! bindings can read and write. Writes are buffered in a set of changed
//! properties and flushed to the store by [`ItemModel::save`]. Reads always
//! see the buffered value over the persisted snapshot.

use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::document::{Document, DocumentId, Revision};
use crate::registry::ItemRegistry;
use crate::store::{Database, StoreError};
use crate::value::{Properties, Value};

/// Where a property change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// A `set` or `discard_changes` on this item.
    Local,
    /// A refresh from the store after another writer changed the document.
    External,
}

/// Notification delivered to [`ItemModel::subscribe`] receivers.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub key: String,
    /// The new visible value, `None` if the key no longer has one.
    pub value: Option<Value>,
    pub origin: ChangeOrigin,
}

/// Errors from item operations.
#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Item is already attached to document {document} in database '{database}'")]
    AlreadyAttached {
        document: DocumentId,
        database: String,
    },
}

impl ItemError {
    /// Whether a later `save` can succeed without other changes.
    pub fn is_retryable(&self) -> bool {
        match self {
            ItemError::Store(e) => e.is_retryable(),
            ItemError::AlreadyAttached { .. } => false,
        }
    }
}

pub(crate) struct ItemState {
    /// Backing document. Its properties are the persisted snapshot.
    document: Option<Document>,
    changed_properties: Properties,
    externally_changed: Option<(Instant, DateTime<Utc>)>,
    autosave: bool,
    observers: Vec<Sender<PropertyChange>>,
    registry: Option<ItemRegistry>,
}

impl ItemState {
    fn new(document: Option<Document>, registry: Option<ItemRegistry>, autosave: bool) -> Self {
        Self {
            document,
            changed_properties: Properties::new(),
            externally_changed: None,
            autosave,
            observers: Vec::new(),
            registry,
        }
    }

    fn snapshot(&self) -> Option<&Properties> {
        self.document.as_ref().map(Document::properties)
    }

    fn value_for(&self, key: &str) -> Option<&Value> {
        self.changed_properties
            .get(key)
            .or_else(|| self.snapshot().and_then(|props| props.get(key)))
    }

    /// Snapshot with changed properties laid over it.
    fn visible(&self) -> Properties {
        let mut merged = self.snapshot().cloned().unwrap_or_default();
        merged.extend(
            self.changed_properties
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        merged
    }

    fn notify(&mut self, change: PropertyChange) {
        self.observers.retain(|tx| tx.send(change.clone()).is_ok());
    }

    /// Notify observers of every key whose visible value differs from `before`.
    fn notify_diff(&mut self, before: &Properties, origin: ChangeOrigin) {
        let after = self.visible();
        let mut keys: Vec<&String> = before.keys().chain(after.keys()).collect();
        keys.sort();
        keys.dedup();

        let changes: Vec<PropertyChange> = keys
            .into_iter()
            .filter(|key| before.get(*key) != after.get(*key))
            .map(|key| PropertyChange {
                key: key.clone(),
                value: after.get(key).cloned(),
                origin,
            })
            .collect();
        for change in changes {
            self.notify(change);
        }
    }

    fn stage(&mut self, key: String, value: Value) {
        self.changed_properties.insert(key.clone(), value.clone());
        self.notify(PropertyChange {
            key,
            value: Some(value),
            origin: ChangeOrigin::Local,
        });
    }

    fn save(&mut self) -> Result<(), ItemError> {
        if self.changed_properties.is_empty() {
            return Ok(());
        }
        let merged = self.visible();
        let Some(document) = self.document.as_mut() else {
            tracing::debug!(
                "Item has no document yet, keeping {} unsaved change(s)",
                self.changed_properties.len()
            );
            return Ok(());
        };

        let id = document.id();
        match document
            .database()
            .put_properties(id, document.revision(), merged.clone())
        {
            Ok(revision) => {
                tracing::debug!("Saved document {} at revision {}", id, revision);
                document.set_snapshot(revision, merged);
                self.changed_properties.clear();
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to save document {} ({} change(s) kept): {}",
                    id,
                    self.changed_properties.len(),
                    e
                );
                Err(e.into())
            }
        }
    }

    /// Reload the snapshot from the store. Returns whether it changed.
    fn refresh(&mut self) -> Result<bool, ItemError> {
        let Some(document) = self.document.as_ref() else {
            return Ok(false);
        };
        let id = document.id();
        let record = document
            .database()
            .get_document(id)?
            .ok_or(StoreError::NotFound(id))?;
        if record.revision == document.revision() {
            return Ok(false);
        }

        let before = self.visible();
        if let Some(document) = self.document.as_mut() {
            document.set_snapshot(record.revision, record.properties);
        }
        tracing::debug!("Refreshed document {} to revision {}", id, record.revision);
        self.notify_diff(&before, ChangeOrigin::External);
        Ok(true)
    }

    /// Drop the document reference, keeping its values as unsaved changes.
    fn release_document(&mut self) -> Option<DocumentId> {
        let mut document = self.document.take()?;
        for (key, value) in document.take_properties() {
            self.changed_properties.entry(key).or_insert(value);
        }
        Some(document.id())
    }

    fn mark_externally_changed(&mut self) {
        self.externally_changed = Some((Instant::now(), Utc::now()));
    }
}

/// Shared handle to a document-backed item.
///
/// Clones share state, so every handle sees the same unsaved edits. Dropping
/// the last handle drops the item but never touches the stored document.
#[derive(Clone)]
pub struct ItemModel {
    state: Arc<Mutex<ItemState>>,
}

impl ItemModel {
    /// A new "untitled" item with no document yet.
    ///
    /// Setting its database with [`ItemModel::set_database`] creates and saves
    /// a document.
    pub fn new() -> Self {
        Self::from_state(ItemState::new(None, None, true))
    }

    pub(crate) fn with_registry(registry: ItemRegistry, autosave: bool) -> Self {
        Self::from_state(ItemState::new(None, Some(registry), autosave))
    }

    pub(crate) fn attached(document: Document, registry: ItemRegistry, autosave: bool) -> Self {
        Self::from_state(ItemState::new(Some(document), Some(registry), autosave))
    }

    fn from_state(state: ItemState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub(crate) fn from_shared(state: Arc<Mutex<ItemState>>) -> Self {
        Self { state }
    }

    pub(crate) fn downgrade(&self) -> Weak<Mutex<ItemState>> {
        Arc::downgrade(&self.state)
    }

    fn lock(&self) -> MutexGuard<'_, ItemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether both handles refer to the same item.
    pub fn ptr_eq(&self, other: &ItemModel) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// The document this item is associated with, `None` if new and unsaved.
    pub fn document(&self) -> Option<Document> {
        self.lock().document.clone()
    }

    pub fn document_id(&self) -> Option<DocumentId> {
        self.lock().document.as_ref().map(Document::id)
    }

    /// Revision of the persisted snapshot, `None` without a document.
    pub fn revision(&self) -> Option<Revision> {
        self.lock().document.as_ref().map(Document::revision)
    }

    /// The database the item's document belongs to.
    pub fn database(&self) -> Option<Arc<dyn Database>> {
        self.lock()
            .document
            .as_ref()
            .map(|doc| Arc::clone(doc.database()))
    }

    /// Assign the item to a database, or remove it from its current one.
    ///
    /// `Some(db)` on an item without a document creates an empty document in
    /// `db` and then saves any buffered edits into it. If creating the
    /// document fails the item is unchanged. If the document is created but
    /// that save fails, the error is returned with the new document attached
    /// and the edits still buffered, so a later `save` can retry.
    ///
    /// `None` deletes the document from its store; the values it held stay
    /// visible as unsaved changes. If the delete fails the document stays
    /// attached. Setting the current state again is a no-op.
    pub fn set_database(&self, database: Option<Arc<dyn Database>>) -> Result<(), ItemError> {
        match database {
            Some(database) => self.attach(database),
            None => self.detach(),
        }
    }

    fn attach(&self, database: Arc<dyn Database>) -> Result<(), ItemError> {
        let registry = {
            let mut state = self.lock();
            if let Some(document) = &state.document {
                if document.belongs_to(&database) {
                    return Ok(());
                }
                return Err(ItemError::AlreadyAttached {
                    document: document.id(),
                    database: document.database().name().to_string(),
                });
            }
            let document = Document::create(database)?;
            tracing::debug!(
                "Created document {} in '{}'",
                document.id(),
                document.database().name()
            );
            state.document = Some(document);
            state.registry.clone()
        };

        if let Some(registry) = registry {
            registry.register(self);
        }
        self.save()
    }

    fn detach(&self) -> Result<(), ItemError> {
        let (id, registry) = {
            let mut state = self.lock();
            let Some(document) = state.document.as_ref() else {
                return Ok(());
            };
            let id = document.id();
            match document.database().delete_document(id) {
                Ok(()) => {}
                Err(StoreError::NotFound(_)) => {
                    tracing::debug!("Document {} was already removed", id);
                }
                Err(e) => {
                    tracing::warn!("Failed to remove document {}: {}", id, e);
                    return Err(e.into());
                }
            }
            state.release_document();
            (id, state.registry.clone())
        };

        if let Some(registry) = registry {
            registry.unregister(id);
        }
        Ok(())
    }

    /// Read a field: changed properties first, then the persisted snapshot.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().value_for(key).cloned()
    }

    /// Write a field and, with autosave on, save immediately.
    ///
    /// A failed save is returned but the new value stays buffered and visible.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<(), ItemError> {
        let mut state = self.lock();
        state.stage(key.into(), value.into());
        if state.autosave {
            state.save()
        } else {
            Ok(())
        }
    }

    /// Write several fields with a single save.
    pub fn set_many<I, K, V>(&self, values: I) -> Result<(), ItemError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut state = self.lock();
        for (key, value) in values {
            state.stage(key.into(), value.into());
        }
        if state.autosave {
            state.save()
        } else {
            Ok(())
        }
    }

    /// All visible properties.
    pub fn properties(&self) -> Properties {
        self.lock().visible()
    }

    pub fn changed_properties(&self) -> Properties {
        self.lock().changed_properties.clone()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        !self.lock().changed_properties.is_empty()
    }

    pub fn autosave(&self) -> bool {
        self.lock().autosave
    }

    pub fn set_autosave(&self, autosave: bool) {
        self.lock().autosave = autosave;
    }

    /// Write buffered changes to the document.
    ///
    /// Does nothing without changes. Without a document the changes stay
    /// buffered until a database is set. On failure the changes are kept so
    /// the caller can retry; there is no automatic retry.
    pub fn save(&self) -> Result<(), ItemError> {
        self.lock().save()
    }

    /// Reload the persisted snapshot from the store, keeping unsaved changes.
    ///
    /// After a write conflict, `refresh` followed by `save` lays the buffered
    /// edits over the other writer's content.
    pub fn refresh(&self) -> Result<(), ItemError> {
        self.lock().refresh().map(|_| ())
    }

    /// Throw away buffered edits.
    pub fn discard_changes(&self) {
        let mut state = self.lock();
        let before = state.visible();
        state.changed_properties.clear();
        state.notify_diff(&before, ChangeOrigin::Local);
    }

    /// Record that another writer changed the document. Does not refetch.
    pub fn mark_externally_changed(&self) {
        self.lock().mark_externally_changed();
    }

    /// Time since the last [`ItemModel::mark_externally_changed`], or
    /// `Duration::MAX` if it was never called.
    pub fn time_since_externally_changed(&self) -> Duration {
        self.lock()
            .externally_changed
            .map(|(at, _)| at.elapsed())
            .unwrap_or(Duration::MAX)
    }

    pub fn externally_changed_at(&self) -> Option<DateTime<Utc>> {
        self.lock().externally_changed.map(|(_, at)| at)
    }

    /// Receive a [`PropertyChange`] whenever a visible value changes.
    pub fn subscribe(&self) -> Receiver<PropertyChange> {
        let (tx, rx) = mpsc::channel();
        self.lock().observers.push(tx);
        rx
    }

    /// Refresh if `revision` is newer than the snapshot. Used for store events.
    pub(crate) fn apply_remote_revision(&self, revision: Revision) -> Result<bool, ItemError> {
        let mut state = self.lock();
        match state.document.as_ref() {
            Some(document) if revision > document.revision() => {}
            _ => return Ok(false),
        }
        state.mark_externally_changed();
        state.refresh()
    }

    /// Forget a document that another writer deleted.
    pub(crate) fn detach_removed(&self) -> bool {
        let mut state = self.lock();
        if state.release_document().is_none() {
            return false;
        }
        state.mark_externally_changed();
        true
    }
}

impl Default for ItemModel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ItemModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ItemModel")
            .field("document", &state.document)
            .field("changed_properties", &state.changed_properties)
            .field("autosave", &state.autosave)
            .finish()
    }
}
