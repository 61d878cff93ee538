//! End-to-end item lifecycle against the bundled stores

use std::sync::Arc;

use doclink_core::{
    same_database, Database, Document, DocumentEvent, ItemModel, ItemRegistry, MemoryDatabase,
    Value,
};

fn list_item(db: &Arc<dyn Database>, registry: &ItemRegistry, title: &str) -> ItemModel {
    let item = registry.new_item();
    item.set_database(Some(Arc::clone(db))).unwrap();
    item.set("title", title).unwrap();
    item.set("check", false).unwrap();
    item
}

#[test]
fn test_save_round_trip_through_second_registry() {
    let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new("shopping"));
    let registry = ItemRegistry::new();
    let item = list_item(&db, &registry, "Apples");
    item.set("check", true).unwrap();
    let id = item.document_id().unwrap();

    // A second view of the same store sees the saved content
    let other = ItemRegistry::new();
    let document = Document::load(Arc::clone(&db), id).unwrap().unwrap();
    let mirror = other.item_for_document(&document);
    assert_eq!(mirror.get("title"), Some(Value::from("Apples")));
    assert_eq!(mirror.get("check"), Some(Value::Bool(true)));
    assert!(!mirror.ptr_eq(&item));
}

#[test]
fn test_two_devices_stay_in_sync() {
    let mem = Arc::new(MemoryDatabase::new("shared"));
    let db: Arc<dyn Database> = mem.clone();
    let events = mem.subscribe().unwrap();

    let phone = ItemRegistry::new();
    let laptop = ItemRegistry::new();

    let on_phone = list_item(&db, &phone, "Coffee");
    let document = Document::load(Arc::clone(&db), on_phone.document_id().unwrap())
        .unwrap()
        .unwrap();
    let on_laptop = laptop.item_for_document(&document);
    let watcher = on_laptop.subscribe();

    on_phone.set("check", true).unwrap();

    // Laptop drains the shared event stream
    laptop.process_pending(&events);
    assert_eq!(on_laptop.get("check"), Some(Value::Bool(true)));
    let change = watcher.try_recv().unwrap();
    assert_eq!(change.key, "check");
    assert!(on_laptop.time_since_externally_changed().as_secs() < 1);

    // Phone never saw an external change
    assert!(on_phone.externally_changed_at().is_none());
}

#[test]
fn test_delete_from_one_side_detaches_the_other() {
    let mem = Arc::new(MemoryDatabase::new("shared"));
    let db: Arc<dyn Database> = mem.clone();
    let events = mem.subscribe().unwrap();
    let registry = ItemRegistry::new();
    let item = list_item(&db, &registry, "Tea");
    let id = item.document_id().unwrap();

    let other = ItemRegistry::new();
    let document = Document::load(Arc::clone(&db), id).unwrap().unwrap();
    let mirror = other.item_for_document(&document);

    item.set_database(None).unwrap();
    let handled: Vec<bool> = events
        .try_iter()
        .map(|event| other.handle_event(&event))
        .collect();
    assert!(handled.contains(&true));
    assert!(mirror.document().is_none());
    assert_eq!(mirror.get("title"), Some(Value::from("Tea")));
    assert!(mem.is_empty());

    // The removed item can be filed into a store again
    mirror.set_database(Some(Arc::clone(&db))).unwrap();
    assert!(same_database(&mirror.database().unwrap(), &db));
    assert_eq!(mem.len(), 1);
    assert!(matches!(
        events.try_iter().last(),
        Some(DocumentEvent::Updated { .. })
    ));
}

#[cfg(feature = "sqlite")]
#[test]
fn test_sqlite_items_survive_restart() {
    use doclink_core::SqliteDatabase;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("items.sqlite");

    let id = {
        let db: Arc<dyn Database> = Arc::new(SqliteDatabase::open(&path).unwrap());
        let registry = ItemRegistry::new();
        let item = list_item(&db, &registry, "Bagels");
        item.document_id().unwrap()
    };

    let db: Arc<dyn Database> = Arc::new(SqliteDatabase::open(&path).unwrap());
    let registry = ItemRegistry::new();
    let document = Document::load(Arc::clone(&db), id).unwrap().unwrap();
    let item = registry.item_for_document(&document);
    assert_eq!(item.get("title"), Some(Value::from("Bagels")));
    assert_eq!(item.get("check"), Some(Value::Bool(false)));
    assert_eq!(item.revision(), Some(3));
}
