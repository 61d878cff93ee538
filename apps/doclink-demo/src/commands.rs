use std::sync::Arc;

use doclink_core::{
    ConfigError, Database, DoclinkConfig, Document, ItemError, ItemModel, ItemRegistry,
    MemoryDatabase, SqliteDatabase, StoreError, Value,
};
use doclink_query::QueryError;
use uuid::Uuid;

use crate::{Cli, Command};

#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Item(#[from] ItemError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("No item with id {0}")]
    NotFound(Uuid),

    #[error("No store path configured and no data directory available")]
    NoStorePath,
}

/// Parse `key=value`. The value is read as JSON when it parses, else as a
/// plain string.
pub fn parse_assignment(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    let value = serde_json::from_str::<serde_json::Value>(raw)
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn load_config(cli: &Cli) -> Result<DoclinkConfig, DemoError> {
    let config = match cli.config.clone().or_else(DoclinkConfig::default_path) {
        Some(path) => DoclinkConfig::load_or_default(&path)?,
        None => DoclinkConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn open_store(cli: &Cli, config: &DoclinkConfig) -> Result<Arc<dyn Database>, DemoError> {
    if config.store.in_memory && cli.db.is_none() {
        return Ok(Arc::new(MemoryDatabase::new("memory")));
    }
    let path = cli
        .db
        .clone()
        .or_else(|| config.store_path())
        .ok_or(DemoError::NoStorePath)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Arc::new(SqliteDatabase::open(&path)?))
}

fn load_item(
    db: &Arc<dyn Database>,
    registry: &ItemRegistry,
    id: Uuid,
) -> Result<ItemModel, DemoError> {
    let document = Document::load(Arc::clone(db), id)?.ok_or(DemoError::NotFound(id))?;
    Ok(registry.item_for_document(&document))
}

fn to_json(item: &ItemModel) -> Result<String, DemoError> {
    Ok(serde_json::to_string_pretty(&item.properties())?)
}

/// Execute a command and return what should be printed.
pub fn run(cli: &Cli) -> Result<String, DemoError> {
    if let Command::Query { params } = &cli.command {
        return Ok(doclink_query::query_string(params.iter().map(|(k, v)| (k, v)))?);
    }

    let config = load_config(cli)?;
    let db = open_store(cli, &config)?;
    let registry = ItemRegistry::with_config(&config.item);

    match &cli.command {
        Command::New { fields } => {
            let item = registry.new_item();
            item.set_many(fields.iter().cloned())?;
            item.set_database(Some(Arc::clone(&db)))?;
            item.save()?;
            let id = item.document_id().ok_or(StoreError::Storage(
                "item has no document after attaching".to_string(),
            ))?;
            tracing::info!("Created item {} in {}", id, db.name());
            Ok(id.to_string())
        }
        Command::Set { id, fields } => {
            let item = load_item(&db, &registry, *id)?;
            item.set_many(fields.iter().cloned())?;
            item.save()?;
            to_json(&item)
        }
        Command::Show { id } => to_json(&load_item(&db, &registry, *id)?),
        Command::List => {
            let mut lines = Vec::new();
            for id in db.document_ids()? {
                let item = load_item(&db, &registry, id)?;
                lines.push(format!(
                    "{}  {}",
                    id,
                    serde_json::to_string(&item.properties())?
                ));
            }
            Ok(lines.join("\n"))
        }
        Command::Delete { id } => {
            let item = load_item(&db, &registry, *id)?;
            item.set_database(None)?;
            tracing::info!("Removed item {}", id);
            Ok(String::new())
        }
        Command::Query { .. } => Ok(String::new()),
    }
}
