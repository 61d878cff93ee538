pub mod config;
pub mod document;
pub mod event;
pub mod item;
pub mod memory_store;
pub mod registry;
pub mod store;
pub mod value;

#[cfg(feature = "sqlite")]
pub mod sqlite_store;

pub use config::*;
pub use document::*;
pub use event::*;
pub use item::*;
pub use memory_store::MemoryDatabase;
pub use registry::*;
pub use store::*;
pub use value::*;

#[cfg(feature = "sqlite")]
pub use sqlite_store::SqliteDatabase;
