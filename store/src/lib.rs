//! Source readers and the target SQLite store.
//!
//! The migration engine reads legacy data through [`PersistedStateReader`]
//! and [`ExportedTableReader`] (backed by the incremental
//! [`JsonArrayReader`]) and writes the new architecture through
//! [`TargetDb`].

mod db;
mod json_array;
mod sources;

pub use db::{
    INSERT_CHUNK_ROWS, MIGRATION_STATUS_KEY, MIGRATION_VERSION, MigrationStatus,
    MigrationStatusKind, TargetDb, insert_assistant, insert_knowledge_note, insert_messages,
    insert_topic, upsert_preference,
};
pub use json_array::{JsonArrayError, JsonArrayReader};
pub use sources::{
    ConfigStore, ExportedTableReader, MemoryConfigStore, PersistedStateReader, tables,
};
