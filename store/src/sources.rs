//! Thin typed accessors over the legacy sources.
//!
//! Migration reads from two authorities: the persisted application state
//! (a nested category → JSON map exported by the old shell) and the
//! exported-tables directory (one JSON array file per legacy table).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;

use crate::json_array::JsonArrayReader;

/// Opaque get-by-key configuration source.
///
/// The real key-value store lives in the host shell; migration and the
/// pipeline only ever read through this seam.
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
}

/// In-memory [`ConfigStore`], used by tests and by the controller when the
/// shell hands over a snapshot.
#[derive(Debug, Default, Clone)]
pub struct MemoryConfigStore {
    entries: BTreeMap<String, Value>,
}

impl MemoryConfigStore {
    #[must_use]
    pub fn new(entries: BTreeMap<String, Value>) -> Self {
        Self { entries }
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).cloned()
    }
}

/// Reader over the persisted-state export: category → arbitrary JSON.
#[derive(Debug, Clone, Default)]
pub struct PersistedStateReader {
    raw: Value,
}

impl PersistedStateReader {
    #[must_use]
    pub fn new(raw: Value) -> Self {
        Self { raw }
    }

    /// Whole category subtree, if present.
    #[must_use]
    pub fn category(&self, name: &str) -> Option<&Value> {
        self.raw.get(name)
    }

    #[must_use]
    pub fn has_category(&self, name: &str) -> bool {
        self.category(name).is_some()
    }

    /// Category names in the export, in stable order.
    #[must_use]
    pub fn categories(&self) -> Vec<&str> {
        match &self.raw {
            Value::Object(map) => map.keys().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Dot-path lookup inside a category, walking intermediate objects.
    /// Any missing segment yields `None`.
    #[must_use]
    pub fn get(&self, category: &str, dotted_path: &str) -> Option<&Value> {
        let mut current = self.category(category)?;
        for segment in dotted_path.split('.') {
            current = current.get(segment)?;
        }
        Some(current)
    }
}

/// Per-table access over the exported-tables directory.
#[derive(Debug, Clone)]
pub struct ExportedTableReader {
    dir: PathBuf,
}

/// Table names the legacy export is known to contain.
pub mod tables {
    pub const TOPICS: &str = "topics";
    pub const MESSAGE_BLOCKS: &str = "message_blocks";
    pub const KNOWLEDGE_NOTES: &str = "knowledge_notes";
    pub const FILES: &str = "files";
}

impl ExportedTableReader {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn table_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    #[must_use]
    pub fn table_exists(&self, name: &str) -> bool {
        self.table_path(name).is_file()
    }

    /// On-disk size of a table file in bytes, if it exists.
    #[must_use]
    pub fn table_size(&self, name: &str) -> Option<u64> {
        fs::metadata(self.table_path(name)).ok().map(|m| m.len())
    }

    /// Whole-file read for small tables.
    pub fn read_table(&self, name: &str) -> Result<Vec<Value>> {
        let path = self.table_path(name);
        let bytes =
            fs::read(&path).with_context(|| format!("Failed to read table {}", path.display()))?;
        let rows: Vec<Value> = serde_json::from_slice(&bytes)
            .with_context(|| format!("Table {name} is not a JSON array"))?;
        Ok(rows)
    }

    /// Incremental reader for large tables.
    #[must_use]
    pub fn open_stream(&self, name: &str) -> JsonArrayReader {
        JsonArrayReader::new(self.table_path(name))
    }

    /// Write one exported table (the shell streams tables over during the
    /// export phase).
    pub fn write_table(&self, name: &str, json: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.table_path(name);
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Delete the whole export directory (after a successful migration).
    pub fn remove_dir(&self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)
                .with_context(|| format!("Failed to remove {}", self.dir.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ExportedTableReader, PersistedStateReader, tables};

    #[test]
    fn dot_path_walks_nested_objects() {
        let reader = PersistedStateReader::new(json!({
            "settings": { "codeEditor": { "enabled": true } }
        }));
        assert_eq!(
            reader.get("settings", "codeEditor.enabled"),
            Some(&json!(true))
        );
    }

    #[test]
    fn dot_path_missing_segment_is_none() {
        let reader = PersistedStateReader::new(json!({
            "settings": { "codeEditor": { "enabled": true } }
        }));
        assert!(reader.get("settings", "codeEditor.theme").is_none());
        assert!(reader.get("settings", "terminal.enabled").is_none());
        assert!(reader.get("missing", "anything").is_none());
    }

    #[test]
    fn dot_path_through_non_object_is_none() {
        let reader = PersistedStateReader::new(json!({
            "settings": { "flag": true }
        }));
        assert!(reader.get("settings", "flag.deeper").is_none());
    }

    #[test]
    fn categories_lists_top_level_keys() {
        let reader = PersistedStateReader::new(json!({ "a": 1, "b": {} }));
        assert_eq!(reader.categories(), vec!["a", "b"]);
        assert!(reader.has_category("a"));
        assert!(!reader.has_category("c"));
    }

    #[test]
    fn table_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let reader = ExportedTableReader::new(dir.path());
        assert!(!reader.table_exists(tables::TOPICS));

        reader
            .write_table(tables::TOPICS, r#"[{"id":"t1"},{"id":"t2"}]"#)
            .unwrap();
        assert!(reader.table_exists(tables::TOPICS));
        assert!(reader.table_size(tables::TOPICS).unwrap() > 0);

        let rows = reader.read_table(tables::TOPICS).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], "t1");

        assert_eq!(reader.open_stream(tables::TOPICS).count().unwrap(), 2);
    }

    #[test]
    fn remove_dir_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let export_dir = dir.path().join("export");
        let reader = ExportedTableReader::new(&export_dir);
        reader.write_table(tables::FILES, "[]").unwrap();
        reader.remove_dir().unwrap();
        assert!(!export_dir.exists());
        reader.remove_dir().unwrap();
    }
}
