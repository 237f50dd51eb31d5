use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::{Map, Value};

/// A single JSON key-value document on disk, read fresh on every access.
///
/// Writes merge the changed keys into whatever is on disk at write time, so two
/// processes upserting different keys do not clobber each other.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    path: PathBuf,
}

impl DocumentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file reads as an empty document; a corrupt one is an error.
    pub fn read(&self) -> anyhow::Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed reading {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        let parsed: Value = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not valid JSON", self.path.display()))?;
        match parsed {
            Value::Object(map) => Ok(map),
            _ => anyhow::bail!("{} does not hold a JSON object", self.path.display()),
        }
    }

    pub fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.read()?.get(key).cloned())
    }

    /// Set the given keys; `Value::Null` removes a key.
    pub fn upsert(&self, changes: Map<String, Value>) -> anyhow::Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut on_disk = self.read()?;
        for (key, value) in changes {
            if value.is_null() {
                on_disk.remove(&key);
            } else {
                on_disk.insert(key, value);
            }
        }
        write_json_object(&self.path, &on_disk)
    }
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::DocumentStore;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn missing_document_reads_empty() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = DocumentStore::new(temp.path().join("secrets.json"));
        assert!(store.read()?.is_empty());
        assert_eq!(store.get("anything")?, None);
        Ok(())
    }

    #[test]
    fn upsert_merges_with_concurrent_writer() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("secrets.json");
        let store_a = DocumentStore::new(&path);
        let store_b = DocumentStore::new(&path);

        store_a.upsert(obj(json!({"a": 1})))?;
        store_b.upsert(obj(json!({"b": 2})))?;
        store_a.upsert(obj(json!({"a": 3})))?;

        let reloaded = DocumentStore::new(path).read()?;
        assert_eq!(reloaded.get("a"), Some(&json!(3)));
        assert_eq!(reloaded.get("b"), Some(&json!(2)));
        Ok(())
    }

    #[test]
    fn null_removes_key() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = DocumentStore::new(temp.path().join("secrets.json"));
        store.upsert(obj(json!({"a": 1, "b": 2})))?;
        store.upsert(obj(json!({"a": null})))?;
        assert_eq!(store.read()?, obj(json!({"b": 2})));
        Ok(())
    }

    #[test]
    fn corrupt_document_is_an_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("secrets.json");
        std::fs::write(&path, "[1, 2")?;
        assert!(DocumentStore::new(path).read().is_err());
        Ok(())
    }
}
