// ABOUTME: Memory persistence backends: one JSON file per persona, or in-process only
// ABOUTME: Accepts both list and keyed-object layouts when reading older memory files

use crate::memory::MemoryEntry;
use crate::traits::MemoryPersistence;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// On-disk layouts a memory file may use
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredMemory {
    List(Vec<MemoryEntry>),
    Keyed(BTreeMap<String, MemoryEntry>),
}

impl From<StoredMemory> for Vec<MemoryEntry> {
    fn from(stored: StoredMemory) -> Self {
        match stored {
            StoredMemory::List(entries) => entries,
            StoredMemory::Keyed(map) => map.into_values().collect(),
        }
    }
}

/// Stores each persona's memory as `<dir>/<identity>.json`
#[derive(Debug, Clone)]
pub struct JsonFileMemory {
    dir: PathBuf,
}

impl JsonFileMemory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File used for `identity`, with path-hostile characters replaced
    pub fn path_for(&self, identity: &str) -> PathBuf {
        let safe: String = identity
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || matches!(c, '-' | '_' | ' ') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl MemoryPersistence for JsonFileMemory {
    async fn load(&self, identity: &str) -> Result<Vec<MemoryEntry>> {
        let path = self.path_for(identity);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::debug!(path = %path.display(), "No memory file yet");
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let stored: StoredMemory = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(stored.into())
    }

    async fn save(&self, identity: &str, entries: &[MemoryEntry]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.path_for(identity);
        let json = serde_json::to_string_pretty(entries)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        tracing::debug!(path = %path.display(), entries = entries.len(), "Memory saved");
        Ok(())
    }
}

/// Keeps memory in process only; used in tests and when no directory is configured
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    stores: Mutex<HashMap<String, Vec<MemoryEntry>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the entries for `identity`
    pub fn with_entries(self, identity: &str, entries: Vec<MemoryEntry>) -> Self {
        self.stores
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(identity.to_string(), entries);
        self
    }
}

#[async_trait]
impl MemoryPersistence for InMemoryPersistence {
    async fn load(&self, identity: &str) -> Result<Vec<MemoryEntry>> {
        Ok(self
            .stores
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(identity)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, identity: &str, entries: &[MemoryEntry]) -> Result<()> {
        self.stores
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(identity.to_string(), entries.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_json_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = JsonFileMemory::new(dir.path().join("memory"));
        let entries = vec![MemoryEntry::new("{{key}} likes tea", ["coffee"])];

        persistence.save("Aiko", &entries).await.unwrap();
        assert!(dir.path().join("memory/Aiko.json").exists());
        assert_eq!(persistence.load("Aiko").await.unwrap(), entries);
    }

    #[tokio::test]
    async fn test_json_file_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = JsonFileMemory::new(dir.path());
        assert!(persistence.load("Nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_file_reads_keyed_layout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Aiko.json"),
            r#"{"0": {"content": "x", "keys": ["a"]}}"#,
        )
        .unwrap();
        let persistence = JsonFileMemory::new(dir.path());
        assert_eq!(
            persistence.load("Aiko").await.unwrap(),
            vec![MemoryEntry::new("x", ["a"])]
        );

        std::fs::write(dir.path().join("Empty.json"), "{}").unwrap();
        assert!(persistence.load("Empty").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_errors_but_store_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Aiko.json"), "not json").unwrap();
        let persistence = Arc::new(JsonFileMemory::new(dir.path()));

        assert!(persistence.load("Aiko").await.is_err());
        let store = MemoryStore::load("Aiko", persistence).await;
        assert!(store.is_empty());
    }

    #[test]
    fn test_path_for_sanitizes_identity() {
        let persistence = JsonFileMemory::new("/tmp/mem");
        assert_eq!(
            persistence.path_for("../evil/name"),
            PathBuf::from("/tmp/mem/___evil_name.json")
        );
        assert_eq!(
            persistence.path_for("Aiko Chan"),
            PathBuf::from("/tmp/mem/Aiko Chan.json")
        );
    }
}
